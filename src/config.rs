use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::invoker::StatusCommand;

pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9754;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_IPSEC: &str = "ipsec";
pub const DEFAULT_SUDO: &str = "sudo";

/// Polling any faster only keeps pluto busy answering whack.
pub const MIN_INTERVAL: Duration = Duration::from_secs(5);
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// The address the scrape endpoint listens at
    pub listen: SocketAddr,

    /// How often the status commands run
    pub interval: Duration,

    /// Wall clock limit for every single status command
    pub timeout: Duration,

    /// The `ipsec` executable
    pub ipsec: PathBuf,

    /// The `sudo` executable, `None` when the exporter already runs privileged
    pub sudo: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            ipsec: PathBuf::from(DEFAULT_IPSEC),
            sudo: Some(PathBuf::from(DEFAULT_SUDO)),
        }
    }
}

impl Config {
    pub fn new(
        address: &str,
        port: u16,
        interval: Duration,
        timeout: Duration,
        ipsec: PathBuf,
        sudo: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let ip = address
            .parse::<IpAddr>()
            .map_err(|_err| ConfigError::Address(address.to_string()))?;

        let config = Config {
            listen: SocketAddr::new(ip, port),
            interval,
            timeout,
            ipsec,
            sudo,
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval < MIN_INTERVAL {
            return Err(ConfigError::IntervalTooShort {
                min: MIN_INTERVAL,
                got: self.interval,
            });
        }

        if self.timeout < MIN_TIMEOUT {
            return Err(ConfigError::TimeoutTooShort {
                min: MIN_TIMEOUT,
                got: self.timeout,
            });
        }

        Ok(())
    }

    /// `ipsec trafficstatus`, the per instance byte counters
    pub fn traffic_command(&self) -> StatusCommand {
        self.command("trafficstatus")
    }

    /// `ipsec status`, the subnets and states of every connection
    pub fn status_command(&self) -> StatusCommand {
        self.command("status")
    }

    fn command(&self, subcommand: &str) -> StatusCommand {
        let command = StatusCommand::new(self.ipsec.clone(), [subcommand]);

        match &self.sudo {
            Some(sudo) => command.with_sudo(sudo.clone()),
            None => command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen.port(), 9754);
        assert_eq!(
            config.traffic_command().to_string(),
            "sudo -n ipsec trafficstatus"
        );
    }

    #[test]
    fn without_sudo() {
        let config = Config {
            sudo: None,
            ipsec: PathBuf::from("/usr/sbin/ipsec"),
            ..Default::default()
        };

        assert_eq!(config.status_command().to_string(), "/usr/sbin/ipsec status");
    }

    #[test]
    fn reject_short_interval() {
        let result = Config::new(
            "127.0.0.1",
            9754,
            Duration::from_secs(1),
            DEFAULT_TIMEOUT,
            PathBuf::from("ipsec"),
            None,
        );

        assert!(matches!(
            result,
            Err(ConfigError::IntervalTooShort { got, .. }) if got == Duration::from_secs(1)
        ));
    }

    #[test]
    fn reject_zero_timeout() {
        let result = Config::new(
            "::",
            9754,
            DEFAULT_INTERVAL,
            Duration::ZERO,
            PathBuf::from("ipsec"),
            None,
        );

        assert!(matches!(result, Err(ConfigError::TimeoutTooShort { .. })));
    }

    #[test]
    fn listen_address() {
        let config = Config::new(
            "::1",
            9100,
            DEFAULT_INTERVAL,
            DEFAULT_TIMEOUT,
            PathBuf::from("ipsec"),
            None,
        )
        .unwrap();
        assert_eq!(config.listen, "[::1]:9100".parse::<SocketAddr>().unwrap());

        let result = Config::new(
            "localhost",
            9100,
            DEFAULT_INTERVAL,
            DEFAULT_TIMEOUT,
            PathBuf::from("ipsec"),
            None,
        );
        assert!(matches!(result, Err(ConfigError::Address(addr)) if addr == "localhost"));
    }
}
