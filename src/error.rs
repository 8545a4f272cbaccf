use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Identifier of one security association instance, the `#2` in `#2: "dev-01"`.
///
/// Libreswan allocates a new serial on every rekey, so this is never stable
/// across collection cycles.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("command did not finish in {0:?} and was killed")]
    Timeout(Duration),
    #[error("command exited with code {code:?}, stderr: {stderr:?}")]
    Exit { code: Option<i32>, stderr: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unable to run command, {0}")]
    Spawn(#[source] std::io::Error),
}

/// A per-line or per-instance problem, it never aborts a parse pass.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseWarning {
    #[error("malformed line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },
    #[error("no subnet information for instance {instance} of connection {connection:?}")]
    CorrelationGap {
        instance: InstanceId,
        connection: String,
    },
}

impl ParseWarning {
    pub fn kind(&self) -> &'static str {
        match self {
            ParseWarning::Malformed { .. } => "malformed",
            ParseWarning::CorrelationGap { .. } => "correlation_gap",
        }
    }
}

/// A whole collection cycle failed, the previous snapshot stays published.
#[derive(Debug, thiserror::Error)]
#[error("`{command}` failed, {source}")]
pub struct CollectError {
    pub command: String,
    #[source]
    pub source: InvokeError,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid listen address {0:?}")]
    Address(String),
    #[error("interval must be at least {}s, got {}s", .min.as_secs(), .got.as_secs())]
    IntervalTooShort { min: Duration, got: Duration },
    #[error("timeout must be at least {}s, got {}s", .min.as_secs(), .got.as_secs())]
    TimeoutTooShort { min: Duration, got: Duration },
    #[error("{path:?} is not an executable, {reason}")]
    NotExecutable { path: PathBuf, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("unable to bind {addr}, {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = CollectError {
            command: "sudo -n ipsec trafficstatus".to_string(),
            source: InvokeError::Exit {
                code: Some(3),
                stderr: "whack: Pluto is not running".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "`sudo -n ipsec trafficstatus` failed, command exited with code Some(3), stderr: \"whack: Pluto is not running\""
        );

        let warning = ParseWarning::CorrelationGap {
            instance: InstanceId(7),
            connection: "dev-01".to_string(),
        };
        assert_eq!(warning.kind(), "correlation_gap");
        assert_eq!(
            warning.to_string(),
            "no subnet information for instance #7 of connection \"dev-01\""
        );
    }
}
