use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use argh::FromArgs;
use exitcode::ExitCode;
use ipsec_exporter::config::{
    Config, DEFAULT_ADDRESS, DEFAULT_INTERVAL, DEFAULT_IPSEC, DEFAULT_PORT, DEFAULT_SUDO,
    DEFAULT_TIMEOUT,
};
use ipsec_exporter::exporter::{self, Exporter};
use ipsec_exporter::invoker::{ProcessInvoker, resolve_program};
use ipsec_exporter::{Collector, MetricStore, trace};
use metrics::Registry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(FromArgs)]
#[argh(
    description = "Export Libreswan IPsec traffic counters as Prometheus metrics",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level"
    )]
    log_level: String,

    #[argh(
        option,
        short = 'a',
        default = "DEFAULT_ADDRESS.to_string()",
        description = "address the scrape endpoint listens at"
    )]
    address: String,

    #[argh(
        option,
        short = 'p',
        default = "DEFAULT_PORT",
        description = "port the scrape endpoint listens at"
    )]
    port: u16,

    #[argh(
        option,
        short = 'i',
        default = "DEFAULT_INTERVAL.as_secs()",
        description = "seconds between two collections, at least 5"
    )]
    interval: u64,

    #[argh(
        option,
        short = 't',
        default = "DEFAULT_TIMEOUT.as_secs()",
        description = "seconds a status command may run before it is killed"
    )]
    timeout: u64,

    #[argh(
        option,
        default = "PathBuf::from(DEFAULT_IPSEC)",
        description = "the ipsec executable, searched in PATH if it is a bare name"
    )]
    ipsec: PathBuf,

    #[argh(
        switch,
        description = "run ipsec directly instead of through `sudo -n`"
    )]
    no_sudo: bool,
}

impl RootCommand {
    #![allow(clippy::print_stdout)]
    fn show_version(&self) {
        println!("ipsec-exporter {}", PKG_VERSION);
    }

    fn config(&self) -> Result<Config, ExitCode> {
        let sudo = (!self.no_sudo).then(|| PathBuf::from(DEFAULT_SUDO));
        let mut config = Config::new(
            &self.address,
            self.port,
            Duration::from_secs(self.interval),
            Duration::from_secs(self.timeout),
            self.ipsec.clone(),
            sudo,
        )
        .map_err(|err| {
            error!(message = "Invalid configuration", %err);
            exitcode::CONFIG
        })?;

        let resolve = |program: &PathBuf| {
            resolve_program(program).map_err(|err| {
                error!(message = "Executable not available", %err);
                exitcode::OSFILE
            })
        };

        config.ipsec = resolve(&config.ipsec)?;
        if let Some(sudo) = config.sudo.take() {
            config.sudo = Some(resolve(&sudo)?);
        }

        Ok(config)
    }

    pub fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        let log_level =
            std::env::var("IPSEC_EXPORTER_LOG").unwrap_or_else(|_| self.log_level.clone());
        let color = std::io::stdout().is_terminal();
        trace::init(color, &log_level);

        let config = self.config()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("ipsec-exporter-worker")
            .worker_threads(2)
            .enable_io()
            .enable_time()
            .build()
            .map_err(|err| {
                error!(message = "Build tokio runtime failed", %err);
                exitcode::SOFTWARE
            })?;

        runtime.block_on(async move {
            let listener = exporter::bind(config.listen).await.map_err(|err| {
                error!(message = "Unable to start the scrape endpoint", %err);
                exitcode::OSERR
            })?;
            let signals = Signals::new().map_err(|err| {
                error!(message = "Unable to set up signal handlers", %err);
                exitcode::OSERR
            })?;

            info!(
                message = "Start ipsec-exporter",
                version = PKG_VERSION,
                listen = %config.listen,
                interval_secs = config.interval.as_secs(),
                timeout_secs = config.timeout.as_secs(),
                traffic = %config.traffic_command(),
                status = %config.status_command(),
            );

            let store = MetricStore::default();
            let registry = Registry::new();
            let shutdown = CancellationToken::new();

            let collector = Collector::new(ProcessInvoker, &config, store.clone(), &registry);
            let collecting = tokio::spawn({
                let shutdown = shutdown.clone();
                let interval = config.interval;
                async move { collector.run(interval, shutdown).await }
            });
            let serving = tokio::spawn(exporter::serve(
                listener,
                Exporter::new(store, registry),
                shutdown.clone(),
            ));

            signals.recv().await;
            shutdown.cancel();

            let (collected, served) = tokio::join!(collecting, serving);
            for result in [collected, served] {
                if let Err(err) = result {
                    error!(message = "Task did not finish cleanly", %err);
                }
            }

            Ok::<(), ExitCode>(())
        })?;

        runtime.shutdown_timeout(Duration::from_secs(5));
        info!(message = "Shutdown complete");

        Ok(())
    }
}

/// SIGINT and SIGTERM both stop the exporter gracefully.
#[cfg(unix)]
struct Signals {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Signals {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(mut self) {
        let signal = tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
        };

        info!(message = "Signal received", signal);
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> std::io::Result<Self> {
        Ok(Signals)
    }

    async fn recv(self) {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(message = "Listen for ctrl-c failed", %err);
        }
    }
}
