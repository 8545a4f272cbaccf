use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{Attributes, Counter, Gauge, Registry};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{CollectError, ParseWarning};
use crate::invoker::{Invoke, StatusCommand};
use crate::parser::{self, ParseOutput};
use crate::reconcile::reconcile;
use crate::snapshot::Snapshot;
use crate::store::MetricStore;

struct Stats {
    success: Counter,
    failure: Counter,
    malformed: Counter,
    correlation_gap: Counter,
    duration: Gauge,
    last_success: Gauge,
}

impl Stats {
    fn new(registry: &Registry) -> Self {
        let collections = registry.register_counter(
            "ipsec_exporter_collections_total",
            "Collection cycles by result",
        );
        let warnings = registry.register_counter(
            "ipsec_exporter_parse_warnings_total",
            "Status lines or instances skipped while parsing, by kind",
        );

        Stats {
            success: collections.recorder(&[("result", "success")]),
            failure: collections.recorder(&[("result", "failure")]),
            malformed: warnings.recorder(&[("kind", "malformed")]),
            correlation_gap: warnings.recorder(&[("kind", "correlation_gap")]),
            duration: registry
                .register_gauge(
                    "ipsec_exporter_collection_duration_seconds",
                    "Duration of the last collection cycle",
                )
                .recorder(Attributes::default()),
            last_success: registry
                .register_gauge(
                    "ipsec_exporter_last_success_timestamp_seconds",
                    "Unix time of the last successful collection cycle",
                )
                .recorder(Attributes::default()),
        }
    }
}

/// Runs the status commands on a fixed schedule and publishes what they
/// report.
///
/// The collector is the only writer of its [`MetricStore`]. A cycle that
/// fails leaves the store alone, so scrapes keep seeing the last good
/// snapshot.
pub struct Collector<I> {
    invoker: I,
    traffic: StatusCommand,
    status: StatusCommand,
    timeout: Duration,
    store: MetricStore,
    stats: Stats,
}

impl<I: Invoke> Collector<I> {
    pub fn new(invoker: I, config: &Config, store: MetricStore, registry: &Registry) -> Self {
        Collector {
            invoker,
            traffic: config.traffic_command(),
            status: config.status_command(),
            timeout: config.timeout,
            store,
            stats: Stats::new(registry),
        }
    }

    /// Run both status commands and parse their output. Either command
    /// failing fails the whole collection, the other one is killed if it is
    /// still running.
    pub async fn collect(&self) -> Result<ParseOutput, CollectError> {
        let (traffic, status) =
            tokio::try_join!(self.invoke(&self.traffic), self.invoke(&self.status))?;

        Ok(parser::parse(&traffic, &status))
    }

    async fn invoke(&self, command: &StatusCommand) -> Result<String, CollectError> {
        self.invoker
            .invoke(command, self.timeout)
            .await
            .map_err(|source| CollectError {
                command: command.to_string(),
                source,
            })
    }

    /// One collection cycle, returns whether a new snapshot was published.
    pub async fn tick(&self) -> bool {
        let start = Instant::now();
        let result = self.collect().await;
        let elapsed = start.elapsed();
        self.stats.duration.set(elapsed.as_secs_f64());

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                self.stats.failure.inc(1);
                warn!(
                    message = "Collection failed, snapshot publish skipped",
                    %err,
                    elapsed_ms = elapsed.as_millis() as u64,
                );

                return false;
            }
        };

        for warning in &output.warnings {
            match warning {
                ParseWarning::Malformed { .. } => self.stats.malformed.inc(1),
                ParseWarning::CorrelationGap { .. } => self.stats.correlation_gap.inc(1),
            }

            debug!(message = "Skipped status output", kind = warning.kind(), %warning);
        }
        if !output.warnings.is_empty() {
            warn!(
                message = "Some status output could not be used",
                skipped = output.skipped(),
                records = output.records.len(),
            );
        }

        let traffic = reconcile(&output.records);
        let series = traffic.len();
        self.store.publish(Snapshot::new(traffic, output.connections));

        self.stats.success.inc(1);
        self.stats
            .last_success
            .set(Utc::now().timestamp_millis() as f64 / 1000.0);

        debug!(
            message = "Published snapshot",
            series,
            elapsed_ms = elapsed.as_millis() as u64,
        );

        true
    }

    /// Tick until `shutdown` is cancelled. A cycle that overruns `interval`
    /// delays the next one, cycles never overlap. Cancellation also aborts
    /// a cycle in flight, which kills its commands.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = self.tick() => {}
            }
        }

        info!(message = "Collection loop stopped");
    }
}
