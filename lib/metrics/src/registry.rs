use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::attributes::{Attributes, assert_legal_key};
use crate::metric::{Metric, MetricObserver, Observation};
use crate::{Counter, Gauge};

/// A cheap to clone handle of a set of metric families.
#[derive(Clone, Default)]
pub struct Registry {
    counters: Arc<Mutex<BTreeMap<&'static str, Metric<Counter>>>>,
    gauges: Arc<Mutex<BTreeMap<&'static str, Metric<Gauge>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register_counter(
        &self,
        name: &'static str,
        description: &'static str,
    ) -> Metric<Counter> {
        assert_legal_key(name);

        self.counters
            .lock()
            .entry(name)
            .or_insert_with(|| Metric {
                name,
                description,
                shard: Arc::new(Mutex::new(BTreeMap::new())),
            })
            .clone()
    }

    pub fn register_gauge(&self, name: &'static str, description: &'static str) -> Metric<Gauge> {
        assert_legal_key(name);

        self.gauges
            .lock()
            .entry(name)
            .or_insert_with(|| Metric {
                name,
                description,
                shard: Arc::new(Mutex::new(BTreeMap::new())),
            })
            .clone()
    }

    pub fn report(&self, reporter: &mut impl Reporter) {
        self.report_generic(reporter, Arc::clone(&self.counters));
        self.report_generic(reporter, Arc::clone(&self.gauges));
    }

    fn report_generic<M: MetricObserver>(
        &self,
        reporter: &mut impl Reporter,
        metrics: Arc<Mutex<BTreeMap<&'static str, Metric<M>>>>,
    ) {
        metrics.lock().iter().for_each(|(_, set)| {
            reporter.start_metric(set.name, set.description);
            set.shard
                .lock()
                .iter()
                .for_each(|(attrs, metric)| reporter.report(attrs, metric.observe()));
            reporter.finish_metric()
        })
    }
}

pub trait Reporter {
    fn start_metric(&mut self, name: &'static str, description: &'static str);

    fn report(&mut self, attrs: &Attributes, observation: Observation);

    /// Finish recording a given metric
    fn finish_metric(&mut self);

    /// Report a family that holds exactly one series without labels
    fn report_single(
        &mut self,
        name: &'static str,
        description: &'static str,
        observation: Observation,
    ) {
        self.start_metric(name, description);
        self.report(&Attributes::default(), observation);
        self.finish_metric();
    }
}
