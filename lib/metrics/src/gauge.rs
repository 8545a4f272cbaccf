use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::metric::{MetricObserver, Observation};

/// A float gauge, the value is stored as raw bits so it can live in an atomic.
#[derive(Clone, Debug, Default)]
pub struct Gauge {
    pub(crate) state: Arc<AtomicU64>,
}

impl Gauge {
    pub fn set(&self, value: f64) {
        self.state.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn fetch(&self) -> f64 {
        f64::from_bits(self.state.load(Ordering::Relaxed))
    }
}

impl MetricObserver for Gauge {
    type Recorder = Self;

    fn recorder(&self) -> Self::Recorder {
        self.clone()
    }

    fn observe(&self) -> Observation {
        Observation::Gauge(self.fetch())
    }
}
