use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::attributes::Attributes;

/// A `Metric` records an `Observation` for each unique set of `Attributes`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    Counter(u64),
    /// A monotonic total that is not an integer, e.g. CPU seconds
    Sum(f64),
    Gauge(f64),
    /// A gauge holding an exact unsigned integer, e.g. byte counters that must
    /// not lose precision before they are rendered.
    Unsigned(u128),
}

impl Observation {
    pub fn kind(&self) -> &'static str {
        match self {
            Observation::Counter(_) | Observation::Sum(_) => "counter",
            Observation::Gauge(_) | Observation::Unsigned(_) => "gauge",
        }
    }
}

/// Types that wish to be used with `Metric` must implement this trait
/// that exposes the necessary reporting API
///
/// `Metric` maintains a distinct `MetricObserver` for each unique set of `Attributes`
pub trait MetricObserver: Default + std::fmt::Debug + Send + 'static {
    /// The type that is used to modify the value reported by this MetricObserver
    type Recorder;

    /// Return a `Self::Recorder` that can be used to mutate the value reported
    /// by this `MetricObserver`
    fn recorder(&self) -> Self::Recorder;

    /// Return the current value for this
    fn observe(&self) -> Observation;
}

#[derive(Clone)]
pub struct Metric<T: MetricObserver> {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) shard: Arc<Mutex<BTreeMap<Attributes, T>>>,
}

impl<T: MetricObserver> Metric<T> {
    pub fn recorder(&self, attributes: impl Into<Attributes>) -> T::Recorder {
        self.observer(attributes).recorder()
    }

    fn observer(&self, attributes: impl Into<Attributes>) -> MappedMutexGuard<'_, T> {
        MutexGuard::map(self.shard.lock(), |values| {
            values.entry(attributes.into()).or_default()
        })
    }
}
