use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::snapshot::Snapshot;

/// Shared holder of the latest published [`Snapshot`].
///
/// Clones share the same slot. Readers get an `Arc` to a whole snapshot and
/// never wait on the writer, publishing replaces the pointer in one step.
#[derive(Clone, Debug)]
pub struct MetricStore {
    inner: Arc<ArcSwap<Snapshot>>,
}

impl Default for MetricStore {
    fn default() -> Self {
        MetricStore::new(Snapshot::default())
    }
}

impl MetricStore {
    pub fn new(initial: Snapshot) -> Self {
        MetricStore {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    pub fn publish(&self, snapshot: Snapshot) {
        self.inner.store(Arc::new(snapshot));
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.inner.load_full()
    }
}
