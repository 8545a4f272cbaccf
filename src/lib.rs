//! Collects IPsec tunnel traffic counters from Libreswan's status commands
//! and serves them in the Prometheus text format.

#[macro_use]
extern crate tracing;

pub mod config;
pub mod error;
pub mod exporter;
pub mod invoker;
pub mod parser;
pub mod reconcile;
pub mod scheduler;
pub mod selfstat;
pub mod snapshot;
pub mod store;
pub mod trace;

pub use config::Config;
pub use exporter::Exporter;
pub use scheduler::Collector;
pub use snapshot::{Direction, MetricKey, Snapshot};
pub use store::MetricStore;
