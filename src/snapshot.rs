use std::borrow::Cow;
use std::collections::BTreeMap;

use metrics::{Attributes, Observation, Reporter};

pub const TRAFFIC_METRIC: &str = "ipsec_traffic";
pub const CONNECTION_STATUS_METRIC: &str = "ipsec_connection_status";

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// Identifies one exposed `ipsec_traffic` series, stable across rekeys.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MetricKey {
    pub connection: String,
    pub left_subnet: String,
    pub right_subnet: String,
    pub direction: Direction,
}

impl MetricKey {
    pub fn new(
        connection: impl Into<String>,
        left_subnet: impl Into<String>,
        right_subnet: impl Into<String>,
        direction: Direction,
    ) -> Self {
        MetricKey {
            connection: connection.into(),
            left_subnet: left_subnet.into(),
            right_subnet: right_subnet.into(),
            direction,
        }
    }

    fn attributes(&self) -> Attributes {
        Attributes::from([
            ("connection", Cow::Owned(self.connection.clone())),
            ("direction", Cow::Borrowed(self.direction.as_str())),
            ("left_subnet", Cow::Owned(self.left_subnet.clone())),
            ("right_subnet", Cow::Owned(self.right_subnet.clone())),
        ])
    }
}

/// Everything one collection cycle learned, immutable once built.
///
/// A new cycle never edits a `Snapshot`, it builds the next one and the
/// store swaps it in, so series of torn down tunnels simply vanish.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    traffic: BTreeMap<MetricKey, u128>,
    connections: BTreeMap<String, bool>,
}

impl Snapshot {
    pub fn new(traffic: BTreeMap<MetricKey, u128>, connections: BTreeMap<String, bool>) -> Self {
        Snapshot {
            traffic,
            connections,
        }
    }

    pub fn traffic(&self) -> &BTreeMap<MetricKey, u128> {
        &self.traffic
    }

    /// Loaded connections and whether they have an established IPsec SA
    pub fn connections(&self) -> &BTreeMap<String, bool> {
        &self.connections
    }

    pub fn get(&self, key: &MetricKey) -> Option<u128> {
        self.traffic.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.traffic.is_empty() && self.connections.is_empty()
    }

    pub fn report(&self, reporter: &mut impl Reporter) {
        reporter.start_metric(
            TRAFFIC_METRIC,
            "IPsec traffic in bytes by connection, subnet pair and direction",
        );
        for (key, bytes) in &self.traffic {
            reporter.report(&key.attributes(), Observation::Unsigned(*bytes));
        }
        reporter.finish_metric();

        reporter.start_metric(
            CONNECTION_STATUS_METRIC,
            "Whether the IPsec connection has an established SA",
        );
        for (connection, established) in &self.connections {
            let attrs = Attributes::default().with("connection", connection.clone());
            let value = if *established { 1.0 } else { 0.0 };
            reporter.report(&attrs, Observation::Gauge(value));
        }
        reporter.finish_metric();
    }
}
