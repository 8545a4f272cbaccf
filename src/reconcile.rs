use std::collections::BTreeMap;

use crate::parser::TrafficRecord;
use crate::snapshot::{Direction, MetricKey};

/// Fold per instance records into one value per exposed series.
///
/// Instances of the same connection and subnet pair, e.g. the old and the
/// new child SA while a rekey is in progress, are summed. Connections
/// without any record produce no series at all.
pub fn reconcile<'a, I>(records: I) -> BTreeMap<MetricKey, u128>
where
    I: IntoIterator<Item = &'a TrafficRecord>,
{
    let mut traffic = BTreeMap::new();

    for record in records {
        for (direction, bytes) in [
            (Direction::In, record.in_bytes),
            (Direction::Out, record.out_bytes),
        ] {
            let key = MetricKey::new(
                record.connection.as_str(),
                record.left_subnet.as_str(),
                record.right_subnet.as_str(),
                direction,
            );

            let value: &mut u128 = traffic.entry(key).or_default();
            *value = value.saturating_add(bytes);
        }
    }

    traffic
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::InstanceId;

    fn record(instance: u64, connection: &str, right: &str, in_bytes: u128, out_bytes: u128) -> TrafficRecord {
        TrafficRecord {
            instance: InstanceId(instance),
            connection: connection.to_string(),
            left_subnet: "10.153.214.0/24".to_string(),
            right_subnet: right.to_string(),
            in_bytes,
            out_bytes,
        }
    }

    fn key(connection: &str, right: &str, direction: Direction) -> MetricKey {
        MetricKey::new(connection, "10.153.214.0/24", right, direction)
    }

    #[test]
    fn order_independent() {
        let records = vec![
            record(2, "dev-01", "10.123.71.0/24", 10, 20),
            record(5, "dev-01", "10.123.71.0/24", 1, 2),
            record(4, "office", "172.16.0.0/24", 7, 8),
            record(6, "office", "172.16.1.0/24", 3, 4),
        ];
        let expected = reconcile(&records);

        let mut reversed = records.clone();
        reversed.reverse();
        assert_eq!(reconcile(&reversed), expected);

        let mut rotated = records.clone();
        rotated.rotate_left(2);
        assert_eq!(reconcile(&rotated), expected);

        // idempotent
        assert_eq!(reconcile(&records), expected);
    }

    #[test]
    fn rekey_continuity() {
        let old = record(2, "dev-01", "10.123.71.0/24", 500, 50);
        let new = record(5, "dev-01", "10.123.71.0/24", 20, 2);

        let during = reconcile([&old, &new]);
        assert_eq!(
            during,
            BTreeMap::from([
                (key("dev-01", "10.123.71.0/24", Direction::In), 520),
                (key("dev-01", "10.123.71.0/24", Direction::Out), 52),
            ])
        );

        // the old SA is torn down, only the new one is reported
        let after = reconcile([&new]);
        assert_eq!(
            after,
            BTreeMap::from([
                (key("dev-01", "10.123.71.0/24", Direction::In), 20),
                (key("dev-01", "10.123.71.0/24", Direction::Out), 2),
            ])
        );
    }

    #[test]
    fn subnet_pairs_are_separate_series() {
        let traffic = reconcile(&[
            record(4, "office", "172.16.0.0/24", 7, 8),
            record(6, "office", "172.16.1.0/24", 3, 4),
        ]);

        assert_eq!(traffic.len(), 4);
        assert_eq!(traffic[&key("office", "172.16.1.0/24", Direction::In)], 3);
        assert_eq!(traffic[&key("office", "172.16.0.0/24", Direction::Out)], 8);
    }

    #[test]
    fn saturate() {
        let traffic = reconcile(&[
            record(2, "dev-01", "10.123.71.0/24", u128::MAX, 1),
            record(5, "dev-01", "10.123.71.0/24", 1, 1),
        ]);

        assert_eq!(traffic[&key("dev-01", "10.123.71.0/24", Direction::In)], u128::MAX);
    }

    #[test]
    fn no_instances() {
        assert!(reconcile(&[] as &[TrafficRecord]).is_empty());
    }
}
