//! Parsers for the text Libreswan's `ipsec trafficstatus` and `ipsec status`
//! print, and the correlation that joins the two.
//!
//! Parsing is split in two stages. [`traffic_lines`] and [`parse_status`]
//! each understand exactly one command, [`correlate`] attaches subnet pairs
//! to the traffic lines afterwards. Neither stage fails as a whole, every
//! problem is scoped to one line or one instance and ends up as a
//! [`ParseWarning`].

mod status;
mod traffic;

use std::collections::{BTreeMap, BTreeSet};

pub use status::{InstanceState, StatusReport, SubnetPair, parse_status};
pub use traffic::{TrafficLine, TrafficLines, traffic_lines};

use crate::error::{InstanceId, ParseWarning};

/// One SA instance with its byte counters and the subnet pair it protects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrafficRecord {
    pub instance: InstanceId,
    pub connection: String,
    pub left_subnet: String,
    pub right_subnet: String,
    pub in_bytes: u128,
    pub out_bytes: u128,
}

/// The connection a line refers to.
///
/// `key` is the name exactly as pluto prints it, instance suffix included,
/// e.g. `rw[1]` or `dev-01/1x2`, and is what status lines are joined on.
/// `name` drops the suffix and becomes the `connection` label.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnectionRef {
    pub name: String,
    pub key: String,
}

impl ConnectionRef {
    /// Parse `"dev-01"[1] rest` into the reference and whatever follows the
    /// name and its suffixes. `None` when the text does not start with a
    /// quoted name.
    pub fn split(text: &str) -> Option<(ConnectionRef, &str)> {
        let quoted = text.strip_prefix('"')?;
        let end = quoted.find('"')?;
        let quoted_name = &quoted[..end];
        if quoted_name.is_empty() {
            return None;
        }

        let mut rest = &quoted[end + 1..];
        let mut key = quoted_name.to_string();
        while let Some(instance) = rest.strip_prefix('[') {
            let Some(close) = instance.find(']') else {
                break;
            };

            key.push_str(&rest[..close + 2]);
            rest = &instance[close + 1..];
        }

        let name = strip_alias(quoted_name).to_string();

        Some((ConnectionRef { name, key }, rest))
    }
}

/// `leftsubnets=`/`rightsubnets=` expand one conn into aliases named
/// `<conn>/<n>x<m>`, they all belong to the same logical connection.
fn strip_alias(name: &str) -> &str {
    match name.rsplit_once('/') {
        Some((base, alias)) if !base.is_empty() => match alias.split_once('x') {
            Some((l, r)) if is_digits(l) && is_digits(r) => base,
            _ => name,
        },
        _ => name,
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Older whack prints a three digit status code in front of every line,
/// e.g. `006 #2: "dev-01"...`.
pub fn strip_status_prefix(line: &str) -> &str {
    let bytes = line.as_bytes();
    if bytes.len() >= 4 && bytes[..3].iter().all(u8::is_ascii_digit) && bytes[3] == b' ' {
        &line[4..]
    } else {
        line
    }
}

/// Split `#2: rest` into the instance serial and the rest, for any line
/// that starts like an instance line.
pub(crate) fn split_instance(line: &str) -> Option<(InstanceId, &str)> {
    let serial = line.strip_prefix('#')?;
    let colon = serial.find(':')?;
    let digits = &serial[..colon];
    if !is_digits(digits) {
        return None;
    }

    let id = digits.parse::<u64>().ok()?;
    Some((InstanceId(id), &serial[colon + 1..]))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParseOutput {
    pub records: Vec<TrafficRecord>,

    /// Every loaded connection and whether it has an established IPsec SA
    pub connections: BTreeMap<String, bool>,

    pub warnings: Vec<ParseWarning>,
}

impl ParseOutput {
    /// Lines and instances that did not become a record
    pub fn skipped(&self) -> usize {
        self.warnings.len()
    }
}

/// Attach a subnet pair to every traffic line.
///
/// The pair is looked up by the line's own connection key first, then by
/// the key the status output names for the same instance, and finally by
/// the bare connection name.
pub fn correlate<I>(lines: I, status: &StatusReport) -> (Vec<TrafficRecord>, Vec<ParseWarning>)
where
    I: IntoIterator<Item = TrafficLine>,
{
    let mut records = Vec::new();
    let mut warnings = Vec::new();

    for line in lines {
        let pair = status
            .policies
            .get(&line.connection.key)
            .or_else(|| {
                status
                    .instances
                    .get(&line.instance)
                    .and_then(|state| status.policies.get(&state.connection.key))
            })
            .or_else(|| status.policies.get(&line.connection.name));

        match pair {
            Some(pair) => records.push(TrafficRecord {
                instance: line.instance,
                connection: line.connection.name,
                left_subnet: pair.left.clone(),
                right_subnet: pair.right.clone(),
                in_bytes: line.in_bytes,
                out_bytes: line.out_bytes,
            }),
            None => warnings.push(ParseWarning::CorrelationGap {
                instance: line.instance,
                connection: line.connection.name,
            }),
        }
    }

    (records, warnings)
}

/// Run both parsers and the correlation over the output of one collection
/// cycle.
pub fn parse(traffic: &str, status: &str) -> ParseOutput {
    let report = parse_status(status);

    let mut warnings = Vec::new();
    let mut seen = BTreeSet::new();
    let mut lines = Vec::new();
    for result in traffic_lines(traffic) {
        match result {
            Ok(line) => {
                if seen.insert(line.instance) {
                    lines.push(line);
                } else {
                    warnings.push(ParseWarning::Malformed {
                        line: line.line,
                        reason: "duplicate instance",
                    });
                }
            }
            Err(warning) => warnings.push(warning),
        }
    }

    let (records, gaps) = correlate(lines, &report);
    warnings.extend(report.warnings);
    warnings.extend(gaps);

    ParseOutput {
        records,
        connections: report.connections,
        warnings,
    }
}
