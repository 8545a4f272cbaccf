use std::collections::BTreeMap;
use std::net::IpAddr;

use super::{ConnectionRef, split_instance, strip_status_prefix};
use crate::error::{InstanceId, ParseWarning};

/// Child SA descriptions, Libreswan 3/4 and Libreswan 5 spelling.
const ESTABLISHED: [&str; 2] = ["IPsec SA established", "established Child SA"];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubnetPair {
    pub left: String,
    pub right: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceState {
    pub connection: ConnectionRef,
    pub established: bool,
}

/// What `ipsec status` tells about loaded connections and their instances.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatusReport {
    /// Subnet pair by connection key
    pub policies: BTreeMap<String, SubnetPair>,
    pub instances: BTreeMap<InstanceId, InstanceState>,
    /// Established state by connection name
    pub connections: BTreeMap<String, bool>,
    pub warnings: Vec<ParseWarning>,
}

/// Parse the output of `ipsec status`.
///
/// Only two kinds of line matter, the policy line of a connection
///
/// ```text
/// "dev-01": 10.153.214.0/24===203.0.113.5[@left]...198.51.100.7[@right]===10.123.71.0/24; erouted; eroute owner: #2
/// ```
///
/// and the state lines of its instances
///
/// ```text
/// #2: "dev-01":4500 STATE_V2_ESTABLISHED_CHILD_SA (IPsec SA established); REKEY in 27742s; ...
/// ```
///
/// everything else is skipped without a warning.
pub fn parse_status(text: &str) -> StatusReport {
    let mut report = StatusReport::default();

    for (index, line) in text.lines().enumerate() {
        let line = strip_status_prefix(line.trim_end());

        if let Some((instance, rest)) = split_instance(line) {
            let Some((connection, rest)) = ConnectionRef::split(rest.trim_start()) else {
                continue;
            };

            let established = ESTABLISHED.iter().any(|pattern| rest.contains(pattern));
            let seen = report
                .connections
                .entry(connection.name.clone())
                .or_default();
            *seen |= established;

            report
                .instances
                .entry(instance)
                .and_modify(|state| state.established |= established)
                .or_insert(InstanceState {
                    connection,
                    established,
                });

            continue;
        }

        let Some((connection, rest)) = ConnectionRef::split(line) else {
            continue;
        };
        let Some(topology) = topology(rest) else {
            continue;
        };

        report.connections.entry(connection.name.clone()).or_default();

        match subnets(topology) {
            Ok(Some(pair)) => {
                report.policies.entry(connection.key).or_insert(pair);
            }
            // unresolved peers of templates, e.g. `%any`
            Ok(None) => {}
            Err(reason) => report.warnings.push(ParseWarning::Malformed {
                line: index + 1,
                reason,
            }),
        }
    }

    report
}

/// The `left...right` part of a policy line, `None` for any other line of
/// the connection, e.g. `"dev-01":   oriented; my_ip=unset;`.
fn topology(rest: &str) -> Option<&str> {
    let rest = rest.strip_prefix(':')?.trim_start();
    let topology = rest.split(';').next()?.trim_end();

    if topology.contains("...") && topology.contains("===") && !topology.contains(char::is_whitespace)
    {
        Some(topology)
    } else {
        None
    }
}

fn subnets(topology: &str) -> Result<Option<SubnetPair>, &'static str> {
    let (left, right) = topology
        .split_once("...")
        .ok_or("missing `...` between endpoints")?;

    // left side reads `subnet===host---nexthop`, right side
    // `nexthop---host===subnet`
    let left = match left.split_once("===") {
        Some((subnet, _host)) => Some(subnet.to_string()),
        None => {
            let host = left.split_once("---").map_or(left, |(host, _nexthop)| host);
            host_subnet(host)?
        }
    };
    let right = match right.rsplit_once("===") {
        Some((_host, subnet)) => Some(subnet.to_string()),
        None => {
            let host = right.rsplit_once("---").map_or(right, |(_nexthop, host)| host);
            host_subnet(host)?
        }
    };

    match (left, right) {
        (Some(left), Some(right)) if !left.is_empty() && !right.is_empty() => {
            Ok(Some(SubnetPair { left, right }))
        }
        (Some(_), Some(_)) => Err("empty subnet"),
        _ => Ok(None),
    }
}

/// An endpoint without a client subnet protects just its own address,
/// e.g. `192.0.2.10<192.0.2.10>[@road]` becomes `192.0.2.10/32`.
fn host_subnet(endpoint: &str) -> Result<Option<String>, &'static str> {
    if endpoint.starts_with('%') {
        return Ok(None);
    }

    let end = endpoint
        .find(['<', '[', '{', '-', ','])
        .unwrap_or(endpoint.len());
    let addr = endpoint[..end]
        .parse::<IpAddr>()
        .map_err(|_| "unrecognized endpoint address")?;

    Ok(Some(match addr {
        IpAddr::V4(addr) => format!("{addr}/32"),
        IpAddr::V6(addr) => format!("{addr}/128"),
    }))
}
