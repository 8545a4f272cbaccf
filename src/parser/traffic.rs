use std::iter::Enumerate;
use std::num::IntErrorKind;
use std::str::Lines;

use super::{ConnectionRef, split_instance, strip_status_prefix};
use crate::error::{InstanceId, ParseWarning};

/// One `ipsec trafficstatus` line, before it is correlated with the subnets.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrafficLine {
    /// 1-based line number in the command output
    pub line: usize,
    pub instance: InstanceId,
    pub connection: ConnectionRef,
    pub in_bytes: u128,
    pub out_bytes: u128,
}

/// Lazily parse the output of `ipsec trafficstatus`.
///
/// Lines that are not instance lines (banners, blank lines) are ignored.
/// Nothing is parsed until the iterator is driven, and calling this again
/// on the same text yields the same items.
pub fn traffic_lines(text: &str) -> TrafficLines<'_> {
    TrafficLines {
        lines: text.lines().enumerate(),
    }
}

#[derive(Clone, Debug)]
pub struct TrafficLines<'a> {
    lines: Enumerate<Lines<'a>>,
}

impl Iterator for TrafficLines<'_> {
    type Item = Result<TrafficLine, ParseWarning>;

    fn next(&mut self) -> Option<Self::Item> {
        for (index, line) in self.lines.by_ref() {
            let line = strip_status_prefix(line.trim_end());
            let Some((instance, rest)) = split_instance(line) else {
                continue;
            };

            return Some(parse_line(index + 1, instance, rest));
        }

        None
    }
}

fn parse_line(line: usize, instance: InstanceId, rest: &str) -> Result<TrafficLine, ParseWarning> {
    let malformed = |reason| ParseWarning::Malformed { line, reason };

    let (connection, fields) =
        ConnectionRef::split(rest.trim_start()).ok_or_else(|| malformed("missing connection name"))?;

    let mut in_bytes = None;
    let mut out_bytes = None;
    for field in Fields::new(fields) {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };

        match key {
            "inBytes" => {
                let value = counter(line, key, value).ok_or_else(|| malformed("invalid inBytes"))?;
                in_bytes = Some(value);
            }
            "outBytes" => {
                let value = counter(line, key, value).ok_or_else(|| malformed("invalid outBytes"))?;
                out_bytes = Some(value);
            }
            _ => {}
        }
    }

    Ok(TrafficLine {
        line,
        instance,
        connection,
        in_bytes: in_bytes.ok_or_else(|| malformed("missing inBytes"))?,
        out_bytes: out_bytes.ok_or_else(|| malformed("missing outBytes"))?,
    })
}

/// A byte counter, counters too large even for u128 stick at its maximum.
fn counter(line: usize, key: &str, value: &str) -> Option<u128> {
    match value.parse::<u128>() {
        Ok(value) => Some(value),
        Err(err) if *err.kind() == IntErrorKind::PosOverflow => {
            debug!(message = "Byte counter overflows, saturating", line, key, value);
            Some(u128::MAX)
        }
        Err(_err) => None,
    }
}

/// Comma separated `key=value` fields. Commas inside single quotes, as in
/// `id='C=CH, O=Example, CN=gw'`, do not separate fields.
struct Fields<'a> {
    remain: &'a str,
}

impl<'a> Fields<'a> {
    fn new(text: &'a str) -> Self {
        Fields { remain: text }
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.remain.is_empty() {
            let mut quoted = false;
            let mut end = self.remain.len();
            for (pos, c) in self.remain.char_indices() {
                match c {
                    '\'' => quoted = !quoted,
                    ',' if !quoted => {
                        end = pos;
                        break;
                    }
                    _ => {}
                }
            }

            let field = self.remain[..end].trim();
            self.remain = self.remain.get(end + 1..).unwrap_or_default();
            if !field.is_empty() {
                return Some(field);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fields() {
        let fields = Fields::new(
            " 192.0.2.10, type=ESP, inBytes=1,, outBytes=2, id='C=CH, O=Example, CN=gw', maxBytes=2^63B",
        )
        .collect::<Vec<_>>();

        assert_eq!(
            fields,
            vec![
                "192.0.2.10",
                "type=ESP",
                "inBytes=1",
                "outBytes=2",
                "id='C=CH, O=Example, CN=gw'",
                "maxBytes=2^63B",
            ]
        );
    }

    #[test]
    fn ignore_unrelated_lines() {
        let text = "\n000 using kernel interface: xfrm\n000 \nTotal IPsec connections: loaded 2, active 1\n";
        assert_eq!(traffic_lines(text).count(), 0);
    }

    #[test]
    fn suffix_and_peer() {
        let text = r#"006 #8: "rw"[1] 192.0.2.10, type=ESP, add_time=1681291456, inBytes=77, outBytes=88, maxBytes=2^63B, id='@road'"#;

        let line = traffic_lines(text).next().unwrap().unwrap();
        assert_eq!(
            line,
            TrafficLine {
                line: 1,
                instance: InstanceId(8),
                connection: ConnectionRef {
                    name: "rw".to_string(),
                    key: "rw[1]".to_string(),
                },
                in_bytes: 77,
                out_bytes: 88,
            }
        );
    }

    #[test]
    fn beyond_64_bits() {
        let text = r#"#4: "big", type=ESP, inBytes=340282366920938463463374607431768211455, outBytes=18446744073709551616"#;

        let line = traffic_lines(text).next().unwrap().unwrap();
        assert_eq!(line.in_bytes, u128::MAX);
        assert_eq!(line.out_bytes, u64::MAX as u128 + 1);
    }

    #[test]
    fn beyond_128_bits_saturates() {
        let text = r#"#4: "big", type=ESP, inBytes=340282366920938463463374607431768211456, outBytes=99999999999999999999999999999999999999999"#;

        let line = traffic_lines(text).next().unwrap().unwrap();
        assert_eq!(line.in_bytes, u128::MAX);
        assert_eq!(line.out_bytes, u128::MAX);
    }

    #[test]
    fn malformed() {
        for (text, reason) in [
            (r#"#2: dev-01, inBytes=1, outBytes=2"#, "missing connection name"),
            (r#"#2: "dev-01", type=ESP, outBytes=2"#, "missing inBytes"),
            (r#"#2: "dev-01", type=ESP, inBytes=1"#, "missing outBytes"),
            (r#"#2: "dev-01", inBytes=-1, outBytes=2"#, "invalid inBytes"),
            (r#"#2: "dev-01", inBytes=1, outBytes=2.5"#, "invalid outBytes"),
            (r#"#2: "dev-01", inBytes=1, outBy"#, "missing outBytes"),
        ] {
            let result = traffic_lines(text).next().unwrap();
            assert_eq!(result, Err(ParseWarning::Malformed { line: 1, reason }), "{text}");
        }
    }

    #[test]
    fn counters_inside_id_are_not_counters() {
        let text = r#"#2: "dev-01", type=ESP, inBytes=1, outBytes=2, id='CN=inBytes=9, O=x'"#;

        let line = traffic_lines(text).next().unwrap().unwrap();
        assert_eq!(line.in_bytes, 1);
    }
}
