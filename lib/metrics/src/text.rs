//! Prometheus text exposition format (version 0.0.4).

use std::fmt::Write;

use crate::attributes::Attributes;
use crate::metric::Observation;
use crate::registry::Reporter;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

struct Family {
    name: &'static str,
    description: &'static str,
    header: bool,
}

/// A `Reporter` which renders everything it is given into a text buffer.
///
/// The `# HELP` and `# TYPE` lines of a family are written lazily, right
/// before its first sample, so families without any series render nothing.
#[derive(Default)]
pub struct TextEncoder {
    buf: String,
    current: Option<Family>,
}

impl TextEncoder {
    pub fn new() -> Self {
        Self::with_capacity(8 * 1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        TextEncoder {
            buf: String::with_capacity(capacity),
            current: None,
        }
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

impl Reporter for TextEncoder {
    fn start_metric(&mut self, name: &'static str, description: &'static str) {
        self.current = Some(Family {
            name,
            description,
            header: false,
        });
    }

    fn report(&mut self, attrs: &Attributes, observation: Observation) {
        let Some(family) = self.current.as_mut() else {
            return;
        };

        if !family.header {
            self.buf.push_str("# HELP ");
            self.buf.push_str(family.name);
            self.buf.push(' ');
            escape_help(&mut self.buf, family.description);
            self.buf.push_str("\n# TYPE ");
            self.buf.push_str(family.name);
            self.buf.push(' ');
            self.buf.push_str(observation.kind());
            self.buf.push('\n');

            family.header = true;
        }

        self.buf.push_str(family.name);
        if !attrs.is_empty() {
            self.buf.push('{');
            for (index, (key, value)) in attrs.iter().enumerate() {
                if index != 0 {
                    self.buf.push(',');
                }
                self.buf.push_str(key);
                self.buf.push_str("=\"");
                escape_label_value(&mut self.buf, value);
                self.buf.push('"');
            }
            self.buf.push('}');
        }
        self.buf.push(' ');

        // writing into a String never fails
        let _ = match observation {
            Observation::Counter(value) => write!(self.buf, "{value}"),
            Observation::Unsigned(value) => write!(self.buf, "{value}"),
            Observation::Sum(value) | Observation::Gauge(value) => {
                write_float(&mut self.buf, value)
            }
        };
        self.buf.push('\n');
    }

    fn finish_metric(&mut self) {
        self.current = None;
    }
}

fn write_float(buf: &mut String, value: f64) -> std::fmt::Result {
    if value.is_nan() {
        buf.push_str("NaN");
    } else if value == f64::INFINITY {
        buf.push_str("+Inf");
    } else if value == f64::NEG_INFINITY {
        buf.push_str("-Inf");
    } else {
        write!(buf, "{value}")?;
    }

    Ok(())
}

fn escape_help(buf: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => buf.push_str("\\\\"),
            '\n' => buf.push_str("\\n"),
            c => buf.push(c),
        }
    }
}

fn escape_label_value(buf: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => buf.push_str("\\\\"),
            '"' => buf.push_str("\\\""),
            '\n' => buf.push_str("\\n"),
            c => buf.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Registry;

    #[test]
    fn empty_family_renders_nothing() {
        let mut encoder = TextEncoder::new();
        encoder.start_metric("ipsec_traffic", "nothing here");
        encoder.finish_metric();

        assert_eq!(encoder.finish(), "");
    }

    #[test]
    fn samples() {
        let mut encoder = TextEncoder::new();

        encoder.start_metric("traffic", "Traffic in bytes");
        encoder.report(
            &Attributes::from(&[("direction", "in"), ("connection", "dev-01")]),
            Observation::Unsigned(u64::MAX as u128 + 1),
        );
        encoder.report(
            &Attributes::from(&[("direction", "out"), ("connection", "dev-01")]),
            Observation::Unsigned(7386561),
        );
        encoder.finish_metric();
        encoder.report_single("uptime", "Uptime", Observation::Gauge(0.5));
        encoder.report_single("forever", "Forever", Observation::Gauge(f64::INFINITY));

        assert_eq!(
            encoder.finish(),
            r#"# HELP traffic Traffic in bytes
# TYPE traffic gauge
traffic{connection="dev-01",direction="in"} 18446744073709551616
traffic{connection="dev-01",direction="out"} 7386561
# HELP uptime Uptime
# TYPE uptime gauge
uptime 0.5
# HELP forever Forever
# TYPE forever gauge
forever +Inf
"#
        );
    }

    #[test]
    fn float_counter() {
        let mut encoder = TextEncoder::new();
        encoder.report_single("cpu_seconds_total", "CPU time", Observation::Sum(17.21));

        assert_eq!(
            encoder.finish(),
            "# HELP cpu_seconds_total CPU time\n# TYPE cpu_seconds_total counter\ncpu_seconds_total 17.21\n"
        );
    }

    #[test]
    fn escaping() {
        let mut encoder = TextEncoder::new();
        encoder.report_single("lonely", "two\nlines \\ here", Observation::Counter(1));
        encoder.start_metric("quoted", "quoted");
        encoder.report(
            &Attributes::from(&[("connection", "a \"b\"\\c\nd")]),
            Observation::Counter(3),
        );
        encoder.finish_metric();

        assert_eq!(
            encoder.finish(),
            "# HELP lonely two\\nlines \\\\ here\n# TYPE lonely counter\nlonely 1\n\
             # HELP quoted quoted\n# TYPE quoted counter\nquoted{connection=\"a \\\"b\\\"\\\\c\\nd\"} 3\n"
        );
    }

    #[test]
    fn registry() {
        let reg = Registry::new();
        reg.register_counter("collections_total", "Collections")
            .recorder(&[("result", "failure")])
            .inc(2);
        reg.register_gauge("duration_seconds", "Duration");

        let mut encoder = TextEncoder::new();
        reg.report(&mut encoder);

        assert_eq!(
            encoder.finish(),
            "# HELP collections_total Collections\n# TYPE collections_total counter\n\
             collections_total{result=\"failure\"} 2\n"
        );
    }
}
