use tracing_subscriber::EnvFilter;

const FALLBACK: &str = "info";

/// Turn a bare level like `debug` into directives for this crate and its
/// workspace libraries, anything that already is a directive list is used
/// as is.
pub fn directives(levels: &str) -> String {
    let levels = levels.trim();

    if levels == "off" || levels.contains('=') || levels.contains(',') {
        return levels.to_string();
    }

    [
        format!("ipsec_exporter={levels}"),
        format!("metrics={levels}"),
    ]
    .join(",")
}

pub fn init(color: bool, levels: &str) {
    let directives = directives(levels);
    let (filter, invalid) = match EnvFilter::try_new(&directives) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new(FALLBACK), Some(err)),
    };

    // a subscriber installed earlier, e.g. by a test, wins
    let _ = tracing_subscriber::fmt()
        .with_ansi(color)
        .with_env_filter(filter)
        .try_init();

    if let Some(err) = invalid {
        warn!(
            message = "Invalid log level, falling back",
            levels = %directives,
            fallback = FALLBACK,
            %err
        );
    }
}
