//! Process gauges of the exporter itself, read from procfs on every scrape.

use metrics::Reporter;

/// Report the standard `process_*` families. Nothing is reported on
/// systems without procfs.
pub fn report(reporter: &mut impl Reporter) {
    #[cfg(target_os = "linux")]
    linux::report(std::path::Path::new("/proc"), std::process::id(), reporter);

    #[cfg(not(target_os = "linux"))]
    let _ = reporter;
}

#[cfg(target_os = "linux")]
mod linux {
    use std::io::{Error, ErrorKind};
    use std::path::Path;

    use metrics::{Observation, Reporter};

    const USER_HZ: f64 = 100.0;
    const PAGE_SIZE: f64 = 4096.0;

    #[derive(Debug, PartialEq)]
    struct ProcStat {
        cpu_seconds: f64,
        threads: f64,
        start_time: f64,
        virtual_bytes: f64,
        resident_bytes: f64,
    }

    pub(super) fn report(root: &Path, pid: u32, reporter: &mut impl Reporter) {
        match proc_stat(root, pid) {
            Ok(stat) => {
                reporter.report_single(
                    "process_cpu_seconds_total",
                    "Total user and system CPU time spent in seconds",
                    Observation::Sum(stat.cpu_seconds),
                );
                reporter.report_single(
                    "process_resident_memory_bytes",
                    "Resident memory size in bytes",
                    Observation::Gauge(stat.resident_bytes),
                );
                reporter.report_single(
                    "process_start_time_seconds",
                    "Start time of the process since unix epoch in seconds",
                    Observation::Gauge(stat.start_time),
                );
                reporter.report_single(
                    "process_threads",
                    "Number of OS threads in the process",
                    Observation::Gauge(stat.threads),
                );
                reporter.report_single(
                    "process_virtual_memory_bytes",
                    "Virtual memory size in bytes",
                    Observation::Gauge(stat.virtual_bytes),
                );
            }
            Err(err) => {
                warn!(message = "get process stats failed", %err);
            }
        }

        match open_fds(root, pid) {
            Ok(fds) => reporter.report_single(
                "process_open_fds",
                "Number of open file descriptors",
                Observation::Gauge(fds as f64),
            ),
            Err(err) => {
                warn!(message = "read open fd files failed", %err);
            }
        }

        match max_fds(root, pid) {
            Ok(max) => reporter.report_single(
                "process_max_fds",
                "Maximum number of open file descriptors",
                Observation::Gauge(max),
            ),
            Err(err) => {
                warn!(message = "read process limits failed", %err);
            }
        }
    }

    fn open_fds(root: &Path, pid: u32) -> Result<usize, Error> {
        let path = root.join(pid.to_string()).join("fd");

        std::fs::read_dir(path)?.try_fold(0usize, |acc, item| {
            let entry = item?;
            let next = if entry.file_type()?.is_dir() { acc } else { acc + 1 };

            Ok(next)
        })
    }

    /// The soft limit, which is the one that makes `open` fail
    fn max_fds(root: &Path, pid: u32) -> Result<f64, Error> {
        let data = std::fs::read_to_string(root.join(pid.to_string()).join("limits"))?;

        let soft = data
            .lines()
            .find_map(|line| line.strip_prefix("Max open files"))
            .and_then(|rest| rest.split_whitespace().next())
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "`Max open files` not found"))?;

        if soft == "unlimited" {
            return Ok(f64::INFINITY);
        }

        soft.parse()
            .map_err(|_err| Error::new(ErrorKind::InvalidData, "parse `Max open files` failed"))
    }

    fn boot_time(root: &Path) -> Result<f64, Error> {
        let data = std::fs::read_to_string(root.join("stat"))?;

        let value = data
            .lines()
            .find_map(|line| line.strip_prefix("btime "))
            .ok_or_else(|| Error::from(ErrorKind::NotFound))?;

        value
            .trim()
            .parse::<f64>()
            .map_err(|err| Error::new(ErrorKind::InvalidData, err))
    }

    fn proc_stat(root: &Path, pid: u32) -> Result<ProcStat, Error> {
        let content = std::fs::read_to_string(root.join(pid.to_string()).join("stat"))?;

        // the command name is in parentheses and may contain spaces
        let (_, fields) = content
            .rsplit_once(')')
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "unexpected stat format"))?;
        let fields = fields.split_ascii_whitespace().collect::<Vec<_>>();
        if fields.len() < 22 {
            return Err(Error::new(ErrorKind::InvalidData, "stat is truncated"));
        }

        // indexes are relative to the state field, the third one in proc(5)
        let field = |index: usize| fields[index].parse::<f64>().unwrap_or(0.0);
        let utime = field(11);
        let stime = field(12);
        let threads = field(17);
        let start_time = field(19);
        let vsize = field(20);
        let rss = field(21);

        let btime = boot_time(root)?;

        Ok(ProcStat {
            cpu_seconds: (utime + stime) / USER_HZ,
            threads,
            start_time: btime + start_time / USER_HZ,
            virtual_bytes: vsize,
            resident_bytes: rss * PAGE_SIZE,
        })
    }

}
