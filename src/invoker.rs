use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::error::{ConfigError, InvokeError};

/// Directories searched after `PATH`, `ipsec` usually lives in an sbin
/// directory which unprivileged users often do not have in `PATH`.
const FALLBACK_DIRS: [&str; 3] = ["/usr/sbin", "/usr/local/sbin", "/sbin"];

/// How long a timed out command gets to exit after SIGTERM before the
/// whole process group is killed.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// One external status command, optionally run through `sudo -n`.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusCommand {
    program: PathBuf,
    args: Vec<String>,
    sudo: Option<PathBuf>,
}

impl StatusCommand {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StatusCommand {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            sudo: None,
        }
    }

    pub fn with_sudo(mut self, sudo: impl Into<PathBuf>) -> Self {
        self.sudo = Some(sudo.into());
        self
    }

    pub fn uses_sudo(&self) -> bool {
        self.sudo.is_some()
    }

    /// The last argument, which names the ipsec subcommand
    pub fn subcommand(&self) -> &str {
        self.args.last().map(String::as_str).unwrap_or_default()
    }

    fn build(&self) -> Command {
        let mut cmd = match &self.sudo {
            Some(sudo) => {
                let mut cmd = Command::new(sudo);
                // never prompt for a password, fail instead
                cmd.arg("-n").arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        };

        cmd.args(&self.args);

        // sudo runs the status command as its own child, which SIGKILL on
        // sudo never reaches, so everything lives in one process group that
        // can be signalled as a whole
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.kill_on_drop(true);

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        cmd
    }
}

impl fmt::Display for StatusCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sudo) = &self.sudo {
            write!(f, "{} -n ", sudo.display())?;
        }

        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }

        Ok(())
    }
}

#[async_trait]
pub trait Invoke: Send + Sync {
    /// Run the command to completion and return its stdout verbatim.
    async fn invoke(&self, command: &StatusCommand, timeout: Duration)
    -> Result<String, InvokeError>;
}

/// Runs commands as real subprocesses, one per invocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessInvoker;

#[async_trait]
impl Invoke for ProcessInvoker {
    async fn invoke(
        &self,
        command: &StatusCommand,
        timeout: Duration,
    ) -> Result<String, InvokeError> {
        let start = Instant::now();

        let mut child = command.build().spawn().map_err(|err| {
            if err.kind() == ErrorKind::PermissionDenied {
                InvokeError::PermissionDenied(err.to_string())
            } else {
                InvokeError::Spawn(err)
            }
        })?;
        let mut group = ProcessGroup::new(&child);

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let finished = tokio::time::timeout(timeout, async {
            tokio::try_join!(
                child.wait(),
                read_pipe(stdout.as_mut()),
                read_pipe(stderr.as_mut())
            )
        })
        .await;

        let (status, stdout, stderr) = match finished {
            Ok(result) => {
                group.disarm();
                result.map_err(InvokeError::Spawn)?
            }
            Err(_elapsed) => {
                warn!(
                    message = "Command timed out, terminating it",
                    %command,
                    timeout_ms = timeout.as_millis() as u64,
                );

                group.terminate(&mut child).await;
                return Err(InvokeError::Timeout(timeout));
            }
        };

        debug!(
            message = "Finished command run",
            %command,
            elapsed_ms = start.elapsed().as_millis() as u64,
            code = status.code(),
        );

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
            if command.uses_sudo() && is_sudo_refusal(&stderr) {
                return Err(InvokeError::PermissionDenied(stderr));
            }

            return Err(InvokeError::Exit {
                code: status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<&mut R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }

    Ok(buf)
}

/// The process group a spawned command leads. Until it is disarmed,
/// dropping it, e.g. when a cycle is aborted, sends SIGTERM to the group.
struct ProcessGroup {
    pid: Option<u32>,
}

impl ProcessGroup {
    fn new(child: &Child) -> Self {
        ProcessGroup { pid: child.id() }
    }

    fn disarm(&mut self) {
        self.pid = None;
    }

    /// SIGTERM first, which sudo relays to the command it runs, then
    /// SIGKILL for whatever is left once the grace period is over.
    async fn terminate(&mut self, child: &mut Child) {
        self.signal(Signal::Terminate);

        if tokio::time::timeout(TERMINATE_GRACE, child.wait())
            .await
            .is_err()
        {
            if let Err(err) = child.start_kill() {
                debug!(message = "Kill command failed", %err);
            }
            if let Err(err) = child.wait().await {
                debug!(message = "Reap command failed", %err);
            }
        }

        self.signal(Signal::Kill);
        self.disarm();
    }

    #[cfg(unix)]
    fn signal(&self, signal: Signal) {
        use nix::sys::signal::{Signal as Sig, killpg};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return;
        };

        let sig = match signal {
            Signal::Terminate => Sig::SIGTERM,
            Signal::Kill => Sig::SIGKILL,
        };

        // ESRCH once every member is gone, EPERM for members owned by root
        if let Err(err) = killpg(Pid::from_raw(pid as i32), sig) {
            debug!(message = "Signal process group failed", pid, signal = %sig, %err);
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, _signal: Signal) {}
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.signal(Signal::Terminate);
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

/// sudo prefixes its own complaints, e.g. `sudo: a password is required`,
/// while the command it runs does not.
fn is_sudo_refusal(stderr: &str) -> bool {
    stderr
        .lines()
        .next()
        .is_some_and(|line| line.starts_with("sudo:"))
}

/// Find the executable `program` refers to. Bare names are searched in
/// `PATH` first, then in the usual sbin directories.
pub fn resolve_program(program: &Path) -> Result<PathBuf, ConfigError> {
    if program.components().count() > 1 {
        return check_executable(program).map(|_| program.to_path_buf());
    }

    let path = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path)
        .chain(FALLBACK_DIRS.iter().map(PathBuf::from))
        .map(|dir| dir.join(program))
        .find(|candidate| check_executable(candidate).is_ok())
        .ok_or_else(|| ConfigError::NotExecutable {
            path: program.to_path_buf(),
            reason: "not found in PATH".to_string(),
        })
}

fn check_executable(path: &Path) -> Result<(), ConfigError> {
    let metadata = std::fs::metadata(path).map_err(|err| ConfigError::NotExecutable {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;

    if !metadata.is_file() {
        return Err(ConfigError::NotExecutable {
            path: path.to_path_buf(),
            reason: "not a regular file".to_string(),
        });
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(ConfigError::NotExecutable {
                path: path.to_path_buf(),
                reason: "no execute permission".to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn sh(script: &str) -> StatusCommand {
        StatusCommand::new("sh", ["-c", script])
    }

    #[test]
    fn display() {
        let cmd = StatusCommand::new("/usr/sbin/ipsec", ["trafficstatus"]).with_sudo("sudo");
        assert_eq!(cmd.to_string(), "sudo -n /usr/sbin/ipsec trafficstatus");
        assert_eq!(cmd.subcommand(), "trafficstatus");
    }

    #[test]
    fn sudo_refusal() {
        assert!(is_sudo_refusal("sudo: a password is required"));
        assert!(is_sudo_refusal(
            "sudo: a terminal is required to read the password\nsudo: a password is required"
        ));
        assert!(!is_sudo_refusal("whack: Pluto is not running (no \"/run/pluto/pluto.ctl\")"));
        assert!(!is_sudo_refusal(""));
    }

    #[tokio::test]
    async fn stdout_verbatim() {
        let output = ProcessInvoker
            .invoke(&sh("printf '#2: \"dev-01\"\\n\\n'"), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output, "#2: \"dev-01\"\n\n");
    }

    #[tokio::test]
    async fn non_zero_exit() {
        let err = ProcessInvoker
            .invoke(&sh("echo oops >&2; exit 3"), Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            InvokeError::Exit { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "oops");
            }
            err => panic!("unexpected error {err:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_failure() {
        let cmd = StatusCommand::new("/nonexistent/ipsec", ["status"]);
        let err = ProcessInvoker
            .invoke(&cmd, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::Spawn(_)), "{err:?}");
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let marker = std::env::temp_dir().join(format!("ipsec-exporter-{nanos}"));
        let script = format!("sleep 1; touch {}", marker.display());

        let start = Instant::now();
        let err = ProcessInvoker
            .invoke(&sh(&script), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Timeout(_)), "{err:?}");
        assert!(start.elapsed() < Duration::from_secs(1));

        // the shell would have created the marker if it was still alive
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    fn write_script(path: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn timeout_kills_the_command_behind_sudo() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("ipsec-exporter-sudo-{nanos}"));
        std::fs::create_dir(&dir).unwrap();

        // forks the command and waits for it, like sudo without a pty
        let sudo = dir.join("sudo");
        write_script(&sudo, "shift\n\"$@\"");
        let marker = dir.join("marker");
        let ipsec = dir.join("ipsec");
        write_script(&ipsec, &format!("sleep 1; touch {}", marker.display()));

        let cmd = StatusCommand::new(&ipsec, ["trafficstatus"]).with_sudo(&sudo);
        let err = ProcessInvoker
            .invoke(&cmd, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Timeout(_)), "{err:?}");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn resolve() {
        let sh = resolve_program(Path::new("sh")).unwrap();
        assert!(sh.is_absolute());

        assert!(resolve_program(Path::new("/nonexistent/ipsec")).is_err());
        assert!(resolve_program(Path::new("surely-not-an-ipsec-binary")).is_err());

        // a directory is not an executable
        assert!(resolve_program(&std::env::temp_dir()).is_err());
    }
}
