// Bounded-time execution of external tools with captured stdout/stderr.
use super::*;
use std::process::Child;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const READER_GRACE: Duration = Duration::from_secs(2);

/// A program plus its argument vector. Always executed in argument-list
/// form, never through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|arg| arg == flag)
    }

    /// Value following `flag`, if the flag is present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|index| self.args.get(index + 1))
            .map(String::as_str)
    }

    pub fn display(&self) -> String {
        format!("{} {}", self.program.display(), self.args.join(" "))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CapturedOutput {
    /// Last few non-empty stderr lines, oldest first.
    pub fn stderr_tail(&self, lines: usize) -> Option<String> {
        let mut tail: Vec<&str> = self
            .stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .rev()
            .take(lines)
            .collect();
        if tail.is_empty() {
            return None;
        }
        tail.reverse();
        Some(tail.join(" | "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success(CapturedOutput),
    /// Non-zero exit. stdout may still hold usable partial output.
    Failure(CapturedOutput),
    TimedOut { after: Duration },
}

pub trait ProcessRunner: Send + Sync {
    fn run(&self, invocation: &Invocation, timeout: Duration) -> StreamResult<ProcessOutcome>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

fn drain_lossy<R: Read>(mut reader: R) -> String {
    let mut buffer = Vec::new();
    if let Err(error) = reader.read_to_end(&mut buffer) {
        debug!("Stopped reading process stream: {error}");
    }
    String::from_utf8_lossy(&buffer).to_string()
}

/// Reader threads draining a child's stdout and stderr.
struct StreamReaders {
    stdout: thread::JoinHandle<String>,
    stderr: thread::JoinHandle<String>,
}

impl StreamReaders {
    fn spawn(child: &mut Child) -> StreamResult<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("Failed to capture stdout."))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("Failed to capture stderr."))?;
        Ok(Self {
            stdout: thread::spawn(move || drain_lossy(stdout)),
            stderr: thread::spawn(move || drain_lossy(stderr)),
        })
    }

    /// Wait for both pipes to reach EOF. False if `deadline` passed first.
    fn wait_until(&self, deadline: Instant) -> bool {
        loop {
            if self.stdout.is_finished() && self.stderr.is_finished() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn join(self) -> (String, String) {
        (
            self.stdout.join().unwrap_or_default(),
            self.stderr.join().unwrap_or_default(),
        )
    }
}

/// Kill the child and everything it started. The child leads its own
/// process group on unix, so the group id is its pid.
#[cfg(unix)]
fn kill_process_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let group = Pid::from_raw(child.id() as i32);
    if let Err(error) = killpg(group, Signal::SIGKILL) {
        debug!("Failed to signal process group {group}: {error}");
        if let Err(error) = child.kill() {
            debug!("Failed to kill process: {error}");
        }
    }
}

#[cfg(windows)]
fn kill_process_tree(child: &mut Child) {
    let pid = child.id().to_string();
    let killed_tree = hidden_command("taskkill")
        .args(["/F", "/T", "/PID", &pid])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    if !killed_tree {
        if let Err(error) = child.kill() {
            debug!("Failed to kill process: {error}");
        }
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_process_tree(child: &mut Child) {
    if let Err(error) = child.kill() {
        debug!("Failed to kill process: {error}");
    }
}

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, invocation: &Invocation, timeout: Duration) -> StreamResult<ProcessOutcome> {
        debug!("Running {}", invocation.display());
        let mut command = hidden_command(&invocation.program);
        command
            .args(&invocation.args)
            .env("PYTHONIOENCODING", "UTF-8")
            .env("PYTHONUTF8", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command.spawn().map_err(|error| {
            if error.kind() == std::io::ErrorKind::NotFound {
                StreamError::tool_unavailable(format!(
                    "Failed to start {}: {error}",
                    invocation.program.display()
                ))
            } else {
                StreamError::Io(error)
            }
        })?;

        let readers = match StreamReaders::spawn(&mut child) {
            Ok(readers) => readers,
            Err(error) => {
                kill_process_tree(&mut child);
                let _ = child.wait();
                return Err(error);
            }
        };

        let started = Instant::now();
        let deadline = started + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    warn!(
                        "{} timed out after {:?}, killing its process tree",
                        invocation.program.display(),
                        timeout
                    );
                    kill_process_tree(&mut child);
                    let _ = child.wait();
                    if readers.wait_until(Instant::now() + READER_GRACE) {
                        readers.join();
                    } else {
                        warn!(
                            "Output of {} is still held open after the kill",
                            invocation.program.display()
                        );
                    }
                    return Ok(ProcessOutcome::TimedOut {
                        after: started.elapsed(),
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(error) => {
                    kill_process_tree(&mut child);
                    let _ = child.wait();
                    return Err(StreamError::Io(error));
                }
            }
        };

        // Leftover background processes keep the pipes open after the
        // child itself exits.
        if !readers.wait_until(deadline.max(Instant::now()) + READER_GRACE) {
            warn!(
                "{} exited but left processes holding its output, killing them",
                invocation.program.display()
            );
            kill_process_tree(&mut child);
        }
        let (stdout, stderr) = if readers.wait_until(Instant::now() + READER_GRACE) {
            readers.join()
        } else {
            warn!(
                "Discarding output of {}, its pipes never closed",
                invocation.program.display()
            );
            (String::new(), String::new())
        };

        let captured = CapturedOutput {
            stdout,
            stderr,
            exit_code: status.code(),
        };
        if status.success() {
            Ok(ProcessOutcome::Success(captured))
        } else {
            debug!(
                "{} exited with {:?}",
                invocation.program.display(),
                captured.exit_code
            );
            Ok(ProcessOutcome::Failure(captured))
        }
    }
}
