use super::{Analysis, Analyzer, AnalyzerError, parse_analysis_response};
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// Default per-call timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Analyzer backed by the `claude` command line tool in print mode.
///
/// The prompt goes to stdin and the response is read from stdout. The child and
/// its process group are killed if the call runs past the timeout.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    binary: OsString,
    model: String,
    timeout: Duration,
}

impl ClaudeCli {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            binary: OsString::from("claude"),
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use a different executable, e.g. a wrapper script
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<OsString>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one request and return stdout.
    ///
    /// Everything after spawning shares one deadline. On expiry the child's
    /// whole process group is killed, including anything left holding the pipes.
    fn run(&self, prompt: &str) -> Result<String, AnalyzerError> {
        log::debug!(
            "running {} with model {} ({} byte prompt)",
            self.binary.to_string_lossy(),
            self.model,
            prompt.len()
        );

        let mut command = Command::new(&self.binary);
        command
            .args(["--model", self.model.as_str(), "--print"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);

        let mut child = command.spawn().map_err(|e| AnalyzerError::SpawnFailed {
            message: e.to_string(),
        })?;
        let started = Instant::now();
        let deadline = started
            .checked_add(self.timeout)
            .unwrap_or_else(|| started + Duration::from_secs(u64::from(u32::MAX)));

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let stdin = match child.stdin.take() {
            Some(stdin) => feed(stdin, prompt.to_owned()),
            None => {
                terminate(&mut child);
                return Err(AnalyzerError::StdinFailed {
                    message: "stdin not captured".to_string(),
                });
            }
        };

        let status = match child.wait_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(Some(status)) => status,
            Ok(None) => {
                terminate(&mut child);
                return Err(self.timed_out());
            }
            Err(e) => {
                terminate(&mut child);
                return Err(AnalyzerError::WaitFailed {
                    message: e.to_string(),
                });
            }
        };

        let collected = collect(stdout, deadline)
            .and_then(|stdout| Ok((stdout, collect(stderr, deadline)?)));
        let (stdout, stderr) = match collected {
            Ok(output) => output,
            Err(Pending::Expired) => {
                terminate(&mut child);
                return Err(self.timed_out());
            }
            Err(Pending::Failed(message)) => {
                terminate(&mut child);
                return Err(AnalyzerError::WaitFailed { message });
            }
        };

        if !status.success() {
            let code = status
                .code()
                .map_or_else(|| "terminated".to_string(), |c| c.to_string());
            return Err(AnalyzerError::ExitStatus {
                code,
                stderr: stderr.trim().to_string(),
            });
        }

        // A child that exits successfully without reading all of its input is fine
        match stdin.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(Err(e)) if e.kind() != io::ErrorKind::BrokenPipe => {
                return Err(AnalyzerError::StdinFailed {
                    message: e.to_string(),
                });
            }
            Err(RecvTimeoutError::Timeout) => {
                terminate(&mut child);
                return Err(self.timed_out());
            }
            _ => {}
        }

        Ok(stdout)
    }

    fn timed_out(&self) -> AnalyzerError {
        AnalyzerError::TimedOut {
            seconds: self.timeout.as_secs(),
        }
    }
}

/// Why output could not be collected
enum Pending {
    Expired,
    Failed(String),
}

/// Write the prompt on its own thread; dropping stdin afterwards closes the pipe
/// so the child sees EOF
fn feed(mut stdin: ChildStdin, prompt: String) -> Receiver<io::Result<()>> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let _ = sender.send(stdin.write_all(prompt.as_bytes()));
    });
    receiver
}

/// Read a child pipe to the end on its own thread so a full pipe never blocks the child
fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<io::Result<Vec<u8>>> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = sender.send(pipe.read_to_end(&mut buffer).map(|_| buffer));
    });
    receiver
}

fn collect(
    receiver: Option<Receiver<io::Result<Vec<u8>>>>,
    deadline: Instant,
) -> Result<String, Pending> {
    let Some(receiver) = receiver else {
        return Ok(String::new());
    };
    let bytes = match receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(read) => read.map_err(|e| Pending::Failed(e.to_string()))?,
        Err(RecvTimeoutError::Timeout) => return Err(Pending::Expired),
        Err(RecvTimeoutError::Disconnected) => {
            return Err(Pending::Failed("output reader panicked".to_string()));
        }
    };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Kill the child and, on unix, every process left in its group
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let killed = Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = killed {
            log::debug!("could not kill process group {group}: {e}");
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

impl Analyzer for ClaudeCli {
    fn propose_groups(&self, prompt: &str) -> Result<Analysis, AnalyzerError> {
        parse_analysis_response(&self.run(prompt)?)
    }

    fn describe_change(&self, prompt: &str) -> Result<String, AnalyzerError> {
        let description = self.run(prompt)?.trim().to_string();
        if description.is_empty() {
            return Err(AnalyzerError::EmptyResponse);
        }
        Ok(description)
    }
}
