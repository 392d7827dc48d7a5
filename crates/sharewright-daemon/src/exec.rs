use crate::DaemonError;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const WAIT_STEP: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout and stderr together, for pattern checks and diagnostics.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Run `argv` without a shell, killing it after `timeout`.
///
/// A non-zero exit is not an error here; callers decide what it means.
pub fn run_with_timeout(argv: &[String], timeout: Duration) -> Result<CommandOutput, DaemonError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(DaemonError::CommandNotFound(String::new()));
    };
    let command_line = argv.join(" ");
    debug!("running {command_line}");

    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DaemonError::CommandNotFound(program.clone()))
        }
        Err(e) => return Err(e.into()),
    };

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= timeout {
            warn!("{command_line} timed out after {timeout:?}, killing it");
            let _ = child.kill();
            let _ = child.wait();
            return Err(DaemonError::Timeout {
                command: command_line,
                timeout,
            });
        }
        thread::sleep(WAIT_STEP);
    };

    let collect = |h: Option<thread::JoinHandle<String>>| {
        h.and_then(|h| h.join().ok()).unwrap_or_default()
    };
    Ok(CommandOutput {
        code: status.code(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}
