//! Checker subprocesses with a wall-clock bound and bounded output capture.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::CheckerOutput;

/// Extra time granted to the output readers once the process group is gone.
const READER_GRACE: Duration = Duration::from_millis(250);

/// Captured output of a finished (or killed) child process.
#[derive(Debug)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal (including on timeout).
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

impl CommandOutput {
    /// Lossy UTF-8 view used for diagnostics and artifacts.
    pub fn into_checker_output(self) -> CheckerOutput {
        CheckerOutput {
            exit_code: self.exit_code,
            timed_out: self.timed_out,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            stdout_truncated: self.stdout_truncated,
            stderr_truncated: self.stderr_truncated,
        }
    }
}

#[derive(Debug, Default)]
struct Capture {
    kept: Vec<u8>,
    dropped: usize,
}

type SharedCapture = Arc<Mutex<Capture>>;

/// Run `cmd` to completion or until `timeout` elapses, whichever comes first.
///
/// On unix the command runs in its own process group. When the direct child
/// exits or times out, the whole group is killed, so descendants holding the
/// output pipes cannot stretch the call past the deadline. Both pipes are
/// drained on reader threads; at most `output_limit_bytes` of each stream are
/// kept and the remainder is counted. Readers still blocked after the deadline
/// (plus a short grace) are abandoned and whatever they captured is returned.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!(program = ?cmd.get_program(), "spawning checker");
    let deadline = Instant::now() + timeout;
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let (done_tx, done_rx) = mpsc::channel();
    let stdout_capture = spawn_reader(stdout, output_limit_bytes, done_tx.clone());
    let stderr_capture = spawn_reader(stderr, output_limit_bytes, done_tx);

    let waited = wait_or_kill(&mut child, timeout);
    // Stragglers left in the group would keep the pipes open.
    kill_group(&mut child);
    let (exit_code, timed_out) = waited?;

    let finished = await_readers(&done_rx, deadline);
    if !finished {
        warn!("checker output pipes still open after deadline, returning partial output");
    }

    let (stdout, stdout_truncated) = take_capture(&stdout_capture);
    let (stderr, stderr_truncated) = take_capture(&stderr_capture);
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "checker output truncated");
    }

    debug!(exit_code = ?exit_code, timed_out, "checker finished");
    Ok(CommandOutput {
        exit_code,
        timed_out,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
    })
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(Option<i32>, bool)> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for command")? {
        return Ok((status.code(), false));
    }
    warn!(timeout_secs = timeout.as_secs(), "checker timed out, killing");
    kill_group(child);
    if let Err(err) = child.kill() {
        debug!(err = %err, "direct kill after group kill");
    }
    child.wait().context("wait command after kill")?;
    Ok((None, true))
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!(pgid, err = %err, "failed to kill checker process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}

/// Wait for both readers to reach EOF, at most until `deadline` plus the grace.
fn await_readers(done: &Receiver<()>, deadline: Instant) -> bool {
    let cutoff = deadline.max(Instant::now()) + READER_GRACE;
    for _ in 0..2 {
        let remaining = cutoff.saturating_duration_since(Instant::now());
        if done.recv_timeout(remaining).is_err() {
            return false;
        }
    }
    true
}

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    limit: usize,
    done: Sender<()>,
) -> SharedCapture {
    let capture = SharedCapture::default();
    let sink = Arc::clone(&capture);
    thread::spawn(move || {
        if let Err(err) = drain_limited(reader, limit, &sink) {
            debug!(err = %format!("{err:#}"), "checker output reader stopped");
        }
        let _ = done.send(());
    });
    capture
}

fn take_capture(capture: &SharedCapture) -> (Vec<u8>, usize) {
    let mut guard = capture.lock().unwrap_or_else(PoisonError::into_inner);
    let taken = std::mem::take(&mut *guard);
    (taken.kept, taken.dropped)
}

fn drain_limited<R: Read>(mut reader: R, limit: usize, capture: &Mutex<Capture>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        let mut guard = capture.lock().unwrap_or_else(PoisonError::into_inner);
        let keep = n.min(limit.saturating_sub(guard.kept.len()));
        guard.kept.extend_from_slice(&chunk[..keep]);
        guard.dropped += n - keep;
    }
}
