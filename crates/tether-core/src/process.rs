//! Interruptible streaming subprocess runner.
//!
//! Used by the host runtime for shell escapes and by the `exec` transport.
//! Stdout and stderr are drained on reader threads and forwarded over a
//! channel, so the waiting side can poll the interrupt flag and the
//! timeout between chunks instead of blocking on a pipe.

use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::interrupt::InterruptHandle;
use crate::output::Stream;

/// How often the waiting side re-checks the interrupt flag and timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

const READ_BUFFER: usize = 4096;

/// How a pumped child finished.
pub enum Outcome {
    /// The child exited and all of its output was delivered.
    Exited(ExitStatus),
    /// The timeout elapsed; the child is still running.
    TimedOut(RunningChild),
    /// The interrupt flag was raised; the child is still running.
    Interrupted(RunningChild),
}

/// A spawned child whose output is being forwarded.
///
/// Dropping a still-running child kills it.
pub struct RunningChild {
    child: Child,
    rx: Receiver<(Stream, Vec<u8>)>,
    readers: Vec<JoinHandle<()>>,
}

/// Spawn `cmd` with piped output, feeding `stdin` to it if given.
pub fn spawn(mut cmd: Command, stdin: Option<&str>) -> io::Result<RunningChild> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    // Own process group, so signals reach grandchildren too.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn()?;

    // Written from its own thread so a child that produces lots of output
    // before reading its input cannot deadlock us.
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let input = input.as_bytes().to_vec();
        thread::spawn(move || {
            let _ = pipe.write_all(&input);
        });
    }

    let (tx, rx) = mpsc::channel();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(forward(stdout, Stream::Out, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward(stderr, Stream::Err, tx.clone()));
    }
    drop(tx);

    tracing::debug!(pid = child.id(), "spawned child");
    Ok(RunningChild { child, rx, readers })
}

fn forward(
    mut pipe: impl Read + Send + 'static,
    stream: Stream,
    tx: Sender<(Stream, Vec<u8>)>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; READ_BUFFER];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

impl RunningChild {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Deliver output until the child exits, the timeout elapses or the
    /// interrupt flag is raised.
    pub fn pump(
        mut self,
        on_output: &mut dyn FnMut(Stream, &[u8]),
        timeout: Option<Duration>,
        interrupt: &InterruptHandle,
    ) -> io::Result<Outcome> {
        let started = Instant::now();
        let expired = |started: Instant| timeout.is_some_and(|limit| started.elapsed() >= limit);

        // Output phase: runs until both pipes are closed.
        loop {
            if interrupt.is_interrupted() {
                return Ok(Outcome::Interrupted(self));
            }
            if expired(started) {
                return Ok(Outcome::TimedOut(self));
            }
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok((stream, bytes)) => on_output(stream, &bytes),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }

        // Exit phase: pipes can close before the process is gone.
        loop {
            if let Some(status) = self.child.try_wait()? {
                tracing::debug!(pid = self.child.id(), %status, "child exited");
                return Ok(Outcome::Exited(status));
            }
            if interrupt.is_interrupted() {
                return Ok(Outcome::Interrupted(self));
            }
            if expired(started) {
                return Ok(Outcome::TimedOut(self));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Ask the child to stop with SIGINT, then kill it once `grace` has
    /// passed.
    pub fn interrupt(mut self, grace: Duration) {
        #[cfg(unix)]
        self.signal_group(libc::SIGINT);

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) | Err(_) => return,
                Ok(None) => thread::sleep(POLL_INTERVAL),
            }
        }
        self.kill();
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) {
        let group = self.child.id() as libc::pid_t;
        unsafe {
            libc::kill(-group, signal);
        }
    }

    /// Kill the child and its process group immediately, then reap it.
    pub fn kill(&mut self) {
        #[cfg(unix)]
        self.signal_group(libc::SIGKILL);
        if let Err(e) = self.child.kill() {
            if e.kind() != io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill child {}: {}", self.child.id(), e);
            }
        }
        let _ = self.child.wait();
    }
}

impl Drop for RunningChild {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.kill();
        }
    }
}
