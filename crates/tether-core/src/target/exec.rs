//! `exec://` transport: a target backed by a local program.
//!
//! Each execution spawns the program with the code on stdin and streams its
//! stdout and stderr back. `exec:///bin/sh` names an absolute path;
//! `exec://python3` is looked up on `PATH`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::debug;

use super::{Connector, OutputFn, Session, Target};
use crate::error::{Error, Result};
use crate::interrupt::InterruptHandle;
use crate::process::{self, Outcome, RunningChild};

pub const SCHEME: &str = "exec";

/// Time an interrupted program gets to exit after SIGINT.
const DEFAULT_GRACE: Duration = Duration::from_millis(500);

fn program_of(url: &str) -> Option<&str> {
    url.strip_prefix("exec://").filter(|p| !p.trim().is_empty())
}

fn resolve(program: &str) -> std::result::Result<PathBuf, String> {
    let path = Path::new(program);
    if path.is_absolute() {
        if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(format!("{program}: no such file"))
        }
    } else {
        which::which(program).map_err(|e| format!("{program}: {e}"))
    }
}

/// Connector for `exec://` URLs.
#[derive(Debug, Clone)]
pub struct ExecConnector {
    grace: Duration,
}

impl ExecConnector {
    pub fn new() -> Self {
        Self {
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

impl Default for ExecConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for ExecConnector {
    fn scheme(&self) -> &str {
        SCHEME
    }

    fn validate(&self, url: &str) -> Result<()> {
        let program = program_of(url).ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
        resolve(program).map(drop).map_err(Error::InvalidUrl)
    }

    fn default_name(&self, url: &str) -> String {
        program_of(url)
            .and_then(|p| Path::new(p).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.to_string())
    }

    fn connect(&self, target: &Target) -> Result<Box<dyn Session>> {
        let program =
            program_of(&target.url).ok_or_else(|| Error::InvalidUrl(target.url.clone()))?;
        let program = resolve(program).map_err(|e| Error::unreachable(target.name.clone(), e))?;
        debug!(device = %target.name, program = %program.display(), "exec session ready");
        Ok(Box::new(ExecSession {
            target: target.clone(),
            program,
            grace: self.grace,
            running: None,
        }))
    }
}

/// Session spawning one process per execution.
pub struct ExecSession {
    target: Target,
    program: PathBuf,
    grace: Duration,
    /// Child left behind by an interrupted or timed-out execution.
    running: Option<RunningChild>,
}

impl ExecSession {
    fn reap(&mut self) {
        if let Some(child) = self.running.take() {
            child.interrupt(self.grace);
        }
    }
}

impl Session for ExecSession {
    fn execute(
        &mut self,
        code: &str,
        on_output: &mut OutputFn<'_>,
        timeout: Option<Duration>,
        interrupt: &InterruptHandle,
    ) -> Result<()> {
        self.reap();

        let child = process::spawn(Command::new(&self.program), Some(code))
            .map_err(|e| Error::unreachable(self.target.name.clone(), e))?;
        let outcome = child
            .pump(on_output, timeout, interrupt)
            .map_err(|e| Error::TargetUnavailable {
                target: self.target.name.clone(),
                message: e.to_string(),
            })?;

        match outcome {
            Outcome::Exited(status) if status.success() => Ok(()),
            Outcome::Exited(status) => Err(Error::RemoteFault {
                target: self.target.name.clone(),
                message: format!("{} exited with {status}", self.program.display()),
            }),
            Outcome::TimedOut(child) => {
                child.interrupt(self.grace);
                Err(Error::Timeout {
                    target: self.target.name.clone(),
                    url: self.target.url.clone(),
                    after: timeout.unwrap_or_default(),
                })
            }
            Outcome::Interrupted(child) => {
                self.running = Some(child);
                Err(Error::Interrupted)
            }
        }
    }

    fn abort(&mut self) -> Result<()> {
        if let Some(child) = self.running.take() {
            debug!(device = %self.target.name, pid = child.pid(), "aborting");
            child.interrupt(self.grace);
        }
        Ok(())
    }

    fn softreset(&mut self) -> Result<()> {
        self.reap();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.target.url, self.program.display())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::output::Stream;
    use std::time::Instant;

    fn target(url: &str) -> Target {
        Target {
            uid: crate::target::uid_for(url),
            name: "sh".into(),
            url: url.into(),
            scheme_hint: None,
        }
    }

    fn run(session: &mut dyn Session, code: &str) -> (Result<()>, String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = session.execute(
            code,
            &mut |stream, bytes| match stream {
                Stream::Out => out.extend_from_slice(bytes),
                Stream::Err => err.extend_from_slice(bytes),
            },
            Some(Duration::from_secs(10)),
            &InterruptHandle::new(),
        );
        (
            result,
            String::from_utf8_lossy(&out).into_owned(),
            String::from_utf8_lossy(&err).into_owned(),
        )
    }

    #[test]
    fn test_validate() {
        let connector = ExecConnector::new();
        assert!(connector.validate("exec:///bin/sh").is_ok());
        assert!(connector.validate("exec://sh").is_ok());
        assert!(connector.validate("exec://").is_err());
        assert!(connector.validate("exec:///no/such/program").is_err());
        assert_eq!(connector.default_name("exec:///bin/sh"), "sh");
    }

    #[test]
    fn test_execute_streams() {
        let mut session = ExecConnector::new().connect(&target("exec:///bin/sh")).unwrap();
        let (result, out, err) = run(session.as_mut(), "echo 1\necho oops >&2");
        assert!(result.is_ok());
        assert_eq!(out, "1\n");
        assert_eq!(err, "oops\n");
    }

    #[test]
    fn test_nonzero_exit_is_remote_fault() {
        let mut session = ExecConnector::new().connect(&target("exec:///bin/sh")).unwrap();
        let (result, _, _) = run(session.as_mut(), "exit 1");
        assert!(matches!(result, Err(Error::RemoteFault { .. })));
    }

    #[test]
    fn test_timeout() {
        let mut session = ExecConnector::new()
            .with_grace(Duration::from_millis(100))
            .connect(&target("exec:///bin/sh"))
            .unwrap();
        let result = session.execute(
            "sleep 5",
            &mut |_, _| {},
            Some(Duration::from_millis(100)),
            &InterruptHandle::new(),
        );
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[test]
    fn test_interrupt_then_abort() {
        let mut session = ExecConnector::new()
            .with_grace(Duration::from_millis(100))
            .connect(&target("exec:///bin/sh"))
            .unwrap();
        let interrupt = InterruptHandle::new();
        interrupt.interrupt();
        let started = Instant::now();
        let result = session.execute("sleep 5", &mut |_, _| {}, None, &interrupt);
        assert!(matches!(result, Err(Error::Interrupted)));
        session.abort().unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
