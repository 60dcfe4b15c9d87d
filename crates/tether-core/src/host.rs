//! Host-native execution.
//!
//! Code routed to the host (the `%%host` section, `!` escapes, `%%bash`,
//! sections with unknown directives) runs in local subprocesses. Output is
//! streamed through the same callback shape targets use.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::debug;

use crate::config::KernelOptions;
use crate::error::{Error, Result};
use crate::interrupt::InterruptHandle;
use crate::process::{self, Outcome};
use crate::target::OutputFn;

const INTERRUPT_GRACE: Duration = Duration::from_millis(500);

/// The local execution environment.
pub trait HostRuntime: Send {
    /// Run host-native code.
    fn run_code(
        &mut self,
        code: &str,
        on_output: &mut OutputFn<'_>,
        interrupt: &InterruptHandle,
    ) -> Result<()>;

    /// Run one shell command line.
    fn shell(
        &mut self,
        command: &str,
        on_output: &mut OutputFn<'_>,
        interrupt: &InterruptHandle,
    ) -> Result<()>;

    /// Run a bash script.
    fn bash(
        &mut self,
        script: &str,
        on_output: &mut OutputFn<'_>,
        interrupt: &InterruptHandle,
    ) -> Result<()>;

    fn cwd(&self) -> &Path;

    fn set_cwd(&mut self, path: &Path) -> Result<()>;
}

/// Host runtime spawning one subprocess per request.
///
/// A non-zero exit status is not an error: whatever the program printed on
/// stderr is the report.
#[derive(Debug, Clone)]
pub struct SubprocessHost {
    interpreter: Vec<String>,
    shell: String,
    cwd: PathBuf,
}

impl SubprocessHost {
    /// `interpreter` is a command line, e.g. `python3 -u`.
    pub fn new(interpreter: &str, shell: &str) -> Result<Self> {
        let interpreter = shlex::split(interpreter)
            .filter(|words| !words.is_empty())
            .ok_or_else(|| Error::Host(format!("invalid interpreter command: {interpreter:?}")))?;
        let cwd = std::env::current_dir()?;
        Ok(Self {
            interpreter,
            shell: shell.to_string(),
            cwd,
        })
    }

    pub fn from_options(options: &KernelOptions) -> Result<Self> {
        Self::new(&options.interpreter, &options.shell)
    }

    fn command(&self, program: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.cwd);
        cmd
    }

    fn run(
        &self,
        cmd: Command,
        stdin: Option<&str>,
        on_output: &mut OutputFn<'_>,
        interrupt: &InterruptHandle,
    ) -> Result<()> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        let child = process::spawn(cmd, stdin).map_err(|e| Error::Host(format!("{program}: {e}")))?;
        debug!(%program, pid = child.pid(), "host process started");
        match child.pump(on_output, None, interrupt)? {
            Outcome::Exited(status) => {
                debug!(%program, %status, "host process finished");
                Ok(())
            }
            Outcome::Interrupted(child) | Outcome::TimedOut(child) => {
                child.interrupt(INTERRUPT_GRACE);
                Err(Error::Interrupted)
            }
        }
    }
}

impl HostRuntime for SubprocessHost {
    fn run_code(
        &mut self,
        code: &str,
        on_output: &mut OutputFn<'_>,
        interrupt: &InterruptHandle,
    ) -> Result<()> {
        let (program, args) = match self.interpreter.split_first() {
            Some(split) => split,
            None => return Err(Error::Host("no interpreter configured".to_string())),
        };
        let cmd = self.command(program, args);
        self.run(cmd, Some(code), on_output, interrupt)
    }

    fn shell(
        &mut self,
        command: &str,
        on_output: &mut OutputFn<'_>,
        interrupt: &InterruptHandle,
    ) -> Result<()> {
        let cmd = self.command(&self.shell, &["-c".to_string(), command.to_string()]);
        self.run(cmd, None, on_output, interrupt)
    }

    fn bash(
        &mut self,
        script: &str,
        on_output: &mut OutputFn<'_>,
        interrupt: &InterruptHandle,
    ) -> Result<()> {
        let program = match which::which("bash") {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(_) => self.shell.clone(),
        };
        let cmd = self.command(&program, &[]);
        self.run(cmd, Some(script), on_output, interrupt)
    }

    fn cwd(&self) -> &Path {
        &self.cwd
    }

    fn set_cwd(&mut self, path: &Path) -> Result<()> {
        let target = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        };
        let target = target
            .canonicalize()
            .map_err(|e| Error::Usage(format!("cd: {}: {e}", path.display())))?;
        if !target.is_dir() {
            return Err(Error::Usage(format!("cd: {}: not a directory", path.display())));
        }
        self.cwd = target;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::output::Stream;

    fn capture(
        f: impl FnOnce(&mut OutputFn<'_>) -> Result<()>,
    ) -> (Result<()>, String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = f(&mut |stream, bytes| match stream {
            Stream::Out => out.extend_from_slice(bytes),
            Stream::Err => err.extend_from_slice(bytes),
        });
        (
            result,
            String::from_utf8_lossy(&out).into_owned(),
            String::from_utf8_lossy(&err).into_owned(),
        )
    }

    fn host() -> SubprocessHost {
        SubprocessHost::new("sh", "sh").unwrap()
    }

    #[test]
    fn test_run_code_uses_interpreter() {
        let mut host = host();
        let interrupt = InterruptHandle::new();
        let (result, out, _) = capture(|cb| host.run_code("echo from-host", cb, &interrupt));
        assert!(result.is_ok());
        assert_eq!(out, "from-host\n");
    }

    #[test]
    fn test_shell_streams_both() {
        let mut host = host();
        let interrupt = InterruptHandle::new();
        let (result, out, err) = capture(|cb| host.shell("echo a; echo b >&2; exit 4", cb, &interrupt));
        assert!(result.is_ok(), "non-zero exit is not an error");
        assert_eq!(out, "a\n");
        assert_eq!(err, "b\n");
    }

    #[test]
    fn test_cwd() {
        let temp = tempfile::tempdir().unwrap();
        let mut host = host();
        host.set_cwd(temp.path()).unwrap();
        let interrupt = InterruptHandle::new();
        let (_, out, _) = capture(|cb| host.shell("pwd", cb, &interrupt));
        assert_eq!(
            std::path::Path::new(out.trim()).canonicalize().unwrap(),
            temp.path().canonicalize().unwrap()
        );
        assert!(matches!(
            host.set_cwd(&temp.path().join("missing")),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn test_missing_interpreter() {
        let mut host = SubprocessHost::new("/no/such/interpreter", "sh").unwrap();
        let interrupt = InterruptHandle::new();
        let (result, _, _) = capture(|cb| host.run_code("x", cb, &interrupt));
        assert!(matches!(result, Err(Error::Host(_))));
    }

    #[test]
    fn test_interrupted() {
        let mut host = host();
        let interrupt = InterruptHandle::new();
        interrupt.interrupt();
        let (result, _, _) = capture(|cb| host.shell("sleep 5", cb, &interrupt));
        assert!(matches!(result, Err(Error::Interrupted)));
    }
}
