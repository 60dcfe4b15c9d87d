//! Cell evaluation.
//!
//! The [`Kernel`] owns everything one notebook session needs: the directive
//! registry, the device registry, the host runtime, the per-notebook record
//! and the output handle. [`Kernel::execute`] is the boundary: it never
//! returns an error and never lets a panic escape. Every fault is turned
//! into text on the error stream.
//!
//! ```text
//! execute(cell)
//!   └─ segment ─► section ─► %%directive handler
//!                              ├─ fan_out ─► visit(target) ─► run_on_current
//!                              └─ run_on_current ─► code │ %line │ !shell
//! ```

mod fan_out;

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, warn};

pub use fan_out::{Destination, FanOut};

use crate::cell::{self, Chunk, Section};
use crate::config::{CWD_KEY, ConfigStore, DEVICE_KEY, KernelOptions, LogControl, MemoryConfigStore};
use crate::directive::{Directive, DirectiveKind, DirectiveRegistry};
use crate::directives;
use crate::error::{Error, FaultClass, Result};
use crate::host::{HostRuntime, SubprocessHost};
use crate::interrupt::InterruptHandle;
use crate::output::{Output, OutputSink, Relay};
use crate::target::{DeviceRegistry, Lease, Target};

/// Control value returned by directive handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// End evaluation early, optionally with a message for the error stream.
    Stop(Option<String>),
}

impl Flow {
    pub fn stop(message: impl Into<String>) -> Self {
        Flow::Stop(Some(message.into()))
    }
}

/// Reply to one cell evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecuteReply {
    pub status: &'static str,
    pub execution_count: u64,
}

/// Mutable per-evaluation state.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Suppress target output for this evaluation.
    pub silent: bool,
    /// Target code is currently sent to; resolved lazily.
    pub current: Option<Target>,
}

/// A notebook session.
pub struct Kernel {
    registry: Arc<DirectiveRegistry>,
    devices: Arc<dyn DeviceRegistry>,
    host: Box<dyn HostRuntime>,
    conf: Box<dyn ConfigStore>,
    output: Output,
    options: KernelOptions,
    interrupt: InterruptHandle,
    log_control: Option<Arc<dyn LogControl>>,
    context: ExecutionContext,
    execution_count: u64,
}

impl Kernel {
    pub fn builder(devices: Arc<dyn DeviceRegistry>, sink: Arc<dyn OutputSink>) -> KernelBuilder {
        KernelBuilder {
            devices,
            sink,
            registry: None,
            host: None,
            conf: None,
            options: KernelOptions::default(),
            log_control: None,
        }
    }

    /// Evaluate one cell.
    pub fn execute(&mut self, code: &str, silent: bool) -> ExecuteReply {
        self.interrupt.reset();
        self.execution_count += 1;
        self.context.silent = silent;
        debug!(count = self.execution_count, "execute cell");

        for section in cell::segment(code) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute_section(&section)));
            match outcome {
                Ok(Ok(Flow::Continue)) => {}
                Ok(Ok(Flow::Stop(message))) => {
                    if let Some(message) = message {
                        self.output.error(message);
                    }
                    break;
                }
                Ok(Err(e)) => {
                    self.report(&e);
                    break;
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!("panic while evaluating cell: {}", message);
                    self.report(&Error::Host(format!("panic: {message}")));
                    break;
                }
            }
        }

        ExecuteReply {
            status: "ok",
            execution_count: self.execution_count,
        }
    }

    fn execute_section(&mut self, section: &Section) -> Result<Flow> {
        if section.body.is_empty() {
            return Ok(Flow::Continue);
        }
        let registry = Arc::clone(&self.registry);
        match registry.lookup(&section.directive, DirectiveKind::Section) {
            Ok(directive) => self.dispatch(directive, &section.raw_args, Some(&section.body)),
            Err(_) => {
                debug!(directive = %section.directive, "unknown section directive, passing to host");
                self.run_host(&section.to_source())?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Run a directive; usage faults stay local to the invocation.
    fn dispatch(&mut self, directive: &Directive, raw_args: &str, body: Option<&str>) -> Result<Flow> {
        match directive.invoke(self, raw_args, body) {
            Err(e) if e.class() == FaultClass::Usage => {
                self.report(&e);
                Ok(Flow::Continue)
            }
            other => other,
        }
    }

    /// Evaluate a section body on the current target, handling embedded
    /// line directives and shell escapes in source order.
    pub fn run_on_current(&mut self, body: &str) -> Result<Flow> {
        for chunk in cell::split_body(body) {
            self.interrupt.check()?;
            match chunk {
                Chunk::Code(code) => self.execute_remote(&code)?,
                Chunk::Shell(command) => self.run_shell(&command)?,
                Chunk::Line(line) => {
                    if let Flow::Stop(message) = self.run_line_directive(&line)? {
                        return Ok(Flow::Stop(message));
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn run_line_directive(&mut self, line: &str) -> Result<Flow> {
        let (name, raw_args) = match cell::parse_line_directive(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.report(&e);
                return Ok(Flow::Continue);
            }
        };
        let registry = Arc::clone(&self.registry);
        match registry.lookup(name, DirectiveKind::Line) {
            Ok(directive) => self.dispatch(directive, raw_args, None),
            Err(e) => {
                self.report(&e);
                Ok(Flow::Continue)
            }
        }
    }

    /// Ship code to the current target and stream its output.
    ///
    /// On interrupt the target's in-flight operation is aborted exactly
    /// once before the error propagates.
    pub fn execute_remote(&mut self, code: &str) -> Result<()> {
        let mut lease = self.acquire_current()?;
        let mut relay = Relay::new(self.output.clone(), self.context.silent);
        let result = lease.execute(
            code,
            &mut |stream, bytes| relay.feed(stream, bytes),
            self.options.timeout,
            &self.interrupt,
        );
        relay.finish();

        match result {
            Err(Error::Interrupted) => {
                if let Err(e) = lease.abort() {
                    warn!(device = %lease.target().name, "abort failed: {}", e);
                }
                Err(Error::Interrupted)
            }
            Err(e @ (Error::TargetUnavailable { .. } | Error::Unreachable { .. })) => {
                lease.invalidate();
                Err(e)
            }
            other => other,
        }
    }

    /// Run host-native code.
    pub fn run_host(&mut self, code: &str) -> Result<()> {
        let mut relay = Relay::new(self.output.clone(), self.context.silent);
        let result = self
            .host
            .run_code(code, &mut |stream, bytes| relay.feed(stream, bytes), &self.interrupt);
        relay.finish();
        result
    }

    /// Run a shell escape on the host.
    pub fn run_shell(&mut self, command: &str) -> Result<()> {
        debug!(%command, "shell escape");
        let mut relay = Relay::new(self.output.clone(), self.context.silent);
        let result = self
            .host
            .shell(command, &mut |stream, bytes| relay.feed(stream, bytes), &self.interrupt);
        relay.finish();
        result
    }

    /// Run a bash script on the host.
    pub fn run_bash(&mut self, script: &str) -> Result<()> {
        let mut relay = Relay::new(self.output.clone(), self.context.silent);
        let result = self
            .host
            .bash(script, &mut |stream, bytes| relay.feed(stream, bytes), &self.interrupt);
        relay.finish();
        result
    }

    /// The current target, falling back to the notebook's default device.
    pub fn current_target(&mut self) -> Result<Target> {
        if let Some(target) = &self.context.current {
            return Ok(target.clone());
        }
        let key = self.conf.get(DEVICE_KEY).ok_or(Error::NoTargetAvailable)?;
        let target = self
            .devices
            .get_device(&key, None)
            .ok_or(Error::NoTargetAvailable)?;
        debug!(device = %target.name, "resolved default device");
        self.context.current = Some(target.clone());
        Ok(target)
    }

    pub fn set_current(&mut self, target: Option<Target>) {
        self.context.current = target;
    }

    /// Exclusive access to the current target.
    pub fn acquire_current(&mut self) -> Result<Lease> {
        let target = self.current_target()?;
        self.devices.acquire(&target)
    }

    /// Make `target` the current and default device of this notebook.
    pub fn set_default_device(&mut self, target: &Target) -> Result<()> {
        self.context.current = Some(target.clone());
        self.conf.set(DEVICE_KEY, &target.name)
    }

    /// Change the host working directory and remember it.
    pub fn change_dir(&mut self, path: &Path) -> Result<()> {
        self.host.set_cwd(path)?;
        let cwd = self.host.cwd().to_string_lossy().into_owned();
        self.conf.set(CWD_KEY, &cwd)
    }

    /// Write a fault to the error stream, formatted by class.
    pub fn report(&self, e: &Error) {
        match e.class() {
            FaultClass::Usage | FaultClass::NotFound | FaultClass::Cancellation => {
                self.output.error(e.to_string());
            }
            FaultClass::TargetUnavailable | FaultClass::RemoteFault => {
                warn!("{}", e);
                self.output.error(e.to_string());
            }
            FaultClass::Unclassified => {
                error!("{}", e);
                self.output.error(format!("***** {e}\n"));
                self.output.print("\n\nDetails:\n");
                self.output.error(format!("{e:?}"));
                let mut source = std::error::Error::source(e);
                while let Some(cause) = source {
                    self.output.error(format!("  caused by: {cause}"));
                    source = std::error::Error::source(cause);
                }
                std::thread::sleep(self.options.fault_pause);
            }
        }
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn devices(&self) -> Arc<dyn DeviceRegistry> {
        Arc::clone(&self.devices)
    }

    pub fn registry(&self) -> Arc<DirectiveRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn host(&self) -> &dyn HostRuntime {
        self.host.as_ref()
    }

    pub fn config(&self) -> &dyn ConfigStore {
        self.conf.as_ref()
    }

    pub fn options(&self) -> &KernelOptions {
        &self.options
    }

    pub fn log_control(&self) -> Option<Arc<dyn LogControl>> {
        self.log_control.clone()
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Handle the front-end uses to cancel the running cell.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builder for [`Kernel`].
pub struct KernelBuilder {
    devices: Arc<dyn DeviceRegistry>,
    sink: Arc<dyn OutputSink>,
    registry: Option<DirectiveRegistry>,
    host: Option<Box<dyn HostRuntime>>,
    conf: Option<Box<dyn ConfigStore>>,
    options: KernelOptions,
    log_control: Option<Arc<dyn LogControl>>,
}

impl KernelBuilder {
    /// Directives to use instead of the built-in set.
    pub fn registry(mut self, registry: DirectiveRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn host(mut self, host: Box<dyn HostRuntime>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn config_store(mut self, conf: Box<dyn ConfigStore>) -> Self {
        self.conf = Some(conf);
        self
    }

    pub fn options(mut self, options: KernelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn log_control(mut self, log_control: Arc<dyn LogControl>) -> Self {
        self.log_control = Some(log_control);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Kernel> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => directives::builtin_registry()?,
        };
        let mut host = match self.host {
            Some(host) => host,
            None => Box::new(SubprocessHost::from_options(&self.options)?),
        };
        let conf = self
            .conf
            .unwrap_or_else(|| Box::new(MemoryConfigStore::new()));

        if let Some(cwd) = conf.get(CWD_KEY) {
            if let Err(e) = host.set_cwd(Path::new(&cwd)) {
                warn!("Failed to restore working directory {}: {}", cwd, e);
            }
        }

        let output = Output::new(self.sink).with_color(self.options.color);
        Ok(Kernel {
            registry: Arc::new(registry),
            devices: self.devices,
            host,
            conf,
            output,
            options: self.options,
            interrupt: InterruptHandle::new(),
            log_control: self.log_control,
            context: ExecutionContext::default(),
            execution_count: 0,
        })
    }
}
