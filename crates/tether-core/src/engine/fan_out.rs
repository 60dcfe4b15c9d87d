//! Sequential multi-target evaluation.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use super::{Flow, Kernel};
use crate::error::Result;
use crate::target::Target;

/// Banner label for host runs.
const HOST_LABEL: &str = "HOST";

/// Where a section body should run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Run on the host first.
    pub host: bool,
    /// Run on every registered device.
    pub all: bool,
    /// Devices by name, uid or url. Takes precedence over `all`.
    pub names: Vec<String>,
    /// Suppress boundary banners.
    pub quiet: bool,
}

impl FanOut {
    /// True if the body should simply run on the current target.
    pub fn is_current_only(&self) -> bool {
        !self.host && !self.all && self.names.is_empty()
    }
}

/// One resolved stop of a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Target(Target),
    /// A name that matched no registered device.
    Missing(String),
}

impl Kernel {
    /// Resolve a plan into the ordered list of targets to visit.
    ///
    /// Explicit names are de-duplicated by first occurrence. `all` takes a
    /// snapshot of the registry at this instant.
    pub fn resolve_destinations(&self, plan: &FanOut) -> Vec<Destination> {
        if !plan.names.is_empty() {
            let mut seen: Vec<&str> = Vec::new();
            let mut destinations = Vec::new();
            for name in &plan.names {
                if seen.contains(&name.as_str()) {
                    continue;
                }
                seen.push(name);
                let destination = match self.devices.get_device(name, None) {
                    Some(target) => {
                        if destinations.contains(&Destination::Target(target.clone())) {
                            continue;
                        }
                        Destination::Target(target)
                    }
                    None => Destination::Missing(name.clone()),
                };
                destinations.push(destination);
            }
            destinations
        } else if plan.all {
            self.devices
                .devices()
                .into_iter()
                .map(Destination::Target)
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Run `body` according to `plan`.
    ///
    /// The current target is restored afterwards on every exit path,
    /// including errors, interrupts and panics.
    pub fn fan_out(&mut self, plan: &FanOut, body: &str) -> Result<Flow> {
        if plan.is_current_only() {
            return self.run_on_current(body);
        }

        if plan.host {
            if !plan.quiet {
                self.output.banner(HOST_LABEL);
            }
            match self.run_host(body) {
                Err(e) if e.is_interrupt() => return Err(e),
                Err(e) => {
                    warn!(device = HOST_LABEL, "isolated fault: {}", e);
                    self.report(&e);
                }
                Ok(()) => {}
            }
        }

        let destinations = self.resolve_destinations(plan);
        if destinations.is_empty() {
            return Ok(Flow::Continue);
        }
        debug!(targets = destinations.len(), quiet = plan.quiet, "fan-out");

        let saved = self.context.current.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.visit_all(&destinations, plan.quiet, body)
        }));
        self.context.current = saved;
        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    fn visit_all(&mut self, destinations: &[Destination], quiet: bool, body: &str) -> Result<Flow> {
        for destination in destinations {
            self.interrupt.check()?;
            let target = match destination {
                Destination::Target(target) => target,
                Destination::Missing(name) => {
                    self.output.error(format!("No such device: {name}"));
                    continue;
                }
            };
            match self.visit(target, quiet, body) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop(message)) => {
                    // Ends this target's turn only.
                    if let Some(message) = message {
                        self.output.error(message);
                    }
                }
                Err(e) if e.is_interrupt() => return Err(e),
                Err(e) => {
                    warn!(device = %target.name, "isolated fault: {}", e);
                    self.report(&e);
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn visit(&mut self, target: &Target, quiet: bool, body: &str) -> Result<Flow> {
        self.context.current = Some(target.clone());
        self.devices.connect(target)?;
        if !quiet {
            self.output.banner(&target.name);
        }
        self.run_on_current(body)
    }
}
