//! Remote execution targets.
//!
//! A [`Target`] is an addressable device. Sessions to it are opened lazily
//! by a [`DeviceRegistry`] through a per-scheme [`Connector`] and handed out
//! as exclusive [`Lease`]s. A lease gives its session back to the registry
//! when dropped, whatever path the caller leaves by.

pub mod exec;
pub mod registry;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::interrupt::InterruptHandle;
use crate::output::Stream;

pub use exec::ExecConnector;
pub use registry::{DeviceStore, MemoryRegistry, uid_for};

/// An addressable remote execution endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub uid: String,
    pub name: String,
    pub url: String,
    /// Transport the target was resolved through, when a lookup asked for
    /// specific schemes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme_hint: Option<String>,
}

impl Target {
    /// Transport scheme: the hint if set, else the URL scheme (e.g. `exec`
    /// for `exec:///bin/sh`).
    pub fn scheme(&self) -> &str {
        match &self.scheme_hint {
            Some(hint) => hint,
            None => scheme_of(&self.url).unwrap_or(""),
        }
    }

    /// True if `key` is this target's name, uid or url.
    pub fn matches(&self, key: &str) -> bool {
        self.name == key || self.uid == key || self.url == key
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Scheme part of `scheme://rest`, if present and non-empty.
pub fn scheme_of(url: &str) -> Option<&str> {
    url.split_once("://")
        .map(|(scheme, _)| scheme)
        .filter(|scheme| !scheme.is_empty())
}

/// Callback receiving raw output bytes as they arrive.
pub type OutputFn<'a> = dyn FnMut(Stream, &[u8]) + 'a;

/// An open session to one target.
pub trait Session: Send {
    /// Run `code` on the target, streaming output through `on_output`.
    ///
    /// Returns [`Error::Interrupted`] promptly once `interrupt` is raised,
    /// leaving the in-flight operation for [`abort`](Self::abort).
    fn execute(
        &mut self,
        code: &str,
        on_output: &mut OutputFn<'_>,
        timeout: Option<Duration>,
        interrupt: &InterruptHandle,
    ) -> Result<()>;

    /// Stop whatever `execute` left running.
    fn abort(&mut self) -> Result<()>;

    /// Reset the target's interpreter state.
    fn softreset(&mut self) -> Result<()> {
        Ok(())
    }

    /// One-line description for `%info`.
    fn describe(&self) -> String;
}

/// Opens sessions for one URL scheme.
pub trait Connector: Send + Sync {
    fn scheme(&self) -> &str;

    /// Check that `url` is well formed for this scheme.
    fn validate(&self, url: &str) -> Result<()>;

    /// Name given to a device registered without one.
    fn default_name(&self, url: &str) -> String;

    /// Establish a session. Transport failures are [`Error::Unreachable`].
    fn connect(&self, target: &Target) -> Result<Box<dyn Session>>;
}

/// Device resolution and exclusive access.
pub trait DeviceRegistry: Send + Sync {
    /// Find a device by name, uid or url, optionally restricted to schemes.
    fn get_device(&self, key: &str, schemes: Option<&[String]>) -> Option<Target>;

    fn register(&self, url: &str, name: Option<&str>) -> Result<Target>;

    fn unregister(&self, key: &str) -> Result<Target>;

    /// Registered devices in registration order.
    fn devices(&self) -> Vec<Target>;

    /// Take exclusive access to a device, connecting if needed.
    fn acquire(&self, target: &Target) -> Result<Lease>;

    /// Make sure a session to the device can be established.
    fn connect(&self, target: &Target) -> Result<()> {
        self.acquire(target).map(drop)
    }
}

type Release = Box<dyn FnOnce(Option<Box<dyn Session>>) + Send>;

/// Exclusive, scoped access to one target's session.
///
/// Dropping the lease releases the target. An [`invalidate`]d lease
/// discards its session so the next acquisition reconnects.
///
/// [`invalidate`]: Lease::invalidate
pub struct Lease {
    target: Target,
    session: Option<Box<dyn Session>>,
    release: Option<Release>,
}

impl Lease {
    pub fn new(
        target: Target,
        session: Box<dyn Session>,
        release: impl FnOnce(Option<Box<dyn Session>>) + Send + 'static,
    ) -> Self {
        Self {
            target,
            session: Some(session),
            release: Some(Box::new(release)),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    fn session(&mut self) -> Result<&mut (dyn Session + 'static)> {
        let target = &self.target.name;
        self.session
            .as_deref_mut()
            .ok_or_else(|| Error::TargetUnavailable {
                target: target.clone(),
                message: "session closed".to_string(),
            })
    }

    pub fn execute(
        &mut self,
        code: &str,
        on_output: &mut OutputFn<'_>,
        timeout: Option<Duration>,
        interrupt: &InterruptHandle,
    ) -> Result<()> {
        self.session()?.execute(code, on_output, timeout, interrupt)
    }

    pub fn abort(&mut self) -> Result<()> {
        self.session()?.abort()
    }

    pub fn softreset(&mut self) -> Result<()> {
        self.session()?.softreset()
    }

    pub fn describe(&mut self) -> Result<String> {
        Ok(self.session()?.describe())
    }

    /// Drop the session; the target stays registered.
    pub fn invalidate(&mut self) {
        self.session = None;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.session.take());
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("target", &self.target.name)
            .field("open", &self.session.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Nop;

    impl Session for Nop {
        fn execute(
            &mut self,
            _code: &str,
            _on_output: &mut OutputFn<'_>,
            _timeout: Option<Duration>,
            _interrupt: &InterruptHandle,
        ) -> Result<()> {
            Ok(())
        }

        fn abort(&mut self) -> Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "nop".into()
        }
    }

    fn target() -> Target {
        Target {
            uid: "1".into(),
            name: "devA".into(),
            url: "mock://devA".into(),
            scheme_hint: None,
        }
    }

    #[test]
    fn test_scheme() {
        assert_eq!(target().scheme(), "mock");
        assert_eq!(scheme_of("no-scheme"), None);
        assert_eq!(scheme_of("://x"), None);

        let hinted = Target {
            scheme_hint: Some("serial".into()),
            ..target()
        };
        assert_eq!(hinted.scheme(), "serial");
    }

    #[test]
    fn test_release_returns_session() {
        let returned = Arc::new(Mutex::new(None));
        let slot = returned.clone();
        {
            let mut lease = Lease::new(target(), Box::new(Nop), move |session| {
                *slot.lock().unwrap() = Some(session.is_some());
            });
            lease.execute("x", &mut |_, _| {}, None, &InterruptHandle::new()).unwrap();
        }
        assert_eq!(*returned.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_invalidated_lease_discards_session() {
        let returned = Arc::new(Mutex::new(None));
        let slot = returned.clone();
        {
            let mut lease = Lease::new(target(), Box::new(Nop), move |session| {
                *slot.lock().unwrap() = Some(session.is_some());
            });
            lease.invalidate();
            assert!(matches!(lease.abort(), Err(Error::TargetUnavailable { .. })));
        }
        assert_eq!(*returned.lock().unwrap(), Some(false));
    }
}
