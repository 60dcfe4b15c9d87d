//! In-process device registry.

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHasher;
use tracing::{debug, info};

use super::{Connector, DeviceRegistry, Lease, Session, Target, scheme_of};
use crate::error::{Error, Result};

/// Stable identifier derived from a device URL.
pub fn uid_for(url: &str) -> String {
    let mut hasher = FxHasher::default();
    url.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

struct Slot {
    target: Target,
    session: Option<Box<dyn Session>>,
    held: bool,
}

#[derive(Default)]
struct Inner {
    slots: Vec<Slot>,
}

impl Inner {
    fn slot_mut(&mut self, uid: &str) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.target.uid == uid)
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot.target.name == key)
            .or_else(|| self.slots.iter().position(|slot| slot.target.uid == key))
            .or_else(|| self.slots.iter().position(|slot| slot.target.url == key))
    }

    fn targets(&self) -> Vec<Target> {
        self.slots.iter().map(|slot| slot.target.clone()).collect()
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registry holding targets in registration order.
///
/// Sessions are opened on first acquisition and kept between leases.
/// Exclusivity is tracked per target: a second acquisition while a lease is
/// outstanding fails with [`Error::Busy`].
pub struct MemoryRegistry {
    inner: Arc<Mutex<Inner>>,
    connectors: Vec<Arc<dyn Connector>>,
    store: Option<DeviceStore>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            connectors: Vec::new(),
            store: None,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.push(connector);
        self
    }

    /// Load devices from `store` and write every change back to it.
    pub fn with_store(mut self, store: DeviceStore) -> Result<Self> {
        let targets = store.load()?;
        {
            let mut inner = lock(&self.inner);
            for target in targets {
                if inner.slot_mut(&target.uid).is_none() {
                    inner.slots.push(Slot {
                        target,
                        session: None,
                        held: false,
                    });
                }
            }
        }
        self.store = Some(store);
        Ok(self)
    }

    fn connector(&self, scheme: &str) -> Option<&Arc<dyn Connector>> {
        self.connectors.iter().find(|c| c.scheme() == scheme)
    }

    fn persist(&self, targets: &[Target]) -> Result<()> {
        match &self.store {
            Some(store) => store.save(targets),
            None => Ok(()),
        }
    }

    fn open(&self, target: &Target) -> Result<Box<dyn Session>> {
        let connector = self
            .connector(target.scheme())
            .ok_or_else(|| Error::InvalidUrl(format!("no transport for '{}'", target.url)))?;
        info!(device = %target.name, url = %target.url, "connecting");
        connector.connect(target)
    }

    fn release(inner: &Mutex<Inner>, uid: &str, session: Option<Box<dyn Session>>) {
        let mut inner = lock(inner);
        if let Some(slot) = inner.slot_mut(uid) {
            slot.held = false;
            slot.session = session;
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn get_device(&self, key: &str, schemes: Option<&[String]>) -> Option<Target> {
        let inner = lock(&self.inner);
        let target = &inner.slots[inner.position(key)?].target;
        match schemes {
            Some(schemes) => schemes
                .iter()
                .find(|s| s.as_str() == target.scheme())
                .map(|scheme| Target {
                    scheme_hint: Some(scheme.clone()),
                    ..target.clone()
                }),
            None => Some(target.clone()),
        }
    }

    fn register(&self, url: &str, name: Option<&str>) -> Result<Target> {
        let scheme = scheme_of(url).ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
        let connector = self.connector(scheme).ok_or_else(|| {
            Error::InvalidUrl(format!("{url} (unsupported scheme '{scheme}')"))
        })?;
        connector.validate(url)?;

        let uid = uid_for(url);
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| connector.default_name(url));

        let targets = {
            let mut inner = lock(&self.inner);
            if let Some(clash) = inner
                .slots
                .iter()
                .find(|slot| slot.target.name == name && slot.target.uid != uid)
            {
                return Err(Error::Usage(format!(
                    "device name '{name}' already used by {}",
                    clash.target.url
                )));
            }
            match inner.slot_mut(&uid) {
                Some(slot) => slot.target.name = name.clone(),
                None => inner.slots.push(Slot {
                    target: Target {
                        uid: uid.clone(),
                        name: name.clone(),
                        url: url.to_string(),
                        scheme_hint: None,
                    },
                    session: None,
                    held: false,
                }),
            }
            inner.targets()
        };
        self.persist(&targets)?;

        info!(device = %name, %url, "registered device");
        Ok(Target {
            uid,
            name,
            url: url.to_string(),
            scheme_hint: None,
        })
    }

    fn unregister(&self, key: &str) -> Result<Target> {
        let (removed, targets) = {
            let mut inner = lock(&self.inner);
            let index = inner
                .position(key)
                .ok_or_else(|| Error::UnknownDevice(key.to_string()))?;
            // A leased slot stays until its lease is dropped.
            if inner.slots[index].held {
                return Err(Error::Busy {
                    target: inner.slots[index].target.name.clone(),
                });
            }
            let slot = inner.slots.remove(index);
            (slot.target, inner.targets())
        };
        self.persist(&targets)?;
        info!(device = %removed.name, "unregistered device");
        Ok(removed)
    }

    fn devices(&self) -> Vec<Target> {
        lock(&self.inner).targets()
    }

    fn acquire(&self, target: &Target) -> Result<Lease> {
        let existing = {
            let mut inner = lock(&self.inner);
            let slot = inner
                .slot_mut(&target.uid)
                .ok_or_else(|| Error::UnknownDevice(target.name.clone()))?;
            if slot.held {
                return Err(Error::Busy {
                    target: target.name.clone(),
                });
            }
            slot.held = true;
            slot.session.take()
        };

        // Connect outside the lock; the slot is already marked held.
        let session = match existing {
            Some(session) => session,
            None => match self.open(target) {
                Ok(session) => session,
                Err(e) => {
                    Self::release(&self.inner, &target.uid, None);
                    return Err(e);
                }
            },
        };

        debug!(device = %target.name, "acquired");
        let inner = Arc::clone(&self.inner);
        let uid = target.uid.clone();
        Ok(Lease::new(target.clone(), session, move |session| {
            Self::release(&inner, &uid, session);
        }))
    }
}

/// JSON file holding the registered device list.
#[derive(Debug, Clone)]
pub struct DeviceStore {
    path: PathBuf,
}

impl DeviceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored devices; a missing file is an empty list.
    pub fn load(&self) -> Result<Vec<Target>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, targets: &[Target]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(targets)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::InterruptHandle;
    use crate::target::OutputFn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Echo;

    impl Session for Echo {
        fn execute(
            &mut self,
            code: &str,
            on_output: &mut OutputFn<'_>,
            _timeout: Option<Duration>,
            _interrupt: &InterruptHandle,
        ) -> Result<()> {
            on_output(crate::output::Stream::Out, code.as_bytes());
            Ok(())
        }

        fn abort(&mut self) -> Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "echo".into()
        }
    }

    #[derive(Default)]
    struct Mock {
        connects: AtomicUsize,
    }

    impl Connector for Mock {
        fn scheme(&self) -> &str {
            "mock"
        }

        fn validate(&self, _url: &str) -> Result<()> {
            Ok(())
        }

        fn default_name(&self, url: &str) -> String {
            url.trim_start_matches("mock://").to_string()
        }

        fn connect(&self, target: &Target) -> Result<Box<dyn Session>> {
            if target.url.ends_with("down") {
                return Err(Error::unreachable(
                    target.name.clone(),
                    std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                ));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Echo))
        }
    }

    fn registry() -> (Arc<Mock>, MemoryRegistry) {
        let mock = Arc::new(Mock::default());
        let registry = MemoryRegistry::new().with_connector(mock.clone());
        (mock, registry)
    }

    #[test]
    fn test_uid_is_stable() {
        assert_eq!(uid_for("mock://a"), uid_for("mock://a"));
        assert_ne!(uid_for("mock://a"), uid_for("mock://b"));
        assert_eq!(uid_for("mock://a").len(), 16);
    }

    #[test]
    fn test_register_and_resolve() {
        let (_, registry) = registry();
        let a = registry.register("mock://devA", None).unwrap();
        assert_eq!(a.name, "devA");
        registry.register("mock://devB", Some("bee")).unwrap();

        assert_eq!(registry.get_device("devA", None).unwrap(), a);
        assert_eq!(registry.get_device(&a.uid, None).unwrap(), a);
        assert_eq!(registry.get_device("mock://devA", None).unwrap(), a);
        assert!(registry.get_device("nope", None).is_none());
        assert!(registry.get_device("devA", Some(&["serial".to_string()])).is_none());
        let hinted = registry
            .get_device("devA", Some(&["serial".to_string(), "mock".to_string()]))
            .unwrap();
        assert_eq!(hinted.scheme_hint.as_deref(), Some("mock"));
        assert_eq!(hinted.uid, a.uid);
        assert_eq!(a.scheme_hint, None);
        drop(registry.acquire(&hinted).unwrap());

        let names: Vec<String> = registry.devices().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["devA", "bee"]);
    }

    #[test]
    fn test_register_rejects_bad_urls() {
        let (_, registry) = registry();
        assert!(matches!(registry.register("devA", None), Err(Error::InvalidUrl(_))));
        assert!(matches!(
            registry.register("serial:///dev/ttyUSB0", None),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_unregister() {
        let (_, registry) = registry();
        registry.register("mock://devA", None).unwrap();
        assert_eq!(registry.unregister("devA").unwrap().name, "devA");
        assert!(matches!(registry.unregister("devA"), Err(Error::UnknownDevice(_))));
    }

    #[test]
    fn test_exclusive_lease() {
        let (mock, registry) = registry();
        let a = registry.register("mock://devA", None).unwrap();
        let lease = registry.acquire(&a).unwrap();
        assert!(matches!(registry.acquire(&a), Err(Error::Busy { .. })));
        drop(lease);
        let _again = registry.acquire(&a).unwrap();
        assert_eq!(mock.connects.load(Ordering::SeqCst), 1, "session reused");
    }

    #[test]
    fn test_unregister_while_leased_is_busy() {
        let (_, registry) = registry();
        let a = registry.register("mock://devA", None).unwrap();
        let lease = registry.acquire(&a).unwrap();
        assert!(matches!(registry.unregister("devA"), Err(Error::Busy { .. })));
        registry.register("mock://devA", None).unwrap();
        assert!(matches!(registry.acquire(&a), Err(Error::Busy { .. })));

        drop(lease);
        let again = registry.acquire(&a).unwrap();
        assert!(matches!(registry.acquire(&a), Err(Error::Busy { .. })));
        drop(again);
        assert_eq!(registry.unregister("devA").unwrap().name, "devA");
        assert!(registry.devices().is_empty());
    }

    #[test]
    fn test_failed_connect_releases() {
        let (_, registry) = registry();
        let down = registry.register("mock://down", None).unwrap();
        assert!(matches!(registry.acquire(&down), Err(Error::Unreachable { .. })));
        assert!(matches!(registry.acquire(&down), Err(Error::Unreachable { .. })));
    }

    #[test]
    fn test_invalidate_forces_reconnect() {
        let (mock, registry) = registry();
        let a = registry.register("mock://devA", None).unwrap();
        registry.acquire(&a).unwrap().invalidate();
        registry.connect(&a).unwrap();
        assert_eq!(mock.connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceStore::new(dir.path().join("devices.json"));
        {
            let mock = Arc::new(Mock::default());
            let registry = MemoryRegistry::new()
                .with_connector(mock)
                .with_store(store.clone())
                .unwrap();
            registry.register("mock://devA", None).unwrap();
            registry.register("mock://devB", None).unwrap();
            registry.unregister("devA").unwrap();
        }
        let registry = MemoryRegistry::new()
            .with_connector(Arc::new(Mock::default()))
            .with_store(store)
            .unwrap();
        let names: Vec<String> = registry.devices().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["devB"]);
        assert!(!std::fs::read_to_string(dir.path().join("devices.json"))
            .unwrap()
            .contains("scheme_hint"));
    }
}
