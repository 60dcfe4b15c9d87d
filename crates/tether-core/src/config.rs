//! Kernel configuration and persisted per-notebook state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::level_filters::LevelFilter;

use crate::error::{Error, Result};

/// Keys of the per-notebook record.
pub const DEVICE_KEY: &str = "device";
pub const CWD_KEY: &str = "cwd";

/// Tunables for one kernel.
#[derive(Debug, Clone)]
pub struct KernelOptions {
    /// Per-execution timeout on a target; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Pause after reporting an unclassified fault.
    pub fault_pause: Duration,
    /// Emit ANSI styles.
    pub color: bool,
    /// Command running host-native code, fed on stdin.
    pub interpreter: String,
    /// Shell used for `!` escapes.
    pub shell: String,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            fault_pause: Duration::from_millis(500),
            color: true,
            interpreter: "python3".to_string(),
            shell: "sh".to_string(),
        }
    }
}

/// Small key/value record scoped to one notebook.
pub trait ConfigStore: Send {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }
}

/// In-memory store, for tests and throwaway sessions.
#[derive(Debug, Default, Clone)]
pub struct MemoryConfigStore {
    values: BTreeMap<String, String>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

type Records = BTreeMap<String, BTreeMap<String, String>>;

/// Store backed by a JSON file shared by all notebooks:
/// `{ "<notebook>": { "<key>": "<value>" } }`.
///
/// The file is re-read on every access so concurrent kernels see each
/// other's writes.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
    notebook: String,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>, notebook: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            notebook: notebook.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Records> {
        if !self.path.exists() {
            return Ok(Records::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(Records::new());
        }
        Ok(serde_json::from_str(&text)?)
    }
}

impl ConfigStore for JsonConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.load() {
            Ok(records) => records.get(&self.notebook)?.get(key).cloned(),
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut records = self.load()?;
        records
            .entry(self.notebook.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&records)?)?;
        Ok(())
    }
}

/// Runtime control over log verbosity, provided by the front-end that
/// installed the subscriber.
pub trait LogControl: Send + Sync {
    /// Set the level of one logger (module path); an empty logger sets the
    /// default.
    fn set_level(&self, logger: &str, level: LevelFilter) -> Result<()>;

    /// Current filter, in `EnvFilter` directive syntax.
    fn current(&self) -> String;
}

/// Map a level name as users type it onto a tracing filter.
pub fn parse_level(name: &str) -> Result<LevelFilter> {
    match name.to_ascii_uppercase().as_str() {
        "DEBUG" => Ok(LevelFilter::DEBUG),
        "INFO" => Ok(LevelFilter::INFO),
        "WARNING" | "WARN" => Ok(LevelFilter::WARN),
        "ERROR" | "CRITICAL" => Ok(LevelFilter::ERROR),
        "TRACE" => Ok(LevelFilter::TRACE),
        "OFF" => Ok(LevelFilter::OFF),
        _ => Err(Error::Usage(format!("unknown log level: {name}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_store_scoped_by_notebook() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("connect_rc.json");
        let mut a = JsonConfigStore::new(&path, "/work/a.py");
        let mut b = JsonConfigStore::new(&path, "/work/b.py");

        assert_eq!(a.get(DEVICE_KEY), None);
        assert_eq!(a.get_or(DEVICE_KEY, "devA"), "devA");
        a.set(DEVICE_KEY, "devA").unwrap();
        b.set(DEVICE_KEY, "devB").unwrap();
        a.set(CWD_KEY, "/tmp").unwrap();

        let reopened = JsonConfigStore::new(&path, "/work/a.py");
        assert_eq!(reopened.get(DEVICE_KEY).as_deref(), Some("devA"));
        assert_eq!(reopened.get(CWD_KEY).as_deref(), Some("/tmp"));
        assert_eq!(b.get(DEVICE_KEY).as_deref(), Some("devB"));

        let text = std::fs::read_to_string(&path).unwrap();
        let records: Records = serde_json::from_str(&text).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_corrupt_file_reads_as_missing() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("connect_rc.json");
        std::fs::write(&path, "{ not json").unwrap();
        let mut store = JsonConfigStore::new(&path, "nb");
        assert_eq!(store.get(DEVICE_KEY), None);
        assert!(matches!(store.set(DEVICE_KEY, "x"), Err(Error::Json(_))));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG").unwrap(), LevelFilter::DEBUG);
        assert_eq!(parse_level("warning").unwrap(), LevelFilter::WARN);
        assert_eq!(parse_level("CRITICAL").unwrap(), LevelFilter::ERROR);
        assert!(parse_level("LOUD").is_err());
    }
}
