//! Subscriber installation and runtime level control.

use tether_core::{Error, LogControl};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

/// Install the global subscriber and return a handle for `%loglevel`.
pub fn init(verbose: bool) -> ReloadLogControl {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();

    ReloadLogControl { handle }
}

/// [`LogControl`] backed by a reloadable [`EnvFilter`].
pub struct ReloadLogControl {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogControl for ReloadLogControl {
    fn set_level(&self, logger: &str, level: LevelFilter) -> tether_core::Result<()> {
        let directives = replace_directive(&self.current(), logger, level);
        let filter = EnvFilter::try_new(&directives)
            .map_err(|e| Error::Usage(format!("invalid log filter '{directives}': {e}")))?;
        self.handle
            .modify(|current| *current = filter)
            .map_err(|e| Error::Usage(format!("cannot reload log filter: {e}")))
    }

    fn current(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }
}

/// Replace the directive for `logger` in a comma separated filter, or the
/// bare default level when `logger` is empty.
fn replace_directive(current: &str, logger: &str, level: LevelFilter) -> String {
    let logger = logger.trim();
    let mut directives: Vec<String> = current
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .filter(|d| match d.rsplit_once('=') {
            Some((target, _)) => target != logger,
            None => !logger.is_empty(),
        })
        .map(str::to_string)
        .collect();
    let level = level.to_string().to_lowercase();
    if logger.is_empty() {
        directives.insert(0, level);
    } else {
        directives.push(format!("{logger}={level}"));
    }
    directives.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_adds_logger() {
        assert_eq!(
            replace_directive("warn", "tether_core::engine", LevelFilter::DEBUG),
            "warn,tether_core::engine=debug"
        );
    }

    #[test]
    fn test_replace_overrides_existing_logger() {
        assert_eq!(
            replace_directive("warn,tether_core=debug", "tether_core", LevelFilter::ERROR),
            "warn,tether_core=error"
        );
    }

    #[test]
    fn test_replace_default_level() {
        assert_eq!(
            replace_directive("warn,tether_core=debug", "", LevelFilter::INFO),
            "info,tether_core=debug"
        );
    }
}
