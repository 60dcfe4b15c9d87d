//! Built-in directives.

mod connect;
mod device;
mod utilities;

use crate::directive::DirectiveRegistry;
use crate::error::Result;

pub use utilities::expand_path;

/// Registry holding every built-in directive.
pub fn builtin_registry() -> Result<DirectiveRegistry> {
    let mut registry = DirectiveRegistry::new();
    let all = connect::directives()
        .into_iter()
        .chain(device::directives())
        .chain(utilities::directives());
    for directive in all {
        registry.register(directive)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::DirectiveKind;

    #[test]
    fn test_builtins_registered() {
        let registry = builtin_registry().unwrap();
        for name in ["connect", "host", "bash"] {
            assert!(registry.contains(name, DirectiveKind::Section), "%%{name}");
        }
        for name in [
            "connect",
            "discover",
            "register",
            "unregister",
            "softreset",
            "info",
            "lsmagic",
            "cd",
            "loglevel",
        ] {
            assert!(registry.contains(name, DirectiveKind::Line), "%{name}");
        }
    }

    #[test]
    fn test_every_builtin_has_help() {
        let registry = builtin_registry().unwrap();
        for kind in [DirectiveKind::Line, DirectiveKind::Section] {
            for directive in registry.iter(kind) {
                assert!(!directive.summary().is_empty(), "{}", directive.prog());
                assert!(directive.help_text().contains(&directive.prog()));
            }
        }
    }
}
