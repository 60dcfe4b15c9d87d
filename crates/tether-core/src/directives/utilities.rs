//! Kernel utilities: `%lsmagic`, `%cd`, `%loglevel`.

use std::path::Path;

use tracing::info;

use crate::config::parse_level;
use crate::directive::{ArgSpec, Directive, DirectiveKind, Param, ParsedArgs, ValueKind};
use crate::engine::{Flow, Kernel};
use crate::error::{Error, Result};
use crate::output::{Color, Style};

const LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

pub(super) fn directives() -> Vec<Directive> {
    vec![
        Directive::line(
            "lsmagic",
            ArgSpec::new().about("List all directives.").param(
                Param::flag("verbose")
                    .short('v')
                    .help("Show detailed help for each line directive."),
            ),
            lsmagic,
        ),
        Directive::line(
            "cd",
            ArgSpec::new()
                .about("Change current working directory on host.")
                .epilog("Expands ~ and shell variables (e.g. $PROJECTS) as expected.")
                .param(
                    Param::positional("path", ValueKind::Str)
                        .optional()
                        .default_value("~")
                        .help("new working directory on host"),
                ),
            cd,
        ),
        Directive::line(
            "loglevel",
            ArgSpec::new()
                .about("Set logging level.")
                .epilog(
                    "Without arguments lists name and level of all configured loggers.\n\nExample:\n    %loglevel tether_core::engine DEBUG",
                )
                .param(
                    Param::positional("logger", ValueKind::Str)
                        .optional()
                        .help("name of logger to apply level to"),
                )
                .param(
                    Param::positional("level", ValueKind::Str)
                        .optional()
                        .choices(&LEVELS)
                        .default_value("INFO")
                        .help("logging level"),
                ),
            loglevel,
        ),
    ]
}

fn lsmagic(kernel: &mut Kernel, args: &ParsedArgs, _body: Option<&str>) -> Result<Flow> {
    let registry = kernel.registry();
    let output = kernel.output();

    if args.flag("verbose") {
        for directive in registry.iter(DirectiveKind::Line) {
            let name = directive.name();
            output.print(format!(
                "MAGIC %{name} {}",
                "-".repeat(70usize.saturating_sub(name.len()))
            ));
            output.print_styled(directive.help_text(), Style::PLAIN, "");
            output.print("\n");
        }
        return Ok(Flow::Continue);
    }

    output.print("Line Magic:    -h shows help (e.g. %discover -h)");
    for directive in registry.iter(DirectiveKind::Line) {
        output.print(format!("  %{:10}  {}", directive.name(), directive.summary()));
    }
    output.print(format!(
        "  {:11}  {}",
        "!", "Pass line to the host shell for evaluation."
    ));
    output.print("\nCell Magic:    -h shows help (e.g. %%connect -h)");
    for directive in registry.iter(DirectiveKind::Section) {
        output.print(format!("  %%{:10} {}", directive.name(), directive.summary()));
    }
    Ok(Flow::Continue)
}

fn cd(kernel: &mut Kernel, args: &ParsedArgs, _body: Option<&str>) -> Result<Flow> {
    let path = expand_path(args.string("path").unwrap_or("~"));
    kernel.change_dir(Path::new(&path))?;
    let cwd = kernel.host().cwd().display().to_string();
    kernel.output().print(format!("cwd = {cwd}"));
    Ok(Flow::Continue)
}

fn loglevel(kernel: &mut Kernel, args: &ParsedArgs, _body: Option<&str>) -> Result<Flow> {
    let control = kernel
        .log_control()
        .ok_or_else(|| Error::Usage("log levels cannot be changed in this session".to_string()))?;
    let output = kernel.output();

    if let Some(logger) = args.string("logger") {
        let level = args.string("level").unwrap_or("INFO");
        control.set_level(logger, parse_level(level)?)?;
        info!(%logger, %level, "log level changed");
        output.print(format!("Logger {logger} level set to {level}"));
        return Ok(Flow::Continue);
    }

    output.print(format!("{:30}  {}", "Logger", "Level"));
    output.print("");
    for directive in control.current().split(',').filter(|d| !d.trim().is_empty()) {
        let (logger, level) = match directive.trim().rsplit_once('=') {
            Some((logger, level)) => (logger, level),
            None => ("root", directive.trim()),
        };
        output.print_styled(
            format!("{logger:30}  {}", level.to_uppercase()),
            Style::fg(level_color(level)),
            "\n",
        );
    }
    Ok(Flow::Continue)
}

fn level_color(level: &str) -> Color {
    match level.to_ascii_lowercase().as_str() {
        "debug" | "trace" => Color::Green,
        "info" => Color::Blue,
        "warn" | "warning" => Color::Cyan,
        "error" => Color::Red,
        _ => Color::Grey,
    }
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references.
///
/// Unknown variables are left as written.
pub fn expand_path(path: &str) -> String {
    let path = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => format!("{}{rest}", home.display()),
            None => path.to_string(),
        },
        _ => path.to_string(),
    };

    let mut expanded = String::with_capacity(path.len());
    let mut rest = path.as_str();
    while let Some(idx) = rest.find('$') {
        expanded.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        let (name, consumed) = match after.strip_prefix('{') {
            Some(braced) => match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            },
            None => {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end)
            }
        };
        match std::env::var(name) {
            Ok(value) if !name.is_empty() => expanded.push_str(&value),
            _ => expanded.push_str(&rest[idx..idx + 1 + consumed]),
        }
        rest = &after[consumed..];
    }
    expanded.push_str(rest);
    expanded
}
