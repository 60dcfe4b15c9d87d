//! Directive registry.
//!
//! A directive is a named command embedded in a cell, invoked either as a
//! line directive (`%name args`) or a section directive (`%%name args` with
//! a body). Each directive declares an [`ArgSpec`]; the registry parses the
//! argument text against it before the handler ever runs.

pub mod args;

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

pub use args::{ArgSpec, ArgValue, Arity, Param, ParseOutcome, ParsedArgs, ValueKind};

use crate::cell::{LINE_MARKER, SECTION_MARKER};
use crate::engine::{Flow, Kernel};
use crate::error::{Error, Result};
use crate::output::Style;

/// Whether a directive applies to a single line or to a section body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Line,
    Section,
}

impl DirectiveKind {
    /// Marker written in front of the name.
    pub fn marker(self) -> String {
        match self {
            DirectiveKind::Line => LINE_MARKER.to_string(),
            DirectiveKind::Section => SECTION_MARKER.to_string(),
        }
    }

    /// Program name used in usage and help text, e.g. `%%connect`.
    pub fn prog(self, name: &str) -> String {
        format!("{}{name}", self.marker())
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveKind::Line => f.write_str("line"),
            DirectiveKind::Section => f.write_str("section"),
        }
    }
}

/// Directive handler.
///
/// Receives the kernel, the parsed arguments and, for section directives,
/// the section body.
pub type Handler = fn(&mut Kernel, &ParsedArgs, Option<&str>) -> Result<Flow>;

/// A registered directive.
#[derive(Clone)]
pub struct Directive {
    name: String,
    kind: DirectiveKind,
    spec: ArgSpec,
    handler: Handler,
}

impl Directive {
    pub fn line(name: &str, spec: ArgSpec, handler: Handler) -> Self {
        Self {
            name: name.to_string(),
            kind: DirectiveKind::Line,
            spec,
            handler,
        }
    }

    pub fn section(name: &str, spec: ArgSpec, handler: Handler) -> Self {
        Self {
            name: name.to_string(),
            kind: DirectiveKind::Section,
            spec,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DirectiveKind {
        self.kind
    }

    pub fn spec(&self) -> &ArgSpec {
        &self.spec
    }

    pub fn prog(&self) -> String {
        self.kind.prog(&self.name)
    }

    pub fn summary(&self) -> &str {
        self.spec.summary()
    }

    pub fn help_text(&self) -> String {
        self.spec.help_text(&self.prog())
    }

    pub fn parse(&self, raw_args: &str) -> ParseOutcome {
        self.spec.parse(&self.prog(), raw_args)
    }

    /// Parse `raw_args` and run the handler.
    ///
    /// Help and usage errors are printed and the handler is skipped; the
    /// cell continues.
    pub fn invoke(&self, kernel: &mut Kernel, raw_args: &str, body: Option<&str>) -> Result<Flow> {
        match self.parse(raw_args) {
            ParseOutcome::Parsed(args) => {
                debug!(directive = %self.prog(), ?args, "invoking directive");
                (self.handler)(kernel, &args, body)
            }
            ParseOutcome::Help(text) => {
                kernel.output().print_styled(text, Style::PLAIN, "");
                Ok(Flow::Continue)
            }
            ParseOutcome::Failed(text) => {
                kernel.output().error_styled(text, Style::PLAIN, "");
                Ok(Flow::Continue)
            }
        }
    }
}

impl fmt::Debug for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directive")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Directives keyed by (kind, name).
///
/// Line and section directives live in separate namespaces: `%connect` and
/// `%%connect` are distinct entries.
#[derive(Debug, Default, Clone)]
pub struct DirectiveRegistry {
    line: BTreeMap<String, Directive>,
    section: BTreeMap<String, Directive>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: DirectiveKind) -> &BTreeMap<String, Directive> {
        match kind {
            DirectiveKind::Line => &self.line,
            DirectiveKind::Section => &self.section,
        }
    }

    pub fn register(&mut self, directive: Directive) -> Result<()> {
        let table = match directive.kind {
            DirectiveKind::Line => &mut self.line,
            DirectiveKind::Section => &mut self.section,
        };
        if table.contains_key(&directive.name) {
            return Err(Error::DuplicateDirective {
                name: directive.name,
                kind: directive.kind,
            });
        }
        table.insert(directive.name.clone(), directive);
        Ok(())
    }

    pub fn lookup(&self, name: &str, kind: DirectiveKind) -> Result<&Directive> {
        self.table(kind)
            .get(name)
            .ok_or_else(|| Error::DirectiveNotFound {
                name: name.to_string(),
                kind,
            })
    }

    pub fn contains(&self, name: &str, kind: DirectiveKind) -> bool {
        self.table(kind).contains_key(name)
    }

    /// Directives of one kind, sorted by name.
    pub fn iter(&self, kind: DirectiveKind) -> impl Iterator<Item = &Directive> {
        self.table(kind).values()
    }

    pub fn len(&self) -> usize {
        self.line.len() + self.section.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
