//! Declarative argument specifications for directives.
//!
//! Each directive carries an [`ArgSpec`] built alongside its handler. The
//! spec is turned into a `clap::Command` on demand and parsed from
//! shell-style tokens. Parsing never prints: help and usage text come back
//! as values so the caller decides which stream they land on.

use std::collections::BTreeMap;

use clap::builder::PossibleValuesParser;
use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, ColorChoice, Command, value_parser};

/// Type of value a parameter takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Boolean switch, no value.
    Flag,
    Str,
    Int,
    Float,
}

/// How many values a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly one, required.
    One,
    /// Zero or one.
    Optional,
    ZeroOrMore,
    OneOrMore,
}

/// One flag, option or positional of a directive.
#[derive(Debug, Clone)]
pub struct Param {
    name: String,
    short: Option<char>,
    long: Option<String>,
    kind: ValueKind,
    arity: Arity,
    help: String,
    default: Option<String>,
    choices: Vec<String>,
}

impl Param {
    /// Boolean switch `--<name>`.
    pub fn flag(name: &str) -> Self {
        Self {
            name: name.to_string(),
            short: None,
            long: Some(name.to_string()),
            kind: ValueKind::Flag,
            arity: Arity::Optional,
            help: String::new(),
            default: None,
            choices: Vec::new(),
        }
    }

    /// Optional `--<name> VALUE`.
    pub fn option(name: &str, kind: ValueKind) -> Self {
        Self {
            long: Some(name.to_string()),
            arity: Arity::Optional,
            ..Self::positional(name, kind)
        }
    }

    /// Required positional value.
    pub fn positional(name: &str, kind: ValueKind) -> Self {
        Self {
            name: name.to_string(),
            short: None,
            long: None,
            kind,
            arity: if kind == ValueKind::Flag {
                Arity::Optional
            } else {
                Arity::One
            },
            help: String::new(),
            default: None,
            choices: Vec::new(),
        }
    }

    pub fn short(mut self, short: char) -> Self {
        self.short = Some(short);
        self
    }

    pub fn help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }

    pub fn choices(mut self, choices: &[&str]) -> Self {
        self.choices = choices.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.arity = Arity::Optional;
        self
    }

    pub fn zero_or_more(mut self) -> Self {
        self.arity = Arity::ZeroOrMore;
        self
    }

    pub fn one_or_more(mut self) -> Self {
        self.arity = Arity::OneOrMore;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn is_positional(&self) -> bool {
        self.short.is_none() && self.long.is_none()
    }

    fn is_many(&self) -> bool {
        matches!(self.arity, Arity::ZeroOrMore | Arity::OneOrMore)
    }

    /// The switch used when rendering this parameter back to tokens.
    fn switch(&self) -> String {
        match (&self.long, self.short) {
            (Some(long), _) => format!("--{long}"),
            (None, Some(short)) => format!("-{short}"),
            (None, None) => String::new(),
        }
    }

    fn to_arg(&self) -> Arg {
        let mut arg = Arg::new(self.name.clone());
        if let Some(short) = self.short {
            arg = arg.short(short);
        }
        if let Some(long) = &self.long {
            arg = arg.long(long.clone());
        }
        if !self.help.is_empty() {
            arg = arg.help(self.help.clone());
        }

        arg = match self.kind {
            ValueKind::Flag => return arg.action(ArgAction::SetTrue),
            ValueKind::Str if self.choices.is_empty() => arg.value_parser(value_parser!(String)),
            ValueKind::Str => arg.value_parser(PossibleValuesParser::new(self.choices.clone())),
            ValueKind::Int => arg
                .value_parser(value_parser!(i64))
                .allow_negative_numbers(true),
            ValueKind::Float => arg
                .value_parser(value_parser!(f64))
                .allow_negative_numbers(true),
        };

        arg = match self.arity {
            Arity::One => arg.required(true).num_args(1).action(ArgAction::Set),
            Arity::Optional => arg.required(false).num_args(1).action(ArgAction::Set),
            Arity::ZeroOrMore => arg.required(false).num_args(1..).action(ArgAction::Append),
            Arity::OneOrMore => arg.required(true).num_args(1..).action(ArgAction::Append),
        };

        if let Some(default) = &self.default {
            arg = arg.default_value(default.clone());
        }
        arg
    }

    fn extract(&self, matches: &ArgMatches) -> Result<Option<ArgValue>, String> {
        let id = self.name.as_str();
        let mismatch = |e: clap::parser::MatchesError| format!("argument '{id}': {e}");

        if self.kind == ValueKind::Flag {
            let set = matches
                .try_get_one::<bool>(id)
                .map_err(mismatch)?
                .copied()
                .unwrap_or(false);
            return Ok(Some(ArgValue::Flag(set)));
        }

        if self.is_many() {
            let items = match self.kind {
                ValueKind::Str => collect(matches.try_get_many::<String>(id).map_err(mismatch)?, |s| {
                    ArgValue::Text(s.clone())
                }),
                ValueKind::Int => collect(matches.try_get_many::<i64>(id).map_err(mismatch)?, |v| {
                    ArgValue::Int(*v)
                }),
                ValueKind::Float => collect(matches.try_get_many::<f64>(id).map_err(mismatch)?, |v| {
                    ArgValue::Float(*v)
                }),
                ValueKind::Flag => Vec::new(),
            };
            return Ok(Some(ArgValue::List(items)));
        }

        let value = match self.kind {
            ValueKind::Str => matches
                .try_get_one::<String>(id)
                .map_err(mismatch)?
                .map(|s| ArgValue::Text(s.clone())),
            ValueKind::Int => matches
                .try_get_one::<i64>(id)
                .map_err(mismatch)?
                .map(|v| ArgValue::Int(*v)),
            ValueKind::Float => matches
                .try_get_one::<f64>(id)
                .map_err(mismatch)?
                .map(|v| ArgValue::Float(*v)),
            ValueKind::Flag => None,
        };
        Ok(value)
    }
}

fn collect<'a, T: 'a>(
    values: Option<impl Iterator<Item = &'a T>>,
    wrap: impl Fn(&T) -> ArgValue,
) -> Vec<ArgValue> {
    values.map(|it| it.map(wrap).collect()).unwrap_or_default()
}

/// A parsed argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Flag(bool),
    Text(String),
    Int(i64),
    Float(f64),
    List(Vec<ArgValue>),
}

impl ArgValue {
    fn to_token(&self) -> String {
        match self {
            ArgValue::Flag(set) => set.to_string(),
            ArgValue::Text(text) => text.clone(),
            ArgValue::Int(v) => v.to_string(),
            ArgValue::Float(v) => v.to_string(),
            ArgValue::List(items) => items
                .iter()
                .map(ArgValue::to_token)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Values produced by a successful parse, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedArgs {
    values: BTreeMap<String, ArgValue>,
}

impl ParsedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: ArgValue) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    /// True if the switch was given.
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(ArgValue::Flag(true)))
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ArgValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// All string values of a multi-valued parameter (or the single value).
    pub fn strings(&self, name: &str) -> Vec<String> {
        match self.values.get(name) {
            Some(ArgValue::Text(text)) => vec![text.clone()],
            Some(ArgValue::List(items)) => items
                .iter()
                .filter_map(|item| match item {
                    ArgValue::Text(text) => Some(text.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ArgValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ArgValue::Float(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Result of parsing a directive's argument string.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(ParsedArgs),
    /// `-h`/`--help` was requested; the handler must not run.
    Help(String),
    /// Usage error text; the handler must not run.
    Failed(String),
}

/// Argument specification of one directive.
#[derive(Debug, Clone, Default)]
pub struct ArgSpec {
    about: String,
    epilog: String,
    params: Vec<Param>,
}

impl ArgSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// First line is the one-line summary; the rest is shown in help.
    pub fn about(mut self, about: &str) -> Self {
        self.about = about.to_string();
        self
    }

    /// Free-form text shown after the parameter list (examples).
    pub fn epilog(mut self, epilog: &str) -> Self {
        self.epilog = epilog.to_string();
        self
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn summary(&self) -> &str {
        self.about.lines().next().unwrap_or("").trim()
    }

    fn command(&self, prog: &str) -> Command {
        let mut cmd = Command::new(prog.to_string())
            .no_binary_name(true)
            .color(ColorChoice::Never)
            .disable_version_flag(true);
        if !self.about.is_empty() {
            cmd = cmd.about(self.about.clone());
        }
        if !self.epilog.is_empty() {
            cmd = cmd.after_help(self.epilog.clone());
        }
        for param in &self.params {
            cmd = cmd.arg(param.to_arg());
        }
        cmd
    }

    /// Full help text as printed by `-h`.
    pub fn help_text(&self, prog: &str) -> String {
        self.command(prog).render_help().to_string()
    }

    /// Tokenize `raw` with shell quoting rules and parse it. A `#` is an
    /// ordinary character, not the start of a comment.
    pub fn parse(&self, prog: &str, raw: &str) -> ParseOutcome {
        match shlex::split(&escape_comments(raw)) {
            Some(tokens) => self.parse_tokens(prog, tokens),
            None => ParseOutcome::Failed(format!("{prog}: invalid quoting in '{raw}'\n")),
        }
    }

    pub fn parse_tokens(&self, prog: &str, tokens: Vec<String>) -> ParseOutcome {
        let matches = match self.command(prog).try_get_matches_from(tokens) {
            Ok(matches) => matches,
            Err(e) => {
                let text = e.render().to_string();
                return match e.kind() {
                    ErrorKind::DisplayHelp
                    | ErrorKind::DisplayVersion
                    | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                        ParseOutcome::Help(text)
                    }
                    _ => ParseOutcome::Failed(text),
                };
            }
        };

        let mut args = ParsedArgs::new();
        for param in &self.params {
            match param.extract(&matches) {
                Ok(Some(value)) => {
                    args.values.insert(param.name.clone(), value);
                }
                Ok(None) => {}
                Err(message) => return ParseOutcome::Failed(format!("{prog}: {message}\n")),
            }
        }
        ParseOutcome::Parsed(args)
    }

    /// Render parsed values back into an argument string that parses to
    /// the same values.
    pub fn render(&self, args: &ParsedArgs) -> String {
        let mut tokens: Vec<String> = Vec::new();
        for param in self.params.iter().filter(|p| !p.is_positional()) {
            match args.get(&param.name) {
                None | Some(ArgValue::Flag(false)) => {}
                Some(ArgValue::Flag(true)) => tokens.push(param.switch()),
                Some(ArgValue::List(items)) => {
                    for item in items {
                        tokens.push(param.switch());
                        tokens.push(item.to_token());
                    }
                }
                Some(value) => {
                    tokens.push(param.switch());
                    tokens.push(value.to_token());
                }
            }
        }

        let positionals: Vec<String> = self
            .params
            .iter()
            .filter(|p| p.is_positional())
            .filter_map(|p| args.get(&p.name))
            .flat_map(|value| match value {
                ArgValue::List(items) => items.iter().map(ArgValue::to_token).collect(),
                other => vec![other.to_token()],
            })
            .collect();
        if !positionals.is_empty() {
            tokens.push("--".to_string());
            tokens.extend(positionals);
        }

        shlex::try_join(tokens.iter().map(String::as_str)).unwrap_or_default()
    }
}

/// Backslash-escape every unquoted `#` that starts a word, so the shell
/// lexer keeps it as text.
fn escape_comments(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    let (mut single, mut double, mut backslash) = (false, false, false);
    let mut word_start = true;
    for c in raw.chars() {
        if backslash {
            backslash = false;
        } else if single {
            single = c != '\'';
        } else if double {
            match c {
                '\\' => backslash = true,
                '"' => double = false,
                _ => {}
            }
        } else {
            match c {
                '\\' => backslash = true,
                '\'' => single = true,
                '"' => double = true,
                '#' if word_start => escaped.push('\\'),
                _ => {}
            }
            word_start = c.is_whitespace();
        }
        escaped.push(c);
    }
    escaped
}
