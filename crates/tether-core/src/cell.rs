//! Cell segmentation.
//!
//! A cell is split in two passes:
//!
//! ```text
//! cell text ──► segment() ──► [Section { directive, raw_args, body }, ...]
//!                                        │
//!                                        └──► split_body() ──► [Code | Line | Shell, ...]
//! ```
//!
//! Section headers start a line with `%%`. Inside a body destined for a
//! target, a line starting with `%` is a line directive and a line starting
//! with `!` is a host shell escape. Markers are only recognized in column 0.

use crate::error::{Error, Result};

/// Marker opening a section header line.
pub const SECTION_MARKER: &str = "%%";

/// Marker opening a line directive.
pub const LINE_MARKER: char = '%';

/// Marker opening a host shell escape.
pub const SHELL_MARKER: char = '!';

/// Section directive applied to text that precedes any explicit header.
pub const DEFAULT_SECTION: &str = "connect";

/// A contiguous run of cell text introduced by a section directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Directive name without the marker.
    pub directive: String,
    /// Remainder of the header line, trimmed.
    pub raw_args: String,
    /// Trimmed text up to the next header or end of cell.
    pub body: String,
    /// True when no header was written and the default directive applies.
    pub implicit: bool,
}

impl Section {
    /// The header line as written in source form.
    pub fn header(&self) -> String {
        if self.raw_args.is_empty() {
            format!("{SECTION_MARKER}{}", self.directive)
        } else {
            format!("{SECTION_MARKER}{} {}", self.directive, self.raw_args)
        }
    }

    /// Header and body in source form. An implicit section has no header.
    pub fn to_source(&self) -> String {
        if self.implicit {
            self.body.clone()
        } else if self.body.is_empty() {
            self.header()
        } else {
            format!("{}\n{}", self.header(), self.body)
        }
    }
}

struct OpenSection<'a> {
    directive: String,
    raw_args: String,
    lines: Vec<&'a str>,
}

impl OpenSection<'_> {
    fn close(self) -> Section {
        Section {
            directive: self.directive,
            raw_args: self.raw_args,
            body: self.lines.join("\n").trim().to_string(),
            implicit: false,
        }
    }
}

/// Split cell text into sections, preserving source order.
///
/// Text before the first header forms an implicit [`DEFAULT_SECTION`]. A cell
/// with no header at all always yields exactly one implicit section, even
/// when empty.
pub fn segment(cell: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut preamble: Vec<&str> = Vec::new();
    let mut open: Option<OpenSection<'_>> = None;
    let mut saw_header = false;

    for line in cell.lines() {
        if let Some(header) = line.strip_prefix(SECTION_MARKER) {
            if let Some(done) = open.take() {
                sections.push(done.close());
            }
            let (directive, raw_args) = split_head(header);
            open = Some(OpenSection {
                directive: directive.to_string(),
                raw_args: raw_args.to_string(),
                lines: Vec::new(),
            });
            saw_header = true;
        } else if let Some(current) = open.as_mut() {
            current.lines.push(line);
        } else {
            preamble.push(line);
        }
    }
    if let Some(done) = open.take() {
        sections.push(done.close());
    }

    let preamble = preamble.join("\n");
    let preamble = preamble.trim();
    if !saw_header || !preamble.is_empty() {
        sections.insert(
            0,
            Section {
                directive: DEFAULT_SECTION.to_string(),
                raw_args: String::new(),
                body: preamble.to_string(),
                implicit: true,
            },
        );
    }
    sections
}

/// Split `name rest...` at the first whitespace.
fn split_head(head: &str) -> (&str, &str) {
    let head = head.trim_end();
    match head.find(char::is_whitespace) {
        Some(idx) => (&head[..idx], head[idx..].trim()),
        None => (head, ""),
    }
}

/// One piece of a section body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Code shipped to the target, trimmed.
    Code(String),
    /// Line directive invocation, marker stripped.
    Line(String),
    /// Host shell command, marker stripped.
    Shell(String),
}

/// Carve a body into alternating code and directive chunks.
///
/// A code chunk runs until the next line that starts with a directive
/// marker. Blank code chunks are dropped.
pub fn split_body(body: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut code: Vec<&str> = Vec::new();

    let flush = |code: &mut Vec<&str>, chunks: &mut Vec<Chunk>| {
        let text = code.join("\n");
        let text = text.trim();
        if !text.is_empty() {
            chunks.push(Chunk::Code(text.to_string()));
        }
        code.clear();
    };

    for line in body.lines() {
        if let Some(rest) = line.strip_prefix(LINE_MARKER) {
            flush(&mut code, &mut chunks);
            chunks.push(Chunk::Line(rest.trim_end().to_string()));
        } else if let Some(rest) = line.strip_prefix(SHELL_MARKER) {
            flush(&mut code, &mut chunks);
            chunks.push(Chunk::Shell(rest.trim().to_string()));
        } else {
            code.push(line);
        }
    }
    flush(&mut code, &mut chunks);
    chunks
}

/// Split a line directive (marker already stripped) into name and arguments.
pub fn parse_line_directive(line: &str) -> Result<(&str, &str)> {
    let (name, rest) = match line.find(' ') {
        Some(idx) => (&line[..idx], line[idx..].trim()),
        None => (line.trim_end(), ""),
    };
    if name.is_empty() {
        return Err(Error::Usage(format!(
            "Syntax error: '{LINE_MARKER}{line}'"
        )));
    }
    Ok((name, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_header_single_implicit_section() {
        for cell in ["print(1)\n", "  \n\nx = 1\ny = 2\n\n", "", "a % b\n!= c"] {
            let sections = segment(cell);
            assert_eq!(sections.len(), 1, "cell {cell:?}");
            assert_eq!(sections[0].directive, DEFAULT_SECTION);
            assert!(sections[0].implicit);
            assert_eq!(sections[0].body, cell.trim());
        }
    }

    #[test]
    fn test_k_headers_in_order() {
        let cell = "%%connect devA devB\nprint(1)\n%%host\nimport sys\n%%bash\nls -l\n";
        let sections = segment(cell);
        let names: Vec<&str> = sections.iter().map(|s| s.directive.as_str()).collect();
        assert_eq!(names, ["connect", "host", "bash"]);
        assert_eq!(sections[0].raw_args, "devA devB");
        assert_eq!(sections[0].body, "print(1)");
        assert_eq!(sections[1].raw_args, "");
        assert_eq!(sections[2].body, "ls -l");
        assert!(sections.iter().all(|s| !s.implicit));
    }

    #[test]
    fn test_reconstruction_matches_normalized_input() {
        let cell = "%%connect devA\nprint(1)\n\n%%host\nx = 2\n%%connect --all -q\n";
        let sections = segment(cell);
        assert_eq!(sections.len(), 3);
        let rebuilt: Vec<String> = sections.iter().map(Section::to_source).collect();
        assert_eq!(
            rebuilt.join("\n"),
            "%%connect devA\nprint(1)\n%%host\nx = 2\n%%connect --all -q"
        );
    }

    #[test]
    fn test_preamble_before_header() {
        let sections = segment("a = 1\n%%host\nb = 2");
        assert_eq!(sections.len(), 2);
        assert!(sections[0].implicit);
        assert_eq!(sections[0].body, "a = 1");
        assert_eq!(sections[1].directive, "host");
    }

    #[test]
    fn test_implicit_reconstruction_has_no_header() {
        let cell = "a = 1\n%%host\nb = 2";
        let rebuilt: Vec<String> = segment(cell).iter().map(Section::to_source).collect();
        assert_eq!(rebuilt.join("\n"), cell);
    }

    #[test]
    fn test_blank_preamble_dropped() {
        let sections = segment("\n\n%%host\nb = 2");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].directive, "host");
    }

    #[test]
    fn test_empty_body() {
        let sections = segment("%%connect devA\n\n   \n");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].body, "");
    }

    #[test]
    fn test_marker_mid_line_is_code() {
        let sections = segment("x = '%%connect'\n");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].body, "x = '%%connect'");
    }

    #[test]
    fn test_split_body_alternates() {
        let body = "a = 1\nb = 2\n%softreset -q\n\nprint(a)\n!ls -l\n%info\nprint(3 % 2)";
        let chunks = split_body(body);
        assert_eq!(
            chunks,
            vec![
                Chunk::Code("a = 1\nb = 2".into()),
                Chunk::Line("softreset -q".into()),
                Chunk::Code("print(a)".into()),
                Chunk::Shell("ls -l".into()),
                Chunk::Line("info".into()),
                Chunk::Code("print(3 % 2)".into()),
            ]
        );
    }

    #[test]
    fn test_split_body_indented_marker_is_code() {
        let chunks = split_body("if x:\n    %notadirective\n");
        assert_eq!(chunks, vec![Chunk::Code("if x:\n    %notadirective".into())]);
    }

    #[test]
    fn test_split_body_empty() {
        assert!(split_body("").is_empty());
        assert!(split_body("\n  \n").is_empty());
    }

    #[test]
    fn test_parse_line_directive() {
        assert_eq!(parse_line_directive("connect dev1 -q").unwrap(), ("connect", "dev1 -q"));
        assert_eq!(parse_line_directive("info").unwrap(), ("info", ""));
        assert_eq!(parse_line_directive("cd   ~/x  ").unwrap(), ("cd", "~/x"));
        assert!(matches!(parse_line_directive(""), Err(Error::Usage(_))));
        assert!(matches!(parse_line_directive(" x"), Err(Error::Usage(_))));
    }
}
