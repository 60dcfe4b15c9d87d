//! Output delivery for cell evaluation.
//!
//! Two independent streams ("out" and "err") are delivered incrementally to
//! whatever front-end owns the kernel. The kernel never writes to the
//! process console directly; everything goes through an [`OutputSink`].

mod decoder;

use std::fmt;
use std::sync::{Arc, Mutex};

pub use decoder::{StreamDecoder, normalize};

/// One of the two output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Out,
    Err,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Out => f.write_str("out"),
            Stream::Err => f.write_str("err"),
        }
    }
}

/// Destination for kernel output.
///
/// Implementations must deliver each write as it arrives; the kernel relies
/// on this to keep per-target output ordered behind its banner.
pub trait OutputSink: Send + Sync {
    fn write(&self, stream: Stream, text: &str);
}

/// ANSI terminal colors used for style hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Grey,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
}

impl Color {
    fn fg_code(self) -> u8 {
        match self {
            Color::Grey => 30,
            Color::Red => 31,
            Color::Green => 32,
            Color::Yellow => 33,
            Color::Blue => 34,
            Color::Magenta => 35,
            Color::Cyan => 36,
        }
    }
}

/// Style hint attached to a print.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Style {
    pub fg: Option<Color>,
    pub bg: Option<Color>,
}

impl Style {
    pub const PLAIN: Style = Style { fg: None, bg: None };

    /// Target boundary banner: grey on cyan.
    pub const BANNER: Style = Style {
        fg: Some(Color::Grey),
        bg: Some(Color::Cyan),
    };

    /// Destructive operation notice: red on cyan.
    pub const ALERT: Style = Style {
        fg: Some(Color::Red),
        bg: Some(Color::Cyan),
    };

    pub const fn fg(color: Color) -> Style {
        Style {
            fg: Some(color),
            bg: None,
        }
    }

    fn paint(&self, text: &str) -> String {
        let mut codes = Vec::new();
        if let Some(fg) = self.fg {
            codes.push(fg.fg_code().to_string());
        }
        if let Some(bg) = self.bg {
            codes.push(fg_to_bg(bg.fg_code()).to_string());
        }
        if codes.is_empty() {
            return text.to_string();
        }
        format!("\x1b[{}m{}\x1b[0m", codes.join(";"), text)
    }
}

fn fg_to_bg(code: u8) -> u8 {
    code + 10
}

/// Handle used by the kernel and directives to produce output.
///
/// Cheap to clone; all clones write to the same sink.
#[derive(Clone)]
pub struct Output {
    sink: Arc<dyn OutputSink>,
    color: bool,
}

impl Output {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self { sink, color: true }
    }

    /// Enable or disable ANSI styling.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Append raw text to a stream.
    ///
    /// Whitespace-only text on the error stream is dropped.
    pub fn write(&self, stream: Stream, text: &str) {
        if text.is_empty() {
            return;
        }
        if stream == Stream::Err && text.trim().is_empty() {
            return;
        }
        self.sink.write(stream, text);
    }

    /// Print a line on the output stream.
    pub fn print(&self, text: impl AsRef<str>) {
        self.print_styled(text, Style::PLAIN, "\n");
    }

    pub fn print_styled(&self, text: impl AsRef<str>, style: Style, end: &str) {
        let text = self.render(text.as_ref(), style, end);
        self.write(Stream::Out, &text);
    }

    /// Print a line on the error stream; no-op for blank text.
    pub fn error(&self, text: impl AsRef<str>) {
        self.error_styled(text, Style::PLAIN, "\n");
    }

    pub fn error_styled(&self, text: impl AsRef<str>, style: Style, end: &str) {
        let text = text.as_ref();
        if text.trim().is_empty() {
            return;
        }
        let text = self.render(text, style, end);
        self.write(Stream::Err, &text);
    }

    /// Print the boundary banner that precedes one target's output.
    pub fn banner(&self, name: &str) {
        self.print_styled("", Style::PLAIN, "\n");
        self.print_styled(format!("----- {name}"), Style::BANNER, "\n");
    }

    fn render(&self, text: &str, style: Style, end: &str) -> String {
        let mut rendered = if self.color {
            style.paint(text)
        } else {
            text.to_string()
        };
        rendered.push_str(end);
        rendered
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output").field("color", &self.color).finish()
    }
}

/// Forwards raw stream bytes to an [`Output`], decoding each stream
/// separately so split multi-byte sequences are reassembled.
#[derive(Debug)]
pub struct Relay {
    output: Output,
    silent: bool,
    out: StreamDecoder,
    err: StreamDecoder,
}

impl Relay {
    /// A silent relay decodes but delivers nothing.
    pub fn new(output: Output, silent: bool) -> Self {
        Self {
            output,
            silent,
            out: StreamDecoder::new(),
            err: StreamDecoder::new(),
        }
    }

    pub fn feed(&mut self, stream: Stream, bytes: &[u8]) {
        let text = match stream {
            Stream::Out => self.out.push(bytes),
            Stream::Err => self.err.push(bytes),
        };
        if !self.silent {
            self.output.write(stream, &text);
        }
    }

    /// Deliver anything still held back.
    pub fn finish(mut self) {
        let out = self.out.finish();
        let err = self.err.finish();
        if !self.silent {
            self.output.write(Stream::Out, &out);
            self.output.write(Stream::Err, &err);
        }
    }
}

/// Sink that records every write in order. Used by tests and embedders
/// that collect output rather than streaming it.
#[derive(Debug, Default)]
pub struct BufferSink {
    events: Mutex<Vec<(Stream, String)>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All writes, in delivery order.
    pub fn events(&self) -> Vec<(Stream, String)> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Concatenated text of one stream.
    pub fn text(&self, stream: Stream) -> String {
        self.events()
            .into_iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn out(&self) -> String {
        self.text(Stream::Out)
    }

    pub fn err(&self) -> String {
        self.text(Stream::Err)
    }

    /// Everything written so far, both streams interleaved in order.
    pub fn transcript(&self) -> String {
        self.events().into_iter().map(|(_, text)| text).collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl OutputSink for BufferSink {
    fn write(&self, stream: Stream, text: &str) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((stream, text.to_string()));
    }
}
