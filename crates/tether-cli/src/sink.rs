//! Terminal output sink.

use std::io::{self, IsTerminal, Write};

use tether_core::{OutputSink, Stream};

/// Writes the out stream to stdout and the err stream to stderr, flushing
/// after every write so remote output shows up as it arrives.
pub struct StdSink;

impl StdSink {
    /// Whether styles should be emitted.
    pub fn color_supported() -> bool {
        io::stdout().is_terminal()
    }
}

impl OutputSink for StdSink {
    fn write(&self, stream: Stream, text: &str) {
        // A closed pipe on our side is not worth failing the cell over.
        let _ = match stream {
            Stream::Out => {
                let mut out = io::stdout().lock();
                out.write_all(text.as_bytes()).and_then(|()| out.flush())
            }
            Stream::Err => {
                let mut err = io::stderr().lock();
                err.write_all(text.as_bytes()).and_then(|()| err.flush())
            }
        };
    }
}
