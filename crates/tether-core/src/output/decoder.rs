//! Incremental decoding of raw target output.
//!
//! Remote targets deliver bytes in arbitrary chunks, so a multi-byte UTF-8
//! sequence may be split across two reads. The decoder holds back only an
//! incomplete trailing sequence; everything else is released immediately.

/// End-of-transmission byte used by REPL-style transports as a frame marker.
const EOT: char = '\x04';

/// Streaming UTF-8 decoder with control-character normalization.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the text that is ready for delivery.
    ///
    /// Malformed sequences are replaced with U+FFFD instead of failing.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        let mut consumed = 0;
        loop {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&rest[..valid_up_to]));
                    match e.error_len() {
                        Some(bad) => {
                            text.push_str(&String::from_utf8_lossy(
                                &rest[valid_up_to..valid_up_to + bad],
                            ));
                            consumed += valid_up_to + bad;
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            consumed += valid_up_to;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);
        normalize(&text)
    }

    /// Flush whatever is still buffered, decoding it lossily.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        normalize(&text)
    }

    /// Number of bytes held back waiting for the rest of a sequence.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Strip carriage returns and EOT markers.
pub fn normalize(text: &str) -> String {
    text.chars().filter(|&c| c != '\r' && c != EOT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ascii() {
        let mut d = StreamDecoder::new();
        assert_eq!(d.push(b"hello\r\n"), "hello\n");
        assert_eq!(d.pending_len(), 0);
    }

    #[test]
    fn test_split_multibyte() {
        let bytes = "µs".as_bytes();
        let mut d = StreamDecoder::new();
        assert_eq!(d.push(&bytes[..1]), "");
        assert_eq!(d.pending_len(), 1);
        assert_eq!(d.push(&bytes[1..]), "µs");
        assert_eq!(d.pending_len(), 0);
    }

    #[test]
    fn test_strips_eot() {
        let mut d = StreamDecoder::new();
        assert_eq!(d.push(b"OK1\x04\x04>"), "OK1>");
    }

    #[test]
    fn test_malformed_passes_through() {
        let mut d = StreamDecoder::new();
        let out = d.push(b"a\xffb");
        assert_eq!(out, "a\u{fffd}b");
    }

    #[test]
    fn test_finish_flushes_incomplete() {
        let mut d = StreamDecoder::new();
        assert_eq!(d.push(&[0xe2, 0x82]), "");
        assert_eq!(d.finish(), "\u{fffd}");
        assert_eq!(d.finish(), "");
    }
}
