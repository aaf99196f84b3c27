//! Incremental UTF-8 decoding for byte streams.
//!
//! Network chunks can end in the middle of a multi-byte sequence. The decoder
//! keeps the incomplete tail and resumes from it on the next call, so a
//! character split across chunk boundaries always decodes intact.

/// Stateful UTF-8 decoder with carry-over of a trailing incomplete sequence.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk, returning all complete characters seen so far.
    ///
    /// An incomplete sequence at the end of the chunk is buffered for the next
    /// call. Bytes that can never form a valid sequence are replaced with
    /// U+FFFD and skipped.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Incomplete tail: carry it over to the next chunk.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        // Invalid bytes: substitute and keep going.
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }

    /// Flush the decoder at end of stream.
    ///
    /// A dangling incomplete sequence becomes a single replacement character.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}
