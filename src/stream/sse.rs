//! SSE frame decoding.
//!
//! Turns raw response bytes into `data:` payloads, one per logical line,
//! regardless of where the transport split the chunks.

use tracing::debug;

/// Sentinel payload that ends a completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data: ";

/// One decoded SSE line that carries meaning for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// A `data: ` line. `line` is the raw line (without its terminator) so
    /// it can be requeued when the payload turns out to be incomplete.
    Data { line: String, payload: String },
    /// The `[DONE]` sentinel.
    Done,
}

/// Incremental UTF-8 decoder that keeps a split multi-byte sequence
/// around until the rest of it arrives.
#[derive(Debug, Default)]
struct Utf8Decoder {
    partial: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.partial.extend_from_slice(bytes);

        let mut out = String::new();
        let mut consumed = 0;
        loop {
            let rest = &self.partial[consumed..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    consumed = self.partial.len();
                    break;
                }
                Err(err) => {
                    let valid_len = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid_len]));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed += valid_len + bad;
                        }
                        // Truncated sequence at the end: wait for more bytes.
                        None => {
                            consumed += valid_len;
                            break;
                        }
                    }
                }
            }
        }

        self.partial.drain(..consumed);
        out
    }

    fn flush(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        tail
    }
}

/// What a single line means once its terminator has been stripped.
enum LineKind<'a> {
    Skip,
    Done,
    Data(&'a str),
}

fn classify_line(line: &str) -> LineKind<'_> {
    if line.trim().is_empty() || line.starts_with(':') {
        return LineKind::Skip;
    }
    let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
        return LineKind::Skip;
    };
    let payload = rest.trim();
    if payload == DONE_SENTINEL {
        LineKind::Done
    } else {
        LineKind::Data(payload)
    }
}

/// Splits a byte stream into SSE frames.
///
/// Bytes go in through [`push`](Self::push); frames come out of
/// [`next_frame`](Self::next_frame) until no complete line is left. A
/// caller that cannot use a payload yet hands the line back with
/// [`requeue`](Self::requeue). Once the sentinel has been returned the
/// decoder is finished and ignores everything after it.
#[derive(Debug, Default)]
pub struct SseDecoder {
    utf8: Utf8Decoder,
    buffer: String,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a chunk and appends it to the pending buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.finished {
            return;
        }
        let text = self.utf8.decode(bytes);
        self.buffer.push_str(&text);
    }

    /// Returns the next complete frame, or `None` when the buffer holds no
    /// further newline-terminated line.
    pub fn next_frame(&mut self) -> Option<SseFrame> {
        if self.finished {
            return None;
        }

        loop {
            let newline = self.buffer.find('\n')?;
            let rest = self.buffer.split_off(newline + 1);
            let mut line = std::mem::replace(&mut self.buffer, rest);
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }

            match classify_line(&line) {
                LineKind::Skip => continue,
                LineKind::Done => {
                    debug!(discarded = self.buffer.len(), "sse stream reached sentinel");
                    self.finish_now();
                    return Some(SseFrame::Done);
                }
                LineKind::Data(payload) => {
                    let payload = payload.to_string();
                    return Some(SseFrame::Data { line, payload });
                }
            }
        }
    }

    /// Puts a line back at the front of the pending buffer so it is retried
    /// together with the bytes of the next chunk.
    pub fn requeue(&mut self, line: &str) {
        if self.finished {
            return;
        }
        self.buffer.insert(0, '\n');
        self.buffer.insert_str(0, line);
    }

    /// Final pass after the transport closed: every remaining line is
    /// classified, including a last line without a terminator. Stops at the
    /// sentinel. The decoder is finished afterwards.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }

        let tail = self.utf8.flush();
        self.buffer.push_str(&tail);
        let remaining = std::mem::take(&mut self.buffer);
        self.finish_now();

        let mut frames = Vec::new();
        for raw in remaining.split('\n') {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            match classify_line(line) {
                LineKind::Skip => {}
                LineKind::Done => {
                    frames.push(SseFrame::Done);
                    break;
                }
                LineKind::Data(payload) => frames.push(SseFrame::Data {
                    line: line.to_string(),
                    payload: payload.to_string(),
                }),
            }
        }
        frames
    }

    /// The not-yet-terminated tail carried across chunks.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish_now(&mut self) {
        self.finished = true;
        self.buffer.clear();
        self.utf8.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(decoder: &mut SseDecoder) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(frame) = decoder.next_frame() {
            match frame {
                SseFrame::Data { payload, .. } => out.push(payload),
                SseFrame::Done => out.push(DONE_SENTINEL.to_string()),
            }
        }
        out
    }

    #[test]
    fn test_skips_comments_blank_and_foreign_lines() {
        let mut decoder = SseDecoder::new();
        decoder.push(b": keep-alive\n\nevent: message\ndata: {\"a\":1}\r\n   \nid: 7\n");
        assert_eq!(payloads(&mut decoder), vec!["{\"a\":1}"]);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn test_requires_prefix_with_space() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data:{\"a\":1}\ndata: {\"b\":2}\n");
        assert_eq!(payloads(&mut decoder), vec!["{\"b\":2}"]);
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"da");
        assert!(decoder.next_frame().is_none());
        decoder.push(b"ta: {\"x\":");
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.pending(), "data: {\"x\":");
        decoder.push(b"1}\n");
        assert_eq!(payloads(&mut decoder), vec!["{\"x\":1}"]);
    }

    #[test]
    fn test_sentinel_stops_everything_after_it() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: one\ndata: [DONE]\ndata: two\n");
        assert_eq!(payloads(&mut decoder), vec!["one", DONE_SENTINEL]);
        assert!(decoder.is_finished());

        decoder.push(b"data: three\ndata: [DONE]\n");
        assert!(decoder.next_frame().is_none());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_requeue_puts_line_back_in_front() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: first\ndata: second\n");
        let Some(SseFrame::Data { line, .. }) = decoder.next_frame() else {
            panic!("expected a data frame");
        };
        decoder.requeue(&line);
        assert_eq!(decoder.pending(), "data: first\ndata: second\n");
        assert_eq!(payloads(&mut decoder), vec!["first", "second"]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let text = "data: {\"c\":\"olá 🚗\"}\n";
        let bytes = text.as_bytes();
        for split in 0..=bytes.len() {
            let mut decoder = SseDecoder::new();
            decoder.push(&bytes[..split]);
            decoder.push(&bytes[split..]);
            assert_eq!(
                payloads(&mut decoder),
                vec!["{\"c\":\"olá 🚗\"}"],
                "split at {split}"
            );
        }
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: a\xffb\n");
        assert_eq!(payloads(&mut decoder), vec!["a\u{FFFD}b"]);
    }

    #[test]
    fn test_finish_flushes_unterminated_tail() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: complete\ndata: tail-without-newline");
        assert_eq!(payloads(&mut decoder), vec!["complete"]);

        let frames = decoder.finish();
        assert_eq!(
            frames,
            vec![SseFrame::Data {
                line: "data: tail-without-newline".into(),
                payload: "tail-without-newline".into(),
            }]
        );
        assert!(decoder.is_finished());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_finish_stops_at_sentinel() {
        let mut decoder = SseDecoder::new();
        decoder.push(b":hb\r\ndata: a\r\ndata: [DONE]\r\ndata: b");
        decoder.requeue("data: front");
        // next_frame would consume "front" and "a"; go straight to the flush
        let frames = decoder.finish();
        let payloads: Vec<_> = frames
            .iter()
            .map(|f| match f {
                SseFrame::Data { payload, .. } => payload.as_str(),
                SseFrame::Done => DONE_SENTINEL,
            })
            .collect();
        assert_eq!(payloads, vec!["front", "a", DONE_SENTINEL]);
    }
}
