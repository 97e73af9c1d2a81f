//! Per-generation streaming state.
//!
//! A [`StreamSession`] owns every piece of mutable state for one generation:
//! the pending SSE bytes, the full generated text, and the set of paths
//! already reported. It is driven by a single read loop and never shared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::delta::{ChatCompletionsFormat, DeltaAggregator, DeltaFormat};
use super::extract::{DuplicatePolicy, FileExtractor, GeneratedFile};
use super::sse::{SseDecoder, SseFrame};

/// Receives the incremental results of a session.
pub trait StreamSink {
    /// A text increment, exactly as it was appended to the full text.
    fn chunk(&mut self, text: &str);
    /// A file section that just completed.
    fn file(&mut self, file: GeneratedFile);
}

/// Whether the read loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The sentinel was seen; nothing after it is processed.
    Finished,
}

pub struct StreamSession {
    format: Arc<dyn DeltaFormat>,
    decoder: SseDecoder,
    text: DeltaAggregator,
    extractor: FileExtractor,
    cancelled: Arc<AtomicBool>,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new(Arc::new(ChatCompletionsFormat), DuplicatePolicy::default())
    }
}

impl StreamSession {
    pub fn new(format: Arc<dyn DeltaFormat>, policy: DuplicatePolicy) -> Self {
        Self {
            format,
            decoder: SseDecoder::new(),
            text: DeltaAggregator::new(),
            extractor: FileExtractor::new(policy),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares a cancellation flag with the owner of the session. Once the
    /// flag is raised no further chunks or files reach the sink.
    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn full_text(&self) -> &str {
        self.text.full_text()
    }

    pub fn pending(&self) -> &str {
        self.decoder.pending()
    }

    pub fn has_emitted(&self, path: &str) -> bool {
        self.extractor.has_emitted(path)
    }

    pub fn is_finished(&self) -> bool {
        self.decoder.is_finished()
    }

    /// Processes one network chunk completely before returning.
    pub fn feed(&mut self, bytes: &[u8], sink: &mut impl StreamSink) -> Flow {
        self.decoder.push(bytes);

        while let Some(frame) = self.decoder.next_frame() {
            let (line, payload) = match frame {
                SseFrame::Done => return Flow::Finished,
                SseFrame::Data { line, payload } => (line, payload),
            };

            match self.format.text_delta(&payload) {
                Ok(Some(fragment)) => self.accept(&fragment, sink),
                Ok(None) => {}
                Err(err) => {
                    // Most likely the rest of the payload is still in flight.
                    debug!(error = %err, "requeueing unparsed sse payload");
                    self.decoder.requeue(&line);
                    break;
                }
            }
        }

        if self.decoder.is_finished() {
            Flow::Finished
        } else {
            Flow::Continue
        }
    }

    /// Final pass once the transport has closed. Whatever is left in the
    /// pending buffer is decoded best-effort; unparseable payloads are dropped.
    pub fn finish(&mut self, sink: &mut impl StreamSink) {
        for frame in self.decoder.finish() {
            let payload = match frame {
                SseFrame::Done => break,
                SseFrame::Data { payload, .. } => payload,
            };
            match self.format.text_delta(&payload) {
                Ok(Some(fragment)) => self.accept(&fragment, sink),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "dropping unparseable sse payload at end of stream"),
            }
        }
        self.emit_files(sink);
    }

    fn accept(&mut self, fragment: &str, sink: &mut impl StreamSink) {
        if !self.text.append(fragment) {
            return;
        }
        if !self.is_cancelled() {
            sink.chunk(fragment);
        }
        self.emit_files(sink);
    }

    fn emit_files(&mut self, sink: &mut impl StreamSink) {
        for file in self.extractor.scan(self.text.full_text()) {
            if self.is_cancelled() {
                return;
            }
            debug!(path = %file.path, bytes = file.content.len(), "file section completed");
            sink.file(file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::delta::AnthropicMessagesFormat;
    use proptest::prelude::*;

    #[derive(Default)]
    struct Recorder {
        chunks: Vec<String>,
        files: Vec<GeneratedFile>,
    }

    impl StreamSink for Recorder {
        fn chunk(&mut self, text: &str) {
            self.chunks.push(text.to_string());
        }
        fn file(&mut self, file: GeneratedFile) {
            self.files.push(file);
        }
    }

    fn event(content: &str) -> String {
        let payload = serde_json::json!({ "choices": [{ "delta": { "content": content } }] });
        format!("data: {payload}\n\n")
    }

    fn body(parts: &[&str]) -> String {
        let mut out = String::from(": connected\n\n");
        for part in parts {
            out.push_str(&event(part));
        }
        out.push_str("data: [DONE]\n\n");
        out
    }

    fn run(chunks: &[&[u8]]) -> (Recorder, StreamSession) {
        let mut session = StreamSession::default();
        let mut sink = Recorder::default();
        let mut finished = false;
        for chunk in chunks {
            if session.feed(chunk, &mut sink) == Flow::Finished {
                finished = true;
                break;
            }
        }
        if !finished {
            session.finish(&mut sink);
        }
        (sink, session)
    }

    const PARTS: [&str; 5] = [
        "Creating your script.\n### FILE: config.lua\nConfig = {}\n### END FI",
        "LE\n### FILE: client/main.lua\n```lua\nprint('hi')\n```\n",
        "### END FILE\nDone! ",
        "### FILE: sql/install.sql\nCREATE TABLE t (id INT);\n### END FILE",
        "\nEnjoy 🚗 olá!",
    ];

    #[test]
    fn test_whole_body_in_one_chunk() {
        let text = body(&PARTS);
        let (sink, session) = run(&[text.as_bytes()]);

        assert_eq!(sink.chunks, PARTS);
        assert_eq!(session.full_text(), PARTS.concat());
        let paths: Vec<_> = sink.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["config.lua", "client/main.lua", "sql/install.sql"]);
        assert_eq!(sink.files[1].content, "print('hi')");
    }

    #[test]
    fn test_every_two_way_split_matches_unsplit() {
        let text = body(&PARTS);
        let bytes = text.as_bytes();
        let (expected, expected_session) = run(&[bytes]);

        for split in 0..=bytes.len() {
            let (sink, session) = run(&[&bytes[..split], &bytes[split..]]);
            assert_eq!(session.full_text(), expected_session.full_text(), "split at {split}");
            assert_eq!(sink.files, expected.files, "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let text = body(&PARTS);
        let chunks: Vec<&[u8]> = text.as_bytes().chunks(1).collect();
        let (sink, session) = run(&chunks);
        assert_eq!(session.full_text(), PARTS.concat());
        assert_eq!(sink.chunks.concat(), PARTS.concat());
        assert_eq!(sink.files.len(), 3);
    }

    #[test]
    fn test_sentinel_ignores_trailing_lines() {
        let mut text = body(&["### FILE: a.lua\nA\n### END FILE"]);
        text.push_str(&event("### FILE: b.lua\nB\n### END FILE"));
        text.push_str("data: {broken\n");

        let mut session = StreamSession::default();
        let mut sink = Recorder::default();
        assert_eq!(session.feed(text.as_bytes(), &mut sink), Flow::Finished);
        assert_eq!(session.feed(event("late").as_bytes(), &mut sink), Flow::Finished);
        session.finish(&mut sink);

        assert_eq!(sink.files.len(), 1);
        assert_eq!(sink.files[0].path, "a.lua");
        assert_eq!(sink.chunks.len(), 1);
    }

    #[test]
    fn test_malformed_line_is_requeued_and_recovered_at_end() {
        let mut session = StreamSession::default();
        let mut sink = Recorder::default();

        let first = format!("{}data: {{not json\n{}", event("one"), event("two"));
        assert_eq!(session.feed(first.as_bytes(), &mut sink), Flow::Continue);
        assert_eq!(sink.chunks, vec!["one"]);
        assert!(session.pending().starts_with("data: {not json\n"));

        // Still stuck behind the bad line while more bytes arrive.
        assert_eq!(session.feed(event("three").as_bytes(), &mut sink), Flow::Continue);
        assert_eq!(sink.chunks, vec!["one"]);

        session.finish(&mut sink);
        assert_eq!(sink.chunks, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_stream_without_trailing_newline() {
        let text = format!("{}data: {}", event("a"), r#"{"choices":[{"delta":{"content":"b"}}]}"#);
        let (sink, session) = run(&[text.as_bytes()]);
        assert_eq!(sink.chunks, vec!["a", "b"]);
        assert_eq!(session.full_text(), "ab");
        assert!(session.is_finished());
    }

    #[test]
    fn test_empty_and_missing_content_not_forwarded() {
        let text = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n";
        let (sink, _) = run(&[text.as_bytes()]);
        assert_eq!(sink.chunks, vec!["x"]);
    }

    #[test]
    fn test_cancelled_session_is_silent_but_keeps_draining() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut session = StreamSession::default().with_cancel_flag(flag.clone());
        let mut sink = Recorder::default();

        session.feed(event("### FILE: a.lua\nA\n### END FILE\n").as_bytes(), &mut sink);
        flag.store(true, Ordering::SeqCst);
        session.feed(event("### FILE: b.lua\nB\n### END FILE\n").as_bytes(), &mut sink);
        session.finish(&mut sink);

        assert_eq!(sink.chunks.len(), 1);
        assert_eq!(sink.files.len(), 1);
        assert!(session.full_text().contains("b.lua"));
    }

    #[test]
    fn test_anthropic_envelope() {
        let text = "event: content_block_delta\n\
                    data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"### FILE: a.lua\\nA\\n### END FILE\"}}\n\n\
                    event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n";
        let mut session =
            StreamSession::new(Arc::new(AnthropicMessagesFormat), DuplicatePolicy::default());
        let mut sink = Recorder::default();
        session.feed(text.as_bytes(), &mut sink);
        session.finish(&mut sink);
        assert_eq!(sink.files.len(), 1);
        assert_eq!(sink.files[0].content, "A");
    }

    proptest! {
        #[test]
        fn prop_arbitrary_chunking_is_invisible(cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..12)) {
            let text = body(&PARTS);
            let bytes = text.as_bytes();
            let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len() + 1)).collect();
            offsets.sort_unstable();
            offsets.dedup();

            let mut chunks = Vec::new();
            let mut start = 0;
            for offset in offsets {
                chunks.push(&bytes[start..offset]);
                start = offset;
            }
            chunks.push(&bytes[start..]);

            let (sink, session) = run(&chunks);
            prop_assert_eq!(session.full_text(), PARTS.concat());
            prop_assert_eq!(sink.chunks.concat(), PARTS.concat());
            let paths: Vec<_> = sink.files.iter().map(|f| f.path.clone()).collect();
            prop_assert_eq!(paths, vec!["config.lua", "client/main.lua", "sql/install.sql"]);
        }
    }
}
