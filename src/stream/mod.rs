//! Streaming core: SSE bytes in, text increments and completed files out.
//!
//! ```text
//! response bytes -> SseDecoder -> DeltaFormat -> DeltaAggregator -> FileExtractor
//! ```
//!
//! [`StreamSession`] wires the stages together for one generation.

mod delta;
mod extract;
mod session;
mod sse;

pub use delta::{AnthropicMessagesFormat, ChatCompletionsFormat, DeltaAggregator, DeltaFormat};
pub use extract::{
    parse_file_sections, strip_code_fence, DuplicatePolicy, FileCategory, FileExtractor,
    GeneratedFile, END_FILE_MARKER, FILE_MARKER,
};
pub use session::{Flow, StreamSession, StreamSink};
pub use sse::{SseDecoder, SseFrame, DONE_SENTINEL};
