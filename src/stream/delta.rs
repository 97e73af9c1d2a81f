//! Provider envelopes and the running text buffer.
//!
//! A [`DeltaFormat`] knows where one backend puts the newly generated text
//! inside an event payload; the [`DeltaAggregator`] folds those fragments
//! into the full document.

use serde_json::Value;

/// Pulls the incremental text out of one event payload.
///
/// `Err` means the payload is not parseable yet (or at all); `Ok(None)`
/// means the event is well-formed but carries no text.
pub trait DeltaFormat: Send + Sync {
    fn text_delta(&self, payload: &str) -> Result<Option<String>, serde_json::Error>;
}

/// OpenAI-compatible chat completions:
/// `{"choices":[{"delta":{"content":"..."}}]}`. Only `choices[0]` is read.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatCompletionsFormat;

impl DeltaFormat for ChatCompletionsFormat {
    fn text_delta(&self, payload: &str) -> Result<Option<String>, serde_json::Error> {
        let json: Value = serde_json::from_str(payload)?;
        let content = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str);
        Ok(content.map(str::to_string))
    }
}

/// Anthropic messages streaming: text arrives in `content_block_delta`
/// events as `{"delta":{"type":"text_delta","text":"..."}}`. Every other
/// event type (message_start, ping, ...) carries no text.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicMessagesFormat;

impl DeltaFormat for AnthropicMessagesFormat {
    fn text_delta(&self, payload: &str) -> Result<Option<String>, serde_json::Error> {
        let json: Value = serde_json::from_str(payload)?;
        if json.get("type").and_then(Value::as_str) != Some("content_block_delta") {
            return Ok(None);
        }
        let delta = match json.get("delta") {
            Some(d) if d.get("type").and_then(Value::as_str) == Some("text_delta") => d,
            _ => return Ok(None),
        };
        Ok(delta.get("text").and_then(Value::as_str).map(str::to_string))
    }
}

/// Accumulates text increments into the full generated document.
#[derive(Debug, Default)]
pub struct DeltaAggregator {
    full_text: String,
}

impl DeltaAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment. Returns `false` (and changes nothing) for an
    /// empty fragment.
    pub fn append(&mut self, fragment: &str) -> bool {
        if fragment.is_empty() {
            return false;
        }
        self.full_text.push_str(fragment);
        true
    }

    /// Everything received so far. Only ever grows.
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn into_text(self) -> String {
        self.full_text
    }
}
