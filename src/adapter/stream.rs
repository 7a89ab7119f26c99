//! Cumulative native stream frames → incremental standard chunks
//!
//! The native endpoint repeats the whole text generated so far in every
//! frame. [`StreamTranslator`] remembers how much of it was already sent and
//! emits only the new suffix, then a terminal chunk and the `[DONE]` sentinel
//! once a frame reports a finish reason.
//!
//! One translator belongs to one exchange. It does no I/O; the caller feeds it
//! `data:` payloads in arrival order and writes out whatever it returns.

use super::native::NativeResponse;
use crate::handlers::openai::types::{
    ChatCompletionChunk, Usage, current_timestamp, generate_completion_id,
};

/// Payload of the terminal sentinel frame
pub const DONE_SENTINEL: &str = "[DONE]";

/// Something to write to the client
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(ChatCompletionChunk),
    /// Terminal sentinel; nothing follows it
    Done,
}

impl StreamEvent {
    /// SSE `data:` payload for this event
    pub fn to_data(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Chunk(chunk) => serde_json::to_string(chunk),
            Self::Done => Ok(DONE_SENTINEL.to_string()),
        }
    }
}

/// Per-exchange progress through the cumulative text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamCursor {
    /// Byte length of cumulative text already sent as deltas
    emitted_len: usize,
    /// Id latched from the first frame that carried one
    stream_id: Option<String>,
}

impl StreamCursor {
    pub fn emitted_len(&self) -> usize {
        self.emitted_len
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    /// New suffix of `text`, advancing the cursor past it
    ///
    /// Text that did not grow yields nothing. A length that lands inside a
    /// multi-byte character is left for a later frame to complete.
    fn advance<'a>(&mut self, text: &'a str) -> Option<&'a str> {
        if text.len() <= self.emitted_len {
            return None;
        }
        let Some(delta) = text.get(self.emitted_len..) else {
            tracing::warn!(
                emitted_len = self.emitted_len,
                text_len = text.len(),
                "Cumulative text does not extend previous text on a character boundary, skipping frame"
            );
            return None;
        };
        self.emitted_len = text.len();
        Some(delta)
    }

    fn latch_id(&mut self, frame: &NativeResponse) {
        if self.stream_id.is_none() {
            self.stream_id = frame.response_id().map(str::to_string);
        }
    }
}

/// State machine for one streamed exchange
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    created: i64,
    /// Used until a frame supplies a request or session id
    fallback_id: String,
    cursor: StreamCursor,
    done: bool,
    skipped_frames: u64,
}

impl StreamTranslator {
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_identity(model, current_timestamp(), generate_completion_id())
    }

    /// Translator with a fixed creation time and fallback id
    pub fn with_identity(model: impl Into<String>, created: i64, fallback_id: String) -> Self {
        Self {
            model: model.into(),
            created,
            fallback_id,
            cursor: StreamCursor::default(),
            done: false,
            skipped_frames: 0,
        }
    }

    /// True once the terminal chunk and sentinel have been produced
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Frames that looked like JSON objects but did not parse
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    pub fn cursor(&self) -> &StreamCursor {
        &self.cursor
    }

    fn id(&self) -> &str {
        self.cursor.stream_id().unwrap_or(&self.fallback_id)
    }

    /// Feed one `data:` payload, returning the events it produces in order
    ///
    /// Payloads that are not JSON objects are ignored. Objects that fail to
    /// parse are counted and skipped. After the terminal frame every further
    /// payload is ignored.
    pub fn push_data(&mut self, payload: &str) -> Vec<StreamEvent> {
        let payload = payload.trim();
        if self.done || !payload.starts_with('{') {
            return Vec::new();
        }

        let frame: NativeResponse = match serde_json::from_str(payload) {
            Ok(frame) => frame,
            Err(e) => {
                self.skipped_frames += 1;
                tracing::warn!(
                    error = %e,
                    payload_len = payload.len(),
                    "Skipping malformed stream frame"
                );
                return Vec::new();
            }
        };

        self.cursor.latch_id(&frame);

        let mut events = Vec::with_capacity(3);
        if let Some(delta) = self.cursor.advance(&frame.output.text) {
            events.push(StreamEvent::Chunk(ChatCompletionChunk::content(
                self.id(),
                &self.model,
                self.created,
                delta,
            )));
        }

        if let Some(reason) = frame.finish_reason() {
            let usage = frame
                .first_model_usage()
                .map(|u| Usage::new(u.input_tokens, u.output_tokens));
            events.push(StreamEvent::Chunk(ChatCompletionChunk::finish(
                self.id(),
                &self.model,
                self.created,
                reason,
                usage,
            )));
            events.push(StreamEvent::Done);
            self.done = true;
        }

        events
    }
}
