//! Event-stream decoding for upstream response bodies
//!
//! Only `data:` fields matter here. Event names, ids and comment lines are
//! dropped. Bytes are buffered until a full line is available so multi-byte
//! characters split across network chunks decode intact.

use crate::error::AppError;
use axum::body::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;

/// Incremental line splitter yielding `data:` payloads
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Append a chunk and return the payloads of every completed line
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            payloads.extend(data_payload(&line));
        }
        payloads
    }

    /// Payload of a trailing line that never got its newline
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let payload = line.trim_ascii().strip_prefix(b"data:")?;
    Some(String::from_utf8_lossy(payload.trim_ascii()).into_owned())
}

/// Turn an upstream byte stream into its `data:` payloads
///
/// A read error is passed through once and ends the stream.
pub fn data_payloads(
    bytes: BoxStream<'static, Result<Bytes, AppError>>,
) -> BoxStream<'static, Result<String, AppError>> {
    stream::unfold(
        (bytes, SseDecoder::default(), VecDeque::new(), false),
        |(mut bytes, mut decoder, mut pending, mut ended)| async move {
            loop {
                if let Some(payload) = pending.pop_front() {
                    return Some((Ok(payload), (bytes, decoder, pending, ended)));
                }
                if ended {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                    Some(Err(e)) => {
                        ended = true;
                        return Some((Err(e), (bytes, decoder, pending, ended)));
                    }
                    None => {
                        ended = true;
                        pending.extend(decoder.finish());
                    }
                }
            }
        },
    )
    .boxed()
}
