//! OpenAI-compatible API handlers
//!
//! Provides `POST /v1/chat/completions`, translated to the native protocol or
//! relayed verbatim depending on the configured upstream mode.

pub mod completions;
pub mod extractor;
pub mod passthrough;
pub mod streaming;
pub mod types;
