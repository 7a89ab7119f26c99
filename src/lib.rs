//! bailian-proxy - OpenAI-compatible gateway for Bailian agent applications
//!
//! Accepts OpenAI chat-completion requests, forwards them to a single agent
//! application, and translates requests, responses, errors and event streams
//! between the two protocols.

pub mod adapter;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod telemetry;
pub mod upstream;
