//! Bidirectional translation between the standard chat protocol and the
//! native agent-completion protocol
//!
//! - [`request`]: chat request → native request
//! - [`response`]: native buffered response → chat completion
//! - [`extract`] and [`errors`]: native error bodies → error envelope
//! - [`stream`]: cumulative native frames → delta chunks
//!
//! Nothing here performs I/O.

pub mod errors;
pub mod extract;
pub mod native;
pub mod request;
pub mod response;
pub mod stream;

pub use errors::{error_type_for_status, translate_error};
pub use extract::extract_json;
pub use native::{NativeRequest, NativeResponse};
pub use request::to_native;
pub use response::to_openai;
pub use stream::{DONE_SENTINEL, StreamCursor, StreamEvent, StreamTranslator};
