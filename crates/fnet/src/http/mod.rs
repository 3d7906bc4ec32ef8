//! Incremental HTTP/1.x request parsing
//!
//! [`HttpRequest`] carries the per-connection state: the receive buffer and
//! the parse position. [`HttpParser`] holds the per-server configuration:
//! which header fields to dispatch on and what to do with the request line
//! and body. One parser serves any number of requests; callbacks receive
//! the request they are parsing, so per-connection state lives on the
//! request side.
//!
//! [`HttpParser::process`] is resumable. It consumes whatever the buffer
//! holds, and when the bytes run out mid-request it suspends, recording
//! where to pick up. Feeding more bytes and calling `process` again
//! continues exactly where parsing left off.

mod parser;
mod request;

pub use parser::{HttpParser, ParseStatus};
pub use request::{HttpRequest, HttpState, Method, RequestLine};
