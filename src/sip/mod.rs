//! SIP signaling: wire codec, the call responder, and response routing.
//!
//! Only the handful of requests a doorbell client sends during a ding are
//! understood (INVITE, INFO, BYE). Everything else is logged and dropped.

pub mod message;
pub mod responder;
pub mod router;
pub mod transport;
pub mod via;

use thiserror::Error;

/// Errors raised while decoding SIP from the wire.
#[derive(Debug, Error, PartialEq)]
pub enum SipError {
    #[error("empty message")]
    Empty,
    #[error("invalid start line: {0:?}")]
    InvalidStartLine(String),
    #[error("invalid header line: {0:?}")]
    InvalidHeader(String),
    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),
    #[error("invalid Via header: {0:?}")]
    InvalidVia(String),
}
