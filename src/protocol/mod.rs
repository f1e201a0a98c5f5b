//! Wire protocol: message shapes and framing.

pub mod framing;
pub mod message;

pub use framing::{Message, MessageFraming};
pub use message::{wire_timestamp, Request, Response};
