//! Message framing.
//!
//! Two framings:
//!
//! - **Raw datagram** — one JSON object per datagram, no prefix. This is
//!   what the transport sends; the datagram boundary is the frame.
//! - **Length-prefixed** — `[4-byte u32 BE length][JSON envelope]` where the
//!   envelope is `{"type": "request"|"response", "payload": "<inner JSON>"}`.
//!   Retained for stream carriers; the extractor treats short buffers as
//!   "need more bytes", never as failure.

use crate::error::JanusError;
use crate::protocol::message::{Request, Response};
use serde::{Deserialize, Serialize};

/// Envelope ceiling for length-prefixed frames.
pub const MAX_ENVELOPE_BYTES: usize = 10 * 1024 * 1024;

const LENGTH_PREFIX_BYTES: usize = 4;

/// A decoded wire message of either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    payload: String,
}

/// Stateless codec for both framings.
pub struct MessageFraming;

impl MessageFraming {
    // ========================================================================
    // Raw Datagram Framing
    // ========================================================================

    pub fn encode_request(request: &Request) -> Result<Vec<u8>, JanusError> {
        serde_json::to_vec(request)
            .map_err(|e| JanusError::Framing(format!("failed to serialize request: {e}")))
    }

    pub fn decode_request(data: &[u8]) -> Result<Request, JanusError> {
        let request: Request = serde_json::from_slice(data)
            .map_err(|e| JanusError::Framing(format!("failed to parse request: {e}")))?;
        if request.id.is_empty() {
            return Err(JanusError::Framing("request is missing 'id'".to_string()));
        }
        if request.request.is_empty() {
            return Err(JanusError::Framing(
                "request is missing 'request'".to_string(),
            ));
        }
        Ok(request)
    }

    pub fn encode_response(response: &Response) -> Result<Vec<u8>, JanusError> {
        serde_json::to_vec(response)
            .map_err(|e| JanusError::Framing(format!("failed to serialize response: {e}")))
    }

    pub fn decode_response(data: &[u8]) -> Result<Response, JanusError> {
        let response: Response = serde_json::from_slice(data)
            .map_err(|e| JanusError::Framing(format!("failed to parse response: {e}")))?;
        if response.request_id.is_empty() {
            return Err(JanusError::Framing(
                "response is missing 'request_id'".to_string(),
            ));
        }
        Ok(response)
    }

    // ========================================================================
    // Length-Prefixed Framing
    // ========================================================================

    /// Encode one message as `[u32 BE length][envelope JSON]`.
    pub fn encode_message(message: &Message) -> Result<Vec<u8>, JanusError> {
        let (kind, payload) = match message {
            Message::Request(request) => ("request", Self::encode_request(request)?),
            Message::Response(response) => ("response", Self::encode_response(response)?),
        };
        let envelope = Envelope {
            kind: kind.to_string(),
            payload: String::from_utf8(payload)
                .map_err(|e| JanusError::Framing(format!("payload is not UTF-8: {e}")))?,
        };
        let body = serde_json::to_vec(&envelope)
            .map_err(|e| JanusError::Framing(format!("failed to serialize envelope: {e}")))?;
        if body.len() > MAX_ENVELOPE_BYTES {
            return Err(JanusError::Framing(format!(
                "envelope of {} bytes exceeds the {MAX_ENVELOPE_BYTES}-byte limit",
                body.len()
            )));
        }

        let mut framed = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
        framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
        framed.extend_from_slice(&body);
        Ok(framed)
    }

    /// Decode exactly one length-prefixed message from the front of `data`.
    ///
    /// Short buffers return `IncompleteLengthPrefix` / `IncompleteMessage`;
    /// callers accumulating from a stream retry with more bytes.
    pub fn decode_message(data: &[u8]) -> Result<Message, JanusError> {
        let (message, _) = Self::decode_one(data)?;
        Ok(message)
    }

    /// Drain every complete frame from `buffer`. Returns the decoded
    /// messages and the unconsumed remainder. Incomplete trailing data is
    /// not an error; malformed frames are.
    pub fn extract_messages(buffer: &[u8]) -> Result<(Vec<Message>, Vec<u8>), JanusError> {
        let mut messages = Vec::new();
        let mut offset = 0;
        loop {
            match Self::decode_one(&buffer[offset..]) {
                Ok((message, consumed)) => {
                    messages.push(message);
                    offset += consumed;
                }
                Err(err) if err.is_incomplete() => break,
                Err(err) => return Err(err),
            }
        }
        Ok((messages, buffer[offset..].to_vec()))
    }

    fn decode_one(data: &[u8]) -> Result<(Message, usize), JanusError> {
        if data.len() < LENGTH_PREFIX_BYTES {
            return Err(JanusError::IncompleteLengthPrefix {
                needed: LENGTH_PREFIX_BYTES,
                available: data.len(),
            });
        }
        let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if length == 0 {
            return Err(JanusError::Framing(
                "zero-length frame is not allowed".to_string(),
            ));
        }
        if length > MAX_ENVELOPE_BYTES {
            return Err(JanusError::Framing(format!(
                "frame of {length} bytes exceeds the {MAX_ENVELOPE_BYTES}-byte limit"
            )));
        }
        let end = LENGTH_PREFIX_BYTES + length;
        if data.len() < end {
            return Err(JanusError::IncompleteMessage {
                expected: end,
                available: data.len(),
            });
        }

        let envelope: Envelope = serde_json::from_slice(&data[LENGTH_PREFIX_BYTES..end])
            .map_err(|e| JanusError::Framing(format!("failed to parse envelope: {e}")))?;
        let message = Self::open_envelope(&envelope)?;
        Ok((message, end))
    }

    fn open_envelope(envelope: &Envelope) -> Result<Message, JanusError> {
        if envelope.payload.is_empty() {
            return Err(JanusError::Framing(
                "envelope payload is empty".to_string(),
            ));
        }
        match envelope.kind.as_str() {
            "request" => Ok(Message::Request(Self::decode_request(
                envelope.payload.as_bytes(),
            )?)),
            "response" => Ok(Message::Response(Self::decode_response(
                envelope.payload.as_bytes(),
            )?)),
            other => Err(JanusError::Framing(format!(
                "unknown envelope type '{other}'"
            ))),
        }
    }
}
