//! Codec for encoding and decoding Parley frames.
//!
//! Text frames carry plain JSON. Binary frames carry MessagePack with a
//! length prefix, so several frames can share one buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::events::{ClientEnvelope, ServerFrame};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event name not recognized.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Payload does not match the event's schema.
    #[error("Invalid payload for {event}: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Wire encoding of a frame, chosen by the WebSocket message kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// JSON in a text message.
    #[default]
    Text,
    /// Length-prefixed MessagePack in a binary message.
    Binary,
}

/// Encode a server frame as JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_text(frame: &ServerFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a client envelope from JSON text.
///
/// # Errors
///
/// Returns an error if the text is not a valid envelope.
pub fn decode_text(text: &str) -> Result<ClientEnvelope, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a value to length-prefixed MessagePack.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded value
///
/// # Errors
///
/// Returns an error if the value is too large or encoding fails.
pub fn encode_binary<T: Serialize>(value: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a value into an existing buffer.
///
/// # Errors
///
/// Returns an error if the value is too large or encoding fails.
pub fn encode_into<T: Serialize>(value: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(value)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a value from length-prefixed MessagePack.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode_binary<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Try to decode a value from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(value))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    Ok(Some(rmp_serde::from_slice(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClientEvent, GroupRef, ServerEvent};
    use serde_json::json;

    #[test]
    fn test_text_decode() {
        let envelope = decode_text(r#"{"event":"group:join","data":{"groupId":"g1"},"ack":2}"#)
            .unwrap();
        assert_eq!(
            envelope.parse().unwrap(),
            ClientEvent::JoinGroup(GroupRef {
                group_id: "g1".into()
            })
        );
        assert!(decode_text("not json").is_err());
    }

    #[test]
    fn test_text_encode() {
        let frame = ServerFrame::Event(ServerEvent::error("boom"));
        let text = encode_text(&frame).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"event": "error", "data": {"message": "boom"}}));
    }

    #[test]
    fn test_binary_envelope() {
        let envelope = ClientEnvelope {
            event: "message:send".into(),
            data: json!({"content": "hi"}),
            ack: Some(9),
        };
        let encoded = encode_binary(&envelope).unwrap();
        let decoded: ClientEnvelope = decode_binary(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_decode_incomplete() {
        let envelope = ClientEnvelope {
            event: "status:get_online".into(),
            data: serde_json::Value::Null,
            ack: None,
        };
        let encoded = encode_binary(&envelope).unwrap();

        let partial = &encoded[..5];
        match decode_binary::<ClientEnvelope>(partial) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let first = ClientEnvelope {
            event: "typing:start".into(),
            data: json!({}),
            ack: None,
        };
        let second = ClientEnvelope {
            event: "typing:stop".into(),
            data: json!({}),
            ack: None,
        };

        let mut buf = BytesMut::new();
        encode_into(&first, &mut buf).unwrap();
        encode_into(&second, &mut buf).unwrap();

        let decoded1: ClientEnvelope = decode_from(&mut buf).unwrap().unwrap();
        let decoded2: ClientEnvelope = decode_from(&mut buf).unwrap().unwrap();

        assert_eq!(decoded1, first);
        assert_eq!(decoded2, second);
        assert!(buf.is_empty());
        assert!(decode_from::<ClientEnvelope>(&mut buf).unwrap().is_none());
    }
}
