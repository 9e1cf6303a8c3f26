//! Encoder and decoder for SOP frames and messages.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::Message;
use bytes::BytesMut;

/// Encodes messages into framed bytes.
pub struct Encoder;

impl Encoder {
    /// Encodes a message into a frame ready for the wire.
    pub fn encode_message(message: &Message) -> Result<BytesMut, ProtocolError> {
        let frame = Frame::from_msgpack(message)?;
        frame.encode()
    }
}

/// Streaming decoder: buffers partial input and yields complete messages in
/// arrival order, never splitting or merging them.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next message from the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed for a complete frame.
    pub fn decode_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        match self.decode_frame()? {
            Some(frame) => {
                let message: Message = rmp_serde::from_slice(&frame.payload)?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WireValue;
    use std::collections::HashMap;

    #[test]
    fn test_encoder_decoder_roundtrip() {
        let msg = Message::call("echo", vec![WireValue::from_u64(42)], HashMap::new());
        let encoded = Encoder::encode_message(&msg).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded);

        let decoded = decoder.decode_message().unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_partial_frame_decoding() {
        let msg = Message::ret(WireValue::from_str("partial"));
        let encoded = Encoder::encode_message(&msg).unwrap();

        let mut decoder = Decoder::new();

        // Feed partial data
        decoder.extend(&encoded[..10]);
        assert!(decoder.decode_message().unwrap().is_none());

        // Feed the rest
        decoder.extend(&encoded[10..]);
        let decoded = decoder.decode_message().unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_messages_arrive_in_order() {
        let first = Message::call("a", vec![], HashMap::new());
        let second = Message::call("b", vec![], HashMap::new());
        let third = Message::error("boom", "detail");

        let mut decoder = Decoder::new();
        for msg in [&first, &second, &third] {
            decoder.extend(&Encoder::encode_message(msg).unwrap());
        }

        assert_eq!(decoder.decode_message().unwrap().unwrap(), first);
        assert_eq!(decoder.decode_message().unwrap().unwrap(), second);
        assert_eq!(decoder.decode_message().unwrap().unwrap(), third);
        assert!(decoder.decode_message().unwrap().is_none());
    }

    #[test]
    fn test_garbage_is_fatal() {
        let mut decoder = Decoder::new();
        decoder.extend(&[0xFFu8; 32]);
        assert!(decoder.decode_message().is_err());
    }

    #[test]
    fn test_decoder_buffered() {
        let mut decoder = Decoder::new();
        assert_eq!(decoder.buffered(), 0);

        decoder.extend(b"some data");
        assert_eq!(decoder.buffered(), 9);

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_default() {
        let decoder = Decoder::default();
        assert_eq!(decoder.buffered(), 0);
    }
}
