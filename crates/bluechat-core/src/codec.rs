//! Chat payload codec
//!
//! The wire format is the UTF-8 bytes of the message, nothing else. The only
//! rule is size: a message must fit in one attribute write of the negotiated
//! payload size, and an oversized message is rejected rather than truncated.

use crate::protocol::{self, MIN_PAYLOAD};
use crate::{BluechatError, Result};

/// Encodes and decodes chat payloads for one negotiated payload size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCodec {
    max_payload: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(MIN_PAYLOAD)
    }
}

impl MessageCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Codec for a negotiated ATT MTU
    pub fn for_mtu(mtu: u16) -> Self {
        Self::new(protocol::usable_payload(mtu))
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Encode `text` for a single attribute write
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        if text.is_empty() {
            return Err(BluechatError::decode_failure("empty message"));
        }
        let size = text.len();
        if size > self.max_payload {
            return Err(BluechatError::PayloadTooLarge {
                size,
                max: self.max_payload,
            });
        }
        Ok(text.as_bytes().to_vec())
    }

    /// Decode an inbound attribute value
    ///
    /// Inbound values are not checked against `max_payload`; the remote side
    /// may have negotiated a larger MTU with the local stack.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        decode_payload(bytes)
    }
}

/// Decode raw attribute bytes into message text
pub fn decode_payload(bytes: &[u8]) -> Result<String> {
    if bytes.is_empty() {
        return Err(BluechatError::decode_failure("empty payload"));
    }
    let text = core::str::from_utf8(bytes)
        .map_err(|e| BluechatError::decode_failure(format!("invalid UTF-8: {}", e)))?;
    if text.is_empty() {
        return Err(BluechatError::decode_failure("empty payload"));
    }
    Ok(text.to_string())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_within_limit() {
        let codec = MessageCodec::for_mtu(23);
        assert_eq!(codec.max_payload(), 20);
        let text = "a".repeat(20);
        let bytes = codec.encode(&text).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), text);
    }

    #[test]
    fn test_oversized_rejected_not_truncated() {
        let codec = MessageCodec::for_mtu(23);
        let err = codec.encode(&"a".repeat(30)).unwrap_err();
        assert_eq!(err, BluechatError::PayloadTooLarge { size: 30, max: 20 });
    }

    #[test]
    fn test_limit_counts_bytes_not_chars() {
        let codec = MessageCodec::new(4);
        // Three characters, seven bytes
        assert!(matches!(
            codec.encode("éé€"),
            Err(BluechatError::PayloadTooLarge { size: 7, max: 4 })
        ));
        assert!(codec.encode("éé").is_ok());
    }

    #[test]
    fn test_decode_failures() {
        let codec = MessageCodec::default();
        assert!(matches!(
            codec.decode(&[]),
            Err(BluechatError::DecodeFailure { .. })
        ));
        assert!(matches!(
            codec.decode(&[0xff, 0xfe]),
            Err(BluechatError::DecodeFailure { .. })
        ));
    }

    #[test]
    fn test_empty_message_not_encoded() {
        assert!(MessageCodec::default().encode("").is_err());
    }
}
