//! STUN wire codec (RFC 5389 section 6)
//!
//! Encoding renders the 20-byte header followed by TLV attributes padded to
//! 4-byte boundaries. Decoding is strict about the header (leading zero bits,
//! magic cookie, declared length matching the buffer) but tolerant of
//! attribute types it does not understand, which are preserved raw.

use bytes::{BufMut, Bytes, BytesMut};

use crate::attribute::StunAttribute;
use crate::error::{Error, Result};
use crate::message::{StunMessage, StunMessageType, TransactionId, HEADER_SIZE, MAGIC_COOKIE};

/// Encode a message into its wire representation
pub fn encode(message: &StunMessage) -> Bytes {
    let body_len: usize = message
        .attributes
        .iter()
        .map(|a| 4 + padded_len(a.value.len()))
        .sum();

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body_len);
    buf.put_u16(message.msg_type.to_u16());
    buf.put_u16(body_len as u16);
    buf.put_u32(MAGIC_COOKIE);
    buf.put_slice(message.transaction_id.as_bytes());

    for attr in &message.attributes {
        buf.put_u16(attr.attr_type.into());
        buf.put_u16(attr.value.len() as u16);
        buf.put_slice(&attr.value);
        for _ in attr.value.len()..padded_len(attr.value.len()) {
            buf.put_u8(0);
        }
    }

    buf.freeze()
}

/// Decode a wire message.
///
/// The buffer must contain exactly one message: a declared length that does
/// not account for every remaining byte is rejected. UDP datagrams carry one
/// message each, and the TCP framing layer hands us exact slices.
pub fn decode(bytes: &[u8]) -> Result<StunMessage> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::Truncated {
            needed: HEADER_SIZE,
            actual: bytes.len(),
        });
    }

    let raw_type = u16::from_be_bytes([bytes[0], bytes[1]]);
    if raw_type & 0xC000 != 0 {
        return Err(Error::InvalidTypePrefix(raw_type));
    }
    let msg_type = StunMessageType::from_u16(raw_type);

    let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    if bytes.len() != HEADER_SIZE + declared {
        return Err(Error::LengthMismatch {
            declared,
            actual: bytes.len() - HEADER_SIZE,
        });
    }

    let cookie = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if cookie != MAGIC_COOKIE {
        return Err(Error::InvalidMagicCookie(cookie));
    }

    let mut id = [0u8; 12];
    id.copy_from_slice(&bytes[8..HEADER_SIZE]);
    let transaction_id = TransactionId::from_bytes(id);

    let mut attributes = Vec::new();
    let mut offset = HEADER_SIZE;
    while offset < bytes.len() {
        if offset + 4 > bytes.len() {
            return Err(Error::TruncatedAttribute {
                attr_type: 0,
                needed: 4,
            });
        }
        let attr_type = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
        let attr_len = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
        offset += 4;

        if offset + attr_len > bytes.len() {
            return Err(Error::TruncatedAttribute {
                attr_type,
                needed: attr_len,
            });
        }
        let value = Bytes::copy_from_slice(&bytes[offset..offset + attr_len]);
        offset += padded_len(attr_len);

        // Unknown types are kept as-is; interpretation happens lazily via
        // the typed accessors.
        attributes.push(StunAttribute::new(attr_type.into(), value));
    }

    Ok(StunMessage {
        msg_type,
        transaction_id,
        attributes,
    })
}

/// Peek at the declared length of a message whose header has arrived,
/// returning the total message size. Used by stream transports to frame
/// reads.
pub fn framed_len(header: &[u8]) -> Result<usize> {
    if header.len() < 4 {
        return Err(Error::Truncated {
            needed: 4,
            actual: header.len(),
        });
    }
    let declared = u16::from_be_bytes([header[2], header[3]]) as usize;
    Ok(HEADER_SIZE + declared)
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{StunAttribute, StunAttributeType};
    use std::net::SocketAddr;

    #[test]
    fn binding_request_round_trip() {
        let mut request = StunMessage::binding_request();
        request.add_attribute(StunAttribute::software("stun-core test"));
        let wire = encode(&request);
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn success_response_round_trip() {
        let mut response = StunMessage::binding_success_response(TransactionId::new());
        let addr: SocketAddr = "203.0.113.5:54321".parse().unwrap();
        let id = response.transaction_id;
        response.add_attribute(StunAttribute::xor_mapped_address(addr, &id));
        let decoded = decode(&encode(&response)).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.mapped_address().unwrap(), addr);
    }

    #[test]
    fn error_response_round_trip() {
        let mut response = StunMessage::binding_error_response(TransactionId::new());
        response.add_attribute(StunAttribute::error_code(500, "Server Error"));
        let decoded = decode(&encode(&response)).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.error_code().unwrap().0, 500);
    }

    #[test]
    fn header_layout() {
        let request = StunMessage::binding_request();
        let wire = encode(&request);
        assert_eq!(wire.len(), HEADER_SIZE);
        assert_eq!(&wire[0..2], &[0x00, 0x01]);
        assert_eq!(&wire[2..4], &[0x00, 0x00]);
        assert_eq!(&wire[4..8], &MAGIC_COOKIE.to_be_bytes());
        assert_eq!(&wire[8..20], request.transaction_id.as_bytes());
    }

    #[test]
    fn attribute_padding_is_applied() {
        let mut request = StunMessage::binding_request();
        // 5 bytes pads to 8
        request.add_attribute(StunAttribute::software("abcde"));
        let wire = encode(&request);
        assert_eq!(wire.len(), HEADER_SIZE + 4 + 8);
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded.attributes[0].value.len(), 5);
    }

    #[test]
    fn unknown_attributes_are_kept() {
        let mut request = StunMessage::binding_request();
        request.add_attribute(StunAttribute::new(
            StunAttributeType::Other(0x7FF2),
            Bytes::from_static(&[1, 2, 3, 4]),
        ));
        request.add_attribute(StunAttribute::software("after"));
        let decoded = decode(&encode(&request)).unwrap();
        assert_eq!(decoded, request);
        assert!(decoded.get_attribute(StunAttributeType::Software).is_some());
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert!(matches!(
            decode(&[0u8; 12]),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn nonzero_prefix_is_rejected() {
        let mut wire = encode(&StunMessage::binding_request()).to_vec();
        wire[0] |= 0xC0;
        assert!(matches!(decode(&wire), Err(Error::InvalidTypePrefix(_))));
    }

    #[test]
    fn bad_cookie_is_rejected() {
        let mut wire = encode(&StunMessage::binding_request()).to_vec();
        wire[4] ^= 0xFF;
        assert!(matches!(decode(&wire), Err(Error::InvalidMagicCookie(_))));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut wire = encode(&StunMessage::binding_request()).to_vec();
        wire[3] = 8; // declares a body that is not there
        assert!(matches!(decode(&wire), Err(Error::LengthMismatch { .. })));
        let mut wire = encode(&StunMessage::binding_request()).to_vec();
        wire.push(0); // trailing junk
        assert!(matches!(decode(&wire), Err(Error::LengthMismatch { .. })));
    }

    #[test]
    fn truncated_attribute_is_rejected() {
        let mut request = StunMessage::binding_request();
        request.add_attribute(StunAttribute::software("abcd"));
        let mut wire = encode(&request).to_vec();
        // Claim the attribute is longer than the message
        wire[HEADER_SIZE + 3] = 200;
        wire[3] = (wire.len() - HEADER_SIZE) as u8;
        assert!(matches!(
            decode(&wire),
            Err(Error::TruncatedAttribute { .. })
        ));
    }

    #[test]
    fn framed_len_reads_the_header() {
        let mut request = StunMessage::binding_request();
        request.add_attribute(StunAttribute::software("12345678"));
        let wire = encode(&request);
        assert_eq!(framed_len(&wire[..4]).unwrap(), wire.len());
    }

    #[test]
    fn arbitrary_bytes_do_not_decode() {
        assert!(decode(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").is_err());
    }
}
