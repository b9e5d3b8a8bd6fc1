//! STUN message model
//!
//! Messages are the RFC 5389 layout: a 96-bit transaction ID alongside the
//! fixed magic cookie. The legacy RFC 3489 flat 128-bit layout is not
//! supported; a datagram without the cookie fails to decode.

use std::fmt;
use std::net::SocketAddr;

use rand::Rng;

use crate::attribute::{StunAttribute, StunAttributeType};
use crate::error::{Error, Result};

/// STUN magic cookie (RFC 5389)
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// STUN message header size in bytes
pub const HEADER_SIZE: usize = 20;

/// 96-bit transaction identifier correlating a request with its response
/// across retransmissions.
///
/// Generated randomly by the sender and immutable afterwards. Every
/// retransmission of one logical request carries the same ID.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; 12]);

impl TransactionId {
    /// Generate a fresh random transaction ID
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw ID bytes (e.g. read off the wire)
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// The raw ID bytes
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// STUN message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunMessageType {
    /// Binding request
    BindingRequest,
    /// Binding success response
    BindingSuccessResponse,
    /// Binding error response
    BindingErrorResponse,
    /// Any other method/class combination (e.g. TURN allocate)
    Other { class: u8, method: u16 },
}

impl StunMessageType {
    /// Encode to the 14-bit wire value
    pub fn to_u16(self) -> u16 {
        match self {
            Self::BindingRequest => 0x0001,
            Self::BindingSuccessResponse => 0x0101,
            Self::BindingErrorResponse => 0x0111,
            Self::Other { class, method } => {
                // Class bits are interleaved into the method per RFC 5389
                // section 6.
                let class = (class & 0x03) as u16;
                let method = method & 0x0FFF;
                let c0 = (class & 0x01) << 4;
                let c1 = (class & 0x02) << 7;
                let m0 = method & 0x000F;
                let m1 = (method & 0x0070) >> 4;
                let m2 = (method & 0x0F80) >> 7;
                (m2 << 9) | c1 | (m1 << 5) | c0 | m0
            }
        }
    }

    /// Decode from the 14-bit wire value
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0001 => Self::BindingRequest,
            0x0101 => Self::BindingSuccessResponse,
            0x0111 => Self::BindingErrorResponse,
            _ => {
                let c0 = (value & 0x0010) >> 4;
                let c1 = (value & 0x0100) >> 7;
                let class = (c1 | c0) as u8;
                let m0 = value & 0x000F;
                let m1 = (value & 0x00E0) >> 1;
                let m2 = (value & 0x3E00) >> 2;
                let method = m2 | m1 | m0;
                Self::Other { class, method }
            }
        }
    }

    /// Whether this is a response of either kind
    pub fn is_response(self) -> bool {
        matches!(
            self,
            Self::BindingSuccessResponse | Self::BindingErrorResponse
        )
    }
}

/// A STUN message: type, transaction ID and an ordered attribute list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    /// Message type
    pub msg_type: StunMessageType,
    /// Transaction ID
    pub transaction_id: TransactionId,
    /// Attributes in wire order
    pub attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// Create a message with a fresh transaction ID
    pub fn new(msg_type: StunMessageType) -> Self {
        Self {
            msg_type,
            transaction_id: TransactionId::new(),
            attributes: Vec::new(),
        }
    }

    /// Create a message carrying an existing transaction ID
    pub fn with_transaction_id(msg_type: StunMessageType, transaction_id: TransactionId) -> Self {
        Self {
            msg_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Create a binding request
    pub fn binding_request() -> Self {
        Self::new(StunMessageType::BindingRequest)
    }

    /// Create a binding success response for the given transaction
    pub fn binding_success_response(transaction_id: TransactionId) -> Self {
        Self::with_transaction_id(StunMessageType::BindingSuccessResponse, transaction_id)
    }

    /// Create a binding error response for the given transaction
    pub fn binding_error_response(transaction_id: TransactionId) -> Self {
        Self::with_transaction_id(StunMessageType::BindingErrorResponse, transaction_id)
    }

    /// Append an attribute
    pub fn add_attribute(&mut self, attr: StunAttribute) -> &mut Self {
        self.attributes.push(attr);
        self
    }

    /// First attribute of the given type, if present
    pub fn get_attribute(&self, attr_type: StunAttributeType) -> Option<&StunAttribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }

    /// The mapped address reported by a binding response.
    ///
    /// Prefers XOR-MAPPED-ADDRESS and falls back to the plain MAPPED-ADDRESS
    /// some older servers still send.
    pub fn mapped_address(&self) -> Result<SocketAddr> {
        if let Some(attr) = self.get_attribute(StunAttributeType::XorMappedAddress) {
            return attr.as_xor_mapped_address(&self.transaction_id);
        }
        if let Some(attr) = self.get_attribute(StunAttributeType::MappedAddress) {
            return attr.as_mapped_address();
        }
        Err(Error::MissingAttribute("MAPPED-ADDRESS"))
    }

    /// The error code and reason phrase of a binding error response
    pub fn error_code(&self) -> Result<(u16, String)> {
        self.get_attribute(StunAttributeType::ErrorCode)
            .ok_or(Error::MissingAttribute("ERROR-CODE"))?
            .as_error_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_are_unique() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn binding_type_wire_values() {
        assert_eq!(StunMessageType::BindingRequest.to_u16(), 0x0001);
        assert_eq!(StunMessageType::BindingSuccessResponse.to_u16(), 0x0101);
        assert_eq!(StunMessageType::BindingErrorResponse.to_u16(), 0x0111);
        assert_eq!(
            StunMessageType::from_u16(0x0101),
            StunMessageType::BindingSuccessResponse
        );
    }

    #[test]
    fn other_type_round_trips() {
        // TURN Allocate request: method 0x003, class 0
        let t = StunMessageType::Other { class: 0, method: 0x003 };
        let wire = t.to_u16();
        assert_eq!(StunMessageType::from_u16(wire), t);
        // Allocate error response: method 0x003, class 3
        let t = StunMessageType::Other { class: 3, method: 0x003 };
        assert_eq!(StunMessageType::from_u16(t.to_u16()), t);
    }

    #[test]
    fn responses_share_the_request_id() {
        let request = StunMessage::binding_request();
        let response = StunMessage::binding_success_response(request.transaction_id);
        assert_eq!(request.transaction_id, response.transaction_id);
    }

    #[test]
    fn mapped_address_prefers_xor() {
        let mut response = StunMessage::binding_success_response(TransactionId::new());
        let xor: SocketAddr = "198.51.100.2:1000".parse().unwrap();
        let plain: SocketAddr = "192.0.2.9:2000".parse().unwrap();
        let id = response.transaction_id;
        response.add_attribute(StunAttribute::mapped_address(plain));
        response.add_attribute(StunAttribute::xor_mapped_address(xor, &id));
        assert_eq!(response.mapped_address().unwrap(), xor);
    }

    #[test]
    fn mapped_address_falls_back_to_plain() {
        let mut response = StunMessage::binding_success_response(TransactionId::new());
        let plain: SocketAddr = "192.0.2.9:2000".parse().unwrap();
        response.add_attribute(StunAttribute::mapped_address(plain));
        assert_eq!(response.mapped_address().unwrap(), plain);
    }

    #[test]
    fn missing_mapped_address_is_an_error() {
        let response = StunMessage::binding_success_response(TransactionId::new());
        assert_eq!(
            response.mapped_address().unwrap_err(),
            Error::MissingAttribute("MAPPED-ADDRESS")
        );
    }
}
