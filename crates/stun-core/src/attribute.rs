//! STUN attributes (RFC 5389 section 15)
//!
//! Attributes are carried as raw TLV values. Typed constructors and accessors
//! are provided for the attributes this stack actually interprets; everything
//! else is preserved byte-for-byte so decoded messages re-encode identically.

use std::net::{IpAddr, SocketAddr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::message::{TransactionId, MAGIC_COOKIE};

/// STUN attribute types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunAttributeType {
    MappedAddress,
    XorMappedAddress,
    ErrorCode,
    UnknownAttributes,
    Software,
    /// Any attribute type this stack does not interpret
    Other(u16),
}

impl From<u16> for StunAttributeType {
    fn from(value: u16) -> Self {
        match value {
            0x0001 => Self::MappedAddress,
            0x0020 => Self::XorMappedAddress,
            0x0009 => Self::ErrorCode,
            0x000A => Self::UnknownAttributes,
            0x8022 => Self::Software,
            _ => Self::Other(value),
        }
    }
}

impl From<StunAttributeType> for u16 {
    fn from(attr_type: StunAttributeType) -> Self {
        match attr_type {
            StunAttributeType::MappedAddress => 0x0001,
            StunAttributeType::XorMappedAddress => 0x0020,
            StunAttributeType::ErrorCode => 0x0009,
            StunAttributeType::UnknownAttributes => 0x000A,
            StunAttributeType::Software => 0x8022,
            StunAttributeType::Other(value) => value,
        }
    }
}

/// A single STUN attribute: type code plus raw value bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunAttribute {
    /// Attribute type
    pub attr_type: StunAttributeType,
    /// Attribute value, without padding
    pub value: Bytes,
}

impl StunAttribute {
    /// Create an attribute from a type and raw value
    pub fn new(attr_type: StunAttributeType, value: Bytes) -> Self {
        Self { attr_type, value }
    }

    /// Create a MAPPED-ADDRESS attribute
    pub fn mapped_address(addr: SocketAddr) -> Self {
        let mut value = BytesMut::with_capacity(20);
        value.put_u8(0);
        value.put_u8(address_family(&addr));
        value.put_u16(addr.port());
        match addr.ip() {
            IpAddr::V4(ip) => value.put_slice(&ip.octets()),
            IpAddr::V6(ip) => value.put_slice(&ip.octets()),
        }
        Self::new(StunAttributeType::MappedAddress, value.freeze())
    }

    /// Create a XOR-MAPPED-ADDRESS attribute
    pub fn xor_mapped_address(addr: SocketAddr, transaction_id: &TransactionId) -> Self {
        let mut value = BytesMut::with_capacity(20);
        value.put_u8(0);
        value.put_u8(address_family(&addr));
        value.put_u16(addr.port() ^ (MAGIC_COOKIE >> 16) as u16);
        match addr.ip() {
            IpAddr::V4(ip) => {
                let xored = u32::from_be_bytes(ip.octets()) ^ MAGIC_COOKIE;
                value.put_u32(xored);
            }
            IpAddr::V6(ip) => {
                value.put_slice(&xor_v6(ip.octets(), transaction_id));
            }
        }
        Self::new(StunAttributeType::XorMappedAddress, value.freeze())
    }

    /// Create an ERROR-CODE attribute from a numeric code (e.g. 400) and
    /// reason phrase
    pub fn error_code(code: u16, reason: &str) -> Self {
        let mut value = BytesMut::with_capacity(4 + reason.len());
        value.put_u16(0);
        value.put_u8((code / 100) as u8);
        value.put_u8((code % 100) as u8);
        value.put_slice(reason.as_bytes());
        Self::new(StunAttributeType::ErrorCode, value.freeze())
    }

    /// Create a SOFTWARE attribute
    pub fn software(software: &str) -> Self {
        Self::new(
            StunAttributeType::Software,
            Bytes::copy_from_slice(software.as_bytes()),
        )
    }

    /// Read this attribute as a MAPPED-ADDRESS
    pub fn as_mapped_address(&self) -> Result<SocketAddr> {
        let (family, port, raw) = self.split_address("MAPPED-ADDRESS")?;
        let ip = match family {
            1 => IpAddr::from(<[u8; 4]>::try_from(raw).map_err(|_| {
                Error::invalid_attribute("MAPPED-ADDRESS", "short IPv4 address")
            })?),
            2 => IpAddr::from(<[u8; 16]>::try_from(raw).map_err(|_| {
                Error::invalid_attribute("MAPPED-ADDRESS", "short IPv6 address")
            })?),
            other => return Err(Error::UnsupportedAddressFamily(other)),
        };
        Ok(SocketAddr::new(ip, port))
    }

    /// Read this attribute as a XOR-MAPPED-ADDRESS, undoing the cookie and
    /// transaction-ID masking
    pub fn as_xor_mapped_address(&self, transaction_id: &TransactionId) -> Result<SocketAddr> {
        let (family, xor_port, raw) = self.split_address("XOR-MAPPED-ADDRESS")?;
        let port = xor_port ^ (MAGIC_COOKIE >> 16) as u16;
        let ip = match family {
            1 => {
                let octets = <[u8; 4]>::try_from(raw).map_err(|_| {
                    Error::invalid_attribute("XOR-MAPPED-ADDRESS", "short IPv4 address")
                })?;
                IpAddr::from((u32::from_be_bytes(octets) ^ MAGIC_COOKIE).to_be_bytes())
            }
            2 => {
                let octets = <[u8; 16]>::try_from(raw).map_err(|_| {
                    Error::invalid_attribute("XOR-MAPPED-ADDRESS", "short IPv6 address")
                })?;
                IpAddr::from(xor_v6(octets, transaction_id))
            }
            other => return Err(Error::UnsupportedAddressFamily(other)),
        };
        Ok(SocketAddr::new(ip, port))
    }

    /// Read this attribute as an ERROR-CODE, returning the numeric code and
    /// reason phrase. Reason phrases are decoded lossily; a mangled phrase
    /// should not discard an otherwise valid error response.
    pub fn as_error_code(&self) -> Result<(u16, String)> {
        if self.value.len() < 4 {
            return Err(Error::invalid_attribute("ERROR-CODE", "value shorter than 4 bytes"));
        }
        let mut value = self.value.clone();
        value.advance(2);
        let class = (value.get_u8() & 0x07) as u16;
        let number = value.get_u8() as u16;
        if number > 99 {
            return Err(Error::invalid_attribute("ERROR-CODE", "number above 99"));
        }
        let reason = String::from_utf8_lossy(&value).into_owned();
        Ok((class * 100 + number, reason))
    }

    /// Common prefix of the two address attribute layouts: reserved byte,
    /// family byte, 16-bit port, then the raw address bytes.
    fn split_address(&self, name: &'static str) -> Result<(u8, u16, &[u8])> {
        if self.value.len() < 8 {
            return Err(Error::invalid_attribute(name, "value shorter than 8 bytes"));
        }
        let family = self.value[1];
        let port = u16::from_be_bytes([self.value[2], self.value[3]]);
        Ok((family, port, &self.value[4..]))
    }
}

fn address_family(addr: &SocketAddr) -> u8 {
    match addr.ip() {
        IpAddr::V4(_) => 1,
        IpAddr::V6(_) => 2,
    }
}

/// XOR an IPv6 address with the magic cookie followed by the transaction ID,
/// per RFC 5389 section 15.2. The operation is its own inverse.
fn xor_v6(octets: [u8; 16], transaction_id: &TransactionId) -> [u8; 16] {
    let mut mask = [0u8; 16];
    mask[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    mask[4..].copy_from_slice(transaction_id.as_bytes());
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = octets[i] ^ mask[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_mapped_address_v4_round_trip() {
        let id = TransactionId::new();
        let addr: SocketAddr = "203.0.113.5:54321".parse().unwrap();
        let attr = StunAttribute::xor_mapped_address(addr, &id);
        assert_eq!(attr.as_xor_mapped_address(&id).unwrap(), addr);
        // The wire value must actually be masked
        assert_ne!(&attr.value[4..8], &[203, 0, 113, 5]);
    }

    #[test]
    fn xor_mapped_address_v6_round_trip() {
        let id = TransactionId::new();
        let addr: SocketAddr = "[2001:db8::7]:8080".parse().unwrap();
        let attr = StunAttribute::xor_mapped_address(addr, &id);
        assert_eq!(attr.as_xor_mapped_address(&id).unwrap(), addr);
    }

    #[test]
    fn mapped_address_round_trip() {
        let addr: SocketAddr = "192.0.2.1:3478".parse().unwrap();
        let attr = StunAttribute::mapped_address(addr);
        assert_eq!(attr.as_mapped_address().unwrap(), addr);
    }

    #[test]
    fn error_code_round_trip() {
        let attr = StunAttribute::error_code(420, "Unknown Attribute");
        assert_eq!(attr.as_error_code().unwrap(), (420, "Unknown Attribute".to_string()));
    }

    #[test]
    fn short_address_value_is_rejected() {
        let attr = StunAttribute::new(StunAttributeType::MappedAddress, Bytes::from_static(&[0, 1, 2]));
        assert!(attr.as_mapped_address().is_err());
    }

    #[test]
    fn bad_family_is_rejected() {
        let mut value = BytesMut::new();
        value.put_u8(0);
        value.put_u8(9);
        value.put_u16(1234);
        value.put_u32(0);
        let attr = StunAttribute::new(StunAttributeType::MappedAddress, value.freeze());
        assert_eq!(
            attr.as_mapped_address().unwrap_err(),
            Error::UnsupportedAddressFamily(9)
        );
    }
}
