//! Memory address wrapper type with hex parsing and wire encoding

use super::error::{MemoryError, MemoryResult};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Represents an address in the target address space
///
/// On the wire an address is a `"0x..."` hex string; decimal strings and
/// plain JSON numbers are accepted when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub usize);

impl Address {
    /// Creates a new address from a usize value
    pub const fn new(value: usize) -> Self {
        Address(value)
    }

    /// Creates a null address (0x0)
    pub const fn null() -> Self {
        Address(0)
    }

    /// Checks if the address is null
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the address is aligned to the specified boundary
    pub const fn is_aligned(&self, alignment: usize) -> bool {
        alignment != 0 && self.0 % alignment == 0
    }

    /// Adds an offset to the address, wrapping on overflow
    pub const fn offset(&self, offset: isize) -> Self {
        Address(self.0.wrapping_add_signed(offset))
    }

    /// Adds an unsigned byte count, returning `None` on overflow
    pub fn checked_add(&self, bytes: usize) -> Option<Self> {
        self.0.checked_add(bytes).map(Address)
    }

    /// Returns the raw usize value
    pub const fn as_usize(&self) -> usize {
        self.0
    }

    /// Encodes the address as `width` native-endian bytes
    ///
    /// `width` is the target pointer size (4 or 8); higher bytes are
    /// dropped for 4-byte targets.
    pub fn to_ne_bytes(&self, width: usize) -> Vec<u8> {
        let value = self.0 as u64;
        match width {
            4 => (value as u32).to_ne_bytes().to_vec(),
            _ => value.to_ne_bytes().to_vec(),
        }
    }

    /// Decodes a pointer of `width` native-endian bytes
    pub fn from_ne_bytes(bytes: &[u8], width: usize) -> Option<Self> {
        match width {
            4 => {
                let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
                Some(Address(u32::from_ne_bytes(raw) as usize))
            }
            8 => {
                let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
                Some(Address(u64::from_ne_bytes(raw) as usize))
            }
            _ => None,
        }
    }

    /// Short `0x` form used on the wire and in log lines
    pub fn to_hex(&self) -> String {
        format!("0x{:x}", self.0)
    }
}

impl FromStr for Address {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            usize::from_str_radix(hex, 16)
        } else {
            s.parse::<usize>()
        };

        value
            .map(Address::new)
            .map_err(|_| MemoryError::InvalidAddress(s.to_string()))
    }
}

/// Parses an address from a JSON value (hex string, decimal string or number)
pub fn parse_address(value: &serde_json::Value) -> MemoryResult<Address> {
    if let Some(n) = value.as_u64() {
        return Ok(Address::new(n as usize));
    }
    if let Some(s) = value.as_str() {
        return s.parse();
    }
    if value.is_null() {
        return Ok(Address::null());
    }
    Err(MemoryError::InvalidAddress(value.to_string()))
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<usize> for Address {
    fn from(value: usize) -> Self {
        Address::new(value)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address::new(value as usize)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

struct AddressVisitor;

impl<'de> Visitor<'de> for AddressVisitor {
    type Value = Address;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a pointer as a hex string, decimal string or integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Address, E> {
        Ok(Address::new(v as usize))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Address, E> {
        usize::try_from(v)
            .map(Address::new)
            .map_err(|_| E::custom(format!("negative pointer: {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Address, E> {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AddressVisitor)
    }
}
