//! Native values exchanged with the host's call and trampoline primitives

use super::address::{parse_address, Address};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// ABI class of a native scalar
///
/// `Bool` is a C `int`-sized boolean (GLib `gboolean`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeType {
    Void,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Pointer,
}

impl NativeType {
    /// Size in bytes on a target with the given pointer width
    ///
    /// Returns `None` for `Void`, which has no storage.
    pub fn size(&self, pointer_size: usize) -> Option<usize> {
        match self {
            NativeType::Void => None,
            NativeType::I8 | NativeType::U8 => Some(1),
            NativeType::I16 | NativeType::U16 => Some(2),
            NativeType::Bool | NativeType::I32 | NativeType::U32 | NativeType::F32 => Some(4),
            NativeType::I64 | NativeType::U64 | NativeType::F64 => Some(8),
            NativeType::Pointer => Some(pointer_size),
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NativeType::Void => "void",
            NativeType::Bool => "bool",
            NativeType::I8 => "i8",
            NativeType::U8 => "u8",
            NativeType::I16 => "i16",
            NativeType::U16 => "u16",
            NativeType::I32 => "i32",
            NativeType::U32 => "u32",
            NativeType::I64 => "i64",
            NativeType::U64 => "u64",
            NativeType::F32 => "f32",
            NativeType::F64 => "f64",
            NativeType::Pointer => "pointer",
        };
        f.write_str(name)
    }
}

/// A marshaled native scalar
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeValue {
    Void,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Pointer(Address),
}

impl NativeValue {
    /// Returns the ABI class of the value
    pub fn native_type(&self) -> NativeType {
        match self {
            NativeValue::Void => NativeType::Void,
            NativeValue::Bool(_) => NativeType::Bool,
            NativeValue::I8(_) => NativeType::I8,
            NativeValue::U8(_) => NativeType::U8,
            NativeValue::I16(_) => NativeType::I16,
            NativeValue::U16(_) => NativeType::U16,
            NativeValue::I32(_) => NativeType::I32,
            NativeValue::U32(_) => NativeType::U32,
            NativeValue::I64(_) => NativeType::I64,
            NativeValue::U64(_) => NativeType::U64,
            NativeValue::F32(_) => NativeType::F32,
            NativeValue::F64(_) => NativeType::F64,
            NativeValue::Pointer(_) => NativeType::Pointer,
        }
    }

    /// The zero value of a type, used as a trampoline's return value
    pub fn zero(ty: NativeType) -> Self {
        match ty {
            NativeType::Void => NativeValue::Void,
            NativeType::Bool => NativeValue::Bool(false),
            NativeType::I8 => NativeValue::I8(0),
            NativeType::U8 => NativeValue::U8(0),
            NativeType::I16 => NativeValue::I16(0),
            NativeType::U16 => NativeValue::U16(0),
            NativeType::I32 => NativeValue::I32(0),
            NativeType::U32 => NativeValue::U32(0),
            NativeType::I64 => NativeValue::I64(0),
            NativeType::U64 => NativeValue::U64(0),
            NativeType::F32 => NativeValue::F32(0.0),
            NativeType::F64 => NativeValue::F64(0.0),
            NativeType::Pointer => NativeValue::Pointer(Address::null()),
        }
    }

    /// Encodes the value as native-endian bytes
    pub fn to_bytes(&self, pointer_size: usize) -> Vec<u8> {
        match self {
            NativeValue::Void => Vec::new(),
            NativeValue::Bool(v) => (*v as i32).to_ne_bytes().to_vec(),
            NativeValue::I8(v) => v.to_ne_bytes().to_vec(),
            NativeValue::U8(v) => v.to_ne_bytes().to_vec(),
            NativeValue::I16(v) => v.to_ne_bytes().to_vec(),
            NativeValue::U16(v) => v.to_ne_bytes().to_vec(),
            NativeValue::I32(v) => v.to_ne_bytes().to_vec(),
            NativeValue::U32(v) => v.to_ne_bytes().to_vec(),
            NativeValue::I64(v) => v.to_ne_bytes().to_vec(),
            NativeValue::U64(v) => v.to_ne_bytes().to_vec(),
            NativeValue::F32(v) => v.to_ne_bytes().to_vec(),
            NativeValue::F64(v) => v.to_ne_bytes().to_vec(),
            NativeValue::Pointer(addr) => addr.to_ne_bytes(pointer_size),
        }
    }

    /// Decodes a value of the given type from native-endian bytes
    pub fn from_bytes(bytes: &[u8], ty: NativeType, pointer_size: usize) -> Option<Self> {
        fn take<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
            bytes.get(..N)?.try_into().ok()
        }

        let value = match ty {
            NativeType::Void => NativeValue::Void,
            NativeType::Bool => NativeValue::Bool(i32::from_ne_bytes(take(bytes)?) != 0),
            NativeType::I8 => NativeValue::I8(i8::from_ne_bytes(take(bytes)?)),
            NativeType::U8 => NativeValue::U8(u8::from_ne_bytes(take(bytes)?)),
            NativeType::I16 => NativeValue::I16(i16::from_ne_bytes(take(bytes)?)),
            NativeType::U16 => NativeValue::U16(u16::from_ne_bytes(take(bytes)?)),
            NativeType::I32 => NativeValue::I32(i32::from_ne_bytes(take(bytes)?)),
            NativeType::U32 => NativeValue::U32(u32::from_ne_bytes(take(bytes)?)),
            NativeType::I64 => NativeValue::I64(i64::from_ne_bytes(take(bytes)?)),
            NativeType::U64 => NativeValue::U64(u64::from_ne_bytes(take(bytes)?)),
            NativeType::F32 => NativeValue::F32(f32::from_ne_bytes(take(bytes)?)),
            NativeType::F64 => NativeValue::F64(f64::from_ne_bytes(take(bytes)?)),
            NativeType::Pointer => NativeValue::Pointer(Address::from_ne_bytes(bytes, pointer_size)?),
        };
        Some(value)
    }

    /// Converts a controller-supplied JSON value to the given type
    ///
    /// Booleans accept `true`/`false` or integers; integers accept numbers
    /// and numeric strings; pointers accept anything [`parse_address`] does.
    pub fn from_json(value: &Value, ty: NativeType) -> Option<Self> {
        fn int(value: &Value) -> Option<i128> {
            if let Some(n) = value.as_i64() {
                return Some(n as i128);
            }
            if let Some(n) = value.as_u64() {
                return Some(n as i128);
            }
            if let Some(b) = value.as_bool() {
                return Some(b as i128);
            }
            value.as_str()?.trim().parse().ok()
        }

        let converted = match ty {
            NativeType::Void => NativeValue::Void,
            NativeType::Bool => match value {
                Value::Bool(b) => NativeValue::Bool(*b),
                other => NativeValue::Bool(int(other)? != 0),
            },
            NativeType::I8 => NativeValue::I8(i8::try_from(int(value)?).ok()?),
            NativeType::U8 => NativeValue::U8(u8::try_from(int(value)?).ok()?),
            NativeType::I16 => NativeValue::I16(i16::try_from(int(value)?).ok()?),
            NativeType::U16 => NativeValue::U16(u16::try_from(int(value)?).ok()?),
            NativeType::I32 => NativeValue::I32(i32::try_from(int(value)?).ok()?),
            NativeType::U32 => NativeValue::U32(u32::try_from(int(value)?).ok()?),
            NativeType::I64 => NativeValue::I64(i64::try_from(int(value)?).ok()?),
            NativeType::U64 => NativeValue::U64(u64::try_from(int(value)?).ok()?),
            NativeType::F32 => NativeValue::F32(value.as_f64()? as f32),
            NativeType::F64 => NativeValue::F64(value.as_f64()?),
            NativeType::Pointer => NativeValue::Pointer(parse_address(value).ok()?),
        };
        Some(converted)
    }

    /// Converts the value to its JSON wire form
    pub fn to_json(&self) -> Value {
        match self {
            NativeValue::Void => Value::Null,
            NativeValue::Bool(v) => Value::from(*v),
            NativeValue::I8(v) => Value::from(*v),
            NativeValue::U8(v) => Value::from(*v),
            NativeValue::I16(v) => Value::from(*v),
            NativeValue::U16(v) => Value::from(*v),
            NativeValue::I32(v) => Value::from(*v),
            NativeValue::U32(v) => Value::from(*v),
            NativeValue::I64(v) => Value::from(*v),
            NativeValue::U64(v) => Value::from(*v),
            NativeValue::F32(v) => Value::from(*v as f64),
            NativeValue::F64(v) => Value::from(*v),
            NativeValue::Pointer(addr) => Value::from(addr.to_hex()),
        }
    }

    /// Returns the value as an address if it is pointer-like
    pub fn as_address(&self) -> Option<Address> {
        match self {
            NativeValue::Pointer(addr) => Some(*addr),
            NativeValue::U64(v) => Some(Address::new(*v as usize)),
            NativeValue::I64(v) => usize::try_from(*v).ok().map(Address::new),
            _ => None,
        }
    }

    /// Returns the value widened to u64 for integer classes
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            NativeValue::Bool(v) => Some(*v as u64),
            NativeValue::I8(v) => u64::try_from(*v).ok(),
            NativeValue::U8(v) => Some(*v as u64),
            NativeValue::I16(v) => u64::try_from(*v).ok(),
            NativeValue::U16(v) => Some(*v as u64),
            NativeValue::I32(v) => u64::try_from(*v).ok(),
            NativeValue::U32(v) => Some(*v as u64),
            NativeValue::I64(v) => u64::try_from(*v).ok(),
            NativeValue::U64(v) => Some(*v),
            NativeValue::Pointer(addr) => Some(addr.as_usize() as u64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_sizes() {
        assert_eq!(NativeType::Void.size(8), None);
        assert_eq!(NativeType::Bool.size(8), Some(4));
        assert_eq!(NativeType::U16.size(8), Some(2));
        assert_eq!(NativeType::F64.size(4), Some(8));
        assert_eq!(NativeType::Pointer.size(4), Some(4));
        assert_eq!(NativeType::Pointer.size(8), Some(8));
    }

    #[test]
    fn test_bytes_for_each_width() {
        let value = NativeValue::U32(42);
        let bytes = value.to_bytes(8);
        assert_eq!(bytes.len(), 4);
        assert_eq!(NativeValue::from_bytes(&bytes, NativeType::U32, 8), Some(value));

        let ptr = NativeValue::Pointer(Address::new(0x1234));
        assert_eq!(ptr.to_bytes(4).len(), 4);
        assert_eq!(
            NativeValue::from_bytes(&ptr.to_bytes(8), NativeType::Pointer, 8),
            Some(ptr)
        );

        assert_eq!(NativeValue::from_bytes(&[1, 2], NativeType::U32, 8), None);
    }

    #[test]
    fn test_bool_is_int_sized() {
        let bytes = NativeValue::Bool(true).to_bytes(8);
        assert_eq!(bytes, 1i32.to_ne_bytes().to_vec());
        assert_eq!(
            NativeValue::from_bytes(&7i32.to_ne_bytes(), NativeType::Bool, 8),
            Some(NativeValue::Bool(true))
        );
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            NativeValue::from_json(&json!(5), NativeType::I32),
            Some(NativeValue::I32(5))
        );
        assert_eq!(
            NativeValue::from_json(&json!("17"), NativeType::U64),
            Some(NativeValue::U64(17))
        );
        assert_eq!(
            NativeValue::from_json(&json!(true), NativeType::Bool),
            Some(NativeValue::Bool(true))
        );
        assert_eq!(
            NativeValue::from_json(&json!("0x10"), NativeType::Pointer),
            Some(NativeValue::Pointer(Address::new(0x10)))
        );
        assert_eq!(NativeValue::from_json(&json!(300), NativeType::U8), None);
        assert_eq!(NativeValue::from_json(&json!(-1), NativeType::U32), None);
        assert_eq!(NativeValue::from_json(&json!("abc"), NativeType::F64), None);
    }

    #[test]
    fn test_to_json() {
        assert_eq!(NativeValue::Void.to_json(), Value::Null);
        assert_eq!(NativeValue::U32(42).to_json(), json!(42));
        assert_eq!(NativeValue::Bool(false).to_json(), json!(false));
        assert_eq!(
            NativeValue::Pointer(Address::new(0xff)).to_json(),
            json!("0xff")
        );
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(NativeValue::zero(NativeType::Void), NativeValue::Void);
        assert_eq!(
            NativeValue::zero(NativeType::Pointer),
            NativeValue::Pointer(Address::null())
        );
        assert_eq!(NativeValue::zero(NativeType::I32).native_type(), NativeType::I32);
    }
}
