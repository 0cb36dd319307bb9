//! Declarative call signatures
//!
//! A `CallSpec` arrives as JSON produced from GObject-Introspection data:
//!
//! ```json
//! { "returns": "int32", "is_method": true,
//!   "arguments": [{ "name": "this", "type": "pointer", "direction": 0,
//!                   "is_destroy": false, "is_closure": false,
//!                   "skipped": false, "subtype": null }] }
//! ```
//!
//! It is decoded once into tagged variants; unknown kinds, directions and
//! out-of-range closure/destroy indices are rejected here, never at call
//! time.

use crate::core::types::NativeType;
use crate::host::NativeSignature;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Decoding errors
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    #[error("invalid direction {value} for argument {name}")]
    InvalidDirection { name: String, value: u64 },

    #[error("callback argument {0} has no subtype")]
    MissingSubtype(String),

    #[error("argument {name} refers to index {index}, but there are {count} arguments")]
    InvalidIndex { name: String, index: i64, count: usize },

    #[error("malformed call spec: {0}")]
    Malformed(#[from] serde_json::Error),
}

bitflags! {
    /// Argument direction as a bit set; always tested bitwise
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Direction: u8 {
        const IN = 0b01;
        const OUT = 0b10;
    }
}

impl Direction {
    /// Decode the producer's `GIDirection` value (0 in, 1 out, 2 inout)
    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            0 => Some(Direction::IN),
            1 => Some(Direction::OUT),
            2 => Some(Direction::IN | Direction::OUT),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u64 {
        match (self.contains(Direction::IN), self.contains(Direction::OUT)) {
            (true, true) => 2,
            (false, true) => 1,
            _ => 0,
        }
    }
}

/// Ownership transfer of a pointer-valued argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transfer {
    #[default]
    None,
    Container,
    Full,
}

/// Value classes a signature can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Void,
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Pointer,
    /// Boxed struct with a registered GType, passed by pointer
    GType,
    /// Plain struct, passed by pointer
    Struct,
}

impl PrimitiveKind {
    /// ABI class used when passing or reading the value
    pub fn native_type(&self) -> NativeType {
        match self {
            PrimitiveKind::Void => NativeType::Void,
            PrimitiveKind::Bool => NativeType::Bool,
            PrimitiveKind::Int8 => NativeType::I8,
            PrimitiveKind::UInt8 => NativeType::U8,
            PrimitiveKind::Int16 => NativeType::I16,
            PrimitiveKind::UInt16 => NativeType::U16,
            PrimitiveKind::Int32 => NativeType::I32,
            PrimitiveKind::UInt32 => NativeType::U32,
            PrimitiveKind::Int64 => NativeType::I64,
            PrimitiveKind::UInt64 => NativeType::U64,
            PrimitiveKind::Float => NativeType::F32,
            PrimitiveKind::Double => NativeType::F64,
            PrimitiveKind::Pointer | PrimitiveKind::GType | PrimitiveKind::Struct => {
                NativeType::Pointer
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveKind::Void => "void",
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Int8 => "int8",
            PrimitiveKind::UInt8 => "uint8",
            PrimitiveKind::Int16 => "int16",
            PrimitiveKind::UInt16 => "uint16",
            PrimitiveKind::Int32 => "int32",
            PrimitiveKind::UInt32 => "uint32",
            PrimitiveKind::Int64 => "int64",
            PrimitiveKind::UInt64 => "uint64",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
            PrimitiveKind::Pointer => "pointer",
            PrimitiveKind::GType => "gtype",
            PrimitiveKind::Struct => "struct",
        }
    }
}

impl FromStr for PrimitiveKind {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "void" => PrimitiveKind::Void,
            "bool" => PrimitiveKind::Bool,
            "int8" => PrimitiveKind::Int8,
            "uint8" => PrimitiveKind::UInt8,
            "int16" => PrimitiveKind::Int16,
            "uint16" => PrimitiveKind::UInt16,
            "int32" => PrimitiveKind::Int32,
            "uint32" => PrimitiveKind::UInt32,
            "int64" => PrimitiveKind::Int64,
            "uint64" => PrimitiveKind::UInt64,
            "float" => PrimitiveKind::Float,
            "double" => PrimitiveKind::Double,
            "pointer" => PrimitiveKind::Pointer,
            "gtype" => PrimitiveKind::GType,
            "struct" => PrimitiveKind::Struct,
            other => return Err(SpecError::UnsupportedType(other.to_string())),
        })
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an argument or return value is
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Primitive(PrimitiveKind),
    /// NUL-terminated UTF-8 string
    String,
    /// Function pointer with its own signature
    Callback(Box<CallSpec>),
}

impl TypeKind {
    /// ABI class of the value actually passed
    pub fn native_type(&self) -> NativeType {
        match self {
            TypeKind::Primitive(p) => p.native_type(),
            TypeKind::String | TypeKind::Callback(_) => NativeType::Pointer,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeKind::Primitive(PrimitiveKind::Void))
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Primitive(p) => write!(f, "{p}"),
            TypeKind::String => f.write_str("string"),
            TypeKind::Callback(_) => f.write_str("callback"),
        }
    }
}

/// One argument of a signature
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: TypeKind,
    pub direction: Direction,
    pub transfer: Transfer,
    pub is_destroy: bool,
    pub is_closure: bool,
    pub skipped: bool,
    /// Byte size of a `struct` argument, when known
    pub struct_size: Option<usize>,
    /// Index of the user-data argument of a callback
    pub closure: Option<usize>,
    /// Index of the destroy-notify argument of a callback
    pub destroy: Option<usize>,
}

impl TypeDescriptor {
    /// Plain input argument
    pub fn input(name: impl Into<String>, kind: TypeKind) -> Self {
        TypeDescriptor {
            name: name.into(),
            kind,
            direction: Direction::IN,
            transfer: Transfer::None,
            is_destroy: false,
            is_closure: false,
            skipped: false,
            struct_size: None,
            closure: None,
            destroy: None,
        }
    }

    /// Output argument, skipped from the positional list
    pub fn output(name: impl Into<String>, kind: TypeKind) -> Self {
        TypeDescriptor {
            direction: Direction::OUT,
            skipped: true,
            ..Self::input(name, kind)
        }
    }

    pub fn is_out(&self) -> bool {
        self.direction.contains(Direction::OUT)
    }

    pub fn is_in(&self) -> bool {
        self.direction.contains(Direction::IN)
    }
}

/// A complete signature
#[derive(Debug, Clone, PartialEq)]
pub struct CallSpec {
    pub returns: TypeKind,
    pub arguments: Vec<TypeDescriptor>,
    /// First argument is the instance pointer
    pub is_method: bool,
}

impl CallSpec {
    pub fn new(returns: TypeKind, arguments: Vec<TypeDescriptor>) -> Self {
        CallSpec {
            returns,
            arguments,
            is_method: false,
        }
    }

    /// Decode the wire form
    pub fn from_json(value: Value) -> Result<Self, SpecError> {
        let raw: RawCallSpec = serde_json::from_value(value)?;
        CallSpec::try_from(raw)
    }

    /// ABI signature seen by the host's call and trampoline primitives
    pub fn native_signature(&self) -> NativeSignature {
        NativeSignature::new(
            self.returns.native_type(),
            self.arguments.iter().map(|a| a.kind.native_type()).collect(),
        )
    }

    pub fn argument(&self, name: &str) -> Option<&TypeDescriptor> {
        self.arguments.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Deserialize)]
struct RawCallSpec {
    returns: String,
    #[serde(default)]
    is_method: bool,
    #[serde(default)]
    arguments: Vec<RawArgument>,
}

#[derive(Debug, Deserialize)]
struct RawArgument {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    direction: u64,
    #[serde(default)]
    is_destroy: bool,
    #[serde(default)]
    is_closure: bool,
    #[serde(default)]
    skipped: bool,
    #[serde(default)]
    subtype: Option<RawCallSpec>,
    #[serde(default)]
    struct_size: Option<usize>,
    #[serde(default)]
    transfer: Transfer,
    #[serde(default)]
    closure: Option<i64>,
    #[serde(default)]
    destroy: Option<i64>,
}

fn decode_kind(kind: &str, subtype: Option<RawCallSpec>, name: &str) -> Result<TypeKind, SpecError> {
    match kind {
        "string" => Ok(TypeKind::String),
        "callback" => {
            let subtype = subtype.ok_or_else(|| SpecError::MissingSubtype(name.to_string()))?;
            Ok(TypeKind::Callback(Box::new(CallSpec::try_from(subtype)?)))
        }
        other => Ok(TypeKind::Primitive(other.parse()?)),
    }
}

/// Negative indices mean "none"
fn decode_index(index: Option<i64>, name: &str, count: usize) -> Result<Option<usize>, SpecError> {
    match index {
        None => Ok(None),
        Some(i) if i < 0 => Ok(None),
        Some(i) if (i as u64) < count as u64 => Ok(Some(i as usize)),
        Some(i) => Err(SpecError::InvalidIndex {
            name: name.to_string(),
            index: i,
            count,
        }),
    }
}

impl TryFrom<RawCallSpec> for CallSpec {
    type Error = SpecError;

    fn try_from(raw: RawCallSpec) -> Result<Self, Self::Error> {
        let returns = match raw.returns.as_str() {
            "callback" => return Err(SpecError::UnsupportedType("callback return".to_string())),
            other => decode_kind(other, None, "return")?,
        };

        let count = raw.arguments.len();
        let mut arguments = Vec::with_capacity(count);
        for arg in raw.arguments {
            let direction = Direction::from_wire(arg.direction).ok_or_else(|| {
                SpecError::InvalidDirection {
                    name: arg.name.clone(),
                    value: arg.direction,
                }
            })?;
            let closure = decode_index(arg.closure, &arg.name, count)?;
            let destroy = decode_index(arg.destroy, &arg.name, count)?;
            let kind = decode_kind(&arg.kind, arg.subtype, &arg.name)?;

            arguments.push(TypeDescriptor {
                name: arg.name,
                kind,
                direction,
                transfer: arg.transfer,
                is_destroy: arg.is_destroy,
                is_closure: arg.is_closure,
                skipped: arg.skipped,
                struct_size: arg.struct_size,
                closure,
                destroy,
            });
        }

        Ok(CallSpec {
            returns,
            arguments,
            is_method: raw.is_method,
        })
    }
}
