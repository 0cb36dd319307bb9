//! Signature-driven invocation
//!
//! - [`spec`]: wire `CallSpec` decoding into tagged variants
//! - [`invoker`]: symbol resolution, argument marshaling, result building
//! - [`callback`]: trampolines for callback arguments

pub mod callback;
pub mod invoker;
pub mod spec;

pub use callback::{CallbackBridge, CallbackRegistration};
pub use invoker::{InvocationResult, NativeInvoker, ResolvedSymbol};
pub use spec::{CallSpec, Direction, PrimitiveKind, SpecError, Transfer, TypeDescriptor, TypeKind};

use crate::core::types::MemoryError;
use thiserror::Error;

/// Invocation failures; all of these are surfaced to the controller
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("unresolved symbol: {0}")]
    UnresolvedSymbol(String),

    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    #[error("invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("unknown callback id {0}")]
    UnknownCallback(u64),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("host error: {0}")]
    Host(#[from] MemoryError),
}

impl InvokeError {
    /// Stable machine-readable kind used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            InvokeError::UnresolvedSymbol(_) => "unresolved_symbol",
            InvokeError::UnsupportedType(_) => "unsupported_type",
            InvokeError::InvalidArgument { .. } => "invalid_argument",
            InvokeError::UnknownCallback(_) => "unknown_callback",
            InvokeError::Spec(SpecError::UnsupportedType(_)) => "unsupported_type",
            InvokeError::Spec(_) => "invalid_spec",
            InvokeError::Host(_) => "host",
        }
    }
}
