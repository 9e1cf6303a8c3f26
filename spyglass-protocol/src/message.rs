//! Message and value envelope types for SOP.
//!
//! SOP has exactly three message kinds. There is no correlation id: replies
//! are matched to calls by strict ordering (see the channel contract in
//! `spyglass-core`). An unrecognized discriminant fails msgpack decoding and
//! is therefore a fatal protocol violation.

use rmpv::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    /// Invoke a named endpoint on the receiving side.
    Call {
        procedure: String,
        args: Vec<WireValue>,
        #[serde(default)]
        kwargs: HashMap<String, WireValue>,
    },
    /// Successful reply to the oldest outstanding call.
    Return { value: WireValue },
    /// Failed reply: a human-readable message plus a diagnostic detail
    /// string (typically the remote fault rendered for debugging).
    Error { message: String, detail: String },
}

impl Message {
    pub fn call(
        procedure: impl Into<String>,
        args: Vec<WireValue>,
        kwargs: HashMap<String, WireValue>,
    ) -> Self {
        Message::Call {
            procedure: procedure.into(),
            args,
            kwargs,
        }
    }

    pub fn ret(value: WireValue) -> Self {
        Message::Return { value }
    }

    pub fn error(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Message::Error {
            message: message.into(),
            detail: detail.into(),
        }
    }

    /// Returns the message kind as a short static label (for logging).
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Call { .. } => "call",
            Message::Return { .. } => "return",
            Message::Error { .. } => "error",
        }
    }
}

/// The tagged wire representation of a value.
///
/// Exactly one variant per value; receivers dispatch purely on the tag and
/// never guess. `Simple` carries anything the codec represents natively
/// (numbers, strings, raw bytes, booleans, nil, and nesting thereof).
/// `Reference` is an opaque handle to an object living in the *other*
/// process. `Capture` is a replayable description of a callable transferred
/// by value. `ModuleRef` asks the receiver to resolve a named symbol
/// instead of transferring data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireValue {
    Simple(Value),
    Reference(u64),
    Capture(CaptureBlob),
    ModuleRef {
        module: String,
        member: Option<String>,
    },
}

impl WireValue {
    pub fn nil() -> Self {
        WireValue::Simple(Value::Nil)
    }

    pub fn from_u64(v: u64) -> Self {
        WireValue::Simple(Value::from(v))
    }

    pub fn from_i64(v: i64) -> Self {
        WireValue::Simple(Value::from(v))
    }

    pub fn from_bool(v: bool) -> Self {
        WireValue::Simple(Value::Boolean(v))
    }

    pub fn from_str(v: impl Into<String>) -> Self {
        WireValue::Simple(Value::String(v.into().into()))
    }

    pub fn from_bytes(v: Vec<u8>) -> Self {
        WireValue::Simple(Value::Binary(v))
    }

    /// Extracts a u64 from a `Simple` integer, if that is what this is.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            WireValue::Simple(v) => v.as_u64(),
            _ => None,
        }
    }

    /// Extracts a string slice from a `Simple` string, if that is what this is.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Simple(v) => v.as_str(),
            _ => None,
        }
    }

    /// Returns a short static label for the variant (for diagnostics).
    pub fn tag(&self) -> &'static str {
        match self {
            WireValue::Simple(_) => "simple",
            WireValue::Reference(_) => "reference",
            WireValue::Capture(_) => "capture",
            WireValue::ModuleRef { .. } => "module_ref",
        }
    }
}

/// Kind of captured definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    /// A named procedure pre-registered on both sides.
    Procedure,
}

/// One captured free variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeVar {
    pub name: String,
    pub slot: FreeVarSlot,
}

/// The contents of a free-variable slot.
///
/// `SelfRef` is the back-reference placeholder for a slot that refers to the
/// value currently being captured; the receiving side patches it once the
/// enclosing capture finishes materializing. Cycles that do not fit this
/// scheme are rejected during serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeVarSlot {
    Inline(WireValue),
    SelfRef,
}

/// An opaque, replayable description of a callable transferred by value.
///
/// The core treats this as an atomic blob; the capture collaborator in
/// `spyglass-core` decodes and materializes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureBlob {
    pub kind: CaptureKind,
    pub module: String,
    pub name: String,
    #[serde(default)]
    pub free_vars: Vec<FreeVar>,
}
