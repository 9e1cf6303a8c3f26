//! In-memory value model.
//!
//! [`ObjValue`] is what application code hands to and receives from the
//! envelope. Plain data rides in a msgpack value tree; everything else is one
//! of the boundary-crossing shapes: a named symbol, a transferable procedure,
//! a live object exported by reference, or a proxy to an object the peer owns.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::capture::NativeProcedure;
use crate::object::RemoteObject;
use crate::proxy::ObjectProxy;

/// Keyword arguments, as passed to handlers and object calls.
pub type Kwargs = HashMap<String, ObjValue>;

/// A value crossing the object boundary.
#[derive(Clone)]
pub enum ObjValue {
    /// Self-contained data: scalars, strings, binary, arrays, maps.
    Data(rmpv::Value),
    /// A symbol resolved by name on the receiving side.
    Named {
        module: String,
        member: Option<String>,
    },
    /// A transferable procedure, serialized by capture.
    Callable(Arc<NativeProcedure>),
    /// A live object exported by reference.
    Object(Arc<dyn RemoteObject>),
    /// A stub for an object the peer owns.
    Proxy(ObjectProxy),
}

impl ObjValue {
    pub fn nil() -> Self {
        ObjValue::Data(rmpv::Value::Nil)
    }

    pub fn from_i64(v: i64) -> Self {
        ObjValue::Data(rmpv::Value::from(v))
    }

    pub fn from_u64(v: u64) -> Self {
        ObjValue::Data(rmpv::Value::from(v))
    }

    pub fn from_bool(v: bool) -> Self {
        ObjValue::Data(rmpv::Value::Boolean(v))
    }

    pub fn from_str(v: impl Into<String>) -> Self {
        ObjValue::Data(rmpv::Value::String(v.into().into()))
    }

    pub fn from_bytes(v: impl Into<Vec<u8>>) -> Self {
        ObjValue::Data(rmpv::Value::Binary(v.into()))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ObjValue::Data(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ObjValue::Data(v) => v.as_u64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ObjValue::Data(v) => v.as_bool(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ObjValue::Data(v) => v.as_str(),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&rmpv::Value> {
        match self {
            ObjValue::Data(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, ObjValue::Data(rmpv::Value::Nil))
    }

    /// Short human-readable label for diagnostics and fault messages.
    pub fn type_label(&self) -> &'static str {
        match self {
            ObjValue::Data(_) => "data",
            ObjValue::Named { .. } => "named",
            ObjValue::Callable(_) => "callable",
            ObjValue::Object(_) => "object",
            ObjValue::Proxy(_) => "proxy",
        }
    }
}

impl fmt::Debug for ObjValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjValue::Data(v) => write!(f, "Data({v})"),
            ObjValue::Named { module, member } => match member {
                Some(m) => write!(f, "Named({module}.{m})"),
                None => write!(f, "Named({module})"),
            },
            ObjValue::Callable(p) => write!(f, "Callable({}.{})", p.module(), p.name()),
            ObjValue::Object(o) => write!(f, "Object({})", o.type_name()),
            ObjValue::Proxy(p) => write!(f, "Proxy(#{})", p.object_id()),
        }
    }
}

impl From<rmpv::Value> for ObjValue {
    fn from(v: rmpv::Value) -> Self {
        ObjValue::Data(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_accessors() {
        assert_eq!(ObjValue::from_i64(-7).as_i64(), Some(-7));
        assert_eq!(ObjValue::from_u64(7).as_u64(), Some(7));
        assert_eq!(ObjValue::from_bool(true).as_bool(), Some(true));
        assert_eq!(ObjValue::from_str("hi").as_str(), Some("hi"));
        assert!(ObjValue::nil().is_nil());
        assert_eq!(ObjValue::from_str("hi").as_i64(), None);
    }

    #[test]
    fn test_type_labels() {
        assert_eq!(ObjValue::nil().type_label(), "data");
        let named = ObjValue::Named {
            module: "math".to_string(),
            member: Some("pi".to_string()),
        };
        assert_eq!(named.type_label(), "named");
        assert_eq!(format!("{named:?}"), "Named(math.pi)");
    }
}
