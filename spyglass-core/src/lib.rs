//! # spyglass-core
//!
//! The bidirectional RPC core of spyglass.
//!
//! This crate provides:
//! - A bidirectional channel multiplexing outgoing calls and incoming call
//!   dispatch over one duplex stream, with strict reply ordering
//! - An endpoint registry mapping procedure names to async handlers
//! - The serialization envelope deciding when a value is copied, resolved by
//!   name, captured, or turned into a remote reference
//! - An id-keyed object store and the proxy stub that forwards every
//!   operation on a remote reference across the wire
//! - Capture and namespace collaborators (pre-registered named procedures,
//!   explicit symbol registration)

pub mod capture;
pub mod channel;
pub mod endpoints;
pub mod envelope;
pub mod error;
pub mod namespace;
pub mod object;
pub mod proxy;
pub mod registry;
pub mod store;
pub mod value;

pub use capture::{proc_fn, FreeBinding, NativeProcedure, ProcScope, ProcedureRegistry};
pub use channel::{Channel, ChannelConfig, Duplex};
pub use envelope::Envelope;
pub use error::{ChannelError, ObjectError, RpcError};
pub use namespace::{Namespace, StaticNamespace};
pub use object::{FnObject, IterStep, ListObject, ObjFuture, RemoteObject};
pub use proxy::ObjectProxy;
pub use registry::{handler, Endpoints, Fault, Handler};
pub use store::ObjectStore;
pub use value::{Kwargs, ObjValue};
