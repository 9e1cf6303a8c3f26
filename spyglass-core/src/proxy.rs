//! Client-side stub for an object the peer owns.

use std::sync::{Arc, Weak};

use spyglass_protocol::WireValue;

use crate::endpoints;
use crate::envelope::Envelope;
use crate::error::{ObjectError, RpcError};
use crate::value::{Kwargs, ObjValue};

/// A handle to a remote object, identified by the id its owner assigned.
///
/// Every operation is one round trip over the owning channel. Dropping a
/// proxy releases nothing; the remote entry lives until [`ObjectProxy::release`]
/// is called, so clones of a proxy stay valid until then.
#[derive(Clone)]
pub struct ObjectProxy {
    env: Weak<Envelope>,
    object_id: u64,
}

impl ObjectProxy {
    pub(crate) fn new(env: Weak<Envelope>, object_id: u64) -> Self {
        ObjectProxy { env, object_id }
    }

    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    fn env(&self) -> Result<Arc<Envelope>, RpcError> {
        self.env
            .upgrade()
            .ok_or_else(|| ObjectError::Internal("connection context dropped".to_string()).into())
    }

    fn id_wire(&self) -> WireValue {
        WireValue::from_u64(self.object_id)
    }

    /// Reads a named attribute of the remote object.
    pub async fn attr(&self, name: &str) -> Result<ObjValue, RpcError> {
        let env = self.env()?;
        let reply = env
            .remote_call("obj_attr", vec![self.id_wire(), WireValue::from_str(name)])
            .await?;
        env.deserialize(&reply).map_err(Into::into)
    }

    /// Invokes the remote object.
    pub async fn call(&self, args: Vec<ObjValue>, kwargs: Kwargs) -> Result<ObjValue, RpcError> {
        let env = self.env()?;
        let mut wire_args = Vec::with_capacity(args.len() + 1);
        wire_args.push(self.id_wire());
        for arg in &args {
            wire_args.push(env.serialize(arg)?);
        }
        let mut wire_kwargs = std::collections::HashMap::with_capacity(kwargs.len());
        for (key, value) in &kwargs {
            wire_kwargs.insert(key.clone(), env.serialize(value)?);
        }
        let reply = env
            .remote_call_kw("obj_call", wire_args, wire_kwargs)
            .await?;
        env.deserialize(&reply).map_err(Into::into)
    }

    /// Starts iteration, returning a proxy for the remote iterator.
    pub async fn iter(&self) -> Result<ObjectProxy, RpcError> {
        let env = self.env()?;
        let reply = env.remote_call("obj_iter", vec![self.id_wire()]).await?;
        match env.deserialize(&reply)? {
            ObjValue::Proxy(proxy) => Ok(proxy),
            other => Err(ObjectError::Internal(format!(
                "iterator reply was {}, not a reference",
                other.type_label()
            ))
            .into()),
        }
    }

    /// Advances a remote iterator. `None` means exhausted.
    pub async fn next(&self) -> Result<Option<ObjValue>, RpcError> {
        let env = self.env()?;
        let reply = env.remote_call("obj_next", vec![self.id_wire()]).await?;
        endpoints::decode_step(&env, &reply).map_err(Into::into)
    }

    /// Reads an indexed item.
    pub async fn get_item(&self, key: &ObjValue) -> Result<ObjValue, RpcError> {
        let env = self.env()?;
        let key_wire = env.serialize(key)?;
        let reply = env
            .remote_call("obj_get", vec![self.id_wire(), key_wire])
            .await?;
        env.deserialize(&reply).map_err(Into::into)
    }

    /// Writes an indexed item.
    pub async fn set_item(&self, key: &ObjValue, value: &ObjValue) -> Result<(), RpcError> {
        let env = self.env()?;
        let key_wire = env.serialize(key)?;
        let value_wire = env.serialize(value)?;
        env.remote_call("obj_set", vec![self.id_wire(), key_wire, value_wire])
            .await?;
        Ok(())
    }

    /// Augments the remote object in place, as `obj += operand` would. The
    /// reply is the updated object, normally a proxy to the same id.
    pub async fn update(&self, operand: &ObjValue) -> Result<ObjValue, RpcError> {
        let env = self.env()?;
        let operand_wire = env.serialize(operand)?;
        let reply = env
            .remote_call("obj_iadd", vec![self.id_wire(), operand_wire])
            .await?;
        env.deserialize(&reply).map_err(Into::into)
    }

    /// Asks the owner to drop its store entry. After this, every clone of
    /// the proxy is dead. Releasing twice is harmless.
    pub async fn release(&self) -> Result<(), RpcError> {
        let env = self.env()?;
        env.remote_call("obj_release", vec![self.id_wire()]).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectProxy")
            .field("object_id", &self.object_id)
            .finish()
    }
}
