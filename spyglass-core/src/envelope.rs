//! The serialization envelope: converts between in-memory values and wire
//! values for one channel.
//!
//! Each envelope is pinned to a channel and owns that channel's object store
//! and global cache. Serialization never copies object state; anything that
//! is not plain data crosses as a name, a capture, or a store reference.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use spyglass_protocol::{CaptureBlob, CaptureKind, FreeVar, FreeVarSlot, WireValue};

use crate::capture::{self, FreeBinding, ProcedureRegistry};
use crate::channel::Channel;
use crate::endpoints;
use crate::error::{ChannelError, ObjectError, RpcError};
use crate::namespace::Namespace;
use crate::proxy::ObjectProxy;
use crate::store::ObjectStore;
use crate::value::ObjValue;

/// Per-channel serialization context.
pub struct Envelope {
    me: Weak<Envelope>,
    channel: Weak<Channel>,
    store: Arc<ObjectStore>,
    registry: Arc<ProcedureRegistry>,
    namespace: Arc<dyn Namespace>,
    // Globals fetched from the peer, keyed by (module, name).
    globals: Mutex<HashMap<(String, String), ObjValue>>,
}

impl Envelope {
    /// Builds an envelope for `channel` and binds the object endpoints on
    /// it. Must run before the channel is attached.
    pub fn new(
        channel: &Arc<Channel>,
        registry: Arc<ProcedureRegistry>,
        namespace: Arc<dyn Namespace>,
    ) -> Result<Arc<Envelope>, ChannelError> {
        let env = Arc::new_cyclic(|me| Envelope {
            me: me.clone(),
            channel: Arc::downgrade(channel),
            store: Arc::new(ObjectStore::new()),
            registry,
            namespace,
            globals: Mutex::new(HashMap::new()),
        });
        endpoints::install(channel, &env)?;
        Ok(env)
    }

    pub(crate) fn weak_self(&self) -> Weak<Envelope> {
        self.me.clone()
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProcedureRegistry> {
        &self.registry
    }

    pub(crate) fn namespace(&self) -> &Arc<dyn Namespace> {
        &self.namespace
    }

    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.upgrade()
    }

    /// Converts a value to its wire form.
    pub fn serialize(&self, value: &ObjValue) -> Result<WireValue, ObjectError> {
        let mut in_progress = Vec::new();
        self.serialize_inner(value, &mut in_progress)
    }

    fn serialize_inner(
        &self,
        value: &ObjValue,
        in_progress: &mut Vec<usize>,
    ) -> Result<WireValue, ObjectError> {
        match value {
            ObjValue::Data(v) => Ok(WireValue::Simple(v.clone())),
            ObjValue::Named { module, member } => Ok(WireValue::ModuleRef {
                module: module.clone(),
                member: member.clone(),
            }),
            ObjValue::Callable(proc) => {
                let identity = Arc::as_ptr(proc) as usize;
                if in_progress.contains(&identity) {
                    return Err(ObjectError::CyclicValue);
                }
                in_progress.push(identity);
                let mut free_vars = Vec::with_capacity(proc.free_vars().len());
                for (name, binding) in proc.free_vars() {
                    let slot = match binding {
                        FreeBinding::Value(v) => {
                            FreeVarSlot::Inline(self.serialize_inner(v, in_progress)?)
                        }
                        FreeBinding::Myself => FreeVarSlot::SelfRef,
                    };
                    free_vars.push(FreeVar {
                        name: name.clone(),
                        slot,
                    });
                }
                in_progress.pop();
                Ok(WireValue::Capture(CaptureBlob {
                    kind: CaptureKind::Procedure,
                    module: proc.module().to_string(),
                    name: proc.name().to_string(),
                    free_vars,
                }))
            }
            ObjValue::Object(obj) => Ok(WireValue::Reference(self.store.add(obj.clone()))),
            // References are ids in the owner's store; forwarding one would
            // make the receiver resolve it in the wrong store.
            ObjValue::Proxy(_) => Err(ObjectError::ProxyForwarding),
        }
    }

    /// Converts a wire value back to its in-memory form.
    pub fn deserialize(&self, wire: &WireValue) -> Result<ObjValue, ObjectError> {
        match wire {
            WireValue::Simple(v) => Ok(ObjValue::Data(v.clone())),
            WireValue::Reference(id) => Ok(ObjValue::Proxy(ObjectProxy::new(self.me.clone(), *id))),
            WireValue::ModuleRef { module, member } => {
                self.namespace.resolve(module, member.as_deref())
            }
            WireValue::Capture(blob) => {
                let env = self
                    .me
                    .upgrade()
                    .ok_or_else(|| ObjectError::Internal("envelope gone".to_string()))?;
                let materialized = capture::materialize(&env, blob)?;
                Ok(ObjValue::Object(materialized))
            }
        }
    }

    /// Invokes a remote endpoint over this envelope's channel.
    pub async fn remote_call(
        &self,
        procedure: &str,
        args: Vec<WireValue>,
    ) -> Result<WireValue, RpcError> {
        self.remote_call_kw(procedure, args, HashMap::new()).await
    }

    pub async fn remote_call_kw(
        &self,
        procedure: &str,
        args: Vec<WireValue>,
        kwargs: HashMap<String, WireValue>,
    ) -> Result<WireValue, RpcError> {
        let channel = self.channel.upgrade().ok_or(ChannelError::NotAttached)?;
        channel
            .invoke(procedure, args, kwargs)
            .await
            .map_err(Into::into)
    }

    /// Resolves a global, preferring the local namespace, then the peer.
    /// Remote results are cached, so each name crosses the wire once.
    pub async fn global(&self, module: &str, name: &str) -> Result<ObjValue, RpcError> {
        let key = (module.to_string(), name.to_string());
        if let Some(value) = self.globals.lock().get(&key) {
            return Ok(value.clone());
        }

        if let Ok(value) = self.namespace.resolve(module, Some(name)) {
            return Ok(value);
        }

        debug!(module, name, "fetching global from peer");
        let reply = self
            .remote_call(
                "get_global",
                vec![WireValue::from_str(module), WireValue::from_str(name)],
            )
            .await?;
        let value = self.deserialize(&reply)?;
        self.globals.lock().insert(key, value.clone());
        Ok(value)
    }
}
