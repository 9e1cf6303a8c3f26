//! Transferable procedures.
//!
//! A procedure never ships its code. Both sides register the implementation
//! under a `(module, name)` key; what crosses the wire is a capture blob
//! naming the key plus the sender's free-variable bindings. The receiver
//! materializes it by pairing the blob with its own registered body.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use spyglass_protocol::CaptureBlob;

use crate::envelope::Envelope;
use crate::error::ObjectError;
use crate::object::{ObjFuture, RemoteObject};
use crate::value::{Kwargs, ObjValue};

/// The body of a registered procedure.
pub type ProcFn =
    Arc<dyn Fn(ProcScope, Vec<ObjValue>, Kwargs) -> ObjFuture<'static, ObjValue> + Send + Sync>;

/// Wraps an async closure as a [`ProcFn`].
pub fn proc_fn<F, Fut>(f: F) -> ProcFn
where
    F: Fn(ProcScope, Vec<ObjValue>, Kwargs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ObjValue, ObjectError>> + Send + 'static,
{
    Arc::new(move |scope, args, kwargs| Box::pin(f(scope, args, kwargs)))
}

/// A free-variable binding on the sending side.
#[derive(Clone)]
pub enum FreeBinding {
    /// Bound to a value, serialized with the capture.
    Value(ObjValue),
    /// Bound to the procedure itself, enabling self-recursion without a
    /// reference cycle in the blob.
    Myself,
}

/// A procedure that can be captured and sent, carrying its bindings.
pub struct NativeProcedure {
    module: String,
    name: String,
    free_vars: Vec<(String, FreeBinding)>,
    func: ProcFn,
}

impl NativeProcedure {
    pub fn new(module: impl Into<String>, name: impl Into<String>, func: ProcFn) -> Self {
        NativeProcedure {
            module: module.into(),
            name: name.into(),
            free_vars: Vec::new(),
            func,
        }
    }

    /// Binds a free variable to a value.
    pub fn with_free_var(mut self, name: impl Into<String>, value: ObjValue) -> Self {
        self.free_vars.push((name.into(), FreeBinding::Value(value)));
        self
    }

    /// Binds a free variable to the procedure itself.
    pub fn with_self_free_var(mut self, name: impl Into<String>) -> Self {
        self.free_vars.push((name.into(), FreeBinding::Myself));
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn free_vars(&self) -> &[(String, FreeBinding)] {
        &self.free_vars
    }

    pub fn func(&self) -> ProcFn {
        self.func.clone()
    }
}

/// Procedure bodies known to this side, keyed by `(module, name)`.
#[derive(Default)]
pub struct ProcedureRegistry {
    procs: RwLock<HashMap<(String, String), ProcFn>>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        ProcedureRegistry::default()
    }

    pub fn register(&self, module: impl Into<String>, name: impl Into<String>, func: ProcFn) {
        self.procs
            .write()
            .insert((module.into(), name.into()), func);
    }

    /// Registers the body of a procedure value under its own key.
    pub fn register_proc(&self, proc: &NativeProcedure) {
        self.register(proc.module(), proc.name(), proc.func());
    }

    pub fn get(&self, module: &str, name: &str) -> Option<ProcFn> {
        self.procs
            .read()
            .get(&(module.to_string(), name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.procs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.read().is_empty()
    }
}

/// A received free-variable binding.
pub(crate) enum FreeSlot {
    Val(ObjValue),
    Me,
}

/// A capture paired with a local body, callable as an object.
pub struct MaterializedProcedure {
    module: String,
    name: String,
    func: ProcFn,
    free: Vec<(String, FreeSlot)>,
    me: Weak<MaterializedProcedure>,
    env: Weak<Envelope>,
}

/// Pairs a capture blob with the locally registered body.
pub(crate) fn materialize(
    env: &Arc<Envelope>,
    blob: &CaptureBlob,
) -> Result<Arc<MaterializedProcedure>, ObjectError> {
    let func =
        env.registry()
            .get(&blob.module, &blob.name)
            .ok_or_else(|| ObjectError::UnknownProcedure {
                module: blob.module.clone(),
                name: blob.name.clone(),
            })?;

    let mut free = Vec::with_capacity(blob.free_vars.len());
    for var in &blob.free_vars {
        let slot = match &var.slot {
            spyglass_protocol::FreeVarSlot::Inline(wire) => FreeSlot::Val(env.deserialize(wire)?),
            spyglass_protocol::FreeVarSlot::SelfRef => FreeSlot::Me,
        };
        free.push((var.name.clone(), slot));
    }

    debug!(module = %blob.module, name = %blob.name, free_vars = free.len(), "materialized procedure");
    let env_weak = env.weak_self();
    Ok(Arc::new_cyclic(|me| MaterializedProcedure {
        module: blob.module.clone(),
        name: blob.name.clone(),
        func,
        free,
        me: me.clone(),
        env: env_weak,
    }))
}

impl RemoteObject for MaterializedProcedure {
    fn type_name(&self) -> &'static str {
        "procedure"
    }

    fn call<'a>(&'a self, args: Vec<ObjValue>, kwargs: Kwargs) -> ObjFuture<'a, ObjValue> {
        tracing::trace!(module = %self.module, name = %self.name, "invoking procedure");
        let scope = ProcScope {
            module: self.module.clone(),
            free: self
                .free
                .iter()
                .map(|(name, slot)| {
                    let slot = match slot {
                        FreeSlot::Val(v) => FreeSlot::Val(v.clone()),
                        FreeSlot::Me => FreeSlot::Me,
                    };
                    (name.clone(), slot)
                })
                .collect(),
            me: self.me.clone(),
            env: self.env.clone(),
        };
        (self.func)(scope, args, kwargs)
    }
}

/// The name environment a procedure body runs in.
///
/// Lookup order: the capture's free variables, then globals fetched through
/// the envelope (locally if resolvable, otherwise from the peer, cached
/// after the first fetch).
pub struct ProcScope {
    module: String,
    free: Vec<(String, FreeSlot)>,
    me: Weak<MaterializedProcedure>,
    env: Weak<Envelope>,
}

impl ProcScope {
    /// Resolves a name visible to the procedure body.
    pub async fn get(&self, name: &str) -> Result<ObjValue, ObjectError> {
        for (var, slot) in &self.free {
            if var == name {
                return match slot {
                    FreeSlot::Val(v) => Ok(v.clone()),
                    FreeSlot::Me => {
                        let me = self.me.upgrade().ok_or_else(|| {
                            ObjectError::Internal("procedure dropped during call".to_string())
                        })?;
                        Ok(ObjValue::Object(me as Arc<dyn RemoteObject>))
                    }
                };
            }
        }

        let env = self
            .env
            .upgrade()
            .ok_or_else(|| ObjectError::Internal("envelope gone".to_string()))?;
        env.global(&self.module, name)
            .await
            .map_err(|err| match err {
                crate::error::RpcError::Object(obj) => obj,
                crate::error::RpcError::Channel(chan) => ObjectError::Internal(chan.to_string()),
            })
    }

    pub fn module(&self) -> &str {
        &self.module
    }
}
