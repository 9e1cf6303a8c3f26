//! Built-in endpoints backing remote-object operations.
//!
//! [`install`] binds these on a channel before attach. Each one resolves an
//! object id against the envelope's store, performs the operation, and
//! serializes the result back. Faults travel as `Error` replies; only
//! transport problems disturb the channel itself.

use std::sync::Arc;

use spyglass_protocol::WireValue;

use crate::channel::Channel;
use crate::envelope::Envelope;
use crate::error::{ChannelError, ObjectError};
use crate::object::IterStep;
use crate::registry::{handler, Fault};
use crate::value::{Kwargs, ObjValue};

fn want_arg(args: &[WireValue], idx: usize) -> Result<&WireValue, Fault> {
    args.get(idx)
        .ok_or_else(|| Fault::new(format!("missing argument {idx}")))
}

fn want_id(args: &[WireValue], idx: usize) -> Result<u64, Fault> {
    want_arg(args, idx)?
        .as_u64()
        .ok_or_else(|| Fault::new(format!("argument {idx} must be an object id")))
}

fn want_str(args: &[WireValue], idx: usize) -> Result<String, Fault> {
    want_arg(args, idx)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Fault::new(format!("argument {idx} must be a string")))
}

/// Encodes one iteration step as plain data, so exhaustion is an in-band
/// signal rather than a fault.
pub(crate) fn encode_step(env: &Envelope, step: IterStep) -> Result<WireValue, ObjectError> {
    let parts = match step {
        IterStep::Done => vec![rmpv::Value::Boolean(true)],
        IterStep::Item(value) => {
            let wire = env.serialize(&value)?;
            let bytes = rmp_serde::to_vec_named(&wire)
                .map_err(|err| ObjectError::Internal(err.to_string()))?;
            vec![rmpv::Value::Boolean(false), rmpv::Value::Binary(bytes)]
        }
    };
    Ok(WireValue::Simple(rmpv::Value::Array(parts)))
}

/// Inverse of [`encode_step`]. `None` means the iterator is exhausted.
pub(crate) fn decode_step(env: &Envelope, wire: &WireValue) -> Result<Option<ObjValue>, ObjectError> {
    let malformed = || ObjectError::Internal("malformed iteration step".to_string());
    let WireValue::Simple(rmpv::Value::Array(parts)) = wire else {
        return Err(malformed());
    };
    match parts.as_slice() {
        [rmpv::Value::Boolean(true)] => Ok(None),
        [rmpv::Value::Boolean(false), rmpv::Value::Binary(bytes)] => {
            let inner: WireValue =
                rmp_serde::from_slice(bytes).map_err(|err| ObjectError::Internal(err.to_string()))?;
            Ok(Some(env.deserialize(&inner)?))
        }
        _ => Err(malformed()),
    }
}

/// Binds the object endpoints on `channel`, backed by `env`.
pub(crate) fn install(channel: &Arc<Channel>, env: &Arc<Envelope>) -> Result<(), ChannelError> {
    let e = env.clone();
    channel.bind(
        "obj_attr",
        handler(move |args, _kwargs| {
            let env = e.clone();
            async move {
                let id = want_id(&args, 0)?;
                let name = want_str(&args, 1)?;
                let obj = env.store().resolve(id)?;
                let value = obj.attr(&name)?;
                Ok(env.serialize(&value)?)
            }
        }),
    )?;

    let e = env.clone();
    channel.bind(
        "obj_call",
        handler(move |args, kwargs| {
            let env = e.clone();
            async move {
                let id = want_id(&args, 0)?;
                let obj = env.store().resolve(id)?;
                let mut call_args = Vec::with_capacity(args.len().saturating_sub(1));
                for wire in &args[1..] {
                    call_args.push(env.deserialize(wire)?);
                }
                let mut call_kwargs = Kwargs::with_capacity(kwargs.len());
                for (key, wire) in &kwargs {
                    call_kwargs.insert(key.clone(), env.deserialize(wire)?);
                }
                let result = obj.call(call_args, call_kwargs).await?;
                Ok(env.serialize(&result)?)
            }
        }),
    )?;

    let e = env.clone();
    channel.bind(
        "obj_iter",
        handler(move |args, _kwargs| {
            let env = e.clone();
            async move {
                let id = want_id(&args, 0)?;
                let iter = env.store().resolve(id)?.iter_start()?;
                Ok(env.serialize(&ObjValue::Object(iter))?)
            }
        }),
    )?;

    let e = env.clone();
    channel.bind(
        "obj_next",
        handler(move |args, _kwargs| {
            let env = e.clone();
            async move {
                let id = want_id(&args, 0)?;
                let step = env.store().resolve(id)?.iter_next()?;
                Ok(encode_step(&env, step)?)
            }
        }),
    )?;

    let e = env.clone();
    channel.bind(
        "obj_get",
        handler(move |args, _kwargs| {
            let env = e.clone();
            async move {
                let id = want_id(&args, 0)?;
                let key = env.deserialize(want_arg(&args, 1)?)?;
                let value = env.store().resolve(id)?.get_item(&key)?;
                Ok(env.serialize(&value)?)
            }
        }),
    )?;

    let e = env.clone();
    channel.bind(
        "obj_set",
        handler(move |args, _kwargs| {
            let env = e.clone();
            async move {
                let id = want_id(&args, 0)?;
                let key = env.deserialize(want_arg(&args, 1)?)?;
                let value = env.deserialize(want_arg(&args, 2)?)?;
                env.store().resolve(id)?.set_item(&key, value)?;
                Ok(WireValue::nil())
            }
        }),
    )?;

    let e = env.clone();
    channel.bind(
        "obj_iadd",
        handler(move |args, _kwargs| {
            let env = e.clone();
            async move {
                let id = want_id(&args, 0)?;
                let operand = env.deserialize(want_arg(&args, 1)?)?;
                let obj = env.store().resolve(id)?;
                obj.update(operand)?;
                // The mutated object serializes back to its existing id.
                Ok(env.serialize(&ObjValue::Object(obj))?)
            }
        }),
    )?;

    let e = env.clone();
    channel.bind(
        "obj_release",
        handler(move |args, _kwargs| {
            let env = e.clone();
            async move {
                let id = want_id(&args, 0)?;
                // Releasing an unknown id is the no-op double release.
                env.store().remove(id);
                Ok(WireValue::nil())
            }
        }),
    )?;

    let e = env.clone();
    channel.bind(
        "add_obj",
        handler(move |args, _kwargs| {
            let env = e.clone();
            async move {
                let wire = want_arg(&args, 0)?;
                if matches!(wire, WireValue::Simple(_) | WireValue::Reference(_)) {
                    return Err(Fault::new("add_obj takes a capture or module reference"));
                }
                match env.deserialize(wire)? {
                    ObjValue::Object(obj) => {
                        Ok(WireValue::Reference(env.store().add(obj)))
                    }
                    other => Err(Fault::new(format!(
                        "cannot export {} by reference",
                        other.type_label()
                    ))),
                }
            }
        }),
    )?;

    let e = env.clone();
    channel.bind(
        "get_global",
        handler(move |args, _kwargs| {
            let env = e.clone();
            async move {
                let module = want_str(&args, 0)?;
                let name = want_str(&args, 1)?;
                let value = env.namespace().resolve(&module, Some(&name))?;
                Ok(env.serialize(&value)?)
            }
        }),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{proc_fn, NativeProcedure, ProcedureRegistry};
    use crate::channel::ChannelConfig;
    use crate::error::RpcError;
    use crate::namespace::{Namespace, StaticNamespace};
    use crate::object::{FnObject, ListObject, RemoteObject};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinHandle;

    struct Side {
        channel: Arc<Channel>,
        env: Arc<Envelope>,
    }

    fn side(registry: ProcedureRegistry, namespace: impl Namespace + 'static) -> Side {
        let channel = Arc::new(Channel::new(ChannelConfig::default()));
        let env = Envelope::new(&channel, Arc::new(registry), Arc::new(namespace)).unwrap();
        Side { channel, env }
    }

    /// Attaches both sides over an in-memory stream and serves `b`.
    async fn connect(a: &Side, b: &Side) -> JoinHandle<Result<(), ChannelError>> {
        let (sa, sb) = tokio::io::duplex(64 * 1024);
        a.channel.attach(sa).await.unwrap();
        b.channel.attach(sb).await.unwrap();
        let server = b.channel.clone();
        tokio::spawn(async move { server.serve().await })
    }

    fn adder_body() -> ProcedureRegistry {
        let registry = ProcedureRegistry::new();
        registry.register(
            "app",
            "adder",
            proc_fn(|scope, args, _kwargs| async move {
                let base = scope.get("base").await?.as_i64().ok_or_else(|| {
                    ObjectError::BadArgument("base must be an integer".to_string())
                })?;
                let x = args
                    .first()
                    .and_then(ObjValue::as_i64)
                    .ok_or_else(|| ObjectError::BadArgument("expected an integer".to_string()))?;
                Ok(ObjValue::from_i64(base + x))
            }),
        );
        registry
    }

    async fn export(a: &Side, value: &ObjValue) -> crate::proxy::ObjectProxy {
        let wire = a.env.serialize(value).unwrap();
        let reply = a.env.remote_call("add_obj", vec![wire]).await.unwrap();
        let ObjValue::Proxy(proxy) = a.env.deserialize(&reply).unwrap() else {
            panic!("expected a proxy back from add_obj");
        };
        proxy
    }

    #[tokio::test]
    async fn test_captured_procedure_runs_on_peer() {
        let a = side(adder_body(), StaticNamespace::new());
        let b = side(adder_body(), StaticNamespace::new());
        let _server = connect(&a, &b).await;

        let adder = NativeProcedure::new(
            "app",
            "adder",
            a.env.registry().get("app", "adder").unwrap(),
        )
        .with_free_var("base", ObjValue::from_i64(10));

        let proxy = export(&a, &ObjValue::Callable(Arc::new(adder))).await;
        let result = proxy
            .call(vec![ObjValue::from_i64(5)], Kwargs::new())
            .await
            .unwrap();
        assert_eq!(result.as_i64(), Some(15));
        assert_eq!(b.env.store().len(), 1);
        assert_eq!(a.env.store().len(), 0);
    }

    #[tokio::test]
    async fn test_two_arg_adder() {
        let registry = ProcedureRegistry::new();
        registry.register(
            "app",
            "add2",
            proc_fn(|_scope, args, _kwargs| async move {
                let mut total = 0i64;
                for arg in &args {
                    total += arg.as_i64().ok_or_else(|| {
                        ObjectError::BadArgument("expected an integer".to_string())
                    })?;
                }
                Ok(ObjValue::from_i64(total))
            }),
        );
        let body = registry.get("app", "add2").unwrap();
        let a = side(ProcedureRegistry::new(), StaticNamespace::new());
        let b = side(registry, StaticNamespace::new());
        let _server = connect(&a, &b).await;

        let add2 = NativeProcedure::new("app", "add2", body);
        let proxy = export(&a, &ObjValue::Callable(Arc::new(add2))).await;
        let result = proxy
            .call(
                vec![ObjValue::from_i64(3), ObjValue::from_i64(4)],
                Kwargs::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.as_i64(), Some(7));
    }

    #[tokio::test]
    async fn test_self_recursive_procedure() {
        let registry = ProcedureRegistry::new();
        registry.register(
            "app",
            "fact",
            proc_fn(|scope, args, _kwargs| async move {
                let n = args
                    .first()
                    .and_then(ObjValue::as_i64)
                    .ok_or_else(|| ObjectError::BadArgument("expected an integer".to_string()))?;
                if n <= 1 {
                    return Ok(ObjValue::from_i64(1));
                }
                let recur = scope.get("recur").await?;
                let ObjValue::Object(me) = recur else {
                    return Err(ObjectError::Internal("recur is not callable".to_string()));
                };
                let rest = me
                    .call(vec![ObjValue::from_i64(n - 1)], Kwargs::new())
                    .await?;
                let rest = rest
                    .as_i64()
                    .ok_or_else(|| ObjectError::Internal("bad recursion result".to_string()))?;
                Ok(ObjValue::from_i64(n * rest))
            }),
        );
        let a = side(ProcedureRegistry::new(), StaticNamespace::new());
        let b_registry = registry;
        let fact_body = b_registry.get("app", "fact").unwrap();
        let b = side(b_registry, StaticNamespace::new());
        let _server = connect(&a, &b).await;

        let fact = NativeProcedure::new("app", "fact", fact_body).with_self_free_var("recur");
        let proxy = export(&a, &ObjValue::Callable(Arc::new(fact))).await;
        let result = proxy
            .call(vec![ObjValue::from_i64(5)], Kwargs::new())
            .await
            .unwrap();
        assert_eq!(result.as_i64(), Some(120));
    }

    struct CountingNamespace {
        inner: StaticNamespace,
        hits: Arc<AtomicUsize>,
    }

    impl Namespace for CountingNamespace {
        fn resolve(&self, module: &str, member: Option<&str>) -> Result<ObjValue, ObjectError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve(module, member)
        }
    }

    #[tokio::test]
    async fn test_global_fetched_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let a = side(ProcedureRegistry::new(), StaticNamespace::new());
        let b = side(
            ProcedureRegistry::new(),
            CountingNamespace {
                inner: StaticNamespace::new().with_value("cfg", "limit", ObjValue::from_i64(99)),
                hits: hits.clone(),
            },
        );
        let _server = connect(&a, &b).await;

        let first = a.env.global("cfg", "limit").await.unwrap();
        assert_eq!(first.as_i64(), Some(99));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let second = a.env.global("cfg", "limit").await.unwrap();
        assert_eq!(second.as_i64(), Some(99));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_iteration_through_proxy() {
        let list = ListObject::new(vec![
            ObjValue::from_i64(1),
            ObjValue::from_i64(2),
            ObjValue::from_i64(3),
        ]);
        let a = side(ProcedureRegistry::new(), StaticNamespace::new());
        let b = side(
            ProcedureRegistry::new(),
            StaticNamespace::new().with_value(
                "data",
                "items",
                ObjValue::Object(list as Arc<dyn RemoteObject>),
            ),
        );
        let _server = connect(&a, &b).await;

        let ObjValue::Proxy(items) = a.env.global("data", "items").await.unwrap() else {
            panic!("expected a proxy");
        };
        assert_eq!(items.attr("len").await.unwrap().as_u64(), Some(3));

        let iter = items.iter().await.unwrap();
        let mut seen = Vec::new();
        while let Some(item) = iter.next().await.unwrap() {
            seen.push(item.as_i64().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(iter.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_set_item_through_proxy() {
        let list = ListObject::new(vec![ObjValue::from_i64(1), ObjValue::from_i64(2)]);
        let a = side(ProcedureRegistry::new(), StaticNamespace::new());
        let b = side(
            ProcedureRegistry::new(),
            StaticNamespace::new().with_value(
                "data",
                "items",
                ObjValue::Object(list.clone() as Arc<dyn RemoteObject>),
            ),
        );
        let _server = connect(&a, &b).await;

        let ObjValue::Proxy(items) = a.env.global("data", "items").await.unwrap() else {
            panic!("expected a proxy");
        };
        let first = items.get_item(&ObjValue::from_u64(0)).await.unwrap();
        assert_eq!(first.as_i64(), Some(1));

        items
            .set_item(&ObjValue::from_u64(1), &ObjValue::from_i64(20))
            .await
            .unwrap();
        assert_eq!(
            list.get_item(&ObjValue::from_u64(1)).unwrap().as_i64(),
            Some(20)
        );

        let err = items.get_item(&ObjValue::from_u64(9)).await.unwrap_err();
        assert!(matches!(err, RpcError::Channel(ChannelError::Remote { .. })));
    }

    #[tokio::test]
    async fn test_update_through_proxy() {
        let list = ListObject::new(vec![ObjValue::from_i64(1), ObjValue::from_i64(2)]);
        let a = side(ProcedureRegistry::new(), StaticNamespace::new());
        let b = side(
            ProcedureRegistry::new(),
            StaticNamespace::new().with_value(
                "data",
                "items",
                ObjValue::Object(list.clone() as Arc<dyn RemoteObject>),
            ),
        );
        let _server = connect(&a, &b).await;

        let ObjValue::Proxy(items) = a.env.global("data", "items").await.unwrap() else {
            panic!("expected a proxy");
        };
        let operand = ObjValue::Data(rmpv::Value::Array(vec![
            rmpv::Value::from(3),
            rmpv::Value::from(4),
        ]));
        let updated = items.update(&operand).await.unwrap();
        let ObjValue::Proxy(same) = updated else {
            panic!("expected a proxy back from obj_iadd");
        };
        assert_eq!(same.object_id(), items.object_id());
        assert_eq!(list.len(), 4);
        assert_eq!(items.attr("len").await.unwrap().as_u64(), Some(4));
        assert_eq!(
            items
                .get_item(&ObjValue::from_u64(3))
                .await
                .unwrap()
                .as_i64(),
            Some(4)
        );

        let err = items.update(&ObjValue::from_i64(9)).await.unwrap_err();
        assert!(matches!(err, RpcError::Channel(ChannelError::Remote { .. })));
    }

    #[tokio::test]
    async fn test_callback_invoked_during_reply_wait() {
        let a = side(ProcedureRegistry::new(), StaticNamespace::new());
        let b = side(ProcedureRegistry::new(), StaticNamespace::new());

        let e = b.env.clone();
        b.channel
            .bind(
                "apply",
                handler(move |args, _kwargs| {
                    let env = e.clone();
                    async move {
                        let ObjValue::Proxy(cb) = env.deserialize(want_arg(&args, 0)?)? else {
                            return Err(Fault::new("first argument must be a callback"));
                        };
                        let x = env.deserialize(want_arg(&args, 1)?)?;
                        let doubled = cb
                            .call(vec![x], Kwargs::new())
                            .await
                            .map_err(|err| Fault::new(err.to_string()))?
                            .as_i64()
                            .ok_or_else(|| Fault::new("callback returned a non-integer"))?;
                        Ok(env.serialize(&ObjValue::from_i64(doubled + 1))?)
                    }
                }),
            )
            .unwrap();
        let _server = connect(&a, &b).await;

        let double = FnObject::new(|args, _kwargs| async move {
            let x = args
                .first()
                .and_then(ObjValue::as_i64)
                .ok_or_else(|| ObjectError::BadArgument("expected an integer".to_string()))?;
            Ok(ObjValue::from_i64(x * 2))
        });
        let cb_wire = a.env.serialize(&ObjValue::Object(double)).unwrap();
        let x_wire = a.env.serialize(&ObjValue::from_i64(20)).unwrap();
        let reply = a
            .env
            .remote_call("apply", vec![cb_wire, x_wire])
            .await
            .unwrap();
        assert_eq!(a.env.deserialize(&reply).unwrap().as_i64(), Some(41));
        // The callback stays registered on the sending side until released.
        assert_eq!(a.env.store().len(), 1);
    }

    #[tokio::test]
    async fn test_release_then_reuse_fails() {
        let list = ListObject::new(vec![ObjValue::from_i64(1)]);
        let a = side(ProcedureRegistry::new(), StaticNamespace::new());
        let b = side(
            ProcedureRegistry::new(),
            StaticNamespace::new().with_value(
                "data",
                "items",
                ObjValue::Object(list as Arc<dyn RemoteObject>),
            ),
        );
        let _server = connect(&a, &b).await;

        let ObjValue::Proxy(items) = a.env.global("data", "items").await.unwrap() else {
            panic!("expected a proxy");
        };
        assert_eq!(b.env.store().len(), 1);

        items.release().await.unwrap();
        assert_eq!(b.env.store().len(), 0);

        // Double release is a no-op, not a fault.
        items.release().await.unwrap();

        let err = items.attr("len").await.unwrap_err();
        match err {
            RpcError::Channel(ChannelError::Remote { message, .. }) => {
                assert!(message.contains("unknown object id"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_add_obj_rejects_plain_data() {
        let a = side(ProcedureRegistry::new(), StaticNamespace::new());
        let b = side(ProcedureRegistry::new(), StaticNamespace::new());
        let _server = connect(&a, &b).await;

        let err = a
            .env
            .remote_call("add_obj", vec![WireValue::from_u64(5)])
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Channel(ChannelError::Remote { .. })));
    }

    #[test]
    fn test_step_encoding_roundtrip() {
        let channel = Arc::new(Channel::new(ChannelConfig::default()));
        let env = Envelope::new(
            &channel,
            Arc::new(ProcedureRegistry::new()),
            Arc::new(StaticNamespace::new()),
        )
        .unwrap();

        let wire = encode_step(&env, IterStep::Item(ObjValue::from_i64(7))).unwrap();
        let back = decode_step(&env, &wire).unwrap();
        assert_eq!(back.unwrap().as_i64(), Some(7));

        let wire = encode_step(&env, IterStep::Done).unwrap();
        assert!(decode_step(&env, &wire).unwrap().is_none());

        let err = decode_step(&env, &WireValue::from_u64(3)).unwrap_err();
        assert!(matches!(err, ObjectError::Internal(_)));
    }
}
