//! Exported object model.
//!
//! Anything shared by reference implements [`RemoteObject`]. Every operation
//! defaults to an "unsupported" fault so implementors only write the surface
//! their type actually has. `call` returns a boxed future because the trait
//! must stay object-safe behind `Arc<dyn RemoteObject>`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ObjectError;
use crate::value::{Kwargs, ObjValue};

/// Boxed future returned by object operations.
pub type ObjFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ObjectError>> + Send + 'a>>;

/// Wraps an immediate result as an [`ObjFuture`].
pub fn ready<'a, T: Send + 'a>(result: Result<T, ObjectError>) -> ObjFuture<'a, T> {
    Box::pin(std::future::ready(result))
}

/// One step of remote iteration.
#[derive(Debug, Clone)]
pub enum IterStep {
    Item(ObjValue),
    Done,
}

/// An object exported across the boundary by reference.
///
/// The owning side keeps the object in its store; the peer drives it through
/// the `obj_*` endpoints. Operations not overridden fault with
/// [`ObjectError::Unsupported`], which travels back as a remote fault without
/// disturbing the channel.
pub trait RemoteObject: Send + Sync {
    /// Type label used in fault messages.
    fn type_name(&self) -> &'static str;

    /// Reads a named attribute.
    fn attr(&self, name: &str) -> Result<ObjValue, ObjectError> {
        let _ = name;
        Err(ObjectError::Unsupported {
            type_name: self.type_name(),
            op: "attr",
        })
    }

    /// Invokes the object.
    fn call<'a>(&'a self, args: Vec<ObjValue>, kwargs: Kwargs) -> ObjFuture<'a, ObjValue> {
        let _ = (args, kwargs);
        ready(Err(ObjectError::Unsupported {
            type_name: self.type_name(),
            op: "call",
        }))
    }

    /// Starts iteration, returning a fresh iterator object.
    fn iter_start(&self) -> Result<Arc<dyn RemoteObject>, ObjectError> {
        Err(ObjectError::Unsupported {
            type_name: self.type_name(),
            op: "iter",
        })
    }

    /// Advances iteration. Exhaustion is [`IterStep::Done`], not an error.
    fn iter_next(&self) -> Result<IterStep, ObjectError> {
        Err(ObjectError::Unsupported {
            type_name: self.type_name(),
            op: "next",
        })
    }

    /// Reads an indexed item.
    fn get_item(&self, key: &ObjValue) -> Result<ObjValue, ObjectError> {
        let _ = key;
        Err(ObjectError::Unsupported {
            type_name: self.type_name(),
            op: "get_item",
        })
    }

    /// Writes an indexed item.
    fn set_item(&self, key: &ObjValue, value: ObjValue) -> Result<(), ObjectError> {
        let _ = (key, value);
        Err(ObjectError::Unsupported {
            type_name: self.type_name(),
            op: "set_item",
        })
    }

    /// Augments the object in place with `operand`.
    fn update(&self, operand: ObjValue) -> Result<(), ObjectError> {
        let _ = operand;
        Err(ObjectError::Unsupported {
            type_name: self.type_name(),
            op: "update",
        })
    }
}

type FnObjectInner =
    dyn Fn(Vec<ObjValue>, Kwargs) -> ObjFuture<'static, ObjValue> + Send + Sync + 'static;

/// Adapter exporting an async closure as a callable object.
pub struct FnObject {
    func: Box<FnObjectInner>,
}

impl FnObject {
    pub fn new<F, Fut>(func: F) -> Arc<dyn RemoteObject>
    where
        F: Fn(Vec<ObjValue>, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ObjValue, ObjectError>> + Send + 'static,
    {
        Arc::new(FnObject {
            func: Box::new(move |args, kwargs| Box::pin(func(args, kwargs))),
        })
    }
}

impl RemoteObject for FnObject {
    fn type_name(&self) -> &'static str {
        "function"
    }

    fn call<'a>(&'a self, args: Vec<ObjValue>, kwargs: Kwargs) -> ObjFuture<'a, ObjValue> {
        (self.func)(args, kwargs)
    }
}

/// A shareable list with attribute, indexing, and iteration support.
pub struct ListObject {
    items: Mutex<Vec<ObjValue>>,
}

impl ListObject {
    pub fn new(items: Vec<ObjValue>) -> Arc<Self> {
        Arc::new(ListObject {
            items: Mutex::new(items),
        })
    }

    pub fn push(&self, value: ObjValue) {
        self.items.lock().push(value);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn index(&self, key: &ObjValue) -> Result<usize, ObjectError> {
        key.as_u64()
            .map(|i| i as usize)
            .ok_or_else(|| ObjectError::BadArgument("list index must be an integer".to_string()))
    }
}

impl RemoteObject for ListObject {
    fn type_name(&self) -> &'static str {
        "list"
    }

    fn attr(&self, name: &str) -> Result<ObjValue, ObjectError> {
        match name {
            "len" => Ok(ObjValue::from_u64(self.len() as u64)),
            _ => Err(ObjectError::NoSuchAttribute {
                type_name: self.type_name(),
                name: name.to_string(),
            }),
        }
    }

    fn get_item(&self, key: &ObjValue) -> Result<ObjValue, ObjectError> {
        let idx = self.index(key)?;
        self.items
            .lock()
            .get(idx)
            .cloned()
            .ok_or_else(|| ObjectError::NoSuchItem(idx.to_string()))
    }

    fn set_item(&self, key: &ObjValue, value: ObjValue) -> Result<(), ObjectError> {
        let idx = self.index(key)?;
        let mut items = self.items.lock();
        match items.get_mut(idx) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ObjectError::NoSuchItem(idx.to_string())),
        }
    }

    fn iter_start(&self) -> Result<Arc<dyn RemoteObject>, ObjectError> {
        // Iterates a snapshot; concurrent mutation does not disturb it.
        Ok(Arc::new(ListIter {
            items: self.items.lock().clone(),
            pos: AtomicUsize::new(0),
        }))
    }

    fn update(&self, operand: ObjValue) -> Result<(), ObjectError> {
        let ObjValue::Data(rmpv::Value::Array(values)) = operand else {
            return Err(ObjectError::BadArgument(
                "can only extend a list with an array".to_string(),
            ));
        };
        self.items
            .lock()
            .extend(values.into_iter().map(ObjValue::Data));
        Ok(())
    }
}

struct ListIter {
    items: Vec<ObjValue>,
    pos: AtomicUsize,
}

impl RemoteObject for ListIter {
    fn type_name(&self) -> &'static str {
        "list_iterator"
    }

    fn iter_next(&self) -> Result<IterStep, ObjectError> {
        let idx = self.pos.fetch_add(1, Ordering::Relaxed);
        match self.items.get(idx) {
            Some(item) => Ok(IterStep::Item(item.clone())),
            None => Ok(IterStep::Done),
        }
    }
}
