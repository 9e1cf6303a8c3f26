//! Name resolution for module references.
//!
//! When a value arrives as a `(module, member)` name instead of data, the
//! receiving side looks it up here. What a namespace exposes is entirely the
//! application's choice; nothing is resolvable by default.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ObjectError;
use crate::object::RemoteObject;
use crate::value::ObjValue;

/// Resolves named symbols on the receiving side of the boundary.
pub trait Namespace: Send + Sync {
    /// Resolves `module.member`, or the module itself when `member` is
    /// `None`.
    fn resolve(&self, module: &str, member: Option<&str>) -> Result<ObjValue, ObjectError>;
}

/// A namespace built from a fixed table of modules and members.
#[derive(Default)]
pub struct StaticNamespace {
    modules: HashMap<String, HashMap<String, ObjValue>>,
}

impl StaticNamespace {
    pub fn new() -> Self {
        StaticNamespace::default()
    }

    pub fn with_value(
        mut self,
        module: impl Into<String>,
        member: impl Into<String>,
        value: ObjValue,
    ) -> Self {
        self.modules
            .entry(module.into())
            .or_default()
            .insert(member.into(), value);
        self
    }
}

impl Namespace for StaticNamespace {
    fn resolve(&self, module: &str, member: Option<&str>) -> Result<ObjValue, ObjectError> {
        let members = self
            .modules
            .get(module)
            .ok_or_else(|| ObjectError::Unresolvable {
                module: module.to_string(),
                member: member.map(str::to_string),
            })?;
        match member {
            Some(name) => members
                .get(name)
                .cloned()
                .ok_or_else(|| ObjectError::Unresolvable {
                    module: module.to_string(),
                    member: Some(name.to_string()),
                }),
            // A bare module resolves to a handle whose attributes are the
            // module's members.
            None => Ok(ObjValue::Object(Arc::new(ModuleObject {
                name: module.to_string(),
                members: members.clone(),
            }))),
        }
    }
}

struct ModuleObject {
    name: String,
    members: HashMap<String, ObjValue>,
}

impl RemoteObject for ModuleObject {
    fn type_name(&self) -> &'static str {
        "module"
    }

    fn attr(&self, name: &str) -> Result<ObjValue, ObjectError> {
        self.members
            .get(name)
            .cloned()
            .ok_or_else(|| ObjectError::Unresolvable {
                module: self.name.clone(),
                member: Some(name.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_resolution() {
        let ns = StaticNamespace::new()
            .with_value("math", "pi", ObjValue::from_str("3.14159"))
            .with_value("math", "e", ObjValue::from_str("2.71828"));

        let pi = ns.resolve("math", Some("pi")).unwrap();
        assert_eq!(pi.as_str(), Some("3.14159"));

        assert!(matches!(
            ns.resolve("math", Some("tau")),
            Err(ObjectError::Unresolvable { .. })
        ));
        assert!(matches!(
            ns.resolve("physics", Some("c")),
            Err(ObjectError::Unresolvable { .. })
        ));
    }

    #[test]
    fn test_bare_module_handle() {
        let ns = StaticNamespace::new().with_value("math", "pi", ObjValue::from_str("3.14159"));
        let module = ns.resolve("math", None).unwrap();
        let ObjValue::Object(obj) = module else {
            panic!("expected an object handle");
        };
        assert_eq!(obj.type_name(), "module");
        assert_eq!(obj.attr("pi").unwrap().as_str(), Some("3.14159"));
        assert!(obj.attr("tau").is_err());
    }
}
