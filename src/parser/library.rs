//! Intrinsic method libraries
//!
//! Libraries bundle the VM-level intrinsic methods a module can import. The
//! collection libraries (`Map`, `List`, `Set`) are declared against generic
//! placeholder types and are *patched* per storage-collection variable: the
//! patch produces a derived declaration with the placeholders rewritten to
//! the variable's concrete key/value types, leaving the original untouched.

use serde::{Deserialize, Serialize};

use crate::types::{TypeId, TypeRegistry, VarKind};

/// What kind of callable a method interface describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    /// Contract constructor, surfaced in the ABI as `Initialize`
    Constructor,
    /// Ordinary public or private method
    Method,
    /// Scheduled task
    Task,
    /// Lifecycle trigger
    Trigger,
}

/// Signature of a callable: a contract method or a library intrinsic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInterface {
    /// Owning library for intrinsics, `None` for contract methods
    pub library: Option<String>,
    /// Method name
    pub name: String,
    /// Callable kind
    pub kind: MethodKind,
    /// Whether the method is externally callable
    pub is_public: bool,
    /// Declared return type
    pub return_type: TypeId,
    /// Parameters in declaration order
    pub parameters: Vec<(String, TypeId)>,
}

/// A named set of intrinsic methods
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryDeclaration {
    /// Library name as written in `import`
    pub name: String,
    /// Intrinsic method signatures
    pub methods: Vec<MethodInterface>,
    /// True when call sites may pass any number of arguments
    pub variadic: bool,
}

impl LibraryDeclaration {
    /// Look up a method by name
    pub fn method(&self, name: &str) -> Option<&MethodInterface> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Derive a declaration with generic placeholders rewritten
    ///
    /// `key` substitutes the `K` placeholder (maps only) and `value`
    /// substitutes `V`. The receiver is unchanged.
    pub fn patch(
        &self,
        registry: &TypeRegistry,
        key: Option<TypeId>,
        value: TypeId,
    ) -> LibraryDeclaration {
        let substitute = |ty: TypeId| -> TypeId {
            let var_type = registry.get(ty);
            if var_type.kind != VarKind::Generic {
                return ty;
            }
            match var_type.name.as_deref() {
                Some("K") => key.unwrap_or(ty),
                Some("V") => value,
                _ => ty,
            }
        };
        LibraryDeclaration {
            name: self.name.clone(),
            methods: self
                .methods
                .iter()
                .map(|m| MethodInterface {
                    library: m.library.clone(),
                    name: m.name.clone(),
                    kind: m.kind,
                    is_public: m.is_public,
                    return_type: substitute(m.return_type),
                    parameters: m
                        .parameters
                        .iter()
                        .map(|(name, ty)| (name.clone(), substitute(*ty)))
                        .collect(),
                })
                .collect(),
            variadic: self.variadic,
        }
    }
}

fn intrinsic(
    library: &str,
    name: &str,
    return_type: TypeId,
    parameters: Vec<(&str, TypeId)>,
) -> MethodInterface {
    MethodInterface {
        library: Some(library.to_string()),
        name: name.to_string(),
        kind: MethodKind::Method,
        is_public: true,
        return_type,
        parameters: parameters
            .into_iter()
            .map(|(n, t)| (n.to_string(), t))
            .collect(),
    }
}

/// Build the intrinsic library known by `name`, if any
pub fn intrinsic_library(name: &str, registry: &mut TypeRegistry) -> Option<LibraryDeclaration> {
    let none = registry.primitive(VarKind::None);
    let any = registry.primitive(VarKind::Any);
    let number = registry.primitive(VarKind::Number);
    let boolean = registry.primitive(VarKind::Bool);
    let string = registry.primitive(VarKind::String);
    let address = registry.primitive(VarKind::Address);
    let key = registry.generic("K");
    let value = registry.generic("V");

    let library = match name {
        "Map" => LibraryDeclaration {
            name: name.to_string(),
            variadic: false,
            methods: vec![
                intrinsic("Map", "get", value, vec![("map", string), ("key", key)]),
                intrinsic(
                    "Map",
                    "set",
                    none,
                    vec![("map", string), ("key", key), ("value", value)],
                ),
                intrinsic("Map", "remove", none, vec![("map", string), ("key", key)]),
                intrinsic("Map", "has", boolean, vec![("map", string), ("key", key)]),
                intrinsic("Map", "count", number, vec![("map", string)]),
                intrinsic("Map", "clear", none, vec![("map", string)]),
            ],
        },
        "List" => LibraryDeclaration {
            name: name.to_string(),
            variadic: false,
            methods: vec![
                intrinsic(
                    "List",
                    "get",
                    value,
                    vec![("list", string), ("index", number)],
                ),
                intrinsic("List", "add", none, vec![("list", string), ("value", value)]),
                intrinsic(
                    "List",
                    "replace",
                    none,
                    vec![("list", string), ("index", number), ("value", value)],
                ),
                intrinsic(
                    "List",
                    "remove",
                    none,
                    vec![("list", string), ("index", number)],
                ),
                intrinsic("List", "count", number, vec![("list", string)]),
                intrinsic("List", "clear", none, vec![("list", string)]),
            ],
        },
        "Set" => LibraryDeclaration {
            name: name.to_string(),
            variadic: false,
            methods: vec![
                intrinsic("Set", "add", none, vec![("set", string), ("value", value)]),
                intrinsic(
                    "Set",
                    "remove",
                    none,
                    vec![("set", string), ("value", value)],
                ),
                intrinsic(
                    "Set",
                    "has",
                    boolean,
                    vec![("set", string), ("value", value)],
                ),
                intrinsic("Set", "count", number, vec![("set", string)]),
                intrinsic("Set", "clear", none, vec![("set", string)]),
            ],
        },
        "Runtime" => LibraryDeclaration {
            name: name.to_string(),
            variadic: false,
            methods: vec![
                intrinsic("Runtime", "log", none, vec![("message", string)]),
                intrinsic(
                    "Runtime",
                    "expect",
                    none,
                    vec![("condition", boolean), ("message", string)],
                ),
                intrinsic("Runtime", "time", number, vec![]),
                intrinsic("Runtime", "caller", address, vec![]),
                intrinsic(
                    "Runtime",
                    "isWitness",
                    boolean,
                    vec![("account", address)],
                ),
            ],
        },
        "Call" => LibraryDeclaration {
            name: name.to_string(),
            variadic: true,
            methods: vec![intrinsic("Call", "interop", any, vec![("method", string)])],
        },
        _ => return None,
    };
    Some(library)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_intrinsics_resolve() {
        let mut registry = TypeRegistry::new();
        for name in ["Map", "List", "Set", "Runtime", "Call"] {
            assert!(intrinsic_library(name, &mut registry).is_some(), "{}", name);
        }
        assert!(intrinsic_library("Teleport", &mut registry).is_none());
    }

    #[test]
    fn test_patch_rewrites_generics_only() {
        let mut registry = TypeRegistry::new();
        let map = intrinsic_library("Map", &mut registry).unwrap();
        let address = registry.primitive(VarKind::Address);
        let number = registry.primitive(VarKind::Number);
        let patched = map.patch(&registry, Some(address), number);

        let set = patched.method("set").unwrap();
        // (map: string, key: address, value: number)
        assert_eq!(registry.kind(set.parameters[0].1), VarKind::String);
        assert_eq!(set.parameters[1].1, address);
        assert_eq!(set.parameters[2].1, number);

        let get = patched.method("get").unwrap();
        assert_eq!(get.return_type, number);

        // The original still carries placeholders.
        let original_get = map.method("get").unwrap();
        assert_eq!(registry.kind(original_get.return_type), VarKind::Generic);
    }

    #[test]
    fn test_call_library_is_variadic() {
        let mut registry = TypeRegistry::new();
        let call = intrinsic_library("Call", &mut registry).unwrap();
        assert!(call.variadic);
        assert!(call.method("interop").is_some());
    }
}
