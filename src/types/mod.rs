//! # Tomb value-type model
//!
//! Value types are interned: the registry hands out copyable [`TypeId`]
//! handles, and two types are equal exactly when their handles are equal.
//! Primitives are pre-interned at registry construction; struct types are
//! interned as their declarations are parsed and carry a back-link to the
//! declaration. Generic placeholders (`K`, `V`) only appear inside intrinsic
//! library signatures and are rewritten away by library patching.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Primitive tag of a value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarKind {
    /// Absence of a value (void returns)
    None,
    /// Matches any value type in library signatures
    Any,
    /// Not yet resolved
    Unknown,
    /// Placeholder inside generic library signatures
    Generic,
    /// Integer number
    Number,
    /// Boolean
    Bool,
    /// UTF-8 string
    String,
    /// Byte array
    Bytes,
    /// Chain address
    Address,
    /// Transaction or block hash
    Hash,
    /// Declared struct
    Struct,
    /// On-chain key/value map
    StorageMap,
    /// On-chain list
    StorageList,
    /// On-chain set
    StorageSet,
}

impl VarKind {
    /// Resolve a source-level type name, case-insensitively
    ///
    /// Meta kinds (`None`, `Any`, `Unknown`, `Generic`) and `Struct` are not
    /// spellable in source; struct types are referenced by their declared
    /// name instead.
    pub fn from_type_name(name: &str) -> Option<VarKind> {
        match name.to_ascii_lowercase().as_str() {
            "number" => Some(VarKind::Number),
            "bool" => Some(VarKind::Bool),
            "string" => Some(VarKind::String),
            "bytes" => Some(VarKind::Bytes),
            "address" => Some(VarKind::Address),
            "hash" => Some(VarKind::Hash),
            "storage_map" => Some(VarKind::StorageMap),
            "storage_list" => Some(VarKind::StorageList),
            "storage_set" => Some(VarKind::StorageSet),
            _ => None,
        }
    }

    /// True for the storage collection kinds
    pub fn is_storage_collection(&self) -> bool {
        matches!(
            self,
            VarKind::StorageMap | VarKind::StorageList | VarKind::StorageSet
        )
    }

    /// True for kinds a value of which can be held in a register
    pub fn is_value(&self) -> bool {
        matches!(
            self,
            VarKind::Number
                | VarKind::Bool
                | VarKind::String
                | VarKind::Bytes
                | VarKind::Address
                | VarKind::Hash
                | VarKind::Struct
        )
    }

    /// Canonical lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            VarKind::None => "none",
            VarKind::Any => "any",
            VarKind::Unknown => "unknown",
            VarKind::Generic => "generic",
            VarKind::Number => "number",
            VarKind::Bool => "bool",
            VarKind::String => "string",
            VarKind::Bytes => "bytes",
            VarKind::Address => "address",
            VarKind::Hash => "hash",
            VarKind::Struct => "struct",
            VarKind::StorageMap => "storage_map",
            VarKind::StorageList => "storage_list",
            VarKind::StorageSet => "storage_set",
        }
    }
}

impl fmt::Display for VarKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Handle to an interned value type
///
/// Copyable and cheap to compare; equality of handles is equality of types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeId(u32);

/// An interned value type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarType {
    /// Primitive tag
    pub kind: VarKind,
    /// Declared name for `Struct` types, generic tag (`K`/`V`) for
    /// `Generic` placeholders
    pub name: Option<String>,
    /// Back-link to the struct declaration for `Struct` types
    pub struct_ref: Option<usize>,
}

/// A declared struct: ordered named fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDeclaration {
    /// Declared type name
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<(String, TypeId)>,
}

/// Interner for value types plus the struct declaration table
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: Vec<VarType>,
    by_key: HashMap<(VarKind, Option<String>), TypeId>,
    structs: Vec<StructDeclaration>,
    struct_by_name: HashMap<String, usize>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Creates a registry with all primitives pre-interned
    pub fn new() -> Self {
        let mut registry = TypeRegistry {
            types: Vec::new(),
            by_key: HashMap::new(),
            structs: Vec::new(),
            struct_by_name: HashMap::new(),
        };
        for kind in [
            VarKind::None,
            VarKind::Any,
            VarKind::Unknown,
            VarKind::Number,
            VarKind::Bool,
            VarKind::String,
            VarKind::Bytes,
            VarKind::Address,
            VarKind::Hash,
            VarKind::StorageMap,
            VarKind::StorageList,
            VarKind::StorageSet,
        ] {
            registry.intern(kind, None);
        }
        registry
    }

    fn intern(&mut self, kind: VarKind, name: Option<String>) -> TypeId {
        if let Some(&id) = self.by_key.get(&(kind, name.clone())) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(VarType {
            kind,
            name: name.clone(),
            struct_ref: None,
        });
        self.by_key.insert((kind, name), id);
        id
    }

    /// Handle for a pre-interned primitive kind
    pub fn primitive(&self, kind: VarKind) -> TypeId {
        self.by_key[&(kind, None)]
    }

    /// Handle for a generic placeholder with the given tag (`K` or `V`)
    pub fn generic(&mut self, tag: &str) -> TypeId {
        self.intern(VarKind::Generic, Some(tag.to_string()))
    }

    /// The interned value behind a handle
    pub fn get(&self, id: TypeId) -> &VarType {
        &self.types[id.0 as usize]
    }

    /// Primitive tag behind a handle
    pub fn kind(&self, id: TypeId) -> VarKind {
        self.types[id.0 as usize].kind
    }

    /// Register a struct declaration and intern its type
    ///
    /// Returns `None` if a struct with the same name was already declared.
    pub fn declare_struct(&mut self, decl: StructDeclaration) -> Option<TypeId> {
        if self.struct_by_name.contains_key(&decl.name) {
            return None;
        }
        let index = self.structs.len();
        let name = decl.name.clone();
        self.struct_by_name.insert(name.clone(), index);
        self.structs.push(decl);
        let id = TypeId(self.types.len() as u32);
        self.types.push(VarType {
            kind: VarKind::Struct,
            name: Some(name.clone()),
            struct_ref: Some(index),
        });
        self.by_key.insert((VarKind::Struct, Some(name)), id);
        Some(id)
    }

    /// Handle for a declared struct type, by name
    pub fn struct_type(&self, name: &str) -> Option<TypeId> {
        self.by_key
            .get(&(VarKind::Struct, Some(name.to_string())))
            .copied()
    }

    /// Declaration behind a struct type handle
    pub fn struct_decl(&self, id: TypeId) -> Option<&StructDeclaration> {
        self.get(id).struct_ref.map(|index| &self.structs[index])
    }

    /// Human-readable rendering for diagnostics and the ABI
    pub fn display(&self, id: TypeId) -> String {
        let ty = self.get(id);
        match (&ty.kind, &ty.name) {
            (VarKind::Struct, Some(name)) => name.clone(),
            (VarKind::Generic, Some(tag)) => format!("generic {}", tag),
            (kind, _) => kind.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_name_resolution_is_case_insensitive() {
        assert_eq!(VarKind::from_type_name("Number"), Some(VarKind::Number));
        assert_eq!(
            VarKind::from_type_name("STORAGE_MAP"),
            Some(VarKind::StorageMap)
        );
        // Meta kinds are not spellable.
        assert_eq!(VarKind::from_type_name("any"), None);
        assert_eq!(VarKind::from_type_name("generic"), None);
    }

    #[test]
    fn test_interning_identity() {
        let registry = TypeRegistry::new();
        assert_eq!(
            registry.primitive(VarKind::Number),
            registry.primitive(VarKind::Number)
        );
        assert_ne!(
            registry.primitive(VarKind::Number),
            registry.primitive(VarKind::Bool)
        );
    }

    #[test]
    fn test_struct_declaration_round_trip() {
        let mut registry = TypeRegistry::new();
        let number = registry.primitive(VarKind::Number);
        let id = registry
            .declare_struct(StructDeclaration {
                name: "Point".into(),
                fields: vec![("x".into(), number), ("y".into(), number)],
            })
            .expect("first declaration succeeds");
        assert_eq!(registry.struct_type("Point"), Some(id));
        assert_eq!(registry.kind(id), VarKind::Struct);
        let decl = registry.struct_decl(id).expect("declaration stored");
        assert_eq!(decl.fields.len(), 2);
        // Redeclaration is rejected.
        assert!(registry
            .declare_struct(StructDeclaration {
                name: "Point".into(),
                fields: vec![],
            })
            .is_none());
        assert_eq!(registry.display(id), "Point");
    }

    #[test]
    fn test_generic_placeholders_distinct_by_tag() {
        let mut registry = TypeRegistry::new();
        let k = registry.generic("K");
        let v = registry.generic("V");
        assert_ne!(k, v);
        assert_eq!(k, registry.generic("K"));
    }
}
