//! Lexical scopes and declarations
//!
//! Scopes form a tree of frames held in one arena per compilation; frames
//! reference their parent by [`ScopeId`] and declarations reference their
//! owning frame the same way, so there are no downward owning links. A
//! frame's variables and constants are stored in declaration order.

use serde::{Deserialize, Serialize};

use super::library::LibraryDeclaration;
use crate::types::TypeId;

/// Handle to a scope frame in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(u32);

/// Where a variable's value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Storage {
    /// Block-local register-backed variable
    Local,
    /// Contract storage slot
    Global,
    /// Method argument
    Argument,
}

/// Concrete key/value shape of a storage-collection variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionDecl {
    /// `storage_map<key, value>`
    Map {
        /// Key type
        key: TypeId,
        /// Value type
        value: TypeId,
    },
    /// `storage_list<value>`
    List {
        /// Element type
        value: TypeId,
    },
    /// `storage_set<value>`
    Set {
        /// Element type
        value: TypeId,
    },
}

/// A declared variable
#[derive(Debug, Clone)]
pub struct VarDecl {
    /// Frame the variable belongs to
    pub scope: ScopeId,
    /// Declared name
    pub name: String,
    /// Declared type
    pub ty: TypeId,
    /// Storage class
    pub storage: Storage,
    /// Key/value shape for storage collections
    pub collection: Option<CollectionDecl>,
}

/// A declared constant with its literal value text
#[derive(Debug, Clone)]
pub struct ConstDecl {
    /// Declared name
    pub name: String,
    /// Declared type
    pub ty: TypeId,
    /// Literal token text
    pub literal: String,
}

/// One lexical frame
#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// Enclosing frame; `None` at a module root
    pub parent: Option<ScopeId>,
    /// Name of the method this frame belongs to, if any
    pub method: Option<String>,
    /// Variables in declaration order
    pub vars: Vec<VarDecl>,
    /// Constants in declaration order
    pub consts: Vec<ConstDecl>,
    /// Imported libraries; only populated on module-root frames
    pub libraries: Vec<LibraryDeclaration>,
}

/// Arena of scope frames for one compilation
#[derive(Debug, Clone, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl ScopeArena {
    /// Creates an empty arena
    pub fn new() -> Self {
        ScopeArena::default()
    }

    /// Push a new frame under `parent`
    pub fn push(&mut self, parent: Option<ScopeId>, method: Option<String>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent,
            method,
            ..Scope::default()
        });
        id
    }

    /// Immutable access to a frame
    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    /// Mutable access to a frame
    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    /// Declare a variable in a frame
    ///
    /// Returns `false` when the name is already taken in the same frame;
    /// shadowing an outer frame's variable is allowed.
    pub fn declare_var(&mut self, id: ScopeId, decl: VarDecl) -> bool {
        let scope = self.get_mut(id);
        if scope.vars.iter().any(|v| v.name == decl.name) {
            return false;
        }
        scope.vars.push(decl);
        true
    }

    /// Declare a constant in a frame
    pub fn declare_const(&mut self, id: ScopeId, decl: ConstDecl) -> bool {
        let scope = self.get_mut(id);
        if scope.consts.iter().any(|c| c.name == decl.name) {
            return false;
        }
        scope.consts.push(decl);
        true
    }

    /// Walk outward from `from` looking for a variable
    pub fn find_variable(&self, from: ScopeId, name: &str) -> Option<&VarDecl> {
        let mut cursor = Some(from);
        while let Some(id) = cursor {
            let scope = self.get(id);
            if let Some(decl) = scope.vars.iter().find(|v| v.name == name) {
                return Some(decl);
            }
            cursor = scope.parent;
        }
        None
    }

    /// Walk outward from `from` looking for a constant
    pub fn find_constant(&self, from: ScopeId, name: &str) -> Option<&ConstDecl> {
        let mut cursor = Some(from);
        while let Some(id) = cursor {
            let scope = self.get(id);
            if let Some(decl) = scope.consts.iter().find(|c| c.name == name) {
                return Some(decl);
            }
            cursor = scope.parent;
        }
        None
    }

    /// The module-root frame above `from`
    pub fn root_of(&self, from: ScopeId) -> ScopeId {
        let mut id = from;
        while let Some(parent) = self.get(id).parent {
            id = parent;
        }
        id
    }

    /// Look up an imported library from anywhere inside a module
    pub fn find_library(&self, from: ScopeId, name: &str) -> Option<&LibraryDeclaration> {
        let root = self.root_of(from);
        self.get(root).libraries.iter().find(|l| l.name == name)
    }

    /// Bind an imported library at the module root above `from`
    pub fn add_library(&mut self, from: ScopeId, library: LibraryDeclaration) {
        let root = self.root_of(from);
        self.get_mut(root).libraries.push(library);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeRegistry, VarKind};

    fn var(scope: ScopeId, name: &str, ty: TypeId) -> VarDecl {
        VarDecl {
            scope,
            name: name.to_string(),
            ty,
            storage: Storage::Local,
            collection: None,
        }
    }

    #[test]
    fn test_lookup_walks_to_root() {
        let registry = TypeRegistry::new();
        let number = registry.primitive(VarKind::Number);
        let mut arena = ScopeArena::new();
        let root = arena.push(None, None);
        let inner = arena.push(Some(root), Some("f".into()));
        assert!(arena.declare_var(root, var(root, "total", number)));
        let found = arena.find_variable(inner, "total").expect("visible");
        assert_eq!(found.scope, root);
        assert!(arena.find_variable(inner, "missing").is_none());
        assert_eq!(arena.root_of(inner), root);
    }

    #[test]
    fn test_same_frame_redeclaration_rejected() {
        let registry = TypeRegistry::new();
        let number = registry.primitive(VarKind::Number);
        let mut arena = ScopeArena::new();
        let root = arena.push(None, None);
        assert!(arena.declare_var(root, var(root, "x", number)));
        assert!(!arena.declare_var(root, var(root, "x", number)));
        // Shadowing in an inner frame is fine.
        let inner = arena.push(Some(root), None);
        assert!(arena.declare_var(inner, var(inner, "x", number)));
    }
}
