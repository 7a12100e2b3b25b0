//! Tomb Parser Module
//!
//! Single-pass recursive descent over the token stream. Parsing is
//! interleaved with semantic resolution: identifiers resolve against the
//! scope stack, every expression carries its computed result type, and
//! generic collection libraries are patched per variable at the call site.

mod ast;
mod library;
mod scope;
mod tomb_parser;

pub use ast::{
    BinaryOperator, Contract, DescriptionSource, EventDeclaration, Expression, Literal, MacroKind,
    Method, Module, Script, Statement, StatementBlock, VarRef,
};
pub use library::{intrinsic_library, LibraryDeclaration, MethodInterface, MethodKind};
pub use scope::{CollectionDecl, ConstDecl, Scope, ScopeArena, ScopeId, Storage, VarDecl};
pub use tomb_parser::{ParsedProgram, Parser};
