//! # Tomb - Smart-Contract Language Compiler
//!
//! A compiler front-end and code emitter for the Tomb smart-contract
//! language, targeting a stack/register hybrid virtual machine used by a
//! blockchain runtime. Source text declares contracts, executable scripts,
//! and hidden event-description scripts; the compiler lowers them to VM
//! bytecode plus per-module metadata (method ABI, event table, description
//! blobs).
//!
//! ## Quick Start
//!
//! ```rust
//! use tomb::{compile, ModuleKind};
//!
//! # fn main() -> tomb::Result<()> {
//! let source = r#"
//!     contract Hello {
//!         constructor(owner:address) {
//!             return;
//!         }
//!     }
//! "#;
//!
//! let artifacts = compile(source)?;
//! assert_eq!(artifacts.len(), 1);
//! assert_eq!(artifacts[0].name, "Hello");
//! assert_eq!(artifacts[0].kind, ModuleKind::Contract);
//! assert_eq!(artifacts[0].abi.methods[0].name, "Initialize");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The pipeline is single-threaded and synchronous:
//!
//! ```text
//! Source → Scanner → Tokens → Parser → AST → CodeGen → Assembly → Bytecode
//! ```
//!
//! ### Main Components
//!
//! - [`Scanner`] - Tokenizes source text into tokens
//! - [`Parser`] - Recursive descent with interleaved semantic resolution
//! - [`CodeGen`] - Lowers methods to VM assembly, allocating virtual
//!   registers from a fixed pool
//! - [`Compiler`] - Drives the pipeline and assembles [`ModuleArtifact`]s
//! - [`TypeRegistry`] - Interner for value types and struct declarations
//!
//! ## Error Handling
//!
//! All diagnostics carry a 1-based source line and column:
//!
//! ```rust
//! # use tomb::compile;
//! let err = compile("contract C { public f() { if (1 + 1) { return; } } }")
//!     .unwrap_err();
//! assert!(err.to_string().contains("boolean"));
//! ```
//!
//! Any error aborts compilation of the current module and surfaces at the
//! [`compile`] boundary; there is no partial-success mode.

/// Version of the Tomb compiler
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod compiler;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod types;
pub mod vm;

// Re-export main types
pub use compiler::{
    compile, Abi, AbiEvent, AbiMethod, AbiParameter, CodeGen, CompileOptions, Compiler,
    LineMapping, ModuleArtifact, ModuleKind, RegisterPool,
};
pub use error::{Error, Result};
pub use lexer::{Scanner, Token, TokenKind};
pub use parser::{
    BinaryOperator, Expression, Literal, MacroKind, Module, ParsedProgram, Parser, Statement,
};
pub use types::{StructDeclaration, TypeId, TypeRegistry, VarKind, VarType};
pub use vm::{Assembler, Opcode, DEFAULT_REGISTER_COUNT};
