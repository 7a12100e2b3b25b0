//! # Tomb Compiler - Source to VM Bytecode
//!
//! Drives the pipeline end-to-end for one source text:
//!
//! ```text
//! Source → Scanner → Tokens → Parser → AST → CodeGen → Assembly → Bytecode
//! ```
//!
//! Modules compile in source order. `description` scripts are compiled
//! eagerly so that later `event … = name;` declarations can embed their
//! bytecode; a contract or script is lowered and assembled at the end of
//! its parse. Any error aborts the whole compilation; there is no partial
//! success.

pub mod abi;
pub mod codegen;
pub mod registers;

pub use abi::{Abi, AbiEvent, AbiMethod, AbiParameter};
pub use codegen::CodeGen;
pub use registers::{Register, RegisterPool};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lexer::Scanner;
use crate::parser::{Contract, DescriptionSource, Method, Module, ParsedProgram, Parser, Script};
use crate::types::TypeRegistry;
use crate::vm::{Assembler, DEFAULT_REGISTER_COUNT};

/// Compilation options
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Emit a bytecode-offset to source-line map per module
    pub source_map: bool,
    /// Size of the VM register file to allocate against
    pub register_count: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            source_map: false,
            register_count: DEFAULT_REGISTER_COUNT,
        }
    }
}

/// What kind of module an artifact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// Persistent on-chain contract
    Contract,
    /// Transient executable script
    Script,
    /// Hidden event-description script
    Description,
}

/// One bytecode-offset to source-line entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMapping {
    /// Byte offset into the module bytecode
    pub offset: u32,
    /// 1-based source line
    pub line: u32,
}

/// A fully compiled module
#[derive(Debug, Clone)]
pub struct ModuleArtifact {
    /// Declared module name
    pub name: String,
    /// Module kind
    pub kind: ModuleKind,
    /// Assembled bytecode
    pub bytecode: Vec<u8>,
    /// Interface table
    pub abi: Abi,
    /// Optional bytecode-offset to source-line map
    pub source_line_map: Option<Vec<LineMapping>>,
}

/// Tomb source to VM bytecode compiler
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    /// Create a new compiler with options
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Compile source text into one artifact per top-level module
    pub fn compile(&self, source: &str) -> Result<Vec<ModuleArtifact>> {
        tracing::debug!(bytes = source.len(), "compiling tomb source");

        // Phase 1: lex
        let tokens = Scanner::new(source).scan_tokens()?;

        // Phase 2: parse with interleaved semantic checks
        let program = Parser::new(tokens).parse()?;

        // Phase 3: lower and assemble, descriptions first in source order
        let mut descriptions: HashMap<String, Vec<u8>> = HashMap::new();
        let mut artifacts = Vec::new();
        for module in &program.modules {
            let artifact = match module {
                Module::Contract(contract) => {
                    self.compile_contract(contract, &program, &descriptions)?
                }
                Module::Script(script) => {
                    let artifact = self.compile_script(script, &program)?;
                    if script.hidden {
                        descriptions.insert(script.name.clone(), artifact.bytecode.clone());
                    }
                    artifact
                }
            };
            tracing::debug!(
                module = %artifact.name,
                bytes = artifact.bytecode.len(),
                "module compiled"
            );
            artifacts.push(artifact);
        }
        Ok(artifacts)
    }

    fn compile_contract(
        &self,
        contract: &Contract,
        program: &ParsedProgram,
        descriptions: &HashMap<String, Vec<u8>>,
    ) -> Result<ModuleArtifact> {
        let mut codegen = CodeGen::new(&program.registry, self.options.register_count);
        for method in &contract.methods {
            codegen.lower_method(method)?;
        }
        let (lines, line_map) = codegen.finish();
        let assembled = Assembler::new().assemble(&lines)?;

        let methods = contract
            .methods
            .iter()
            .map(|m| abi_method(m, &assembled.labels, &program.registry))
            .collect::<Result<Vec<_>>>()?;
        let events = contract
            .events
            .iter()
            .map(|event| {
                let description = match &event.description {
                    DescriptionSource::InlineString(text) => inline_description(text)?,
                    DescriptionSource::InlineBytes(bytes) => bytes.clone(),
                    DescriptionSource::Script(name) => {
                        descriptions.get(name).cloned().ok_or_else(|| {
                            Error::internal(format!(
                                "description script '{}' was not compiled before use",
                                name
                            ))
                        })?
                    }
                };
                Ok(AbiEvent {
                    name: event.name.clone(),
                    value: event.value,
                    payload_type: program.registry.display(event.payload_type),
                    description,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ModuleArtifact {
            name: contract.name.clone(),
            kind: ModuleKind::Contract,
            bytecode: assembled.bytecode,
            abi: Abi { methods, events },
            source_line_map: self.line_mapping(&assembled.line_offsets, &line_map),
        })
    }

    fn compile_script(&self, script: &Script, program: &ParsedProgram) -> Result<ModuleArtifact> {
        let mut codegen = CodeGen::new(&program.registry, self.options.register_count);
        codegen.lower_method(&script.main)?;
        let (lines, line_map) = codegen.finish();
        let assembled = Assembler::new().assemble(&lines)?;

        let methods = vec![abi_method(
            &script.main,
            &assembled.labels,
            &program.registry,
        )?];

        Ok(ModuleArtifact {
            name: script.name.clone(),
            kind: if script.hidden {
                ModuleKind::Description
            } else {
                ModuleKind::Script
            },
            bytecode: assembled.bytecode,
            abi: Abi {
                methods,
                events: Vec::new(),
            },
            source_line_map: self.line_mapping(&assembled.line_offsets, &line_map),
        })
    }

    fn line_mapping(&self, offsets: &[u32], source_lines: &[usize]) -> Option<Vec<LineMapping>> {
        if !self.options.source_map {
            return None;
        }
        Some(
            offsets
                .iter()
                .zip(source_lines)
                .map(|(offset, line)| LineMapping {
                    offset: *offset,
                    line: *line as u32,
                })
                .collect(),
        )
    }
}

/// Compile with default options
pub fn compile(source: &str) -> Result<Vec<ModuleArtifact>> {
    Compiler::new(CompileOptions::default()).compile(source)
}

fn abi_method(
    method: &Method,
    labels: &HashMap<String, u32>,
    registry: &TypeRegistry,
) -> Result<AbiMethod> {
    let label = CodeGen::method_label(&method.interface.name);
    let offset = labels.get(&label).copied().ok_or_else(|| {
        Error::internal(format!(
            "method '{}' has no entry label",
            method.interface.name
        ))
    })?;
    Ok(AbiMethod {
        name: method.interface.name.clone(),
        kind: method.interface.kind,
        return_type: registry.display(method.interface.return_type),
        parameters: method
            .interface
            .parameters
            .iter()
            .map(|(name, ty)| AbiParameter {
                name: name.clone(),
                ty: registry.display(*ty),
            })
            .collect(),
        offset,
    })
}

/// Compile an inline event-description string into a minimal script that
/// loads the text and returns it
fn inline_description(text: &str) -> Result<Vec<u8>> {
    let lines = vec![
        format!("LOAD r1 \"{}\"", text),
        format!("MOVE r{} r1", crate::vm::RESULT_REGISTER),
        "RET".to_string(),
    ];
    Ok(Assembler::new().assemble(&lines)?.bytecode)
}
