//! Code generation: AST methods to VM assembly text
//!
//! Each method is lowered independently by a post-order walk over its
//! statement tree, appending one assembly line per instruction. Registers
//! come from the fixed pool: locals and arguments get long-lived registers
//! aliased with the variable name for the extent of their scope, expression
//! temporaries live only while the enclosing expression needs the value.
//! After every method the pool must be empty again.

use std::collections::HashMap;

use super::registers::{Register, RegisterPool};
use crate::error::{Error, Result};
use crate::parser::{
    Expression, Literal, Method, ScopeId, Statement, StatementBlock, Storage,
};
use crate::types::TypeRegistry;
use crate::vm::{Opcode, RESULT_REGISTER};

/// Per-module code generator
///
/// Holds the label counter (monotonic across the whole module so jump
/// targets never collide) and the register pool shared by the module's
/// methods in sequence.
pub struct CodeGen<'a> {
    registry: &'a TypeRegistry,
    pool: RegisterPool,
    lines: Vec<String>,
    /// Source line of each emitted assembly line, index-aligned with `lines`
    line_map: Vec<usize>,
    label_counter: u32,
    /// Live register of every variable in scope, keyed by declaration site
    variables: HashMap<(ScopeId, String), Register>,
}

impl<'a> CodeGen<'a> {
    /// Creates a generator over one module's interned types
    pub fn new(registry: &'a TypeRegistry, register_count: usize) -> Self {
        CodeGen {
            registry,
            pool: RegisterPool::new(register_count),
            lines: Vec::new(),
            line_map: Vec::new(),
            label_counter: 0,
            variables: HashMap::new(),
        }
    }

    /// Emitted assembly lines plus the per-line source map
    pub fn finish(self) -> (Vec<String>, Vec<usize>) {
        (self.lines, self.line_map)
    }

    /// Label under which a method's entry point is emitted
    pub fn method_label(name: &str) -> String {
        format!("method_{}", name)
    }

    /// Lower one method: entry label, argument binding, body, epilogue
    pub fn lower_method(&mut self, method: &Method) -> Result<()> {
        self.emit(
            format!("@{}:", Self::method_label(&method.interface.name)),
            method.line,
        );
        for (name, _) in &method.interface.parameters {
            let register = self.pool.alloc(
                format!("argument '{}'", name),
                Some(name),
                method.line,
            )?;
            self.emit(
                format!("ALIAS {} ${}", register.operand(), name),
                method.line,
            );
            self.variables
                .insert((method.scope, name.clone()), register);
        }
        let falls_through = !ends_with_return(&method.body);
        self.lower_block(&method.body)?;
        if falls_through {
            self.emit("RET".to_string(), method.line);
        }
        self.pool.verify_empty()
    }

    fn lower_block(&mut self, block: &StatementBlock) -> Result<()> {
        for statement in &block.statements {
            self.lower_statement(statement)?;
        }
        self.release_scope(block.scope)
    }

    /// Free every variable register bound in `scope`; the frame is dead
    fn release_scope(&mut self, scope: ScopeId) -> Result<()> {
        let dead: Vec<(ScopeId, String)> = self
            .variables
            .keys()
            .filter(|(s, _)| *s == scope)
            .cloned()
            .collect();
        for key in dead {
            if let Some(register) = self.variables.remove(&key) {
                self.pool.dealloc(register)?;
            }
        }
        Ok(())
    }

    fn lower_statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::Local { var, init, line } => {
                let register =
                    self.pool
                        .alloc(format!("local '{}'", var.name), Some(&var.name), *line)?;
                self.emit(format!("ALIAS {} ${}", register.operand(), var.name), *line);
                let operand = register.operand();
                self.variables.insert((var.scope, var.name.clone()), register);
                if let Some(init) = init {
                    let value = self.lower_expression(init)?;
                    self.emit(format!("MOVE {} {}", operand, value.operand()), *line);
                    self.pool.dealloc(value)?;
                }
                Ok(())
            }

            Statement::Assign {
                target,
                value,
                line,
            } => {
                let value_register = self.lower_expression(value)?;
                match target.storage {
                    Storage::Global => {
                        self.emit(
                            format!("GSTORE {} ${}", value_register.operand(), target.name),
                            *line,
                        );
                    }
                    Storage::Local | Storage::Argument => {
                        let operand = self.variable_operand(target.scope, &target.name)?;
                        self.emit(
                            format!("MOVE {} {}", operand, value_register.operand()),
                            *line,
                        );
                    }
                }
                self.pool.dealloc(value_register)
            }

            Statement::If {
                condition,
                then_block,
                else_block,
                line,
            } => {
                let end_label = self.alloc_label("endif");
                let condition_register = self.lower_expression(condition)?;
                match else_block {
                    Some(else_block) => {
                        let else_label = self.alloc_label("else");
                        self.emit(
                            format!("JMPNOT {} @{}", condition_register.operand(), else_label),
                            *line,
                        );
                        self.pool.dealloc(condition_register)?;
                        self.lower_block(then_block)?;
                        self.emit(format!("JMP @{}", end_label), *line);
                        self.emit(format!("@{}:", else_label), *line);
                        self.lower_block(else_block)?;
                    }
                    None => {
                        self.emit(
                            format!("JMPNOT {} @{}", condition_register.operand(), end_label),
                            *line,
                        );
                        self.pool.dealloc(condition_register)?;
                        self.lower_block(then_block)?;
                    }
                }
                self.emit(format!("@{}:", end_label), *line);
                Ok(())
            }

            Statement::While {
                condition,
                body,
                line,
            } => {
                let start_label = self.alloc_label("while");
                let end_label = self.alloc_label("endwhile");
                self.emit(format!("@{}:", start_label), *line);
                let condition_register = self.lower_expression(condition)?;
                self.emit(
                    format!("JMPNOT {} @{}", condition_register.operand(), end_label),
                    *line,
                );
                self.pool.dealloc(condition_register)?;
                self.lower_block(body)?;
                self.emit(format!("JMP @{}", start_label), *line);
                self.emit(format!("@{}:", end_label), *line);
                Ok(())
            }

            Statement::DoWhile {
                body,
                condition,
                line,
            } => {
                let start_label = self.alloc_label("dowhile");
                self.emit(format!("@{}:", start_label), *line);
                self.lower_block(body)?;
                let condition_register = self.lower_expression(condition)?;
                self.emit(
                    format!("JMPIF {} @{}", condition_register.operand(), start_label),
                    *line,
                );
                self.pool.dealloc(condition_register)
            }

            Statement::Return { value, line } => {
                if let Some(value) = value {
                    let register = self.lower_expression(value)?;
                    self.emit(
                        format!("MOVE r{} {}", RESULT_REGISTER, register.operand()),
                        *line,
                    );
                    self.pool.dealloc(register)?;
                }
                self.emit("RET".to_string(), *line);
                Ok(())
            }

            Statement::Throw { message, line } => {
                let register = self.pool.alloc("throw message", None, *line)?;
                self.emit(
                    format!("LOAD {} \"{}\"", register.operand(), message),
                    *line,
                );
                self.emit(format!("THROW {}", register.operand()), *line);
                self.pool.dealloc(register)
            }

            Statement::Emit {
                value,
                address,
                payload,
                line,
                ..
            } => {
                let address_register = self.lower_expression(address)?;
                let payload_register = self.lower_expression(payload)?;
                self.emit(
                    format!(
                        "EMIT {} {} {}",
                        address_register.operand(),
                        payload_register.operand(),
                        value
                    ),
                    *line,
                );
                self.pool.dealloc(address_register)?;
                self.pool.dealloc(payload_register)
            }

            Statement::Asm { lines, line } => {
                for asm_line in lines {
                    self.emit(asm_line.clone(), *line);
                }
                Ok(())
            }

            Statement::MethodCall { call, .. } => {
                let result = self.lower_expression(call)?;
                self.pool.dealloc(result)
            }
        }
    }

    /// Lower one expression, returning the register holding its value
    fn lower_expression(&mut self, expression: &Expression) -> Result<Register> {
        match expression {
            Expression::Literal { value, line, .. } => self.load_literal(value, *line),

            Expression::Const { value, line, .. } => self.load_literal(value, *line),

            Expression::Var { var, line } => match var.storage {
                Storage::Global => {
                    let register = self
                        .pool
                        .alloc(format!("global read '{}'", var.name), None, *line)?;
                    self.emit(
                        format!("GLOAD {} ${}", register.operand(), var.name),
                        *line,
                    );
                    Ok(register)
                }
                Storage::Local | Storage::Argument => {
                    // Copy out of the variable's long-lived register so a
                    // binary destination can never clobber the variable.
                    let source = self.variable_operand(var.scope, &var.name)?;
                    let register = self
                        .pool
                        .alloc(format!("read of '{}'", var.name), None, *line)?;
                    self.emit(format!("MOVE {} {}", register.operand(), source), *line);
                    Ok(register)
                }
            },

            Expression::Binary {
                op,
                left,
                right,
                line,
                ..
            } => {
                let left_register = self.lower_expression(left)?;
                let right_register = self.lower_expression(right)?;
                let opcode = Opcode::for_binary_operator(op.symbol()).ok_or_else(|| {
                    Error::internal(format!("operator '{}' has no opcode", op.symbol()))
                })?;
                self.emit(
                    format!(
                        "{} {} {}",
                        opcode.mnemonic(),
                        left_register.operand(),
                        right_register.operand()
                    ),
                    *line,
                );
                self.pool.dealloc(right_register)?;
                Ok(left_register)
            }

            Expression::Negation { inner, line, .. } => {
                let register = self.lower_expression(inner)?;
                self.emit(format!("NOT {}", register.operand()), *line);
                Ok(register)
            }

            Expression::Cast { to, inner, line } => {
                let register = self.lower_expression(inner)?;
                self.emit(
                    format!("CAST {} {}", register.operand(), self.registry.display(*to)),
                    *line,
                );
                Ok(register)
            }

            Expression::Method {
                library,
                method,
                args,
                line,
                ..
            } => self.lower_call(library, method, args, *line),

            Expression::Macro { kind, line, .. } => {
                let register = self
                    .pool
                    .alloc(format!("macro ${}", kind.meta_name()), None, *line)?;
                self.emit(
                    format!("META {} ${}", register.operand(), kind.meta_name()),
                    *line,
                );
                Ok(register)
            }
        }
    }

    /// Marshal arguments into a consecutive register window and call
    fn lower_call(
        &mut self,
        library: &str,
        method: &str,
        args: &[Expression],
        line: usize,
    ) -> Result<Register> {
        let span = self
            .pool
            .alloc_span(format!("arguments of {}.{}", library, method), args.len())?;
        for (argument, slot) in args.iter().zip(&span) {
            let value = self.lower_expression(argument)?;
            self.emit(format!("MOVE {} {}", slot.operand(), value.operand()), line);
            self.pool.dealloc(value)?;
        }
        let result = self
            .pool
            .alloc(format!("result of {}.{}", library, method), None, line)?;
        let base = span
            .first()
            .map(|r| r.operand())
            .unwrap_or_else(|| result.operand());
        self.emit(
            format!(
                "CALL {} {} {} ${}.{}",
                result.operand(),
                base,
                args.len(),
                library,
                method
            ),
            line,
        );
        for register in span {
            self.pool.dealloc(register)?;
        }
        Ok(result)
    }

    fn load_literal(&mut self, literal: &Literal, line: usize) -> Result<Register> {
        let register = self
            .pool
            .alloc(format!("literal {}", literal), None, line)?;
        self.emit(
            format!("LOAD {} {}", register.operand(), literal.asm_text()),
            line,
        );
        Ok(register)
    }

    fn variable_operand(
        &self,
        scope: ScopeId,
        name: &str,
    ) -> Result<String> {
        self.variables
            .get(&(scope, name.to_string()))
            .map(Register::operand)
            .ok_or_else(|| {
                Error::internal(format!("variable '{}' has no live register", name))
            })
    }

    fn alloc_label(&mut self, hint: &str) -> String {
        self.label_counter += 1;
        format!("{}_{}", hint, self.label_counter)
    }

    fn emit(&mut self, line: String, source_line: usize) {
        self.lines.push(line);
        self.line_map.push(source_line);
    }

}

/// True when every path through the block's tail ends in `return`
fn ends_with_return(block: &StatementBlock) -> bool {
    match block.statements.last() {
        Some(Statement::Return { .. }) => true,
        Some(Statement::If {
            then_block,
            else_block: Some(else_block),
            ..
        }) => ends_with_return(then_block) && ends_with_return(else_block),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;
    use crate::parser::{Module, ParsedProgram, Parser};
    use crate::vm::DEFAULT_REGISTER_COUNT;

    fn lower(source: &str) -> Vec<String> {
        let tokens = Scanner::new(source).scan_tokens().expect("scan");
        let program: ParsedProgram = Parser::new(tokens).parse().expect("parse");
        let Module::Contract(contract) = &program.modules[0] else {
            panic!("expected contract");
        };
        let mut codegen = CodeGen::new(&program.registry, DEFAULT_REGISTER_COUNT);
        for method in &contract.methods {
            codegen.lower_method(method).expect("lowering");
        }
        let (lines, _) = codegen.finish();
        lines
    }

    #[test]
    fn test_minimal_method_shape() {
        let lines = lower("contract C { public f() { return; } }");
        assert_eq!(lines[0], "@method_f:");
        assert_eq!(lines[1], "RET");
    }

    #[test]
    fn test_arguments_are_aliased() {
        let lines = lower("contract C { constructor(owner:address) { return; } }");
        assert_eq!(lines[0], "@method_Initialize:");
        assert_eq!(lines[1], "ALIAS r1 $owner");
    }

    #[test]
    fn test_local_lifecycle_and_assignment() {
        let lines = lower("contract C { public f() { local n : number := 7; n := 9; } }");
        assert!(lines.contains(&"ALIAS r1 $n".to_string()));
        assert!(lines.contains(&"LOAD r2 7".to_string()));
        assert!(lines.contains(&"MOVE r1 r2".to_string()));
        // The trailing implicit return.
        assert_eq!(lines.last().unwrap(), "RET");
    }

    #[test]
    fn test_binary_destination_is_left_register() {
        let lines =
            lower("contract C { public f(): number { local a : number := 1; return a + 2; } }");
        let add_line = lines
            .iter()
            .find(|l| l.starts_with("ADD"))
            .expect("ADD emitted");
        // Left operand register receives the result and feeds the return.
        let left = add_line.split_whitespace().nth(1).unwrap().to_string();
        assert!(lines.contains(&format!("MOVE r0 {}", left)));
    }

    #[test]
    fn test_if_emits_compare_and_jump() {
        let lines = lower(
            "contract C { public f(a:number) { if (a == 1) { return; } else { return; } } }",
        );
        assert!(lines.iter().any(|l| l.starts_with("EQUAL")));
        assert!(lines.iter().any(|l| l.starts_with("JMPNOT")));
        assert!(lines.iter().any(|l| l.starts_with("@else_")));
        assert!(lines.iter().any(|l| l.starts_with("@endif_")));
    }

    #[test]
    fn test_while_loops_back() {
        let lines = lower(
            "contract C { public f() { local i : number := 0; while (i < 3) { i += 1; } } }",
        );
        let start = lines
            .iter()
            .find(|l| l.starts_with("@while_"))
            .expect("loop head label");
        let label = start.trim_start_matches('@').trim_end_matches(':');
        assert!(lines.contains(&format!("JMP @{}", label)));
    }

    #[test]
    fn test_do_while_jumps_if_true() {
        let lines = lower(
            "contract C { public f() { local i : number := 0; do { i += 1; } while (i < 3); } }",
        );
        assert!(lines.iter().any(|l| l.starts_with("JMPIF")));
    }

    #[test]
    fn test_emit_carries_event_value() {
        let lines = lower(
            "contract C { event Paid : number = \"paid\"; \
             public pay(a:address) { emit Paid(a, 100); } }",
        );
        let emit_line = lines
            .iter()
            .find(|l| l.starts_with("EMIT"))
            .expect("EMIT emitted");
        assert!(emit_line.ends_with("64"));
    }

    #[test]
    fn test_call_marshals_into_window() {
        let lines = lower(
            "contract C { import Map; global balances : storage_map<address, number>; \
             public add(a:address, v:number) { balances.set(a, v); } }",
        );
        let call_line = lines
            .iter()
            .find(|l| l.starts_with("CALL"))
            .expect("CALL emitted");
        assert!(call_line.ends_with("$Map.set"));
        assert!(call_line.contains(" 3 "));
        // The collection name literal is the first marshalled argument.
        assert!(lines.iter().any(|l| l.contains("LOAD") && l.contains("\"balances\"")));
    }

    #[test]
    fn test_zero_argument_call_base_falls_back_to_result() {
        let lines = lower(
            "contract C { import Runtime; public f(): address { return Runtime.caller(); } }",
        );
        let call_line = lines
            .iter()
            .find(|l| l.starts_with("CALL"))
            .expect("CALL emitted");
        let mut operands = call_line.split_whitespace().skip(1);
        let dst = operands.next().expect("dst operand");
        let base = operands.next().expect("base operand");
        let argc = operands.next().expect("argc operand");
        assert_eq!(base, dst);
        assert_eq!(argc, "0");
        assert!(call_line.ends_with("$Runtime.caller"));
    }

    #[test]
    fn test_throw_loads_message() {
        let lines = lower("contract C { public f() { throw \"nope\"; } }");
        assert!(lines.iter().any(|l| l.contains("LOAD") && l.contains("\"nope\"")));
        assert!(lines.iter().any(|l| l.starts_with("THROW")));
    }

    #[test]
    fn test_asm_block_is_verbatim() {
        let lines = lower(
            "contract C { public f() { asm {\n   LOAD r9 1\n   THROW r9\n} } }",
        );
        assert!(lines.contains(&"LOAD r9 1".to_string()));
        assert!(lines.contains(&"THROW r9".to_string()));
    }

    #[test]
    fn test_macro_lowers_to_meta() {
        let lines = lower(
            "contract C { public f(): number { return $BLOCK_TIME; } }",
        );
        assert!(lines.iter().any(|l| l.starts_with("META") && l.ends_with("$block_time")));
    }

    #[test]
    fn test_global_reads_and_writes() {
        let lines = lower(
            "contract C { global total : number; \
             public f(v:number) { total := v; local t : number := total; } }",
        );
        assert!(lines.iter().any(|l| l.starts_with("GSTORE") && l.ends_with("$total")));
        assert!(lines.iter().any(|l| l.starts_with("GLOAD") && l.ends_with("$total")));
    }
}
