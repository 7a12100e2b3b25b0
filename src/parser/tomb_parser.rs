use super::ast::{
    BinaryOperator, Contract, DescriptionSource, EventDeclaration, Expression, Literal, MacroKind,
    Method, Module, Script, Statement, StatementBlock, VarRef,
};
use super::library::{intrinsic_library, LibraryDeclaration, MethodInterface, MethodKind};
use super::scope::{CollectionDecl, ConstDecl, ScopeArena, ScopeId, Storage, VarDecl};
use crate::error::{Error, Result};
use crate::lexer::{Token, TokenKind, KEYWORDS};
use crate::runtime::{canonical_trigger_name, CUSTOM_EVENT_BASE};
use crate::types::{StructDeclaration, TypeId, TypeRegistry, VarKind};

/// Everything the code generator needs from a parse
#[derive(Debug, Clone)]
pub struct ParsedProgram {
    /// Top-level modules in source order
    pub modules: Vec<Module>,
    /// Interned types and struct declarations
    pub registry: TypeRegistry,
    /// All scope frames of the compilation
    pub scopes: ScopeArena,
}

/// Signature of a parsed description script, kept for event validation
#[derive(Debug, Clone)]
struct DescriptionSig {
    name: String,
    parameters: Vec<TypeId>,
}

/// Return-type context of the method currently being parsed
#[derive(Debug, Clone)]
struct MethodContext {
    name: String,
    return_type: TypeId,
}

/// Recursive-descent parser for Tomb source
///
/// Parsing is single-pass: name resolution, type checks, and library
/// patching happen while the token cursor moves forward, so every AST node
/// comes out with its result type already computed. One token of rewind is
/// the only lookahead the grammar needs.
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    registry: TypeRegistry,
    scopes: ScopeArena,
    current_scope: Option<ScopeId>,
    method_ctx: Option<MethodContext>,
    in_contract: bool,
    events: Vec<EventDeclaration>,
    descriptions: Vec<DescriptionSig>,
}

impl Parser {
    /// Creates a parser over a scanned token sequence
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            current: 0,
            registry: TypeRegistry::new(),
            scopes: ScopeArena::new(),
            current_scope: None,
            method_ctx: None,
            in_contract: false,
            events: Vec::new(),
            descriptions: Vec::new(),
        }
    }

    /// Parse the whole token sequence into top-level modules
    ///
    /// Structs register as they are encountered and are referenceable by
    /// every later module; `description` scripts must appear above any
    /// `event` declaration that embeds them.
    pub fn parse(mut self) -> Result<ParsedProgram> {
        let mut modules = Vec::new();
        while !self.is_at_end() {
            let token = self.advance()?;
            if token.kind != TokenKind::Identifier {
                return Err(self.syntax_at(
                    &token,
                    format!("expected top-level declaration, got {}", token),
                ));
            }
            match token.lexeme.as_str() {
                "struct" => self.parse_struct()?,
                "contract" => modules.push(Module::Contract(self.parse_contract(token.line)?)),
                "script" => modules.push(Module::Script(self.parse_script(false, token.line)?)),
                "description" => {
                    modules.push(Module::Script(self.parse_script(true, token.line)?))
                }
                other => {
                    return Err(self.syntax_at(
                        &token,
                        format!("expected top-level declaration, got '{}'", other),
                    ));
                }
            }
        }
        Ok(ParsedProgram {
            modules,
            registry: self.registry,
            scopes: self.scopes,
        })
    }

    // ========================================================================
    // TOP-LEVEL DECLARATIONS
    // ========================================================================

    fn parse_struct(&mut self) -> Result<()> {
        let name = self.expect_identifier("struct name")?;
        self.consume_separator("{")?;
        let mut fields = Vec::new();
        while !self.check_separator("}") {
            let field = self.expect_identifier("field name")?;
            self.consume_separator(":")?;
            let ty = self.parse_value_type()?;
            self.consume_separator(";")?;
            if fields.iter().any(|(n, _)| n == &field.lexeme) {
                return Err(self.shape_at(
                    &field,
                    format!("duplicate field '{}' in struct '{}'", field.lexeme, name.lexeme),
                ));
            }
            fields.push((field.lexeme, ty));
        }
        self.consume_separator("}")?;
        let decl = StructDeclaration {
            name: name.lexeme.clone(),
            fields,
        };
        if self.registry.declare_struct(decl).is_none() {
            return Err(self.shape_at(&name, format!("duplicate struct '{}'", name.lexeme)));
        }
        Ok(())
    }

    fn parse_contract(&mut self, line: usize) -> Result<Contract> {
        let name = self.expect_identifier("contract name")?;
        let scope = self.scopes.push(None, None);
        self.current_scope = Some(scope);
        self.in_contract = true;
        self.events.clear();

        self.consume_separator("{")?;
        let mut methods: Vec<Method> = Vec::new();
        while !self.check_separator("}") {
            let token = self.advance()?;
            if token.kind != TokenKind::Identifier {
                return Err(
                    self.syntax_at(&token, format!("unexpected {} in contract body", token))
                );
            }
            match token.lexeme.as_str() {
                "const" => self.parse_const(scope)?,
                "global" => self.parse_global(scope)?,
                "import" => self.parse_import(scope)?,
                "event" => self.parse_event(&token)?,
                "constructor" => {
                    let method = self.parse_constructor(scope, token.line)?;
                    self.push_method(&mut methods, method, &token)?;
                }
                "public" | "private" => {
                    let is_public = token.lexeme == "public";
                    let method = self.parse_method(scope, is_public, token.line)?;
                    self.push_method(&mut methods, method, &token)?;
                }
                "task" => {
                    let method = self.parse_task(scope, token.line)?;
                    self.push_method(&mut methods, method, &token)?;
                }
                "trigger" => {
                    let method = self.parse_trigger(scope, token.line)?;
                    self.push_method(&mut methods, method, &token)?;
                }
                other => {
                    return Err(self.syntax_at(
                        &token,
                        format!("unexpected '{}' in contract body", other),
                    ));
                }
            }
        }
        self.consume_separator("}")?;

        self.in_contract = false;
        self.current_scope = None;
        Ok(Contract {
            name: name.lexeme,
            scope,
            methods,
            events: std::mem::take(&mut self.events),
            line,
        })
    }

    fn parse_script(&mut self, hidden: bool, line: usize) -> Result<Script> {
        let name = self.expect_identifier("script name")?;
        let scope = self.scopes.push(None, None);
        self.current_scope = Some(scope);
        self.in_contract = false;

        self.consume_separator("{")?;
        let mut main: Option<Method> = None;
        while !self.check_separator("}") {
            let token = self.advance()?;
            if token.kind != TokenKind::Identifier {
                return Err(self.syntax_at(&token, format!("unexpected {} in script body", token)));
            }
            match token.lexeme.as_str() {
                "const" => self.parse_const(scope)?,
                "import" => self.parse_import(scope)?,
                "code" => {
                    if main.is_some() {
                        return Err(self.shape_at(
                            &token,
                            format!("script '{}' already has a code block", name.lexeme),
                        ));
                    }
                    main = Some(self.parse_code_block(scope, token.line)?);
                }
                "global" => {
                    return Err(self.shape_at(
                        &token,
                        "globals are only allowed in contracts".to_string(),
                    ));
                }
                "event" => {
                    return Err(self.shape_at(
                        &token,
                        "events are only allowed in contracts".to_string(),
                    ));
                }
                other => {
                    return Err(
                        self.syntax_at(&token, format!("unexpected '{}' in script body", other))
                    );
                }
            }
        }
        self.consume_separator("}")?;
        self.current_scope = None;

        let main = main.ok_or_else(|| {
            Error::shape(
                name.line,
                name.column,
                format!("script '{}' must declare a code block", name.lexeme),
            )
        })?;
        if hidden {
            self.descriptions.push(DescriptionSig {
                name: name.lexeme.clone(),
                parameters: main
                    .interface
                    .parameters
                    .iter()
                    .map(|(_, ty)| *ty)
                    .collect(),
            });
        }
        Ok(Script {
            name: name.lexeme,
            hidden,
            scope,
            main,
            line,
        })
    }

    fn push_method(&self, methods: &mut Vec<Method>, method: Method, at: &Token) -> Result<()> {
        if methods
            .iter()
            .any(|m| m.interface.name == method.interface.name)
        {
            return Err(self.shape_at(
                at,
                format!("duplicate method '{}'", method.interface.name),
            ));
        }
        methods.push(method);
        Ok(())
    }

    // ========================================================================
    // MODULE ITEMS
    // ========================================================================

    fn parse_const(&mut self, scope: ScopeId) -> Result<()> {
        let name = self.expect_identifier("constant name")?;
        self.consume_separator(":")?;
        let ty = self.parse_value_type()?;
        if self.registry.kind(ty) == VarKind::Struct {
            return Err(self.shape_at(&name, "constants must have a primitive type".to_string()));
        }
        self.consume_separator("=")?;
        let literal_token = self.advance()?;
        let literal = self.token_literal(&literal_token)?;
        if literal.kind() != self.registry.kind(ty) {
            return Err(self.type_at(
                &literal_token,
                format!(
                    "constant '{}' declared as {} but initialized with a {} literal",
                    name.lexeme,
                    self.registry.display(ty),
                    literal.kind()
                ),
            ));
        }
        self.consume_separator(";")?;
        let declared = self.scopes.declare_const(
            scope,
            ConstDecl {
                name: name.lexeme.clone(),
                ty,
                literal: literal_token.lexeme,
            },
        );
        if !declared {
            return Err(self.shape_at(&name, format!("duplicate constant '{}'", name.lexeme)));
        }
        Ok(())
    }

    fn parse_global(&mut self, scope: ScopeId) -> Result<()> {
        let name = self.expect_identifier("global name")?;
        self.consume_separator(":")?;
        let token = self.advance()?;
        let (ty, collection) = match token.kind {
            TokenKind::Type => {
                let kind = VarKind::from_type_name(&token.lexeme)
                    .ok_or_else(|| self.syntax_at(&token, "expected type".to_string()))?;
                if kind.is_storage_collection() {
                    let collection = self.parse_collection_args(kind)?;
                    (self.registry.primitive(kind), Some(collection))
                } else {
                    (self.registry.primitive(kind), None)
                }
            }
            TokenKind::Identifier => {
                let ty = self.registry.struct_type(&token.lexeme).ok_or_else(|| {
                    self.resolution_at(&token, format!("unknown type '{}'", token.lexeme))
                })?;
                (ty, None)
            }
            _ => return Err(self.syntax_at(&token, format!("expected type, got {}", token))),
        };
        self.consume_separator(";")?;
        let declared = self.scopes.declare_var(
            scope,
            VarDecl {
                scope,
                name: name.lexeme.clone(),
                ty,
                storage: Storage::Global,
                collection,
            },
        );
        if !declared {
            return Err(self.shape_at(&name, format!("duplicate global '{}'", name.lexeme)));
        }
        Ok(())
    }

    fn parse_collection_args(&mut self, kind: VarKind) -> Result<CollectionDecl> {
        self.consume_operator("<")?;
        let collection = match kind {
            VarKind::StorageMap => {
                let key = self.parse_value_type()?;
                self.consume_separator(",")?;
                let value = self.parse_value_type()?;
                CollectionDecl::Map { key, value }
            }
            VarKind::StorageList => CollectionDecl::List {
                value: self.parse_value_type()?,
            },
            VarKind::StorageSet => CollectionDecl::Set {
                value: self.parse_value_type()?,
            },
            _ => unreachable!("caller checked the kind"),
        };
        self.consume_operator(">")?;
        Ok(collection)
    }

    fn parse_import(&mut self, scope: ScopeId) -> Result<()> {
        let name = self.expect_identifier("library name")?;
        self.consume_separator(";")?;
        if self.scopes.find_library(scope, &name.lexeme).is_some() {
            return Err(self.shape_at(
                &name,
                format!("library '{}' already imported", name.lexeme),
            ));
        }
        let library = intrinsic_library(&name.lexeme, &mut self.registry).ok_or_else(|| {
            self.resolution_at(&name, format!("unknown library '{}'", name.lexeme))
        })?;
        self.scopes.add_library(scope, library);
        Ok(())
    }

    fn parse_event(&mut self, at: &Token) -> Result<()> {
        if !self.in_contract {
            return Err(self.shape_at(at, "events are only allowed in contracts".to_string()));
        }
        let name = self.expect_identifier("event name")?;
        self.consume_separator(":")?;
        let payload_type = self.parse_value_type()?;
        self.consume_separator("=")?;
        let source_token = self.advance()?;
        let description = match source_token.kind {
            TokenKind::String => DescriptionSource::InlineString(source_token.lexeme.clone()),
            TokenKind::Bytes => {
                let bytes = hex::decode(&source_token.lexeme).map_err(|_| {
                    self.shape_at(&source_token, "invalid event description bytes".to_string())
                })?;
                DescriptionSource::InlineBytes(bytes)
            }
            TokenKind::Identifier => {
                let sig = self
                    .descriptions
                    .iter()
                    .find(|d| d.name == source_token.lexeme)
                    .ok_or_else(|| {
                        self.resolution_at(
                            &source_token,
                            format!("unknown description script '{}'", source_token.lexeme),
                        )
                    })?;
                if sig.parameters.len() != 1 {
                    return Err(self.shape_at(
                        &source_token,
                        format!(
                            "description script '{}' must take exactly one parameter",
                            source_token.lexeme
                        ),
                    ));
                }
                let param = sig.parameters[0];
                if param != payload_type && self.registry.kind(param) != VarKind::Any {
                    return Err(self.shape_at(
                        &source_token,
                        format!(
                            "description script '{}' takes {} but event '{}' carries {}",
                            source_token.lexeme,
                            self.registry.display(param),
                            name.lexeme,
                            self.registry.display(payload_type)
                        ),
                    ));
                }
                DescriptionSource::Script(source_token.lexeme.clone())
            }
            _ => {
                return Err(self.shape_at(
                    &source_token,
                    format!("invalid event description: {}", source_token),
                ));
            }
        };
        self.consume_separator(";")?;
        if self.events.iter().any(|e| e.name == name.lexeme) {
            return Err(self.shape_at(&name, format!("duplicate event '{}'", name.lexeme)));
        }
        let value = CUSTOM_EVENT_BASE + self.events.len() as u32;
        self.events.push(EventDeclaration {
            name: name.lexeme,
            value,
            payload_type,
            description,
            line: at.line,
        });
        Ok(())
    }

    // ========================================================================
    // METHODS
    // ========================================================================

    fn parse_constructor(&mut self, module_scope: ScopeId, line: usize) -> Result<Method> {
        let method = self.parse_callable(
            module_scope,
            "Initialize",
            MethodKind::Constructor,
            true,
            false,
            line,
        )?;
        let params = &method.interface.parameters;
        if params.len() != 1 || self.registry.kind(params[0].1) != VarKind::Address {
            return Err(Error::shape(
                line,
                1,
                "constructor must declare exactly one parameter of type address".to_string(),
            ));
        }
        Ok(method)
    }

    fn parse_method(&mut self, module_scope: ScopeId, is_public: bool, line: usize) -> Result<Method> {
        let name = self.expect_identifier("method name")?;
        self.parse_callable(
            module_scope,
            &name.lexeme,
            MethodKind::Method,
            is_public,
            true,
            line,
        )
    }

    fn parse_task(&mut self, module_scope: ScopeId, line: usize) -> Result<Method> {
        let name = self.expect_identifier("task name")?;
        self.parse_callable(
            module_scope,
            &name.lexeme,
            MethodKind::Task,
            true,
            false,
            line,
        )
    }

    fn parse_trigger(&mut self, module_scope: ScopeId, line: usize) -> Result<Method> {
        let name = self.expect_identifier("trigger name")?;
        let normalized = if name.lexeme.len() >= 2 && name.lexeme[..2].eq_ignore_ascii_case("on") {
            name.lexeme.clone()
        } else {
            format!("on{}", name.lexeme)
        };
        let canonical = canonical_trigger_name(&normalized).ok_or_else(|| {
            self.resolution_at(&name, format!("invalid trigger name '{}'", name.lexeme))
        })?;
        self.parse_callable(
            module_scope,
            canonical,
            MethodKind::Trigger,
            true,
            false,
            line,
        )
    }

    fn parse_code_block(&mut self, module_scope: ScopeId, line: usize) -> Result<Method> {
        self.parse_callable(module_scope, "main", MethodKind::Method, true, true, line)
    }

    /// Shared tail of every callable form: parameters, optional return
    /// type, body
    fn parse_callable(
        &mut self,
        module_scope: ScopeId,
        name: &str,
        kind: MethodKind,
        is_public: bool,
        allow_return_type: bool,
        line: usize,
    ) -> Result<Method> {
        let scope = self.scopes.push(Some(module_scope), Some(name.to_string()));
        let parameters = self.parse_parameters(scope)?;
        let return_type = if allow_return_type && self.check_separator(":") {
            self.consume_separator(":")?;
            self.parse_value_type()?
        } else {
            self.registry.primitive(VarKind::None)
        };

        let interface = MethodInterface {
            library: None,
            name: name.to_string(),
            kind,
            is_public,
            return_type,
            parameters,
        };

        let saved_ctx = self.method_ctx.take();
        self.method_ctx = Some(MethodContext {
            name: name.to_string(),
            return_type,
        });
        let body = self.parse_block(scope)?;
        self.method_ctx = saved_ctx;

        Ok(Method {
            interface,
            scope,
            body,
            line,
        })
    }

    fn parse_parameters(&mut self, scope: ScopeId) -> Result<Vec<(String, TypeId)>> {
        self.consume_separator("(")?;
        let mut parameters = Vec::new();
        while !self.check_separator(")") {
            let name = self.expect_identifier("parameter name")?;
            self.consume_separator(":")?;
            let ty = self.parse_value_type()?;
            let declared = self.scopes.declare_var(
                scope,
                VarDecl {
                    scope,
                    name: name.lexeme.clone(),
                    ty,
                    storage: Storage::Argument,
                    collection: None,
                },
            );
            if !declared {
                return Err(self.shape_at(
                    &name,
                    format!("duplicate parameter '{}'", name.lexeme),
                ));
            }
            parameters.push((name.lexeme, ty));
            if self.check_separator(",") {
                self.consume_separator(",")?;
            } else {
                break;
            }
        }
        self.consume_separator(")")?;
        Ok(parameters)
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    fn parse_block(&mut self, scope: ScopeId) -> Result<StatementBlock> {
        let saved = self.current_scope;
        self.current_scope = Some(scope);
        self.consume_separator("{")?;
        let mut statements = Vec::new();
        while !self.check_separator("}") {
            statements.push(self.parse_statement()?);
        }
        self.consume_separator("}")?;
        self.current_scope = saved;
        Ok(StatementBlock { scope, statements })
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let token = self.advance()?;
        if token.kind != TokenKind::Identifier {
            return Err(self.syntax_at(&token, format!("expected statement, got {}", token)));
        }
        match token.lexeme.as_str() {
            "return" => self.parse_return(&token),
            "throw" => self.parse_throw(&token),
            "emit" => self.parse_emit(&token),
            "asm" => self.parse_asm(&token),
            "local" => self.parse_local(&token),
            "if" => self.parse_if(&token),
            "while" => self.parse_while(&token),
            "do" => self.parse_do_while(&token),
            word if KEYWORDS.contains(&word) => {
                Err(self.syntax_at(&token, format!("unexpected '{}' in statement position", word)))
            }
            _ => {
                if self.check_selector() {
                    // Member call in statement position: put the identifier
                    // back and let the expression parser re-read it.
                    self.rewind()?;
                    let call = self.parse_operand()?;
                    self.consume_separator(";")?;
                    Ok(Statement::MethodCall {
                        call,
                        line: token.line,
                    })
                } else {
                    self.parse_assignment(token)
                }
            }
        }
    }

    fn parse_return(&mut self, at: &Token) -> Result<Statement> {
        let ctx = self
            .method_ctx
            .clone()
            .ok_or_else(|| Error::internal("return statement outside of a method"))?;
        let returns_value = self.registry.kind(ctx.return_type) != VarKind::None;
        if self.check_separator(";") {
            self.consume_separator(";")?;
            if returns_value {
                return Err(self.type_at(
                    at,
                    format!(
                        "method '{}' must return a value of type {}",
                        ctx.name,
                        self.registry.display(ctx.return_type)
                    ),
                ));
            }
            return Ok(Statement::Return {
                value: None,
                line: at.line,
            });
        }
        let value = self.parse_expression()?;
        self.consume_separator(";")?;
        if !returns_value {
            return Err(self.type_at(
                at,
                format!("method '{}' has no return type", ctx.name),
            ));
        }
        if value.result_type() != ctx.return_type {
            return Err(self.type_at(
                at,
                format!(
                    "method '{}' returns {} but expression has type {}",
                    ctx.name,
                    self.registry.display(ctx.return_type),
                    self.registry.display(value.result_type())
                ),
            ));
        }
        Ok(Statement::Return {
            value: Some(value),
            line: at.line,
        })
    }

    fn parse_throw(&mut self, at: &Token) -> Result<Statement> {
        let message = self.advance()?;
        if message.kind != TokenKind::String {
            return Err(self.syntax_at(
                &message,
                format!("throw expects a string message, got {}", message),
            ));
        }
        self.consume_separator(";")?;
        Ok(Statement::Throw {
            message: message.lexeme,
            line: at.line,
        })
    }

    fn parse_emit(&mut self, at: &Token) -> Result<Statement> {
        if !self.in_contract {
            return Err(self.shape_at(at, "emit is only allowed in contracts".to_string()));
        }
        let event_name = self.expect_identifier("event name")?;
        let (value, payload_type) = {
            let event = self
                .events
                .iter()
                .find(|e| e.name == event_name.lexeme)
                .ok_or_else(|| {
                    self.resolution_at(
                        &event_name,
                        format!("unknown event '{}'", event_name.lexeme),
                    )
                })?;
            (event.value, event.payload_type)
        };
        self.consume_separator("(")?;
        let address = self.parse_expression()?;
        self.consume_separator(",")?;
        let payload = self.parse_expression()?;
        self.consume_separator(")")?;
        self.consume_separator(";")?;
        if self.registry.kind(address.result_type()) != VarKind::Address {
            return Err(self.type_at(
                at,
                format!(
                    "emit expects an address as first argument, got {}",
                    self.registry.display(address.result_type())
                ),
            ));
        }
        if payload.result_type() != payload_type {
            return Err(self.type_at(
                at,
                format!(
                    "event '{}' carries {} but payload has type {}",
                    event_name.lexeme,
                    self.registry.display(payload_type),
                    self.registry.display(payload.result_type())
                ),
            ));
        }
        Ok(Statement::Emit {
            event: event_name.lexeme,
            value,
            address,
            payload,
            line: at.line,
        })
    }

    fn parse_asm(&mut self, at: &Token) -> Result<Statement> {
        self.consume_separator("{")?;
        let body = self.advance()?;
        if body.kind != TokenKind::Asm {
            return Err(self.syntax_at(&body, "expected asm body".to_string()));
        }
        self.consume_separator("}")?;
        let lines = body
            .lexeme
            .lines()
            .map(|l| l.trim_start().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        Ok(Statement::Asm {
            lines,
            line: at.line,
        })
    }

    fn parse_local(&mut self, at: &Token) -> Result<Statement> {
        let name = self.expect_identifier("variable name")?;
        self.consume_separator(":")?;
        let ty = self.parse_value_type()?;
        let init = if self.check_operator(":=") {
            self.consume_operator(":=")?;
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.consume_separator(";")?;
        if let Some(init) = &init {
            if init.result_type() != ty {
                return Err(self.type_at(
                    &name,
                    format!(
                        "variable '{}' declared as {} but initialized with {}",
                        name.lexeme,
                        self.registry.display(ty),
                        self.registry.display(init.result_type())
                    ),
                ));
            }
        }
        let scope = self.scope()?;
        let declared = self.scopes.declare_var(
            scope,
            VarDecl {
                scope,
                name: name.lexeme.clone(),
                ty,
                storage: Storage::Local,
                collection: None,
            },
        );
        if !declared {
            return Err(self.shape_at(
                &name,
                format!("variable '{}' already declared in this scope", name.lexeme),
            ));
        }
        Ok(Statement::Local {
            var: VarRef {
                name: name.lexeme,
                scope,
                storage: Storage::Local,
                ty,
            },
            init,
            line: at.line,
        })
    }

    fn parse_if(&mut self, at: &Token) -> Result<Statement> {
        let condition = self.parse_condition("if", at)?;
        let then_block = self.parse_child_block()?;
        let else_block = if self.peek_is_keyword("else") {
            self.advance()?;
            Some(self.parse_child_block()?)
        } else {
            None
        };
        Ok(Statement::If {
            condition,
            then_block,
            else_block,
            line: at.line,
        })
    }

    fn parse_while(&mut self, at: &Token) -> Result<Statement> {
        let condition = self.parse_condition("while", at)?;
        let body = self.parse_child_block()?;
        Ok(Statement::While {
            condition,
            body,
            line: at.line,
        })
    }

    fn parse_do_while(&mut self, at: &Token) -> Result<Statement> {
        let body = self.parse_child_block()?;
        let keyword = self.advance()?;
        if !keyword.is_keyword("while") {
            return Err(self.syntax_at(&keyword, "expected 'while' after do block".to_string()));
        }
        let condition = self.parse_condition("do-while", at)?;
        self.consume_separator(";")?;
        Ok(Statement::DoWhile {
            body,
            condition,
            line: at.line,
        })
    }

    fn parse_condition(&mut self, construct: &str, at: &Token) -> Result<Expression> {
        self.consume_separator("(")?;
        let condition = self.parse_expression()?;
        self.consume_separator(")")?;
        if self.registry.kind(condition.result_type()) != VarKind::Bool {
            return Err(self.type_at(
                at,
                format!(
                    "expected boolean condition in {} statement, got {}",
                    construct,
                    self.registry.display(condition.result_type())
                ),
            ));
        }
        Ok(condition)
    }

    fn parse_child_block(&mut self) -> Result<StatementBlock> {
        let parent = self.scope()?;
        let method = self.scopes.get(parent).method.clone();
        let scope = self.scopes.push(Some(parent), method);
        self.parse_block(scope)
    }

    fn parse_assignment(&mut self, name: Token) -> Result<Statement> {
        let target = self.resolve_assignment_target(&name)?;
        let op_token = self.advance()?;
        if op_token.kind != TokenKind::Operator {
            return Err(self.syntax_at(
                &op_token,
                format!("expected assignment operator, got {}", op_token),
            ));
        }
        let value = if op_token.lexeme == ":=" {
            self.parse_expression()?
        } else if let Some(symbol) = op_token.lexeme.strip_suffix('=') {
            // Compound assignment expands to `var := var op rhs`.
            let op = BinaryOperator::from_symbol(symbol).ok_or_else(|| {
                self.syntax_at(
                    &op_token,
                    format!("expected assignment operator, got '{}'", op_token.lexeme),
                )
            })?;
            let rhs = self.parse_expression()?;
            let left = Expression::Var {
                var: target.clone(),
                line: name.line,
            };
            self.make_binary(op, left, rhs, &op_token)?
        } else {
            return Err(self.syntax_at(
                &op_token,
                format!("expected assignment operator, got '{}'", op_token.lexeme),
            ));
        };
        self.consume_separator(";")?;
        if value.result_type() != target.ty {
            return Err(self.type_at(
                &name,
                format!(
                    "cannot assign {} to '{}' of type {}",
                    self.registry.display(value.result_type()),
                    target.name,
                    self.registry.display(target.ty)
                ),
            ));
        }
        Ok(Statement::Assign {
            target,
            value,
            line: name.line,
        })
    }

    fn resolve_assignment_target(&self, name: &Token) -> Result<VarRef> {
        let scope = self.scope()?;
        if let Some(decl) = self.scopes.find_variable(scope, &name.lexeme) {
            if decl.collection.is_some() {
                return Err(self.shape_at(
                    name,
                    format!("storage collection '{}' cannot be assigned", name.lexeme),
                ));
            }
            return Ok(VarRef {
                name: decl.name.clone(),
                scope: decl.scope,
                storage: decl.storage,
                ty: decl.ty,
            });
        }
        if self.scopes.find_constant(scope, &name.lexeme).is_some() {
            return Err(self.shape_at(
                name,
                format!("cannot assign to constant '{}'", name.lexeme),
            ));
        }
        Err(self.resolution_at(name, format!("unknown identifier '{}'", name.lexeme)))
    }

    // ========================================================================
    // EXPRESSIONS
    // ========================================================================

    /// Parse one expression
    ///
    /// The grammar is right-recursive: `a op b op c` groups as
    /// `a op (b op c)` and every operator shares one precedence level;
    /// parentheses are the only grouping override.
    fn parse_expression(&mut self) -> Result<Expression> {
        let left = self.parse_operand()?;
        self.parse_binary_tail(left)
    }

    fn parse_binary_tail(&mut self, left: Expression) -> Result<Expression> {
        let is_binary = match self.peek() {
            Some(token) if token.kind == TokenKind::Operator => {
                token.lexeme == "!=" || BinaryOperator::from_symbol(&token.lexeme).is_some()
            }
            _ => false,
        };
        if !is_binary {
            return Ok(left);
        }
        let op_token = self.advance()?;
        let right = self.parse_expression()?;
        if op_token.lexeme == "!=" {
            // `!=` lowers to a negated equality.
            let equal = self.make_binary(BinaryOperator::Equal, left, right, &op_token)?;
            let boolean = self.registry.primitive(VarKind::Bool);
            return Ok(Expression::Negation {
                inner: Box::new(equal),
                ty: boolean,
                line: op_token.line,
            });
        }
        let op = BinaryOperator::from_symbol(&op_token.lexeme).ok_or_else(|| {
            self.syntax_at(
                &op_token,
                format!("expected binary operator, got '{}'", op_token.lexeme),
            )
        })?;
        self.make_binary(op, left, right, &op_token)
    }

    fn make_binary(
        &mut self,
        op: BinaryOperator,
        left: Expression,
        mut right: Expression,
        at: &Token,
    ) -> Result<Expression> {
        let string = self.registry.primitive(VarKind::String);
        if op == BinaryOperator::Add
            && left.result_type() == string
            && right.result_type() != string
        {
            right = self.make_cast(string, right, at)?;
        }
        if left.result_type() != right.result_type() {
            return Err(self.type_at(
                at,
                format!(
                    "type mismatch in binary expression: {} {} {}",
                    self.registry.display(left.result_type()),
                    op.symbol(),
                    self.registry.display(right.result_type())
                ),
            ));
        }
        let ty = if op.is_comparison() {
            self.registry.primitive(VarKind::Bool)
        } else {
            left.result_type()
        };
        Ok(Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty,
            line: at.line,
        })
    }

    /// Build a cast, enforcing the string-only conversion rule
    fn make_cast(&self, to: TypeId, inner: Expression, at: &Token) -> Result<Expression> {
        let to_kind = self.registry.kind(to);
        let from_kind = self.registry.kind(inner.result_type());
        let legal = (to_kind == VarKind::String && from_kind.is_value() && from_kind != VarKind::Struct)
            || (from_kind == VarKind::String && to_kind.is_value() && to_kind != VarKind::Struct);
        if !legal {
            return Err(self.type_at(
                at,
                format!(
                    "cannot cast {} to {}",
                    self.registry.display(inner.result_type()),
                    self.registry.display(to)
                ),
            ));
        }
        Ok(Expression::Cast {
            to,
            inner: Box::new(inner),
            line: at.line,
        })
    }

    fn parse_operand(&mut self) -> Result<Expression> {
        let token = self.advance()?;
        match token.kind {
            TokenKind::Separator if token.lexeme == "(" => {
                let inner = self.parse_expression()?;
                self.consume_separator(")")?;
                Ok(inner)
            }
            TokenKind::Number
            | TokenKind::String
            | TokenKind::Bool
            | TokenKind::Address
            | TokenKind::Hash
            | TokenKind::Bytes => {
                let literal = self.token_literal(&token)?;
                let ty = self.registry.primitive(literal.kind());
                Ok(Expression::Literal {
                    value: literal,
                    ty,
                    line: token.line,
                })
            }
            TokenKind::Macro => {
                let kind = MacroKind::from_name(&token.lexeme).ok_or_else(|| {
                    self.resolution_at(&token, format!("unknown macro '${}'", token.lexeme))
                })?;
                let ty = self.registry.primitive(kind.result_kind());
                Ok(Expression::Macro {
                    kind,
                    ty,
                    line: token.line,
                })
            }
            TokenKind::Identifier if KEYWORDS.contains(&token.lexeme.as_str()) => Err(self
                .syntax_at(
                    &token,
                    format!("unexpected '{}' in expression", token.lexeme),
                )),
            TokenKind::Identifier => {
                if self.check_selector() {
                    self.parse_member_call(token)
                } else {
                    self.resolve_value_identifier(token)
                }
            }
            _ => Err(self.syntax_at(&token, format!("expected expression, got {}", token))),
        }
    }

    fn resolve_value_identifier(&self, token: Token) -> Result<Expression> {
        let scope = self.scope()?;
        if let Some(decl) = self.scopes.find_constant(scope, &token.lexeme) {
            let literal = self.const_literal(decl.ty, &decl.literal)?;
            return Ok(Expression::Const {
                name: token.lexeme,
                value: literal,
                ty: decl.ty,
                line: token.line,
            });
        }
        if let Some(decl) = self.scopes.find_variable(scope, &token.lexeme) {
            if decl.collection.is_some() {
                return Err(self.shape_at(
                    &token,
                    format!(
                        "storage collection '{}' must be used through a method call",
                        token.lexeme
                    ),
                ));
            }
            return Ok(Expression::Var {
                var: VarRef {
                    name: decl.name.clone(),
                    scope: decl.scope,
                    storage: decl.storage,
                    ty: decl.ty,
                },
                line: token.line,
            });
        }
        if self.scopes.find_library(scope, &token.lexeme).is_some() {
            return Err(self.resolution_at(
                &token,
                format!("library '{}' cannot be used as a value", token.lexeme),
            ));
        }
        Err(self.resolution_at(&token, format!("unknown identifier '{}'", token.lexeme)))
    }

    fn parse_member_call(&mut self, receiver: Token) -> Result<Expression> {
        self.advance()?; // the selector dot
        let method_name = self.expect_identifier("method name")?;
        let scope = self.scope()?;

        let variable = self.scopes.find_variable(scope, &receiver.lexeme).cloned();
        if let Some(decl) = variable {
            let collection = decl.collection.ok_or_else(|| {
                self.shape_at(
                    &receiver,
                    format!(
                        "member access on non-collection variable '{}'",
                        receiver.lexeme
                    ),
                )
            })?;
            let (library_name, key, value) = match collection {
                CollectionDecl::Map { key, value } => ("Map", Some(key), value),
                CollectionDecl::List { value } => ("List", None, value),
                CollectionDecl::Set { value } => ("Set", None, value),
            };
            let library = self
                .scopes
                .find_library(scope, library_name)
                .cloned()
                .ok_or_else(|| {
                    self.resolution_at(
                        &receiver,
                        format!("library '{}' must be imported before use", library_name),
                    )
                })?;
            let patched = library.patch(&self.registry, key, value);
            // The collection variable's name becomes the literal first
            // argument of the intrinsic call.
            let string = self.registry.primitive(VarKind::String);
            let name_literal = Expression::Literal {
                value: Literal::String(receiver.lexeme.clone()),
                ty: string,
                line: receiver.line,
            };
            let mut args = vec![name_literal];
            args.extend(self.parse_call_args()?);
            return self.build_method_expression(&patched, &method_name, args);
        }

        let library = self.scopes.find_library(scope, &receiver.lexeme).cloned();
        if let Some(library) = library {
            let args = self.parse_call_args()?;
            return self.build_method_expression(&library, &method_name, args);
        }

        Err(self.resolution_at(
            &receiver,
            format!("unknown identifier '{}'", receiver.lexeme),
        ))
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expression>> {
        self.consume_separator("(")?;
        let mut args = Vec::new();
        while !self.check_separator(")") {
            args.push(self.parse_expression()?);
            if self.check_separator(",") {
                self.consume_separator(",")?;
            } else {
                break;
            }
        }
        self.consume_separator(")")?;
        Ok(args)
    }

    fn build_method_expression(
        &self,
        library: &LibraryDeclaration,
        method_name: &Token,
        args: Vec<Expression>,
    ) -> Result<Expression> {
        let interface = library.method(&method_name.lexeme).ok_or_else(|| {
            self.resolution_at(
                method_name,
                format!(
                    "library '{}' has no method '{}'",
                    library.name, method_name.lexeme
                ),
            )
        })?;
        if library.variadic {
            if args.len() < interface.parameters.len() {
                return Err(self.shape_at(
                    method_name,
                    format!(
                        "'{}.{}' expects at least {} arguments, got {}",
                        library.name,
                        interface.name,
                        interface.parameters.len(),
                        args.len()
                    ),
                ));
            }
        } else if args.len() != interface.parameters.len() {
            return Err(self.shape_at(
                method_name,
                format!(
                    "'{}.{}' expects {} arguments, got {}",
                    library.name,
                    interface.name,
                    interface.parameters.len(),
                    args.len()
                ),
            ));
        }
        for (arg, (param_name, param_ty)) in args.iter().zip(&interface.parameters) {
            if self.registry.kind(*param_ty) == VarKind::Any {
                continue;
            }
            if arg.result_type() != *param_ty {
                return Err(self.type_at(
                    method_name,
                    format!(
                        "argument '{}' of '{}.{}' expects {}, got {}",
                        param_name,
                        library.name,
                        interface.name,
                        self.registry.display(*param_ty),
                        self.registry.display(arg.result_type())
                    ),
                ));
            }
        }
        Ok(Expression::Method {
            library: library.name.clone(),
            method: interface.name.clone(),
            args,
            ty: interface.return_type,
            line: method_name.line,
        })
    }

    // ========================================================================
    // SHARED HELPERS
    // ========================================================================

    /// Parse a type usable for values: a primitive or a declared struct
    fn parse_value_type(&mut self) -> Result<TypeId> {
        let token = self.advance()?;
        match token.kind {
            TokenKind::Type => {
                let kind = VarKind::from_type_name(&token.lexeme)
                    .ok_or_else(|| self.syntax_at(&token, "expected type".to_string()))?;
                if kind.is_storage_collection() {
                    return Err(self.shape_at(
                        &token,
                        "storage collections may only be declared as globals".to_string(),
                    ));
                }
                Ok(self.registry.primitive(kind))
            }
            TokenKind::Identifier => self.registry.struct_type(&token.lexeme).ok_or_else(|| {
                self.resolution_at(&token, format!("unknown type '{}'", token.lexeme))
            }),
            _ => Err(self.syntax_at(&token, format!("expected type, got {}", token))),
        }
    }

    fn token_literal(&self, token: &Token) -> Result<Literal> {
        let literal = match token.kind {
            TokenKind::Number => Literal::Number(token.lexeme.parse().map_err(|_| {
                self.syntax_at(token, format!("number literal '{}' out of range", token.lexeme))
            })?),
            TokenKind::Bool => Literal::Bool(token.lexeme == "true"),
            TokenKind::String => Literal::String(token.lexeme.clone()),
            TokenKind::Address => Literal::Address(token.lexeme.clone()),
            TokenKind::Hash => Literal::Hash(token.lexeme.clone()),
            TokenKind::Bytes => Literal::Bytes(token.lexeme.clone()),
            _ => return Err(self.syntax_at(token, format!("expected literal, got {}", token))),
        };
        Ok(literal)
    }

    /// Rebuild the literal of a constant from its stored token text
    fn const_literal(&self, ty: TypeId, text: &str) -> Result<Literal> {
        let literal = match self.registry.kind(ty) {
            VarKind::Number => Literal::Number(
                text.parse()
                    .map_err(|_| Error::internal(format!("bad constant literal '{}'", text)))?,
            ),
            VarKind::Bool => Literal::Bool(text == "true"),
            VarKind::String => Literal::String(text.to_string()),
            VarKind::Address => Literal::Address(text.to_string()),
            VarKind::Hash => Literal::Hash(text.to_string()),
            VarKind::Bytes => Literal::Bytes(text.to_string()),
            kind => {
                return Err(Error::internal(format!(
                    "constant of non-literal kind {}",
                    kind
                )))
            }
        };
        Ok(literal)
    }

    fn scope(&self) -> Result<ScopeId> {
        self.current_scope
            .ok_or_else(|| Error::internal("no active scope"))
    }

    // ========================================================================
    // TOKEN CURSOR
    // ========================================================================

    fn is_at_end(&self) -> bool {
        self.current >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn advance(&mut self) -> Result<Token> {
        match self.tokens.get(self.current) {
            Some(token) => {
                let token = token.clone();
                self.current += 1;
                Ok(token)
            }
            None => {
                let (line, column) = self.end_position();
                Err(Error::syntax(line, column, "unexpected end of input"))
            }
        }
    }

    /// Step the cursor back over the token just consumed
    fn rewind(&mut self) -> Result<()> {
        if self.current == 0 {
            return Err(Error::internal("parser rewind before the first token"));
        }
        self.current -= 1;
        Ok(())
    }

    fn end_position(&self) -> (usize, usize) {
        self.tokens
            .last()
            .map(|t| (t.line, t.column))
            .unwrap_or((1, 1))
    }

    fn check_separator(&self, text: &str) -> bool {
        self.peek().map(|t| t.is_separator(text)).unwrap_or(false)
    }

    fn check_operator(&self, text: &str) -> bool {
        self.peek().map(|t| t.is_operator(text)).unwrap_or(false)
    }

    fn check_selector(&self) -> bool {
        self.peek()
            .map(|t| t.kind == TokenKind::Selector)
            .unwrap_or(false)
    }

    fn peek_is_keyword(&self, word: &str) -> bool {
        self.peek().map(|t| t.is_keyword(word)).unwrap_or(false)
    }

    fn consume_separator(&mut self, text: &str) -> Result<Token> {
        let token = self.advance()?;
        if !token.is_separator(text) {
            return Err(self.syntax_at(&token, format!("expected '{}', got {}", text, token)));
        }
        Ok(token)
    }

    fn consume_operator(&mut self, text: &str) -> Result<Token> {
        let token = self.advance()?;
        if !token.is_operator(text) {
            return Err(self.syntax_at(&token, format!("expected '{}', got {}", text, token)));
        }
        Ok(token)
    }

    fn expect_identifier(&mut self, what: &str) -> Result<Token> {
        let token = self.advance()?;
        if token.kind != TokenKind::Identifier {
            return Err(self.syntax_at(&token, format!("expected {}, got {}", what, token)));
        }
        if KEYWORDS.contains(&token.lexeme.as_str()) {
            return Err(self.syntax_at(
                &token,
                format!("expected {}, got keyword '{}'", what, token.lexeme),
            ));
        }
        Ok(token)
    }

    fn syntax_at(&self, token: &Token, message: String) -> Error {
        Error::syntax(token.line, token.column, message)
    }

    fn resolution_at(&self, token: &Token, message: String) -> Error {
        Error::resolution(token.line, token.column, message)
    }

    fn type_at(&self, token: &Token, message: String) -> Error {
        Error::type_mismatch(token.line, token.column, message)
    }

    fn shape_at(&self, token: &Token, message: String) -> Error {
        Error::shape(token.line, token.column, message)
    }
}
