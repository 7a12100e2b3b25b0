use serde::{Deserialize, Serialize};
use std::fmt;

use super::library::MethodInterface;
use super::scope::{ScopeId, Storage};
use crate::types::{TypeId, VarKind};

/// A literal value as it appears in source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Literal {
    /// Integer literal
    Number(i64),
    /// Boolean literal
    Bool(bool),
    /// String literal, quotes stripped
    String(String),
    /// Address literal, base58 text without the `@` sigil
    Address(String),
    /// Hash literal, hex text without the `#` sigil
    Hash(String),
    /// Byte-array literal, hex text without the `0x` prefix
    Bytes(String),
}

impl Literal {
    /// Primitive kind of the literal
    pub fn kind(&self) -> VarKind {
        match self {
            Literal::Number(_) => VarKind::Number,
            Literal::Bool(_) => VarKind::Bool,
            Literal::String(_) => VarKind::String,
            Literal::Address(_) => VarKind::Address,
            Literal::Hash(_) => VarKind::Hash,
            Literal::Bytes(_) => VarKind::Bytes,
        }
    }

    /// Textual operand form understood by the VM assembler
    pub fn asm_text(&self) -> String {
        match self {
            Literal::Number(n) => n.to_string(),
            Literal::Bool(b) => b.to_string(),
            Literal::String(s) => format!("\"{}\"", s),
            Literal::Address(a) => format!("@{}", a),
            Literal::Hash(h) => format!("#{}", h),
            Literal::Bytes(b) => format!("0x{}", b),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.asm_text())
    }
}

/// Binary operators of the expression grammar
///
/// `!=` has no variant: the parser lowers it to a negated `Equal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `==`
    Equal,
    /// `<`
    Less,
    /// `>`
    Greater,
    /// `<=`
    LessEqual,
    /// `>=`
    GreaterEqual,
}

impl BinaryOperator {
    /// Parse a source operator symbol
    pub fn from_symbol(symbol: &str) -> Option<BinaryOperator> {
        let op = match symbol {
            "+" => BinaryOperator::Add,
            "-" => BinaryOperator::Sub,
            "*" => BinaryOperator::Mul,
            "/" => BinaryOperator::Div,
            "%" => BinaryOperator::Mod,
            "&" => BinaryOperator::BitAnd,
            "|" => BinaryOperator::BitOr,
            "^" => BinaryOperator::BitXor,
            "<<" => BinaryOperator::Shl,
            ">>" => BinaryOperator::Shr,
            "==" => BinaryOperator::Equal,
            "<" => BinaryOperator::Less,
            ">" => BinaryOperator::Greater,
            "<=" => BinaryOperator::LessEqual,
            ">=" => BinaryOperator::GreaterEqual,
            _ => return None,
        };
        Some(op)
    }

    /// Source symbol of the operator
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::BitAnd => "&",
            BinaryOperator::BitOr => "|",
            BinaryOperator::BitXor => "^",
            BinaryOperator::Shl => "<<",
            BinaryOperator::Shr => ">>",
            BinaryOperator::Equal => "==",
            BinaryOperator::Less => "<",
            BinaryOperator::Greater => ">",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::GreaterEqual => ">=",
        }
    }

    /// True for the operators whose result is `bool` regardless of operands
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::Less
                | BinaryOperator::Greater
                | BinaryOperator::LessEqual
                | BinaryOperator::GreaterEqual
        )
    }
}

/// Scope-dependent `$NAME` macros
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacroKind {
    /// `$THIS_ADDRESS` — address of the module being compiled
    ThisAddress,
    /// `$CALLER` — address of the transaction caller
    Caller,
    /// `$BLOCK_TIME` — timestamp of the current block
    BlockTime,
}

impl MacroKind {
    /// Resolve a macro token lexeme
    pub fn from_name(name: &str) -> Option<MacroKind> {
        match name {
            "THIS_ADDRESS" => Some(MacroKind::ThisAddress),
            "CALLER" => Some(MacroKind::Caller),
            "BLOCK_TIME" => Some(MacroKind::BlockTime),
            _ => None,
        }
    }

    /// Name the VM expects as the `META` operand
    pub fn meta_name(&self) -> &'static str {
        match self {
            MacroKind::ThisAddress => "this_address",
            MacroKind::Caller => "caller",
            MacroKind::BlockTime => "block_time",
        }
    }

    /// Result kind of the expansion
    pub fn result_kind(&self) -> VarKind {
        match self {
            MacroKind::ThisAddress | MacroKind::Caller => VarKind::Address,
            MacroKind::BlockTime => VarKind::Number,
        }
    }
}

/// A resolved reference to a declared variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarRef {
    /// Variable name
    pub name: String,
    /// Frame the declaration lives in
    pub scope: ScopeId,
    /// Storage class of the declaration
    pub storage: Storage,
    /// Declared type
    pub ty: TypeId,
}

/// Expressions
///
/// Every variant carries its computed result type; types flow bottom-up
/// from literals, declarations, and method return types, so no later
/// inference pass exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Literal value
    Literal {
        /// The literal
        value: Literal,
        /// Interned type of the literal
        ty: TypeId,
        /// Source line
        line: usize,
    },
    /// Read of a declared variable
    Var {
        /// Resolved target
        var: VarRef,
        /// Source line
        line: usize,
    },
    /// Read of a declared constant
    Const {
        /// Constant name
        name: String,
        /// Literal bound to the constant
        value: Literal,
        /// Interned type
        ty: TypeId,
        /// Source line
        line: usize,
    },
    /// Binary operation; operand types are equal by construction
    Binary {
        /// Operator
        op: BinaryOperator,
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
        /// Result type
        ty: TypeId,
        /// Source line
        line: usize,
    },
    /// Boolean negation (`!=` lowering)
    Negation {
        /// Negated expression, always `bool`-typed
        inner: Box<Expression>,
        /// Result type (`bool`)
        ty: TypeId,
        /// Source line
        line: usize,
    },
    /// Type conversion, implicit or written
    Cast {
        /// Target type
        to: TypeId,
        /// Converted expression
        inner: Box<Expression>,
        /// Source line
        line: usize,
    },
    /// Intrinsic library method invocation
    Method {
        /// Library the method belongs to
        library: String,
        /// Method name
        method: String,
        /// Arguments in call order
        args: Vec<Expression>,
        /// Return type of the method
        ty: TypeId,
        /// Source line
        line: usize,
    },
    /// Scope-dependent macro
    Macro {
        /// Which macro
        kind: MacroKind,
        /// Result type of the expansion
        ty: TypeId,
        /// Source line
        line: usize,
    },
}

impl Expression {
    /// Computed result type of the expression
    pub fn result_type(&self) -> TypeId {
        match self {
            Expression::Literal { ty, .. }
            | Expression::Const { ty, .. }
            | Expression::Binary { ty, .. }
            | Expression::Negation { ty, .. }
            | Expression::Cast { to: ty, .. }
            | Expression::Method { ty, .. }
            | Expression::Macro { ty, .. } => *ty,
            Expression::Var { var, .. } => var.ty,
        }
    }

    /// Source line the expression starts on
    pub fn line(&self) -> usize {
        match self {
            Expression::Literal { line, .. }
            | Expression::Var { line, .. }
            | Expression::Const { line, .. }
            | Expression::Binary { line, .. }
            | Expression::Negation { line, .. }
            | Expression::Cast { line, .. }
            | Expression::Method { line, .. }
            | Expression::Macro { line, .. } => *line,
        }
    }
}

/// A block of statements owning one scope frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementBlock {
    /// Frame owned by the block; variables declared inside die at `}`
    pub scope: ScopeId,
    /// Statements in source order
    pub statements: Vec<Statement>,
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// `local name : type := init;`
    Local {
        /// Declared variable
        var: VarRef,
        /// Optional initializer
        init: Option<Expression>,
        /// Source line
        line: usize,
    },
    /// `name := expr;` (compound forms are expanded before this point)
    Assign {
        /// Resolved target variable
        target: VarRef,
        /// Value expression, type-equal to the target
        value: Expression,
        /// Source line
        line: usize,
    },
    /// `if (cond) { … } else { … }`
    If {
        /// Condition, `bool`-typed
        condition: Expression,
        /// Then branch
        then_block: StatementBlock,
        /// Optional else branch
        else_block: Option<StatementBlock>,
        /// Source line
        line: usize,
    },
    /// `while (cond) { … }`
    While {
        /// Condition, `bool`-typed
        condition: Expression,
        /// Loop body
        body: StatementBlock,
        /// Source line
        line: usize,
    },
    /// `do { … } while (cond);`
    DoWhile {
        /// Loop body
        body: StatementBlock,
        /// Condition, `bool`-typed
        condition: Expression,
        /// Source line
        line: usize,
    },
    /// `return expr?;`
    Return {
        /// Returned value; present iff the method declares a return type
        value: Option<Expression>,
        /// Source line
        line: usize,
    },
    /// `throw "message";`
    Throw {
        /// Abort message
        message: String,
        /// Source line
        line: usize,
    },
    /// `emit Event(address, payload);`
    Emit {
        /// Declared event name
        event: String,
        /// Numeric event value
        value: u32,
        /// Source address expression
        address: Expression,
        /// Payload expression, type-equal to the event payload type
        payload: Expression,
        /// Source line
        line: usize,
    },
    /// `asm { … }`
    Asm {
        /// Verbatim assembly lines
        lines: Vec<String>,
        /// Source line
        line: usize,
    },
    /// Library method invocation in statement position
    MethodCall {
        /// The call expression
        call: Expression,
        /// Source line
        line: usize,
    },
}

/// A compiled method: interface plus body
#[derive(Debug, Clone)]
pub struct Method {
    /// Signature surfaced in the ABI
    pub interface: MethodInterface,
    /// Method-root scope frame holding the parameters
    pub scope: ScopeId,
    /// Body
    pub body: StatementBlock,
    /// Source line of the declaration
    pub line: usize,
}

/// Where an event's description bytecode comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptionSource {
    /// Inline string, compiled to a minimal description script
    InlineString(String),
    /// Inline byte literal, embedded as-is
    InlineBytes(Vec<u8>),
    /// Reference to a `description` module parsed earlier in the source
    Script(String),
}

/// A declared contract event
#[derive(Debug, Clone)]
pub struct EventDeclaration {
    /// Event name
    pub name: String,
    /// Numeric value: `CUSTOM_EVENT_BASE` plus declaration index
    pub value: u32,
    /// Payload type
    pub payload_type: TypeId,
    /// Description blob source
    pub description: DescriptionSource,
    /// Source line of the declaration
    pub line: usize,
}

/// A parsed contract module
#[derive(Debug, Clone)]
pub struct Contract {
    /// Contract name
    pub name: String,
    /// Module-root scope frame (globals, constants, libraries)
    pub scope: ScopeId,
    /// Methods in declaration order
    pub methods: Vec<Method>,
    /// Events in declaration order
    pub events: Vec<EventDeclaration>,
    /// Source line of the declaration
    pub line: usize,
}

/// A parsed script or description module
#[derive(Debug, Clone)]
pub struct Script {
    /// Script name
    pub name: String,
    /// True for `description` modules
    pub hidden: bool,
    /// Module-root scope frame
    pub scope: ScopeId,
    /// The `code` block as a method named `main`
    pub main: Method,
    /// Source line of the declaration
    pub line: usize,
}

/// A top-level module
#[derive(Debug, Clone)]
pub enum Module {
    /// Persistent contract
    Contract(Contract),
    /// Executable script or hidden description
    Script(Script),
}

impl Module {
    /// Declared module name
    pub fn name(&self) -> &str {
        match self {
            Module::Contract(c) => &c.name,
            Module::Script(s) => &s.name,
        }
    }
}
