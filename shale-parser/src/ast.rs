//! The abstract syntax tree.
//!
//! Nodes are immutable after construction and exclusively own their
//! children. Every node carries the source position of its first token;
//! positions propagate into every error message the runtime produces.

use std::rc::Rc;

use crate::token::SourcePosition;

/// A parsed program: the top-level statement list.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    /// Top-level statements in source order.
    pub body: Vec<Stmt>,
}

/// A block of statements delimited by braces.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    /// The statements of the block.
    pub body: Vec<Stmt>,
    /// Position of the opening brace.
    pub pos: SourcePosition,
}

/// A statement.
#[derive(Clone, Debug, PartialEq)]
pub struct Stmt {
    /// What kind of statement this is.
    pub kind: StmtKind,
    /// Position of the statement's first token.
    pub pos: SourcePosition,
}

/// Assignment operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
}

/// Statement variants.
#[derive(Clone, Debug, PartialEq)]
pub enum StmtKind {
    /// `a, b = x, y` and the compound forms.
    Assignment {
        /// Assignment targets (identifiers, indexes, attributes).
        targets: Vec<Expr>,
        /// The assignment operator.
        op: AssignOp,
        /// Right-hand values.
        values: Vec<Expr>,
        /// True for `global a = …` (module scope only).
        global: bool,
    },
    /// A bare expression evaluated for its effects.
    Expression(Expr),
    /// `if cond { … } else …`; `else_branch` is either a block statement or
    /// a chained `if`.
    If {
        cond: Expr,
        then_block: Block,
        else_branch: Option<Box<Stmt>>,
    },
    /// `while cond { … }`.
    While { cond: Expr, body: Block },
    /// `for a, b in xs, ys { … }`.
    ForIn {
        targets: Vec<Expr>,
        iterables: Vec<Expr>,
        body: Block,
    },
    /// `switch subject { case … default … }`. A missing subject compares
    /// each case against `true`.
    Switch {
        subject: Option<Expr>,
        cases: Vec<CaseClause>,
        default: Option<Block>,
    },
    /// `try { … } catch … finally { … }`.
    Try {
        body: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
    },
    /// `throw expr`.
    Throw(Expr),
    /// `defer stmt`.
    Defer(Box<Stmt>),
    /// `return a, b`; multiple values become a tuple.
    Return(Vec<Expr>),
    /// `break`.
    Break,
    /// `continue`.
    Continue,
    /// `del name, a[i]`.
    Del(Vec<Expr>),
    /// `import "path" as name`.
    Import { path: String, alias: String },
    /// `varenv NAME = expr`.
    Varenv { name: String, value: Expr },
    /// A nested `{ … }` block.
    Block(Block),
    /// `func name(…) { … }`.
    FuncDecl(Rc<FuncDecl>),
    /// `class Name(Parent, Iface…) { … }`.
    ClassDecl(Rc<ClassDecl>),
    /// `interface Name(Base…) { … }`.
    IfaceDecl(Rc<IfaceDecl>),
    /// `cmd name { … }`.
    CmdDecl { name: String, body: Block },
    /// `alias name = word…`.
    AliasDecl { name: String, words: Vec<CmdPiece> },
    /// A shell command statement.
    Command(Cmd),
}

/// One `case e1, e2 { … }` clause of a switch statement.
#[derive(Clone, Debug, PartialEq)]
pub struct CaseClause {
    /// Expressions compared against the switch subject.
    pub exprs: Vec<Expr>,
    /// The clause body.
    pub body: Block,
    /// Position of the `case` keyword.
    pub pos: SourcePosition,
}

/// One `catch T1, T2 as v { … }` clause of a try statement.
#[derive(Clone, Debug, PartialEq)]
pub struct CatchClause {
    /// Type expressions the thrown object is matched against.
    pub types: Vec<Expr>,
    /// Optional binding name for the caught object.
    pub var: Option<String>,
    /// The clause body.
    pub body: Block,
    /// Position of the `catch` keyword.
    pub pos: SourcePosition,
}

/// A function parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Default value, if any.
    pub default: Option<Expr>,
    /// True for the trailing `rest...` parameter.
    pub variadic: bool,
    /// Position of the parameter name.
    pub pos: SourcePosition,
}

/// A function declaration or literal.
#[derive(Clone, Debug, PartialEq)]
pub struct FuncDecl {
    /// The declared name; empty for anonymous function literals.
    pub name: String,
    /// Declared parameters in order.
    pub params: Vec<Param>,
    /// The function body; absent for abstract interface methods.
    pub body: Option<Block>,
    /// True for `static func` inside a class body.
    pub is_static: bool,
    /// Position of the `func` keyword.
    pub pos: SourcePosition,
}

/// A member of a class body.
#[derive(Clone, Debug, PartialEq)]
pub enum ClassMember {
    /// A method declaration.
    Method(Rc<FuncDecl>),
    /// A nested class, registered into the outer type's scope.
    NestedClass(Rc<ClassDecl>),
    /// An attribute default: `name = expr`.
    Attribute {
        name: String,
        value: Expr,
        pos: SourcePosition,
    },
}

/// A class declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassDecl {
    /// The class name.
    pub name: String,
    /// Parent expressions: at most one base type plus any interfaces.
    pub parents: Vec<Expr>,
    /// Body members in declaration order.
    pub members: Vec<ClassMember>,
    /// Position of the `class` keyword.
    pub pos: SourcePosition,
}

/// An interface declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct IfaceDecl {
    /// The interface name.
    pub name: String,
    /// Interfaces this one extends.
    pub parents: Vec<Expr>,
    /// Abstract method signatures.
    pub methods: Vec<Rc<FuncDecl>>,
    /// Position of the `interface` keyword.
    pub pos: SourcePosition,
}

/// Binary operators (comparison operators included; dispatch is uniform).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    NotEq,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    And,
    Or,
    In,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    BitNot,
}

/// An expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    /// What kind of expression this is.
    pub kind: ExprKind,
    /// Position of the expression's first token.
    pub pos: SourcePosition,
}

/// Literal payloads.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
}

/// Expression variants.
#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    /// A literal value.
    Literal(Literal),
    /// An identifier reference.
    Ident(String),
    /// `[a, b, c]`.
    ArrayLit(Vec<Expr>),
    /// `(a, b)`.
    TupleLit(Vec<Expr>),
    /// `{k: v, …}`.
    MapLit(Vec<(Expr, Expr)>),
    /// `obj[index]`.
    Index { obj: Box<Expr>, index: Box<Expr> },
    /// `obj[start:end]`; either bound may be omitted.
    Slice {
        obj: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
    /// `obj.attr`.
    Attr { obj: Box<Expr>, name: String },
    /// `callee(args…, name = value…)`.
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    /// A unary operation.
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// A binary or comparison operation.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `cond ? a : b`.
    Conditional {
        cond: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
    /// `lo..hi`.
    Range { start: Box<Expr>, end: Box<Expr> },
    /// An anonymous `func (…) { … }` literal.
    FuncLit(Rc<FuncDecl>),
    /// `$(cmd)` in expression position; yields a command-result object.
    CmdSub(Box<Cmd>),
}

/// Redirection kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirKind {
    /// `N> file` (truncate).
    Out,
    /// `N>> file` (append).
    Append,
    /// `N< file`.
    In,
    /// `&> file` (stdout and stderr).
    OutErr,
    /// `<<< word` (here-string).
    HereString,
}

/// A single I/O redirection attached to a command.
#[derive(Clone, Debug, PartialEq)]
pub struct IoRedirect {
    /// Explicit descriptor number (`2>`), if present.
    pub fd: Option<u32>,
    /// The redirection operator.
    pub kind: RedirKind,
    /// The target word (a file path or here-string body).
    pub target: Vec<CmdPiece>,
    /// Position of the operator.
    pub pos: SourcePosition,
}

/// A fragment of a command word. Adjacent pieces whose predecessor has
/// `blank_after == false` are concatenated into a single argument word.
#[derive(Clone, Debug, PartialEq)]
pub enum CmdPiece {
    /// Literal text (a bare word or quoted segment).
    Literal {
        text: String,
        blank_after: bool,
        /// True for quoted segments; quoting suppresses tilde and glob
        /// expansion and field splitting.
        quoted: bool,
        pos: SourcePosition,
    },
    /// `$name` variable reference.
    Var {
        name: String,
        blank_after: bool,
        pos: SourcePosition,
    },
    /// `${expr}` interpolation.
    Expr {
        expr: Box<Expr>,
        blank_after: bool,
        pos: SourcePosition,
    },
    /// `$(cmd)` command substitution.
    CmdSub {
        cmd: Box<Cmd>,
        blank_after: bool,
        /// True when the substitution appeared inside double quotes; quoted
        /// substitutions are never field-split.
        quoted: bool,
        pos: SourcePosition,
    },
}

impl CmdPiece {
    /// Returns whether unquoted whitespace followed this piece.
    pub fn blank_after(&self) -> bool {
        match self {
            Self::Literal { blank_after, .. }
            | Self::Var { blank_after, .. }
            | Self::Expr { blank_after, .. }
            | Self::CmdSub { blank_after, .. } => *blank_after,
        }
    }

    /// Returns the position of the piece.
    pub fn pos(&self) -> SourcePosition {
        match self {
            Self::Literal { pos, .. }
            | Self::Var { pos, .. }
            | Self::Expr { pos, .. }
            | Self::CmdSub { pos, .. } => *pos,
        }
    }
}

/// `&&` / `||`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AndOrOp {
    And,
    Or,
}

/// A command-language node.
#[derive(Clone, Debug, PartialEq)]
pub enum Cmd {
    /// A simple command: a sequence of word pieces forming argv.
    Simple(SimpleCmd),
    /// A command whose name is a file path (`./build.sh args`).
    FilePath(SimpleCmd),
    /// A command with attached redirections.
    Redirected {
        cmd: Box<Cmd>,
        redirects: Vec<IoRedirect>,
    },
    /// `left | right` (or `left |& right` when `stderr_too` is set).
    Pipe {
        left: Box<Cmd>,
        right: Box<Cmd>,
        stderr_too: bool,
    },
    /// `left && right` / `left || right`.
    AndOr {
        op: AndOrOp,
        left: Box<Cmd>,
        right: Box<Cmd>,
    },
    /// `cmd &`.
    Background(Box<Cmd>),
}

impl Cmd {
    /// Returns the position of the leftmost simple command.
    pub fn pos(&self) -> SourcePosition {
        match self {
            Self::Simple(simple) | Self::FilePath(simple) => simple.pos,
            Self::Redirected { cmd, .. } | Self::Background(cmd) => cmd.pos(),
            Self::Pipe { left, .. } | Self::AndOr { left, .. } => left.pos(),
        }
    }
}

/// A simple command: its word pieces in source order.
#[derive(Clone, Debug, PartialEq)]
pub struct SimpleCmd {
    /// The word pieces; grouping into argv words follows the blank-after
    /// flags.
    pub pieces: Vec<CmdPiece>,
    /// Position of the first piece.
    pub pos: SourcePosition,
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessEq => "<=",
            Self::GreaterEq => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::In => "in",
        };
        f.write_str(text)
    }
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Neg => "-",
            Self::Pos => "+",
            Self::Not => "!",
            Self::BitNot => "~",
        };
        f.write_str(text)
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Str(s) => write!(f, "\"{}\"", s.escape_default()),
        }
    }
}

/// Canonical (fully parenthesized) rendering; parsing the output yields a
/// token-equivalent expression.
impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ExprKind::Literal(lit) => write!(f, "{lit}"),
            ExprKind::Ident(name) => f.write_str(name),
            ExprKind::ArrayLit(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            ExprKind::TupleLit(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            ExprKind::MapLit(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            ExprKind::Index { obj, index } => write!(f, "{obj}[{index}]"),
            ExprKind::Slice { obj, start, end } => {
                write!(f, "{obj}[")?;
                if let Some(start) = start {
                    write!(f, "{start}")?;
                }
                f.write_str(":")?;
                if let Some(end) = end {
                    write!(f, "{end}")?;
                }
                f.write_str("]")
            }
            ExprKind::Attr { obj, name } => write!(f, "{obj}.{name}"),
            ExprKind::Call {
                callee,
                args,
                kwargs,
            } => {
                write!(f, "{callee}(")?;
                let mut first = true;
                for arg in args {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{arg}")?;
                }
                for (name, value) in kwargs {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{name} = {value}")?;
                }
                f.write_str(")")
            }
            ExprKind::Unary { op, operand } => write!(f, "{op}({operand})"),
            ExprKind::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            ExprKind::Conditional {
                cond,
                then_value,
                else_value,
            } => write!(f, "({cond} ? {then_value} : {else_value})"),
            ExprKind::Range { start, end } => write!(f, "({start} .. {end})"),
            ExprKind::FuncLit(_) => f.write_str("func (...) { ... }"),
            ExprKind::CmdSub(_) => f.write_str("$(...)"),
        }
    }
}
