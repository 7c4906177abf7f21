use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub type Symbol = String;

/// A function parameter together with its (possibly decomposed) default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: Symbol,
    pub default: Option<Box<HirExpr>>,
}

/// The argument specification of a function or lambda.
///
/// Lowering decomposes every default expression, so after CFG construction a
/// default is always a plain name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub args: SmallVec<[Param; 4]>,
    pub vararg: Option<Symbol>,
    pub kwonlyargs: Vec<Param>,
    pub kwarg: Option<Symbol>,
}

impl Params {
    pub fn positional_names(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(|p| p.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptClause {
    pub typ: Option<HirExpr>,
    pub name: Option<Symbol>,
    pub body: Vec<HirStmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithItem {
    pub context_expr: HirExpr,
    pub optional_vars: Option<HirExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comprehension {
    pub target: HirExpr,
    pub iter: HirExpr,
    pub ifs: Vec<HirExpr>,
}

/// Statements of the surface language, owned so the lowering can synthesize
/// fresh ones without fabricating source ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HirStmt {
    FunctionDef {
        name: Symbol,
        params: Params,
        body: Vec<HirStmt>,
        decorators: Vec<HirExpr>,
    },
    ClassDef {
        name: Symbol,
        bases: Vec<HirExpr>,
        body: Vec<HirStmt>,
        decorators: Vec<HirExpr>,
    },
    Return {
        value: Option<HirExpr>,
    },
    Delete {
        targets: Vec<HirExpr>,
    },
    Assign {
        targets: Vec<HirExpr>,
        value: HirExpr,
    },
    AugAssign {
        target: HirExpr,
        op: BinOp,
        value: HirExpr,
    },
    AnnAssign {
        target: HirExpr,
        annotation: HirExpr,
        value: Option<HirExpr>,
    },
    For {
        target: HirExpr,
        iter: HirExpr,
        body: Vec<HirStmt>,
        orelse: Vec<HirStmt>,
    },
    While {
        test: HirExpr,
        body: Vec<HirStmt>,
        orelse: Vec<HirStmt>,
    },
    If {
        test: HirExpr,
        body: Vec<HirStmt>,
        orelse: Vec<HirStmt>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<HirStmt>,
    },
    Raise {
        exc: Option<HirExpr>,
        cause: Option<HirExpr>,
    },
    Try {
        body: Vec<HirStmt>,
        handlers: Vec<ExceptClause>,
        orelse: Vec<HirStmt>,
        finalbody: Vec<HirStmt>,
    },
    Assert {
        test: HirExpr,
        msg: Option<HirExpr>,
    },
    /// A single `import name [as asname]`; multi-alias imports are split.
    Import {
        module: Symbol,
        asname: Option<Symbol>,
    },
    ImportFrom {
        module: Option<Symbol>,
        names: Vec<(Symbol, Option<Symbol>)>,
        level: u32,
    },
    Global {
        names: Vec<Symbol>,
    },
    Nonlocal {
        names: Vec<Symbol>,
    },
    Expr {
        value: HirExpr,
    },
    Pass,
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HirExpr {
    BoolOp {
        op: BoolOpKind,
        values: Vec<HirExpr>,
    },
    BinOp {
        left: Box<HirExpr>,
        op: BinOp,
        right: Box<HirExpr>,
    },
    UnaryOp {
        op: UnaryOpKind,
        operand: Box<HirExpr>,
    },
    Lambda {
        params: Params,
        body: Box<HirExpr>,
    },
    IfExp {
        test: Box<HirExpr>,
        body: Box<HirExpr>,
        orelse: Box<HirExpr>,
    },
    Dict {
        keys: Vec<Option<HirExpr>>,
        values: Vec<HirExpr>,
    },
    Set {
        elts: Vec<HirExpr>,
    },
    ListComp {
        elt: Box<HirExpr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: Box<HirExpr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<HirExpr>,
        value: Box<HirExpr>,
        generators: Vec<Comprehension>,
    },
    GeneratorExp {
        elt: Box<HirExpr>,
        generators: Vec<Comprehension>,
    },
    Yield {
        value: Option<Box<HirExpr>>,
    },
    YieldFrom {
        value: Box<HirExpr>,
    },
    Compare {
        left: Box<HirExpr>,
        ops: Vec<CmpOpKind>,
        comparators: Vec<HirExpr>,
    },
    Call {
        func: Box<HirExpr>,
        args: Vec<HirExpr>,
        keywords: Vec<(Option<Symbol>, HirExpr)>,
    },
    FormattedValue {
        value: Box<HirExpr>,
        format_spec: Option<Box<HirExpr>>,
    },
    JoinedStr {
        values: Vec<HirExpr>,
    },
    Literal(Literal),
    Attribute {
        value: Box<HirExpr>,
        attr: Symbol,
    },
    Subscript {
        value: Box<HirExpr>,
        slice: Box<HirExpr>,
    },
    Starred {
        value: Box<HirExpr>,
    },
    Name(Symbol),
    List {
        elts: Vec<HirExpr>,
    },
    Tuple {
        elts: Vec<HirExpr>,
    },
    Slice {
        lower: Option<Box<HirExpr>>,
        upper: Option<Box<HirExpr>>,
        step: Option<Box<HirExpr>>,
    },
}

impl HirExpr {
    pub fn name(sym: impl Into<Symbol>) -> Self {
        HirExpr::Name(sym.into())
    }

    pub fn is_name(&self) -> bool {
        matches!(self, HirExpr::Name(_))
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            HirExpr::Name(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int,
    Float,
    Complex,
    Str(String),
    Bytes,
    Bool(bool),
    None,
    Ellipsis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    FloorDiv,
}

impl BinOp {
    /// The forward dunder method the operator dispatches to.
    pub fn dunder(self) -> &'static str {
        match self {
            BinOp::Add => "__add__",
            BinOp::Sub => "__sub__",
            BinOp::Mult => "__mul__",
            BinOp::MatMult => "__matmul__",
            BinOp::Div => "__truediv__",
            BinOp::Mod => "__mod__",
            BinOp::Pow => "__pow__",
            BinOp::LShift => "__lshift__",
            BinOp::RShift => "__rshift__",
            BinOp::BitOr => "__or__",
            BinOp::BitXor => "__xor__",
            BinOp::BitAnd => "__and__",
            BinOp::FloorDiv => "__floordiv__",
        }
    }

    /// The reflected dunder method, tried as a fallback join.
    pub fn reflected_dunder(self) -> &'static str {
        match self {
            BinOp::Add => "__radd__",
            BinOp::Sub => "__rsub__",
            BinOp::Mult => "__rmul__",
            BinOp::MatMult => "__rmatmul__",
            BinOp::Div => "__rtruediv__",
            BinOp::Mod => "__rmod__",
            BinOp::Pow => "__rpow__",
            BinOp::LShift => "__rlshift__",
            BinOp::RShift => "__rrshift__",
            BinOp::BitOr => "__ror__",
            BinOp::BitXor => "__rxor__",
            BinOp::BitAnd => "__rand__",
            BinOp::FloorDiv => "__rfloordiv__",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOpKind {
    Invert,
    Not,
    UAdd,
    USub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOpKind {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}
