//! The compiled expression tree, plus the per-term operator-call chain
//! (`|unquote()`, `|upper()`, ...) applied before comparison.

#[derive(Debug, Clone)]
pub enum OpCall {
    Unquote,
    Upper,
    Lower,
    StartsWith(String),
    Replace(String, String),
    /// `id` is the op-call's sequential position in the source expression,
    /// standing in for "the location key is the byte offset of the opCall"
    /// — both are just a stable per-callsite identity for the seen-set.
    Unique(usize),
}

#[derive(Debug, Clone)]
pub enum TermValue {
    Field(String),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone)]
pub struct Term {
    pub value: TermValue,
    pub ops: Vec<OpCall>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    ReMatch,
    ReNotMatch,
    Contains,
    NotContains,
    Assign,
    AddAssign,
    SubAssign,
}

impl CmpOp {
    pub fn from_token(op: &str) -> Option<Self> {
        Some(match op {
            "=" | "==" => CmpOp::Eq,
            "!=" => CmpOp::Ne,
            "<" => CmpOp::Lt,
            ">" => CmpOp::Gt,
            "<=" => CmpOp::Le,
            ">=" => CmpOp::Ge,
            "=~" => CmpOp::ReMatch,
            "!~" => CmpOp::NotContains,
            "~" => CmpOp::Contains,
            ":=" => CmpOp::Assign,
            "=+" => CmpOp::AddAssign,
            "=-" => CmpOp::SubAssign,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub enum Rhs {
    Xxx,
    Term(Term),
}

#[derive(Debug, Clone)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Cmp {
        left: Term,
        op: CmpOp,
        right: Rhs,
    },
}
