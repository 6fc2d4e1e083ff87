//! The source AST: a plain owned tree of nodes, one enum per grammar
//! category (`TypeExpr`, `Expr`, `Stmt`, `ClassMember`, `TopLevel`).
//!
//! Every node carries a [`NodeId`] and a [`Span`]. Later passes never
//! mutate these nodes in place; instead they build a side table keyed by
//! `NodeId` (see `dragon-compiler::resolver::Annotations`), which keeps
//! this crate free of interior mutability and lets the same AST be
//! resolved, re-resolved, or serialized without aliasing concerns.

use dragon_diagnostics::Span;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Opaque identity for an AST node, assigned during parsing. Stable for
/// the lifetime of the tree; used as the key into resolver/codegen
/// side tables instead of storing annotations on the node itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// Hands out fresh, globally unique [`NodeId`]s for one parse.
#[derive(Debug, Default)]
pub struct NodeIdGen;

impl NodeIdGen {
    pub fn fresh(&mut self) -> NodeId {
        NodeId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub type Ident = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeExpr {
    Name { id: NodeId, span: Span, name: Ident },
    GetName { id: NodeId, span: Span, base: Box<TypeExpr>, name: Ident },
    Generic { id: NodeId, span: Span, base: Box<TypeExpr>, args: Vec<TypeExpr> },
}

impl TypeExpr {
    pub fn span(&self) -> Span {
        match self {
            TypeExpr::Name { span, .. } | TypeExpr::GetName { span, .. } | TypeExpr::Generic { span, .. } => *span,
        }
    }

    /// The leaf name of a (possibly dotted/generic) type reference —
    /// `Foo` for `Foo`, `Foo` for `mod.Foo`, `Box` for `Box<Int>`.
    pub fn head_name(&self) -> &str {
        match self {
            TypeExpr::Name { name, .. } => name,
            TypeExpr::GetName { name, .. } => name,
            TypeExpr::Generic { base, .. } => base.head_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOpKind {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralKind {
    Num(String),
    Hex(String),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    BinOp { id: NodeId, span: Span, left: Box<Expr>, op: BinOpKind, right: Box<Expr> },
    Unary { id: NodeId, span: Span, op: UnaryOpKind, right: Box<Expr> },
    Call { id: NodeId, span: Span, callee: Box<Expr>, args: Vec<Expr> },
    Cast { id: NodeId, span: Span, obj: Box<Expr>, ty: TypeExpr },
    New { id: NodeId, span: Span, class: TypeExpr, args: Vec<Expr> },
    Grouping { id: NodeId, span: Span, inner: Box<Expr> },
    GetVar { id: NodeId, span: Span, name: Ident },
    SetVar { id: NodeId, span: Span, name: Ident, value: Box<Expr> },
    GetAttr { id: NodeId, span: Span, obj: Box<Expr>, attr: Ident },
    SetAttr { id: NodeId, span: Span, obj: Box<Expr>, attr: Ident, value: Box<Expr> },
    Literal { id: NodeId, span: Span, kind: LiteralKind },
}

impl Expr {
    pub fn id(&self) -> NodeId {
        match self {
            Expr::BinOp { id, .. }
            | Expr::Unary { id, .. }
            | Expr::Call { id, .. }
            | Expr::Cast { id, .. }
            | Expr::New { id, .. }
            | Expr::Grouping { id, .. }
            | Expr::GetVar { id, .. }
            | Expr::SetVar { id, .. }
            | Expr::GetAttr { id, .. }
            | Expr::SetAttr { id, .. }
            | Expr::Literal { id, .. } => *id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Expr::BinOp { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Call { span, .. }
            | Expr::Cast { span, .. }
            | Expr::New { span, .. }
            | Expr::Grouping { span, .. }
            | Expr::GetVar { span, .. }
            | Expr::SetVar { span, .. }
            | Expr::GetAttr { span, .. }
            | Expr::SetAttr { span, .. }
            | Expr::Literal { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Block { id: NodeId, span: Span, stmts: Vec<Stmt> },
    If { id: NodeId, span: Span, cond: Expr, then_branch: Box<Stmt>, else_branch: Option<Box<Stmt>> },
    While { id: NodeId, span: Span, cond: Expr, body: Box<Stmt> },
    Var { id: NodeId, span: Span, name: Ident, ty: Option<TypeExpr>, value: Expr },
    Delete { id: NodeId, span: Span, obj: Expr },
    Return { id: NodeId, span: Span, value: Option<Expr> },
    ExprStmt { id: NodeId, span: Span, expr: Expr },
}

impl Stmt {
    pub fn id(&self) -> NodeId {
        match self {
            Stmt::Block { id, .. }
            | Stmt::If { id, .. }
            | Stmt::While { id, .. }
            | Stmt::Var { id, .. }
            | Stmt::Delete { id, .. }
            | Stmt::Return { id, .. }
            | Stmt::ExprStmt { id, .. } => *id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Stmt::Block { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Var { span, .. }
            | Stmt::Delete { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::ExprStmt { span, .. } => *span,
        }
    }
}

/// An ordered parameter list: order is part of a signature's identity.
pub type Params = Vec<(Ident, TypeExpr)>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClassMember {
    Attr { id: NodeId, span: Span, name: Ident, ty: TypeExpr },
    Method { id: NodeId, span: Span, name: Ident, params: Params, ret: Option<TypeExpr>, body: Vec<Stmt> },
    Constructor { id: NodeId, span: Span, params: Params, body: Vec<Stmt> },
}

impl ClassMember {
    pub fn name(&self) -> Option<&str> {
        match self {
            ClassMember::Attr { name, .. } => Some(name),
            ClassMember::Method { name, .. } => Some(name),
            ClassMember::Constructor { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overload {
    pub id: NodeId,
    pub span: Span,
    pub params: Params,
    pub ret: Option<TypeExpr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TopLevel {
    Function { id: NodeId, span: Span, name: Ident, params: Params, ret: Option<TypeExpr>, body: Vec<Stmt> },
    Class { id: NodeId, span: Span, name: Ident, bases: Vec<TypeExpr>, body: Vec<ClassMember> },
    GenericClass { id: NodeId, span: Span, name: Ident, bases: Vec<TypeExpr>, body: Vec<ClassMember>, type_vars: Vec<Ident>, implements: Vec<TopLevel> },
    OverloadedFunction { id: NodeId, span: Span, name: Ident, overloads: Vec<Overload> },
    Import { id: NodeId, span: Span, file: String },
}

impl TopLevel {
    pub fn id(&self) -> NodeId {
        match self {
            TopLevel::Function { id, .. }
            | TopLevel::Class { id, .. }
            | TopLevel::GenericClass { id, .. }
            | TopLevel::OverloadedFunction { id, .. }
            | TopLevel::Import { id, .. } => *id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            TopLevel::Function { name, .. }
            | TopLevel::Class { name, .. }
            | TopLevel::GenericClass { name, .. }
            | TopLevel::OverloadedFunction { name, .. } => Some(name),
            TopLevel::Import { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub top_level: Vec<TopLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique_and_monotonic() {
        let mut gen = NodeIdGen;
        let a = gen.fresh();
        let b = gen.fresh();
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }

    #[test]
    fn program_round_trips_through_json() {
        let mut gen = NodeIdGen;
        let prog = Program {
            top_level: vec![TopLevel::Import { id: gen.fresh(), span: Span::point(1, 0), file: "other.drgn".into() }],
        };
        let json = serde_json::to_string(&prog).expect("serialize");
        let back: Program = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(prog, back);
    }
}
