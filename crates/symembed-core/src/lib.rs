//! IL surface syntax and the branching scope graph.
//!
//! This crate owns the two pieces that sit below the embedder proper: the
//! statement/expression AST callers build ([`il`]), and the scope graph
//! that gives every definition an SSA name and lazily builds phis at merge
//! points ([`scope`]). Evaluating IL against a scope graph, and everything
//! architecture-specific, lives one layer up in `symembed`.

pub mod error;
pub mod id;
pub mod il;
pub mod scope;

pub use error::ScopeError;
pub use id::NodeId;
pub use il::{BinOp, Endianness, Expr, Stmt, Type, UnOp, Var};
pub use scope::{BranchSide, Definition, NodeKind, ScopeGraph, ScopeNodeData};
