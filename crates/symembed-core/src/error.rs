//! Scope graph errors.
//!
//! These cover graph-internal failures only (a node id that isn't in the
//! arena, a sort disagreement discovered while building a phi). Everything
//! about malformed IL -- an undefined `Var`, a `Move` that redefines a name
//! at a different sort -- is diagnosed one layer up, in
//! `symembed::EmbedError`, which wraps `ScopeError` via `#[from]`.

use symterm::Sort;
use thiserror::Error;

use crate::id::NodeId;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ScopeError {
    #[error("scope node not found: NodeId({0})")]
    NodeNotFound(NodeId),

    #[error(
        "phi for '{name}' at node {node} disagrees on sort: {first} vs {second}"
    )]
    PhiSortMismatch {
        name: String,
        node: NodeId,
        first: Sort,
        second: Sort,
    },

    #[error("node {node} has no definition for '{name}'")]
    NoSuchDef { node: NodeId, name: String },
}
