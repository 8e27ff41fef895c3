//! Errors the embedder and extractor can raise.
//!
//! All variants describe structural problems with the input IL or an
//! internal invariant violation; none are locally recoverable. Callers
//! abort the single embedding and, at their discretion, move on to the
//! next IL fragment -- that policy lives outside this crate.

use symembed_core::{NodeId, ScopeError};
use symterm::{Sort, TermError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),

    #[error("sort mismatch in {context}: expected {expected}, found {actual}")]
    SortMismatch {
        expected: Sort,
        actual: Sort,
        context: String,
    },

    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("phi for '{name}' at node {node} has no unique base contributor")]
    MissingBase { name: String, node: NodeId },

    #[error("operand stack not empty after embedding: {remaining} value(s) remain")]
    StackImbalance { remaining: usize },

    #[error("big-endian memory access is unsupported")]
    EndiannessUnsupported,

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    Term(#[from] TermError),
}
