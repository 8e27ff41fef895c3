//! Term algebra errors.
//!
//! These are raised only for violations of the term algebra's own sort
//! discipline (e.g. concatenating two array-sorted terms). Everything
//! specific to IL evaluation -- redefining a variable at a different sort,
//! an unresolved `Var`, and so on -- is a `symembed::EmbedError`, not a
//! `TermError`; this crate knows nothing about IL or scopes.

use crate::sort::Sort;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum TermError {
    #[error("expected a bit-vector sort, found {0}")]
    NotBitVec(Sort),

    #[error("expected an array sort, found {0}")]
    NotArray(Sort),

    #[error("sort mismatch: expected {expected}, found {found}")]
    SortMismatch { expected: Sort, found: Sort },
}
