//! The term algebra: bit-vector and array valued expressions.
//!
//! This is a small, self-contained stand-in for the bit-vector/array
//! fragment of a real SMT term library (the kind `z3`, `boolector`, or
//! `bitwuzla` bindings would provide). Terms are pure values -- building a
//! `Term` never fails except when the two operands genuinely disagree on
//! sort, and the algebra performs no simplification on its own (an SMT
//! backend is expected to do that once these terms reach it).

use std::collections::BTreeSet;

use crate::error::TermError;
use crate::sort::Sort;

/// A bit-vector or array valued expression.
///
/// `Term` is cheap to clone (an `Rc`-free tree of small enums and boxes);
/// embedding a single instruction builds and discards many short-lived
/// terms, so cloning is preferred over lifetime-threading throughout this
/// crate and its dependents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// A literal bit-vector constant.
    Literal { value: u128, width: u32 },
    /// A named free constant: an architectural `.initial`, a fresh
    /// `unknown_k`, or an SSA-named definition produced by the embedder.
    Const { name: String, sort: Sort },
    Unary {
        op: UnaryOp,
        arg: Box<Term>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Term>,
        rhs: Box<Term>,
    },
    /// Inclusive bit range `[hi, lo]` of `arg`.
    Extract {
        hi: u32,
        lo: u32,
        arg: Box<Term>,
    },
    Concat {
        hi: Box<Term>,
        lo: Box<Term>,
    },
    ZeroExtend {
        added_bits: u32,
        arg: Box<Term>,
    },
    SignExtend {
        added_bits: u32,
        arg: Box<Term>,
    },
    Ite {
        cond: Box<BoolExpr>,
        then_branch: Box<Term>,
        else_branch: Box<Term>,
    },
    Select {
        array: Box<Term>,
        index: Box<Term>,
    },
    Store {
        array: Box<Term>,
        index: Box<Term>,
        value: Box<Term>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    URem,
    SDiv,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

/// A boolean-sorted predicate over terms, used for branch guards and path
/// conditions. Kept distinct from `Term` the way a real SMT library
/// distinguishes `Bool` from `BitVec(1)` -- comparisons in the IL produce a
/// one-bit `Term` (via [`Term::ite_bv`]), but guards and path conditions are
/// conjoined and negated as booleans, not bit-vectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoolExpr {
    Eq(Box<Term>, Box<Term>),
    Ult(Box<Term>, Box<Term>),
    Ule(Box<Term>, Box<Term>),
    Slt(Box<Term>, Box<Term>),
    Sle(Box<Term>, Box<Term>),
    /// `term == 1`, for converting a one-bit `Term` (e.g. a branch
    /// condition) into a boolean.
    IsOne(Box<Term>),
    Not(Box<BoolExpr>),
    And(Vec<BoolExpr>),
}

impl Term {
    pub fn literal(value: u128, width: u32) -> Term {
        Term::Literal { value, width }
    }

    pub fn const_(name: impl Into<String>, sort: Sort) -> Term {
        Term::Const {
            name: name.into(),
            sort,
        }
    }

    pub fn sort(&self) -> Sort {
        match self {
            Term::Literal { width, .. } => Sort::bv(*width),
            Term::Const { sort, .. } => *sort,
            Term::Unary { arg, .. } => arg.sort(),
            Term::Binary { lhs, .. } => lhs.sort(),
            Term::Extract { hi, lo, .. } => Sort::bv(hi - lo + 1),
            Term::Concat { hi, lo } => {
                let hi_w = hi.sort().bv_width().unwrap_or(0);
                let lo_w = lo.sort().bv_width().unwrap_or(0);
                Sort::bv(hi_w + lo_w)
            }
            Term::ZeroExtend { added_bits, arg } | Term::SignExtend { added_bits, arg } => {
                let w = arg.sort().bv_width().unwrap_or(0);
                Sort::bv(w + added_bits)
            }
            Term::Ite { then_branch, .. } => then_branch.sort(),
            Term::Select { array, .. } => {
                let (_, elem) = array.sort().array_widths().unwrap_or((0, 0));
                Sort::bv(elem)
            }
            Term::Store { array, .. } => array.sort(),
        }
    }

    fn require_bv(sort: Sort) -> Result<u32, TermError> {
        sort.bv_width().ok_or(TermError::NotBitVec(sort))
    }

    fn require_same_sort(a: Sort, b: Sort) -> Result<(), TermError> {
        if a == b {
            Ok(())
        } else {
            Err(TermError::SortMismatch {
                expected: a,
                found: b,
            })
        }
    }

    fn binary(op: BinaryOp, lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::require_bv(lhs.sort())?;
        Term::require_bv(rhs.sort())?;
        Term::require_same_sort(lhs.sort(), rhs.sort())?;
        Ok(Term::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn add(lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::binary(BinaryOp::Add, lhs, rhs)
    }
    pub fn sub(lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::binary(BinaryOp::Sub, lhs, rhs)
    }
    pub fn mul(lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::binary(BinaryOp::Mul, lhs, rhs)
    }
    pub fn udiv(lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::binary(BinaryOp::UDiv, lhs, rhs)
    }
    pub fn urem(lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::binary(BinaryOp::URem, lhs, rhs)
    }
    pub fn sdiv(lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::binary(BinaryOp::SDiv, lhs, rhs)
    }
    pub fn srem(lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::binary(BinaryOp::SRem, lhs, rhs)
    }
    pub fn and(lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::binary(BinaryOp::And, lhs, rhs)
    }
    pub fn or(lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::binary(BinaryOp::Or, lhs, rhs)
    }
    pub fn xor(lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::binary(BinaryOp::Xor, lhs, rhs)
    }

    /// Shifts require equal operand widths; callers are responsible for
    /// zero-extending a narrower shift amount first (see
    /// `symembed::embedder` for the widening policy -- this algebra itself
    /// just enforces the precondition).
    pub fn shl(lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::binary(BinaryOp::Shl, lhs, rhs)
    }
    pub fn lshr(lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::binary(BinaryOp::LShr, lhs, rhs)
    }
    pub fn ashr(lhs: Term, rhs: Term) -> Result<Term, TermError> {
        Term::binary(BinaryOp::AShr, lhs, rhs)
    }

    pub fn neg(arg: Term) -> Result<Term, TermError> {
        Term::require_bv(arg.sort())?;
        Ok(Term::Unary {
            op: UnaryOp::Neg,
            arg: Box::new(arg),
        })
    }

    pub fn not(arg: Term) -> Result<Term, TermError> {
        Term::require_bv(arg.sort())?;
        Ok(Term::Unary {
            op: UnaryOp::Not,
            arg: Box::new(arg),
        })
    }

    pub fn extract(hi: u32, lo: u32, arg: Term) -> Result<Term, TermError> {
        let w = Term::require_bv(arg.sort())?;
        if hi >= w || lo > hi {
            return Err(TermError::SortMismatch {
                expected: Sort::bv(hi - lo + 1),
                found: arg.sort(),
            });
        }
        Ok(Term::Extract {
            hi,
            lo,
            arg: Box::new(arg),
        })
    }

    pub fn concat(hi: Term, lo: Term) -> Result<Term, TermError> {
        Term::require_bv(hi.sort())?;
        Term::require_bv(lo.sort())?;
        Ok(Term::Concat {
            hi: Box::new(hi),
            lo: Box::new(lo),
        })
    }

    pub fn zero_extend(target_width: u32, arg: Term) -> Result<Term, TermError> {
        let w = Term::require_bv(arg.sort())?;
        if target_width < w {
            return Err(TermError::SortMismatch {
                expected: Sort::bv(target_width),
                found: arg.sort(),
            });
        }
        Ok(Term::ZeroExtend {
            added_bits: target_width - w,
            arg: Box::new(arg),
        })
    }

    pub fn sign_extend(target_width: u32, arg: Term) -> Result<Term, TermError> {
        let w = Term::require_bv(arg.sort())?;
        if target_width < w {
            return Err(TermError::SortMismatch {
                expected: Sort::bv(target_width),
                found: arg.sort(),
            });
        }
        Ok(Term::SignExtend {
            added_bits: target_width - w,
            arg: Box::new(arg),
        })
    }

    pub fn ite(cond: BoolExpr, then_branch: Term, else_branch: Term) -> Result<Term, TermError> {
        Term::require_same_sort(then_branch.sort(), else_branch.sort())?;
        Ok(Term::Ite {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    /// `if cond { 1 } else { 0 }` at width 1 -- the standard way this crate
    /// turns a boolean predicate (equality, `<`, ...) into the one-bit
    /// bit-vector result the IL's comparison operators expect.
    pub fn ite_bv(cond: BoolExpr) -> Term {
        Term::Ite {
            cond: Box::new(cond),
            then_branch: Box::new(Term::literal(1, 1)),
            else_branch: Box::new(Term::literal(0, 1)),
        }
    }

    pub fn select(array: Term, index: Term) -> Result<Term, TermError> {
        let (idx_w, _) = array.sort().array_widths().ok_or(TermError::NotArray(array.sort()))?;
        let got = Term::require_bv(index.sort())?;
        if got != idx_w {
            return Err(TermError::SortMismatch {
                expected: Sort::bv(idx_w),
                found: index.sort(),
            });
        }
        Ok(Term::Select {
            array: Box::new(array),
            index: Box::new(index),
        })
    }

    pub fn store(array: Term, index: Term, value: Term) -> Result<Term, TermError> {
        let (idx_w, elem_w) = array
            .sort()
            .array_widths()
            .ok_or(TermError::NotArray(array.sort()))?;
        let idx_got = Term::require_bv(index.sort())?;
        if idx_got != idx_w {
            return Err(TermError::SortMismatch {
                expected: Sort::bv(idx_w),
                found: index.sort(),
            });
        }
        let val_got = Term::require_bv(value.sort())?;
        if val_got != elem_w {
            return Err(TermError::SortMismatch {
                expected: Sort::bv(elem_w),
                found: value.sort(),
            });
        }
        Ok(Term::Store {
            array: Box::new(array),
            index: Box::new(index),
            value: Box::new(value),
        })
    }

    /// Collects every named constant this term transitively references,
    /// deduplicated. Used by the extractor to walk dependency edges between
    /// SSA definitions (see `symembed::extract`).
    pub fn free_consts(&self) -> BTreeSet<(String, Sort)> {
        let mut out = BTreeSet::new();
        self.collect_free_consts(&mut out);
        out
    }

    fn collect_free_consts(&self, out: &mut BTreeSet<(String, Sort)>) {
        match self {
            Term::Literal { .. } => {}
            Term::Const { name, sort } => {
                out.insert((name.clone(), *sort));
            }
            Term::Unary { arg, .. } => arg.collect_free_consts(out),
            Term::Binary { lhs, rhs, .. } => {
                lhs.collect_free_consts(out);
                rhs.collect_free_consts(out);
            }
            Term::Extract { arg, .. } => arg.collect_free_consts(out),
            Term::Concat { hi, lo } => {
                hi.collect_free_consts(out);
                lo.collect_free_consts(out);
            }
            Term::ZeroExtend { arg, .. } | Term::SignExtend { arg, .. } => {
                arg.collect_free_consts(out)
            }
            Term::Ite {
                cond,
                then_branch,
                else_branch,
            } => {
                cond.collect_free_consts(out);
                then_branch.collect_free_consts(out);
                else_branch.collect_free_consts(out);
            }
            Term::Select { array, index } => {
                array.collect_free_consts(out);
                index.collect_free_consts(out);
            }
            Term::Store { array, index, value } => {
                array.collect_free_consts(out);
                index.collect_free_consts(out);
                value.collect_free_consts(out);
            }
        }
    }

    /// Rewrites every `Select` whose array chain is a `Store` at a
    /// structurally-equal index into the stored value, peeling through
    /// intervening stores at other indices. Not a general simplifier and
    /// not used by the embedder itself -- this crate models terms, it does
    /// not solve or simplify them (an SMT backend would apply the real
    /// array axioms). It exists so the load-after-store law can be checked
    /// without a solver dependency: two structurally distinct terms that an
    /// SMT backend would judge equal can be brought to the same shape by
    /// peeling the store chain this way.
    pub fn load_after_store_eq(&self) -> Term {
        match self {
            Term::Select { array, index } => {
                let array = array.load_after_store_eq();
                let index = index.load_after_store_eq();
                Term::peel_store(&array, &index)
            }
            Term::Store { array, index, value } => Term::Store {
                array: Box::new(array.load_after_store_eq()),
                index: Box::new(index.load_after_store_eq()),
                value: Box::new(value.load_after_store_eq()),
            },
            Term::Unary { op, arg } => Term::Unary {
                op: *op,
                arg: Box::new(arg.load_after_store_eq()),
            },
            Term::Binary { op, lhs, rhs } => Term::Binary {
                op: *op,
                lhs: Box::new(lhs.load_after_store_eq()),
                rhs: Box::new(rhs.load_after_store_eq()),
            },
            Term::Extract { hi, lo, arg } => Term::Extract {
                hi: *hi,
                lo: *lo,
                arg: Box::new(arg.load_after_store_eq()),
            },
            Term::Concat { hi, lo } => Term::Concat {
                hi: Box::new(hi.load_after_store_eq()),
                lo: Box::new(lo.load_after_store_eq()),
            },
            Term::ZeroExtend { added_bits, arg } => Term::ZeroExtend {
                added_bits: *added_bits,
                arg: Box::new(arg.load_after_store_eq()),
            },
            Term::SignExtend { added_bits, arg } => Term::SignExtend {
                added_bits: *added_bits,
                arg: Box::new(arg.load_after_store_eq()),
            },
            Term::Ite {
                cond,
                then_branch,
                else_branch,
            } => Term::Ite {
                cond: cond.clone(),
                then_branch: Box::new(then_branch.load_after_store_eq()),
                else_branch: Box::new(else_branch.load_after_store_eq()),
            },
            Term::Literal { .. } | Term::Const { .. } => self.clone(),
        }
    }

    fn peel_store(array: &Term, index: &Term) -> Term {
        match array {
            Term::Store {
                array: inner,
                index: store_index,
                value,
            } => {
                if store_index.as_ref() == index {
                    value.as_ref().clone()
                } else {
                    Term::peel_store(inner, index)
                }
            }
            _ => Term::select(array.clone(), index.clone()).expect("array/index already well-sorted"),
        }
    }
}

impl BoolExpr {
    pub fn eq(lhs: Term, rhs: Term) -> BoolExpr {
        BoolExpr::Eq(Box::new(lhs), Box::new(rhs))
    }
    pub fn ult(lhs: Term, rhs: Term) -> BoolExpr {
        BoolExpr::Ult(Box::new(lhs), Box::new(rhs))
    }
    pub fn ule(lhs: Term, rhs: Term) -> BoolExpr {
        BoolExpr::Ule(Box::new(lhs), Box::new(rhs))
    }
    pub fn slt(lhs: Term, rhs: Term) -> BoolExpr {
        BoolExpr::Slt(Box::new(lhs), Box::new(rhs))
    }
    pub fn sle(lhs: Term, rhs: Term) -> BoolExpr {
        BoolExpr::Sle(Box::new(lhs), Box::new(rhs))
    }
    pub fn is_one(term: Term) -> BoolExpr {
        BoolExpr::IsOne(Box::new(term))
    }
    pub fn not(self) -> BoolExpr {
        BoolExpr::Not(Box::new(self))
    }
    pub fn and_all(parts: Vec<BoolExpr>) -> BoolExpr {
        BoolExpr::And(parts)
    }

    fn collect_free_consts(&self, out: &mut BTreeSet<(String, Sort)>) {
        match self {
            BoolExpr::Eq(a, b)
            | BoolExpr::Ult(a, b)
            | BoolExpr::Ule(a, b)
            | BoolExpr::Slt(a, b)
            | BoolExpr::Sle(a, b) => {
                a.collect_free_consts(out);
                b.collect_free_consts(out);
            }
            BoolExpr::IsOne(t) => t.collect_free_consts(out),
            BoolExpr::Not(e) => e.collect_free_consts(out),
            BoolExpr::And(es) => {
                for e in es {
                    e.collect_free_consts(out);
                }
            }
        }
    }
}
