//! Property tests over randomly generated IL fragments: the stack
//! discipline and the SSA-uniqueness invariant should hold for *any*
//! well-typed fragment, not just the hand-picked scenarios.

use proptest::prelude::*;

use symembed::arch::x86_64::X86_64;
use symembed::{extract, Embedder, EmbedderConfig};
use symembed_core::{BinOp, Expr, Stmt, Type, Var};

const GPRS: &[&str] = &["RAX", "RBX", "RCX", "RDX", "RSI", "RDI", "R13"];
// Disjoint from each other: used to keep an `If`'s two arms from ever
// writing the same register (see `branching` below). If they could
// overlap, a fragment where both arms move the same GPR would resolve to
// a phi with no unconditional (empty-path-condition) contributor --
// `extract` correctly reports `MissingBase` for that shape (see
// `both_arms_redefining_has_no_unconditional_base` in
// `x86_64_scenarios.rs`), which these properties are not about.
const GPRS_THEN: &[&str] = &["RAX", "RBX", "RCX", "RDX"];
const GPRS_ELSE: &[&str] = &["RSI", "RDI", "R13"];
const FLAGS: &[&str] = &["CF", "ZF", "SF", "OF"];

fn gpr_name() -> impl Strategy<Value = &'static str> {
    prop::sample::select(GPRS)
}

fn flag_name() -> impl Strategy<Value = &'static str> {
    prop::sample::select(FLAGS)
}

/// A bit-vector-valued expression built only from architectural GPRs and
/// literals -- always well-typed at width 64, so embedding can only ever
/// fail on a genuine bug, never on a malformed fixture.
fn bv64_expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        gpr_name().prop_map(|name| Expr::var(name, Type::Imm(64))),
        any::<u64>().prop_map(|v| Expr::int(v as u128, 64)),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Expr::bin(BinOp::Plus, l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Expr::bin(BinOp::Xor, l, r)),
            (inner.clone(), inner).prop_map(|(l, r)| Expr::bin(BinOp::And, l, r)),
        ]
    })
}

/// A single flat `Move` into a GPR drawn from `pool`, built from
/// `bv64_expr` (which may still read from the full `GPRS` set -- only the
/// *write* target needs restricting to keep the two arms of an `If`
/// disjoint).
fn gpr_move_from(pool: &'static [&'static str]) -> impl Strategy<Value = Stmt> {
    (prop::sample::select(pool), bv64_expr())
        .prop_map(|(name, value)| Stmt::Move(Var::new(name, Type::Imm(64)), value))
}

/// A single flat `Move` into any architectural GPR, built from `bv64_expr`.
fn gpr_move() -> impl Strategy<Value = Stmt> {
    gpr_move_from(GPRS)
}

/// A one-bit condition over flags, for `If` guards.
fn flag_cond() -> impl Strategy<Value = Expr> {
    flag_name().prop_map(|name| Expr::var(name, Type::Imm(1)))
}

/// A small fragment: a handful of sequential GPR moves, optionally wrapped
/// in a two-sided `If` whose arms are themselves sequential moves drawn
/// from disjoint GPR pools, so the two arms can never redefine the same
/// register and extraction always has a unique phi base. Always
/// well-typed, so every failure `Embedder::run` or `extract` can report is
/// a real bug.
fn fragment() -> impl Strategy<Value = Vec<Stmt>> {
    let flat = prop::collection::vec(gpr_move(), 0..6);
    let branching = (
        flag_cond(),
        prop::collection::vec(gpr_move_from(GPRS_THEN), 0..4),
        prop::collection::vec(gpr_move_from(GPRS_ELSE), 0..4),
    )
        .prop_map(|(cond, then_stmts, else_stmts)| vec![Stmt::If(cond, then_stmts, else_stmts)]);

    prop_oneof![flat, branching]
}

fn run_embedder(stmts: &[Stmt]) -> Embedder<X86_64> {
    let mut embedder = Embedder::new(X86_64, EmbedderConfig::default());
    embedder.run(stmts).expect("every generated fragment is well-typed");
    embedder
}

proptest! {
    /// `Embedder::run` never leaves the operand stack unbalanced on a
    /// well-typed fragment: every `eval_expr` call pushes exactly one
    /// value and every statement consumes what it pushed.
    #[test]
    fn stack_is_always_balanced(stmts in fragment()) {
        let _ = run_embedder(&stmts);
    }

    /// Every assertion extracted from a single embedding carries a
    /// distinct left-hand SSA name: SSA naming never collides, even
    /// across an `If`'s two arms and the phi it produces.
    #[test]
    fn extracted_ssa_names_are_unique(stmts in fragment()) {
        let mut embedder = run_embedder(&stmts);
        let assertions = extract(&mut embedder).expect("extraction succeeds on a well-typed fragment");
        let mut names: Vec<&str> = assertions.iter().map(|a| a.lhs_name.as_str()).collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        prop_assert_eq!(names.len(), before);
    }

    /// Re-extracting from the same embedder is idempotent: the extractor
    /// only ever reads the scope graph, it never mutates definitions.
    #[test]
    fn extraction_is_idempotent(stmts in fragment()) {
        let mut embedder = run_embedder(&stmts);
        let first = extract(&mut embedder).expect("first extraction succeeds");
        let second = extract(&mut embedder).expect("second extraction succeeds");
        prop_assert_eq!(first, second);
    }
}

#[test]
fn empty_fragment_has_no_live_assertions() {
    let mut embedder = Embedder::new(X86_64, EmbedderConfig::default());
    embedder.run(&[]).unwrap();
    let assertions = extract(&mut embedder).unwrap();
    assert!(assertions.is_empty());
}
