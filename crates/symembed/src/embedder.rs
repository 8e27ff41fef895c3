//! The base embedder: a stack-based evaluator over `symembed_core::il`.
//!
//! `eval_expr` implements the leave-phase of what would otherwise be a
//! visit/leave double dispatch: children evaluate first (post-order),
//! then the operator applies and pushes its one result. `eval_stmt`
//! implements the visit-phase directly for the constructs that need
//! non-default traversal order (`Let` pushes and pops a scope around its
//! body; `If` evaluates both arms before joining; `Move` evaluates its
//! value before extending the scope chain).

use symembed_core::{BinOp, BranchSide, Endianness, Expr, NodeId, ScopeGraph, Stmt, UnOp, Var};
use symterm::{BoolExpr, Sort, Term};

use crate::arch::Architecture;
use crate::config::EmbedderConfig;
use crate::error::EmbedError;
use crate::stack::{Stack, StackValue};

/// A stack-based evaluator for one IL fragment, parameterized over the
/// target architecture. Not `Sync`/`Send`-shared between threads by
/// design -- embed one instruction per `Embedder`, one `Embedder` per
/// thread, for parallel embedding.
pub struct Embedder<A: Architecture> {
    arch: A,
    config: EmbedderConfig,
    graph: ScopeGraph,
    current: NodeId,
    unknown_counter: u32,
    stack: Stack,
}

impl<A: Architecture> Embedder<A> {
    pub fn new(arch: A, config: EmbedderConfig) -> Embedder<A> {
        let graph = ScopeGraph::new(arch.arch_state(), config.memoize_path_conditions);
        let current = graph.root();
        Embedder {
            arch,
            config,
            graph,
            current,
            unknown_counter: 0,
            stack: Stack::new(),
        }
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    pub fn current_scope(&self) -> NodeId {
        self.current
    }

    pub fn arch_state(&self) -> Vec<(String, Sort)> {
        self.arch.arch_state()
    }

    pub fn scope_graph(&self) -> &ScopeGraph {
        &self.graph
    }

    pub fn scope_graph_mut(&mut self) -> &mut ScopeGraph {
        &mut self.graph
    }

    /// Evaluates a whole IL fragment in order. Errors leave the embedder
    /// in a partially-evaluated, undefined state -- callers should
    /// discard it rather than continue.
    pub fn run(&mut self, stmts: &[Stmt]) -> Result<(), EmbedError> {
        tracing::debug!(statements = stmts.len(), "embedding IL fragment");
        for stmt in stmts {
            self.eval_stmt(stmt)?;
        }
        if !self.stack.is_empty() {
            let remaining = self.stack.len();
            tracing::error!(remaining, "operand stack not empty after embedding");
            return Err(EmbedError::StackImbalance { remaining });
        }
        Ok(())
    }

    fn pop_term(&mut self, context: &str) -> Result<Term, EmbedError> {
        match self.stack.pop() {
            Some(StackValue::Term(t)) => Ok(t),
            Some(StackValue::Sort(_)) => Err(EmbedError::UnsupportedConstruct(format!(
                "expected a term value in {context}, found a sort value"
            ))),
            None => {
                debug_assert!(false, "stack underflow evaluating {context}");
                Err(EmbedError::StackImbalance { remaining: 0 })
            }
        }
    }

    fn pop_sort(&mut self, context: &str) -> Result<Sort, EmbedError> {
        match self.stack.pop() {
            Some(StackValue::Sort(s)) => Ok(s),
            Some(StackValue::Term(_)) => Err(EmbedError::UnsupportedConstruct(format!(
                "expected a sort value in {context}, found a term value"
            ))),
            None => {
                debug_assert!(false, "stack underflow evaluating {context}");
                Err(EmbedError::StackImbalance { remaining: 0 })
            }
        }
    }

    /// Binds `name` to `term` in a new Def scope sequentially after the
    /// current scope, checking that any existing definition agrees on
    /// sort. Shared by `Move`, `Jmp`, and `CpuExn`.
    fn bind(&mut self, name: &str, term: Term, context: &str) -> Result<(), EmbedError> {
        if let Some(existing) = self.graph.lookup_def(self.current, name)? {
            let existing_sort = self.graph.sort_of(existing, name)?;
            if existing_sort != term.sort() {
                return Err(EmbedError::SortMismatch {
                    expected: existing_sort,
                    actual: term.sort(),
                    context: context.to_string(),
                });
            }
        }
        let node = self.graph.push_def(self.current, vec![(name.to_string(), term)]);
        self.current = node;
        Ok(())
    }

    fn shift_amount(&self, operand_width: u32, amount: Term, op_name: &str) -> Result<Term, EmbedError> {
        let amount_width = amount
            .sort()
            .bv_width()
            .ok_or_else(|| EmbedError::UnsupportedConstruct(format!("{op_name}: shift amount is not a bit-vector")))?;
        if amount_width < operand_width {
            Ok(Term::zero_extend(operand_width, amount)?)
        } else if amount_width == operand_width {
            Ok(amount)
        } else {
            Err(EmbedError::UnsupportedConstruct(format!(
                "{op_name}: shift amount ({amount_width} bits) is wider than the operand ({operand_width} bits)"
            )))
        }
    }

    fn eval_stmt(&mut self, stmt: &Stmt) -> Result<(), EmbedError> {
        match stmt {
            Stmt::Move(var, expr) => {
                self.eval_expr(expr)?;
                let term = self.pop_term(&format!("Move to '{}'", var.name))?;
                self.bind(&var.name, term, &format!("Move to '{}'", var.name))
            }
            Stmt::Jmp(target) => {
                self.eval_expr(target)?;
                let term = self.pop_term("Jmp target")?;
                let pc = self.arch.program_counter().to_string();
                self.bind(&pc, term, "Jmp")
            }
            Stmt::CpuExn(_code) => self.bind("CPUEXN", Term::literal(1, 1), "CpuExn"),
            Stmt::If(cond, then_stmts, else_stmts) => self.eval_if(cond, then_stmts, else_stmts),
            Stmt::Special(what) => Err(EmbedError::UnsupportedConstruct(format!("Special({what})"))),
            Stmt::While(..) => Err(EmbedError::UnsupportedConstruct("While".to_string())),
        }
    }

    fn eval_if(&mut self, cond: &Expr, then_stmts: &[Stmt], else_stmts: &[Stmt]) -> Result<(), EmbedError> {
        self.eval_expr(cond)?;
        let cond_term = self.pop_term("If condition")?;
        let split_source = self.current;

        let guard_true = BoolExpr::is_one(cond_term);

        self.current = self
            .graph
            .push_branch(split_source, guard_true.clone(), BranchSide::IfTrue);
        for stmt in then_stmts {
            self.eval_stmt(stmt)?;
        }
        let true_tail = self.current;

        self.current = self
            .graph
            .push_branch(split_source, guard_true.not(), BranchSide::IfFalse);
        for stmt in else_stmts {
            self.eval_stmt(stmt)?;
        }
        let false_tail = self.current;

        self.current = self.graph.push_join(true_tail, false_tail, split_source);
        Ok(())
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<(), EmbedError> {
        match expr {
            Expr::Imm(width) => {
                self.stack.push_sort(Sort::bv(*width));
                Ok(())
            }
            Expr::Mem { addr_width, value_width } => {
                self.stack.push_sort(Sort::array(*addr_width, *value_width));
                Ok(())
            }
            Expr::Int { value, width } => {
                self.stack.push_term(Term::literal(*value, *width));
                Ok(())
            }
            Expr::Var(var) => self.eval_var(var),
            Expr::Let { var, value, body } => self.eval_let(var, value, body),
            Expr::Ite {
                cond,
                then_branch,
                else_branch,
            } => {
                self.eval_expr(cond)?;
                let cond_term = self.pop_term("Ite condition")?;
                self.eval_expr(then_branch)?;
                let then_term = self.pop_term("Ite then-branch")?;
                self.eval_expr(else_branch)?;
                let else_term = self.pop_term("Ite else-branch")?;
                let result = Term::ite(BoolExpr::is_one(cond_term), then_term, else_term)?;
                self.stack.push_term(result);
                Ok(())
            }
            Expr::BinOp { op, lhs, rhs } => self.eval_binop(*op, lhs, rhs),
            Expr::UnOp { op, arg } => {
                self.eval_expr(arg)?;
                let term = self.pop_term("unary operator")?;
                let result = match op {
                    UnOp::Neg => Term::neg(term)?,
                    UnOp::Not => Term::not(term)?,
                };
                self.stack.push_term(result);
                Ok(())
            }
            Expr::Concat { lhs, rhs } => {
                self.eval_expr(lhs)?;
                let hi = self.pop_term("Concat high half")?;
                self.eval_expr(rhs)?;
                let lo = self.pop_term("Concat low half")?;
                self.stack.push_term(Term::concat(hi, lo)?);
                Ok(())
            }
            Expr::High { bits, arg } => {
                self.eval_expr(arg)?;
                let term = self.pop_term("HIGH")?;
                let width = term
                    .sort()
                    .bv_width()
                    .ok_or_else(|| EmbedError::UnsupportedConstruct("HIGH of a non-bitvector".to_string()))?;
                self.stack.push_term(Term::extract(width - 1, width - bits, term)?);
                Ok(())
            }
            Expr::Low { bits, arg } => {
                self.eval_expr(arg)?;
                let term = self.pop_term("LOW")?;
                self.stack.push_term(Term::extract(bits - 1, 0, term)?);
                Ok(())
            }
            Expr::Extract { hi, lo, arg } => {
                self.eval_expr(arg)?;
                let term = self.pop_term("Extract")?;
                self.stack.push_term(Term::extract(*hi, *lo, term)?);
                Ok(())
            }
            Expr::Unsigned { width, arg } => {
                self.eval_expr(arg)?;
                let term = self.pop_term("UNSIGNED")?;
                self.stack.push_term(Term::zero_extend(*width, term)?);
                Ok(())
            }
            Expr::Signed { width, arg } => {
                self.eval_expr(arg)?;
                let term = self.pop_term("SIGNED")?;
                self.stack.push_term(Term::sign_extend(*width, term)?);
                Ok(())
            }
            Expr::Unknown { tag, sort_of } => self.eval_unknown(tag, sort_of),
            Expr::Load {
                mem,
                addr,
                endian,
                size_bits,
            } => self.eval_load(mem, addr, *endian, *size_bits),
            Expr::Store {
                mem,
                addr,
                value,
                endian,
                size_bits,
            } => self.eval_store(mem, addr, value, *endian, *size_bits),
        }
    }

    fn eval_var(&mut self, var: &Var) -> Result<(), EmbedError> {
        let defining = self
            .graph
            .lookup_def(self.current, &var.name)?
            .ok_or_else(|| EmbedError::UndefinedVariable(var.name.clone()))?;
        let defined_sort = self.graph.sort_of(defining, &var.name)?;
        let expected_sort = var.ty.to_sort();
        if defined_sort != expected_sort {
            return Err(EmbedError::SortMismatch {
                expected: expected_sort,
                actual: defined_sort,
                context: format!("Var '{}'", var.name),
            });
        }
        let ssa_name = self.graph.ssa(defining, &var.name)?;
        self.stack.push_term(Term::const_(ssa_name, defined_sort));
        Ok(())
    }

    fn eval_let(&mut self, var: &Var, value: &Expr, body: &Expr) -> Result<(), EmbedError> {
        self.eval_expr(value)?;
        let value_term = self.pop_term(&format!("Let binding '{}'", var.name))?;
        let parent = self.current;
        self.current = self
            .graph
            .push_def(parent, vec![(var.name.clone(), value_term)]);
        self.eval_expr(body)?;
        // Only Let scopes are popped: restore the parent pointer, leaving
        // the pushed node in the graph (it may still be reachable if
        // `body` captured it in an SSA name).
        self.current = parent;
        Ok(())
    }

    fn eval_unknown(&mut self, tag: &str, sort_of: &Expr) -> Result<(), EmbedError> {
        self.eval_expr(sort_of)?;
        let sort = self.pop_sort("Unknown sort")?;
        let name = format!("unknown_{}", self.unknown_counter);
        self.unknown_counter += 1;
        let term = Term::const_(name.clone(), sort);
        tracing::debug!(%tag, %name, "materializing unknown");
        self.graph.define_in_place(self.current, name, term.clone())?;
        self.stack.push_term(term);
        Ok(())
    }

    fn eval_binop(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<(), EmbedError> {
        self.eval_expr(lhs)?;
        let lhs_term = self.pop_term("binary operator left operand")?;
        self.eval_expr(rhs)?;
        let rhs_term = self.pop_term("binary operator right operand")?;

        let result = match op {
            BinOp::Plus => Term::add(lhs_term, rhs_term)?,
            BinOp::Minus => Term::sub(lhs_term, rhs_term)?,
            BinOp::Times => Term::mul(lhs_term, rhs_term)?,
            BinOp::Divide => Term::udiv(lhs_term, rhs_term)?,
            BinOp::SDivide => Term::sdiv(lhs_term, rhs_term)?,
            BinOp::Mod => Term::urem(lhs_term, rhs_term)?,
            BinOp::SMod => Term::srem(lhs_term, rhs_term)?,
            BinOp::And => Term::and(lhs_term, rhs_term)?,
            BinOp::Or => Term::or(lhs_term, rhs_term)?,
            BinOp::Xor => Term::xor(lhs_term, rhs_term)?,
            BinOp::LShift => {
                let width = Self::require_bv_width(&lhs_term, "LSHIFT")?;
                let amount = self.shift_amount(width, rhs_term, "LSHIFT")?;
                Term::shl(lhs_term, amount)?
            }
            BinOp::RShift => {
                let width = Self::require_bv_width(&lhs_term, "RSHIFT")?;
                let amount = self.shift_amount(width, rhs_term, "RSHIFT")?;
                Term::lshr(lhs_term, amount)?
            }
            BinOp::ARShift => {
                let width = Self::require_bv_width(&lhs_term, "ARSHIFT")?;
                let amount = self.shift_amount(width, rhs_term, "ARSHIFT")?;
                Term::ashr(lhs_term, amount)?
            }
            BinOp::Eq => Term::ite_bv(BoolExpr::eq(lhs_term, rhs_term)),
            BinOp::Neq => Term::ite_bv(BoolExpr::eq(lhs_term, rhs_term).not()),
            BinOp::Lt => Term::ite_bv(BoolExpr::ult(lhs_term, rhs_term)),
            BinOp::Le => Term::ite_bv(BoolExpr::ule(lhs_term, rhs_term)),
            BinOp::Slt => Term::ite_bv(BoolExpr::slt(lhs_term, rhs_term)),
            BinOp::Sle => Term::ite_bv(BoolExpr::sle(lhs_term, rhs_term)),
        };
        self.stack.push_term(result);
        Ok(())
    }

    fn require_bv_width(term: &Term, op_name: &str) -> Result<u32, EmbedError> {
        term.sort()
            .bv_width()
            .ok_or_else(|| EmbedError::UnsupportedConstruct(format!("{op_name}: operand is not a bit-vector")))
    }

    fn eval_load(&mut self, mem: &Expr, addr: &Expr, endian: Endianness, size_bits: u32) -> Result<(), EmbedError> {
        if endian == Endianness::Big {
            return Err(EmbedError::EndiannessUnsupported);
        }
        self.eval_expr(mem)?;
        let mem_term = self.pop_term("Load memory")?;
        self.eval_expr(addr)?;
        let addr_term = self.pop_term("Load address")?;

        let (addr_width, elem_width) = mem_term
            .sort()
            .array_widths()
            .ok_or_else(|| EmbedError::UnsupportedConstruct("Load: not an array sort".to_string()))?;
        if elem_width != 8 {
            return Err(EmbedError::UnsupportedConstruct(
                "Load: memory array element width is not 8 bits".to_string(),
            ));
        }
        if size_bits % 8 != 0 {
            return Err(EmbedError::UnsupportedConstruct(
                "Load: size_bits is not a multiple of 8".to_string(),
            ));
        }
        let addr_sort = addr_term.sort();
        if addr_sort != Sort::bv(addr_width) {
            return Err(EmbedError::SortMismatch {
                expected: Sort::bv(addr_width),
                actual: addr_sort,
                context: "Load address".to_string(),
            });
        }

        let n_bytes = size_bits / 8;
        let byte_at = |idx: u32| -> Result<Term, EmbedError> {
            let offset = Term::add(addr_term.clone(), Term::literal(idx as u128, addr_width))?;
            Ok(Term::select(mem_term.clone(), offset)?)
        };

        let mut acc = byte_at(n_bytes - 1)?;
        for i in (0..n_bytes - 1).rev() {
            acc = Term::concat(acc, byte_at(i)?)?;
        }
        self.stack.push_term(acc);
        Ok(())
    }

    fn eval_store(
        &mut self,
        mem: &Expr,
        addr: &Expr,
        value: &Expr,
        endian: Endianness,
        size_bits: u32,
    ) -> Result<(), EmbedError> {
        if endian == Endianness::Big {
            return Err(EmbedError::EndiannessUnsupported);
        }
        self.eval_expr(mem)?;
        let mut mem_term = self.pop_term("Store memory")?;
        self.eval_expr(addr)?;
        let addr_term = self.pop_term("Store address")?;
        self.eval_expr(value)?;
        let value_term = self.pop_term("Store value")?;

        let (addr_width, elem_width) = mem_term
            .sort()
            .array_widths()
            .ok_or_else(|| EmbedError::UnsupportedConstruct("Store: not an array sort".to_string()))?;
        if elem_width != 8 {
            return Err(EmbedError::UnsupportedConstruct(
                "Store: memory array element width is not 8 bits".to_string(),
            ));
        }
        if size_bits % 8 != 0 {
            return Err(EmbedError::UnsupportedConstruct(
                "Store: size_bits is not a multiple of 8".to_string(),
            ));
        }
        let value_width = value_term
            .sort()
            .bv_width()
            .ok_or_else(|| EmbedError::UnsupportedConstruct("Store: value is not a bit-vector".to_string()))?;
        if value_width != size_bits {
            return Err(EmbedError::SortMismatch {
                expected: Sort::bv(size_bits),
                actual: Sort::bv(value_width),
                context: "Store value".to_string(),
            });
        }

        let n_bytes = size_bits / 8;
        for i in 0..n_bytes {
            let byte = Term::extract(8 * i + 7, 8 * i, value_term.clone())?;
            let offset = Term::add(addr_term.clone(), Term::literal(i as u128, addr_width))?;
            mem_term = Term::store(mem_term, offset, byte)?;
        }
        self.stack.push_term(mem_term);
        Ok(())
    }
}
