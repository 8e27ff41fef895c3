//! The branching scope graph: SSA naming and lazy phi construction.
//!
//! Modeled as an arena (`petgraph::stable_graph::StableGraph` as backing
//! store, [`NodeId`] as the stable index) rather than a tree of owning
//! pointers, per the scope graph's own design notes -- nodes are only ever
//! added, never removed, so petgraph's node indices double as the
//! monotonically increasing node ids the SSA name grammar requires.

use std::cell::RefCell;
use std::collections::HashMap;

use indexmap::IndexMap;
use petgraph::stable_graph::StableGraph;
use petgraph::Directed;
use smallvec::{smallvec, SmallVec};

use symterm::{BoolExpr, Sort, Term};

use crate::error::ScopeError;
use crate::id::NodeId;

/// Which side of an `If` a `Branch` scope represents. Used both to tag the
/// branch guard and to disambiguate SSA names on the two sides of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchSide {
    IfTrue,
    IfFalse,
}

impl BranchSide {
    pub fn prefix_tag(self) -> &'static str {
        match self {
            BranchSide::IfTrue => ".if_true",
            BranchSide::IfFalse => ".if_false",
        }
    }
}

/// A definition recorded on a scope node: either a concrete term, or (once
/// lazily materialized by [`ScopeGraph::lookup_def`]) a phi over the nodes
/// that define the name differently on incoming branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    Value(Term),
    Phi(Vec<NodeId>),
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// The unique root; defines exactly the architectural state vector.
    Root,
    /// A sequential definition (`Let` push, `Move`, `Jmp`, `CpuExn`,
    /// `Unknown` materialization's containing scope).
    Def,
    Branch {
        guard: BoolExpr,
        side: BranchSide,
    },
    Join {
        split_source: NodeId,
    },
}

/// A single scope graph node: its structural role (`kind`), its parents,
/// and whatever names it defines (including phis lazily attached by
/// `lookup_def`).
#[derive(Debug, Clone)]
pub struct ScopeNodeData {
    pub id: NodeId,
    pub parents: SmallVec<[NodeId; 2]>,
    pub kind: NodeKind,
    pub defs: IndexMap<String, Definition>,
    pub sorts: IndexMap<String, Sort>,
}

/// The branching scope graph for a single embedding.
///
/// Owns the node arena, the root id, and (optionally) a path-condition
/// memoization cache. One `ScopeGraph` belongs to exactly one embedding;
/// see `symembed::embedder::Embedder`, which owns one of these plus the
/// current-scope pointer and the unknown counter.
pub struct ScopeGraph {
    graph: StableGraph<ScopeNodeData, (), Directed, u32>,
    root: NodeId,
    memoize_path_conditions: bool,
    cond_cache: RefCell<HashMap<(NodeId, NodeId), Vec<BoolExpr>>>,
}

impl ScopeGraph {
    /// Creates a new scope graph whose root Def binds every entry of
    /// `arch_state` to a free constant `name + ".initial"` of the matching
    /// sort. Returns the graph and the root's id (also available via
    /// [`ScopeGraph::root`]).
    pub fn new(
        arch_state: impl IntoIterator<Item = (String, Sort)>,
        memoize_path_conditions: bool,
    ) -> ScopeGraph {
        let mut graph = StableGraph::new();
        let mut defs = IndexMap::new();
        let mut sorts = IndexMap::new();
        for (name, sort) in arch_state {
            let term = Term::const_(format!("{name}.initial"), sort);
            sorts.insert(name.clone(), sort);
            defs.insert(name, Definition::Value(term));
        }
        let idx = graph.add_node(ScopeNodeData {
            id: NodeId(0),
            parents: SmallVec::new(),
            kind: NodeKind::Root,
            defs,
            sorts,
        });
        let root = NodeId::from(idx);
        graph[idx].id = root;
        ScopeGraph {
            graph,
            root,
            memoize_path_conditions,
            cond_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Result<&ScopeNodeData, ScopeError> {
        self.graph
            .node_weight(id.into())
            .ok_or(ScopeError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut ScopeNodeData, ScopeError> {
        self.graph
            .node_weight_mut(id.into())
            .ok_or(ScopeError::NodeNotFound(id))
    }

    fn push(&mut self, parents: SmallVec<[NodeId; 2]>, kind: NodeKind) -> NodeId {
        let parent_indices: Vec<_> = parents.iter().map(|p| (*p).into()).collect();
        let idx = self.graph.add_node(ScopeNodeData {
            id: NodeId(0),
            parents,
            kind,
            defs: IndexMap::new(),
            sorts: IndexMap::new(),
        });
        let id = NodeId::from(idx);
        self.graph[idx].id = id;
        for parent_idx in parent_indices {
            self.graph.add_edge(parent_idx, idx, ());
        }
        id
    }

    /// Pushes a new Def scope sequentially after `parent`, binding every
    /// `(name, term)` pair. Used for `Let` pushes, `Move`, `Jmp`, and
    /// `CpuExn`. Panics (a caller bug, not a malformed-input case) if
    /// `bindings` is empty.
    pub fn push_def(&mut self, parent: NodeId, bindings: Vec<(String, Term)>) -> NodeId {
        assert!(
            !bindings.is_empty(),
            "cannot push a Def scope that defines nothing"
        );
        let id = self.push(smallvec![parent], NodeKind::Def);
        let data = self.node_mut(id).expect("just inserted");
        for (name, term) in bindings {
            data.sorts.insert(name.clone(), term.sort());
            data.defs.insert(name, Definition::Value(term));
        }
        id
    }

    /// Defines `name` directly on an already-existing node, without
    /// creating a new scope. Used only for `Unknown` materialization: the
    /// fresh `unknown_k` constant is recorded as a self-definition on the
    /// current scope (whatever kind it is), rather than pushing a child
    /// Def.
    pub fn define_in_place(&mut self, node: NodeId, name: String, term: Term) -> Result<(), ScopeError> {
        let data = self.node_mut(node)?;
        data.sorts.insert(name.clone(), term.sort());
        data.defs.insert(name, Definition::Value(term));
        Ok(())
    }

    pub fn push_branch(&mut self, parent: NodeId, guard: BoolExpr, side: BranchSide) -> NodeId {
        self.push(smallvec![parent], NodeKind::Branch { guard, side })
    }

    pub fn push_join(&mut self, left: NodeId, right: NodeId, split_source: NodeId) -> NodeId {
        self.push(smallvec![left, right], NodeKind::Join { split_source })
    }

    pub fn sort_of(&self, node: NodeId, name: &str) -> Result<Sort, ScopeError> {
        self.node(node)?
            .sorts
            .get(name)
            .copied()
            .ok_or_else(|| ScopeError::NoSuchDef {
                node,
                name: name.to_string(),
            })
    }

    /// The recorded definition of `name` at `node` (not resolved through
    /// parents -- callers first locate the defining node via
    /// [`ScopeGraph::lookup_def`]).
    pub fn definition(&self, node: NodeId, name: &str) -> Result<&Definition, ScopeError> {
        self.node(node)?
            .defs
            .get(name)
            .ok_or_else(|| ScopeError::NoSuchDef {
                node,
                name: name.to_string(),
            })
    }

    /// Looks up the node that defines `name`, as seen from `node`, walking
    /// parents toward the root. Lazily materializes a phi definition on a
    /// Join the first time a name resolves to differing definitions on its
    /// two incoming branches. Returns `Ok(None)` if `name` is not defined
    /// anywhere on the path to the root.
    pub fn lookup_def(&mut self, node: NodeId, name: &str) -> Result<Option<NodeId>, ScopeError> {
        let parents = {
            let data = self.node(node)?;
            if data.defs.contains_key(name) {
                return Ok(Some(node));
            }
            data.parents.clone()
        };

        match parents.len() {
            0 => Ok(None),
            1 => self.lookup_def(parents[0], name),
            2 => {
                let left = self.lookup_def(parents[0], name)?;
                let right = self.lookup_def(parents[1], name)?;
                match (left, right) {
                    (None, None) => Ok(None),
                    (Some(l), Some(r)) if l == r => Ok(Some(l)),
                    (Some(l), Some(r)) => {
                        let sort_l = self.sort_of(l, name)?;
                        let sort_r = self.sort_of(r, name)?;
                        if sort_l != sort_r {
                            return Err(ScopeError::PhiSortMismatch {
                                name: name.to_string(),
                                node,
                                first: sort_l,
                                second: sort_r,
                            });
                        }
                        let data = self.node_mut(node)?;
                        data.sorts.insert(name.to_string(), sort_l);
                        data.defs
                            .insert(name.to_string(), Definition::Phi(vec![l, r]));
                        Ok(Some(node))
                    }
                    // Defined on exactly one incoming branch: not a
                    // reducible merge this scope graph can name (there is
                    // no single defining node valid on every path to the
                    // root). Treated as "not defined from here", which the
                    // embedder turns into `UndefinedVariable`.
                    (Some(_), None) | (None, Some(_)) => Ok(None),
                }
            }
            _ => unreachable!("scope node has at most two parents"),
        }
    }

    /// Computes the prefix chain from the root down to `node`: the
    /// concatenation of every Branch's prefix tag on the path, crossing
    /// Joins through their split source rather than either branch tail.
    fn prefix_chain(&self, node: NodeId) -> Result<String, ScopeError> {
        let data = self.node(node)?;
        match &data.kind {
            NodeKind::Root => Ok(String::new()),
            NodeKind::Def => self.prefix_chain(data.parents[0]),
            NodeKind::Branch { side, .. } => {
                let parent = self.prefix_chain(data.parents[0])?;
                Ok(format!("{parent}{}", side.prefix_tag()))
            }
            NodeKind::Join { split_source } => self.prefix_chain(*split_source),
        }
    }

    /// The SSA id for `name` as defined at `node`:
    /// `name + prefix_chain(node) + "." + node_id`. The root is special:
    /// every root definition is the free constant `name + ".initial"` by
    /// construction (see [`ScopeGraph::new`]), so its SSA id is that same
    /// string rather than `name + ".<root_id>"` -- there is only ever one
    /// name for an untouched architectural component.
    pub fn ssa(&self, node: NodeId, name: &str) -> Result<String, ScopeError> {
        if node == self.root {
            return Ok(format!("{name}.initial"));
        }
        let prefix = self.prefix_chain(node)?;
        Ok(format!("{name}{prefix}.{}", node.0))
    }

    /// The conjunction of guard terms on the unique path from `ancestor`
    /// down to `node`, traversing through Joins via their split source.
    pub fn cond_to(&self, node: NodeId, ancestor: NodeId) -> Result<Vec<BoolExpr>, ScopeError> {
        if node == ancestor {
            return Ok(Vec::new());
        }
        if self.memoize_path_conditions {
            if let Some(hit) = self.cond_cache.borrow().get(&(node, ancestor)) {
                return Ok(hit.clone());
            }
        }

        let data = self.node(node)?;
        let mut acc = match &data.kind {
            NodeKind::Root => {
                return Err(ScopeError::NoSuchDef {
                    node,
                    name: format!("<{ancestor} does not dominate {node}>"),
                })
            }
            NodeKind::Def | NodeKind::Branch { .. } => self.cond_to(data.parents[0], ancestor)?,
            NodeKind::Join { split_source } => self.cond_to(*split_source, ancestor)?,
        };
        if let NodeKind::Branch { guard, .. } = &data.kind {
            acc.push(guard.clone());
        }

        if self.memoize_path_conditions {
            self.cond_cache
                .borrow_mut()
                .insert((node, ancestor), acc.clone());
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symterm::BoolExpr;

    fn arch() -> Vec<(String, Sort)> {
        vec![
            ("RAX".to_string(), Sort::bv(64)),
            ("RIP".to_string(), Sort::bv(64)),
        ]
    }

    #[test]
    fn root_defines_initial_constants() {
        let graph = ScopeGraph::new(arch(), true);
        let root = graph.root();
        match graph.node(root).unwrap().defs.get("RAX").unwrap() {
            Definition::Value(Term::Const { name, sort }) => {
                assert_eq!(name, "RAX.initial");
                assert_eq!(*sort, Sort::bv(64));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sequential_def_resolves_to_itself() {
        let mut graph = ScopeGraph::new(arch(), true);
        let root = graph.root();
        let n1 = graph.push_def(root, vec![("RAX".to_string(), Term::literal(0, 64))]);
        let found = graph.lookup_def(n1, "RAX").unwrap();
        assert_eq!(found, Some(n1));
    }

    #[test]
    fn unmodified_name_resolves_through_def_chain_to_root() {
        let mut graph = ScopeGraph::new(arch(), true);
        let root = graph.root();
        let n1 = graph.push_def(root, vec![("RIP".to_string(), Term::literal(4, 64))]);
        // RAX untouched by n1 -- looking it up from n1 should still land at root.
        let found = graph.lookup_def(n1, "RAX").unwrap();
        assert_eq!(found, Some(root));
    }

    #[test]
    fn join_with_same_def_on_both_sides_does_not_build_phi() {
        let mut graph = ScopeGraph::new(arch(), true);
        let root = graph.root();
        let guard = BoolExpr::is_one(Term::literal(1, 1));
        let t = graph.push_branch(root, guard.clone(), BranchSide::IfTrue);
        let f = graph.push_branch(root, guard.not(), BranchSide::IfFalse);
        let join = graph.push_join(t, f, root);
        // Neither branch touched RAX -- should resolve straight to root, no phi.
        let found = graph.lookup_def(join, "RAX").unwrap();
        assert_eq!(found, Some(root));
        assert!(!graph.node(join).unwrap().defs.contains_key("RAX"));
    }

    #[test]
    fn join_with_differing_defs_builds_phi() {
        let mut graph = ScopeGraph::new(arch(), true);
        let root = graph.root();
        let guard = BoolExpr::is_one(Term::literal(1, 1));
        let t = graph.push_branch(root, guard.clone(), BranchSide::IfTrue);
        let t_def = graph.push_def(t, vec![("RAX".to_string(), Term::literal(0, 64))]);
        let f = graph.push_branch(root, guard.clone().not(), BranchSide::IfFalse);
        let f_def = graph.push_def(f, vec![("RAX".to_string(), Term::literal(1, 64))]);
        let join = graph.push_join(t_def, f_def, root);

        let found = graph.lookup_def(join, "RAX").unwrap();
        assert_eq!(found, Some(join));
        match graph.node(join).unwrap().defs.get("RAX").unwrap() {
            Definition::Phi(contributors) => {
                assert_eq!(contributors, &vec![t_def, f_def]);
            }
            other => panic!("expected phi, found {other:?}"),
        }
    }

    #[test]
    fn phi_lookup_is_memoized_on_the_join_node() {
        let mut graph = ScopeGraph::new(arch(), true);
        let root = graph.root();
        let guard = BoolExpr::is_one(Term::literal(1, 1));
        let t = graph.push_branch(root, guard.clone(), BranchSide::IfTrue);
        let t_def = graph.push_def(t, vec![("RAX".to_string(), Term::literal(0, 64))]);
        let f = graph.push_branch(root, guard.not(), BranchSide::IfFalse);
        let f_def = graph.push_def(f, vec![("RAX".to_string(), Term::literal(1, 64))]);
        let join = graph.push_join(t_def, f_def, root);

        let first = graph.lookup_def(join, "RAX").unwrap();
        let second = graph.lookup_def(join, "RAX").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn phi_sort_mismatch_is_an_error() {
        let mut graph = ScopeGraph::new(arch(), true);
        let root = graph.root();
        let guard = BoolExpr::is_one(Term::literal(1, 1));
        let t = graph.push_branch(root, guard.clone(), BranchSide::IfTrue);
        let t_def = graph.push_def(t, vec![("RAX".to_string(), Term::literal(0, 64))]);
        let f = graph.push_branch(root, guard.not(), BranchSide::IfFalse);
        let f_def = graph.push_def(f, vec![("RAX".to_string(), Term::literal(0, 32))]);
        let join = graph.push_join(t_def, f_def, root);

        let err = graph.lookup_def(join, "RAX").unwrap_err();
        assert!(matches!(err, ScopeError::PhiSortMismatch { .. }));
    }

    #[test]
    fn ssa_name_includes_branch_prefix_and_node_id() {
        let mut graph = ScopeGraph::new(arch(), true);
        let root = graph.root();
        let guard = BoolExpr::is_one(Term::literal(1, 1));
        let t = graph.push_branch(root, guard, BranchSide::IfTrue);
        let t_def = graph.push_def(t, vec![("RAX".to_string(), Term::literal(0, 64))]);

        let ssa = graph.ssa(t_def, "RAX").unwrap();
        assert_eq!(ssa, format!("RAX.if_true.{}", t_def.0));
    }

    #[test]
    fn ssa_name_at_root_is_the_initial_constant() {
        let graph = ScopeGraph::new(arch(), true);
        let root = graph.root();
        assert_eq!(graph.ssa(root, "RAX").unwrap(), "RAX.initial");
    }

    #[test]
    fn cond_to_self_is_empty() {
        let graph = ScopeGraph::new(arch(), true);
        let root = graph.root();
        assert_eq!(graph.cond_to(root, root).unwrap(), Vec::new());
    }

    #[test]
    fn cond_to_crosses_join_via_split_source() {
        let mut graph = ScopeGraph::new(arch(), true);
        let root = graph.root();
        let guard = BoolExpr::is_one(Term::literal(1, 1));
        let t = graph.push_branch(root, guard.clone(), BranchSide::IfTrue);
        let f = graph.push_branch(root, guard.clone().not(), BranchSide::IfFalse);
        let join = graph.push_join(t, f, root);

        // From the join, the path condition back to root must be empty: the
        // join's own path goes through the split source, not through either
        // branch tail.
        assert_eq!(graph.cond_to(join, root).unwrap(), Vec::new());
        // But from the true-branch tail itself, the guard is present.
        assert_eq!(graph.cond_to(t, root).unwrap(), vec![guard]);
    }

    #[test]
    fn define_in_place_does_not_create_a_new_node() {
        let mut graph = ScopeGraph::new(arch(), true);
        let root = graph.root();
        graph
            .define_in_place(root, "unknown_0".to_string(), Term::literal(0, 8))
            .unwrap();
        assert!(graph.node(root).unwrap().defs.contains_key("unknown_0"));
    }
}
