//! Demand-driven extraction of the final assertion set.
//!
//! Walks back from each architectural state entry through the scope
//! graph, emitting one equality assertion per live SSA definition, in
//! topological (dependency-before-dependent) order, with no dead
//! definitions.

use indexmap::IndexSet;

use symembed_core::{Definition, NodeId, ScopeGraph};
use symterm::{BoolExpr, Sort, Term};

use crate::arch::Architecture;
use crate::config::EmbedderConfig;
use crate::embedder::Embedder;
use crate::error::EmbedError;

/// One equality assertion `Const(lhs_name, sort) == rhs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub lhs_name: String,
    pub sort: Sort,
    pub rhs: Term,
}

/// Extracts the minimal assertion set describing the final value of
/// every architectural state entry. Takes `&mut Embedder` because the
/// per-entry `lookup_def` call may lazily build a phi on a Join that was
/// never read during embedding itself.
pub fn extract<A: Architecture>(embedder: &mut Embedder<A>) -> Result<Vec<Assertion>, EmbedError> {
    tracing::debug!("extracting assertions from final scope");
    let arch_state = embedder.arch_state();
    let current = embedder.current_scope();
    let config = embedder.config().clone();

    let mut emitted: IndexSet<(NodeId, String)> = IndexSet::new();
    let mut assertions = Vec::new();

    for (name, _sort) in &arch_state {
        let defining = embedder
            .scope_graph_mut()
            .lookup_def(current, name)?
            .ok_or_else(|| EmbedError::UndefinedVariable(name.clone()))?;
        extract_one(
            embedder.scope_graph(),
            &config,
            &mut emitted,
            &mut assertions,
            defining,
            name,
        )?;
    }

    Ok(assertions)
}

fn extract_one(
    graph: &ScopeGraph,
    config: &EmbedderConfig,
    emitted: &mut IndexSet<(NodeId, String)>,
    assertions: &mut Vec<Assertion>,
    node: NodeId,
    name: &str,
) -> Result<(), EmbedError> {
    let key = (node, name.to_string());
    if emitted.contains(&key) {
        return Ok(());
    }
    // The root is untouched state: its value already *is* the free
    // constant `name.initial` (see `ScopeGraph::ssa`), so there is
    // nothing to assert -- callers reference `name.initial` directly.
    if node == graph.root() {
        emitted.insert(key);
        return Ok(());
    }

    let sort = graph.sort_of(node, name)?;
    let def = graph.definition(node, name)?.clone();

    let rhs = match def {
        Definition::Phi(contributors) => {
            if contributors.len() > config.max_phi_contributors {
                return Err(EmbedError::UnsupportedConstruct(format!(
                    "phi for '{name}' at node {node} has {} contributors, exceeding the configured max of {}",
                    contributors.len(),
                    config.max_phi_contributors
                )));
            }

            for &contributor in &contributors {
                extract_one(graph, config, emitted, assertions, contributor, name)?;
            }

            let mut base = None;
            for &contributor in &contributors {
                if graph.cond_to(contributor, graph.root())?.is_empty() {
                    if base.is_some() {
                        return Err(EmbedError::MissingBase {
                            name: name.to_string(),
                            node,
                        });
                    }
                    base = Some(contributor);
                }
            }
            let base = base.ok_or_else(|| EmbedError::MissingBase {
                name: name.to_string(),
                node,
            })?;

            let mut phi = Term::const_(graph.ssa(base, name)?, sort);
            for &contributor in &contributors {
                if contributor == base {
                    continue;
                }
                let guard = BoolExpr::and_all(graph.cond_to(contributor, graph.root())?);
                let contributor_term = Term::const_(graph.ssa(contributor, name)?, sort);
                phi = Term::ite(guard, contributor_term, phi)?;
            }
            tracing::warn!(%name, %node, contributors = contributors.len(), "constructed phi during extraction");
            phi
        }
        Definition::Value(term) => {
            for (free_name, _free_sort) in term.free_consts() {
                if let Some((base_name, def_node)) = ssa_origin(&free_name) {
                    extract_one(graph, config, emitted, assertions, def_node, &base_name)?;
                }
            }
            term
        }
    };

    assertions.push(Assertion {
        lhs_name: graph.ssa(node, name)?,
        sort,
        rhs,
    });
    emitted.insert(key);
    Ok(())
}

/// Parses an SSA name back into `(base_name, node_id)`, or `None` if
/// `name` is a leaf (`*.initial` or `unknown_*`) that extraction should
/// not recurse past.
fn ssa_origin(name: &str) -> Option<(String, NodeId)> {
    if name.ends_with(".initial") || name.starts_with("unknown_") {
        return None;
    }
    let mut parts: Vec<&str> = name.split('.').collect();
    if parts.len() < 2 {
        return None;
    }
    let node_id: u32 = parts.pop()?.parse().ok()?;
    while matches!(parts.last(), Some(&"if_true") | Some(&"if_false")) {
        parts.pop();
    }
    if parts.is_empty() {
        return None;
    }
    Some((parts.join("."), NodeId(node_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssa_origin_parses_plain_node() {
        assert_eq!(ssa_origin("RAX.7"), Some(("RAX".to_string(), NodeId(7))));
    }

    #[test]
    fn ssa_origin_strips_branch_prefixes() {
        assert_eq!(
            ssa_origin("RAX.if_true.9"),
            Some(("RAX".to_string(), NodeId(9)))
        );
        assert_eq!(
            ssa_origin("RAX.if_true.if_false.12"),
            Some(("RAX".to_string(), NodeId(12)))
        );
    }

    #[test]
    fn ssa_origin_rejects_leaves() {
        assert_eq!(ssa_origin("RAX.initial"), None);
        assert_eq!(ssa_origin("unknown_3"), None);
    }
}
