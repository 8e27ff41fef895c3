//! Per-embedding configuration knobs.
//!
//! A small `Default`-able struct, no builder, passed by value to the
//! constructor it configures.

/// Configuration for a single [`crate::embedder::Embedder`].
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Whether `ScopeGraph::cond_to` memoizes path conditions per
    /// `(node, ancestor)` pair. Default `true`; disable to exercise the
    /// unmemoized path in tests.
    pub memoize_path_conditions: bool,
    /// Ceiling on phi fan-in during extraction. Only 2-way `If`s exist
    /// today, so this never trips in practice -- it exists so a future
    /// `Switch`-like construct fails loudly instead of building an
    /// unbounded `ite` chain.
    pub max_phi_contributors: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        EmbedderConfig {
            memoize_path_conditions: true,
            max_phi_contributors: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EmbedderConfig::default();
        assert!(config.memoize_path_conditions);
        assert_eq!(config.max_phi_contributors, 64);
    }
}
