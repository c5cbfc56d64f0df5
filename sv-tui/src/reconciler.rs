//! Tree reconciliation.
//!
//! A frame proposes a candidate render graph. When its structural hash
//! matches the retained tree and the retained tree is fresh enough, the
//! shape is reused and only value-changed nodes are marked dirty; a
//! structural change (or a stale cache) rebuilds and repaints everything.

use std::time::{Duration, Instant};

use crate::graph::RenderGraph;

/// Reconciler tuning.
#[derive(Clone, Copy, Debug)]
pub struct ReconcilerConfig {
    /// Maximum age of the retained tree before a forced rebuild.
    pub max_tree_age: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_tree_age: Duration::from_secs(10),
        }
    }
}

/// What the reconciler did with the candidate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconcileDecision {
    /// Shape reused; only value-changed subtrees are dirty.
    Reused,
    /// Tree rebuilt; everything is dirty.
    Rebuilt,
}

/// Retains the last tree and decides reuse vs rebuild.
pub struct TreeReconciler {
    config: ReconcilerConfig,
    tree: Option<RenderGraph>,
    struct_hash: u64,
    built_at: Instant,
    reuses: u64,
    rebuilds: u64,
}

impl TreeReconciler {
    /// Create a reconciler.
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            tree: None,
            struct_hash: 0,
            built_at: Instant::now(),
            reuses: 0,
            rebuilds: 0,
        }
    }

    /// Reconcile a candidate tree; returns the decision. The adopted
    /// tree (with its dirty set prepared) is available via
    /// [`TreeReconciler::tree`].
    pub fn reconcile(&mut self, mut candidate: RenderGraph) -> ReconcileDecision {
        let candidate_hash = candidate
            .root()
            .map(|root| candidate.structural_hash(root))
            .unwrap_or(0);

        let fresh = self.built_at.elapsed() <= self.config.max_tree_age;
        let same_shape = self.tree.is_some() && candidate_hash == self.struct_hash;

        let decision = if same_shape && fresh {
            // Shape reuse: dirty only where display values moved.
            if let Some(prior) = &self.tree {
                candidate.mark_value_changes(prior);
            }
            self.reuses += 1;
            ReconcileDecision::Reused
        } else {
            candidate.mark_all_dirty();
            self.built_at = Instant::now();
            self.rebuilds += 1;
            ReconcileDecision::Rebuilt
        };

        self.struct_hash = candidate_hash;
        self.tree = Some(candidate);
        decision
    }

    /// The adopted tree from the last reconcile.
    pub fn tree(&mut self) -> Option<&mut RenderGraph> {
        self.tree.as_mut()
    }

    /// (reuses, rebuilds) since construction.
    pub fn counters(&self) -> (u64, u64) {
        (self.reuses, self.rebuilds)
    }
}

impl Default for TreeReconciler {
    fn default() -> Self {
        Self::new(ReconcilerConfig::default())
    }
}
