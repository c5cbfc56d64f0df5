//! Pre-rendered surface cache.
//!
//! Keyed by `(stable node id, structural hash, terminal env)`, so a node
//! whose shape is unchanged can paint from the cache without re-running
//! its renderer. An LRU bounds the total cached cells.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::graph::Rect;
use crate::width::TerminalEnv;

/// Total cached cells allowed before eviction.
pub const MAX_CACHED_CELLS: usize = 100_000;

/// Cache key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CacheKey {
    /// Stable renderable identity.
    pub node_id: u64,
    /// Structural hash of the node's subtree.
    pub struct_hash: u64,
    /// Environment the surface was measured under.
    pub env: TerminalEnv,
}

/// A pre-rendered surface.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Surface {
    /// Rendered lines.
    pub lines: Vec<String>,
    /// Bounds the surface was rendered for.
    pub bounds: Rect,
}

impl Surface {
    fn cells(&self) -> usize {
        self.bounds.w as usize * self.bounds.h as usize
    }
}

/// LRU surface cache with hit/miss/eviction counters.
pub struct RenderCache {
    entries: LruCache<CacheKey, Surface>,
    cells: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl RenderCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            // The cell budget is the real bound; the entry bound is a
            // backstop against many tiny surfaces.
            entries: LruCache::new(NonZeroUsize::new(4096).unwrap_or(NonZeroUsize::MIN)),
            cells: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up a surface.
    pub fn get(&mut self, key: &CacheKey) -> Option<Surface> {
        match self.entries.get(key) {
            Some(surface) => {
                self.hits += 1;
                Some(surface.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a surface, evicting least-recently-used entries while the
    /// cell budget is exceeded.
    pub fn put(&mut self, key: CacheKey, surface: Surface) {
        let added = surface.cells();
        if let Some(replaced) = self.entries.put(key, surface) {
            self.cells -= replaced.cells();
        }
        self.cells += added;
        while self.cells > MAX_CACHED_CELLS {
            match self.entries.pop_lru() {
                Some((_, evicted)) => {
                    self.cells -= evicted.cells();
                    self.evictions += 1;
                }
                None => break,
            }
        }
    }

    /// Drop everything (e.g. on env change).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cells = 0;
    }

    /// (hits, misses, evictions).
    pub fn counters(&self) -> (u64, u64, u64) {
        (self.hits, self.misses, self.evictions)
    }

    /// Cells currently cached.
    pub fn cells(&self) -> usize {
        self.cells
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new()
    }
}
