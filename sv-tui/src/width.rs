//! Grapheme-cluster cell widths.
//!
//! Terminal cells are the unit of layout; a grapheme cluster occupies 0,
//! 1, or 2 of them (or `tab_width` for a tab). CJK ranges only count
//! double-width when the terminal reports a CJK locale. Measurement is
//! memoised because panels re-measure the same fragments every frame.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lru::LruCache;

/// Width-relevant terminal environment.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TerminalEnv {
    /// Whether ambiguous/CJK ranges render double-width.
    pub cjk: bool,
    /// Cells consumed by a tab.
    pub tab_width: u8,
}

impl Default for TerminalEnv {
    fn default() -> Self {
        Self {
            cjk: false,
            tab_width: 4,
        }
    }
}

/// Whether a scalar occupies no cell of its own (combining marks,
/// zero-width spaces/joiners, variation selectors).
pub fn is_zero_width(c: char) -> bool {
    matches!(c,
        '\u{0300}'..='\u{036F}'
        | '\u{200B}'..='\u{200D}'
        | '\u{FE00}'..='\u{FE0F}'
    )
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{1100}'..='\u{115F}'
        | '\u{2E80}'..='\u{303E}'
        | '\u{3041}'..='\u{33FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{A000}'..='\u{A4CF}'
        | '\u{AC00}'..='\u{D7A3}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{FE30}'..='\u{FE4F}'
        | '\u{20000}'..='\u{2FFFD}'
        | '\u{30000}'..='\u{3FFFD}'
    )
}

fn is_fullwidth(c: char) -> bool {
    matches!(c, '\u{3000}' | '\u{FF01}'..='\u{FF60}' | '\u{FFE0}'..='\u{FFE6}')
}

/// Cells consumed by one scalar.
pub fn scalar_width(c: char, env: &TerminalEnv) -> usize {
    match c {
        '\t' => env.tab_width as usize,
        // C0, C1, DEL
        '\u{0000}'..='\u{001F}' | '\u{007F}'..='\u{009F}' => 0,
        _ if is_zero_width(c) => 0,
        // Box drawing is single-width even under CJK locales.
        '\u{2500}'..='\u{257F}' => 1,
        _ if is_fullwidth(c) => 2,
        _ if is_cjk(c) => {
            if env.cjk {
                2
            } else {
                1
            }
        }
        _ => 1,
    }
}

/// Cells consumed by one grapheme cluster.
///
/// The first scalar sets the width; trailing zero-width scalars add
/// nothing, so `width(a + b) = width(a) + width(b)` holds for disjoint
/// cluster sequences.
pub fn cluster_width(cluster: &str, env: &TerminalEnv) -> usize {
    cluster.chars().map(|c| scalar_width(c, env)).sum()
}

/// Split a string into grapheme clusters: a base scalar plus its trailing
/// zero-width scalars, with ZWJ joining the next base in as well.
pub fn graphemes(s: &str) -> Graphemes<'_> {
    Graphemes { rest: s }
}

/// Iterator returned by [`graphemes`].
pub struct Graphemes<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Graphemes<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let mut chars = self.rest.char_indices();
        let (_, first) = chars.next()?;
        let mut end = first.len_utf8();
        let mut joined = false;

        for (at, c) in chars {
            if is_zero_width(c) {
                end = at + c.len_utf8();
                joined = c == '\u{200D}';
                continue;
            }
            if joined {
                // A ZWJ glues the following base scalar into the cluster.
                end = at + c.len_utf8();
                joined = false;
                continue;
            }
            break;
        }

        let (cluster, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(cluster)
    }
}

/// Cells consumed by a whole string.
pub fn str_width(s: &str, env: &TerminalEnv) -> usize {
    graphemes(s).map(|g| cluster_width(g, env)).sum()
}

/// Byte offset of the first cluster at or past cell column `cell`.
///
/// A double-width cluster straddling `cell` resolves to its own start.
pub fn byte_at_cell(s: &str, cell: usize, env: &TerminalEnv) -> usize {
    let mut cells = 0;
    let mut offset = 0;
    for cluster in graphemes(s) {
        if cells >= cell {
            return offset;
        }
        let width = cluster_width(cluster, env);
        if cells + width > cell {
            return offset;
        }
        cells += width;
        offset += cluster.len();
    }
    offset
}

/// Memoised cluster-width measurement with hit-rate accounting.
///
/// Small clusters dominate, so the cache key is the cluster text itself.
/// The hit rate is exported to metrics; the target is ≥ 85 %.
pub struct WidthCache {
    enabled: bool,
    memo: Mutex<LruCache<(String, TerminalEnv), usize>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Memo capacity; panels reuse a small vocabulary of fragments.
const WIDTH_CACHE_CAPACITY: usize = 4096;

impl WidthCache {
    /// Create a cache; `enabled = false` degrades to direct measurement.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            memo: Mutex::new(LruCache::new(
                NonZeroUsize::new(WIDTH_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Measure one cluster through the memo.
    pub fn cluster_width(&self, cluster: &str, env: &TerminalEnv) -> usize {
        if !self.enabled {
            return cluster_width(cluster, env);
        }
        if cluster.len() == 1 {
            // Bare ASCII resolves without a map probe; it still counts
            // as a hit so the exported rate reflects real work saved.
            self.hits.fetch_add(1, Ordering::Relaxed);
            return cluster_width(cluster, env);
        }
        let key = (cluster.to_string(), *env);
        let mut memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&width) = memo.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return width;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let width = cluster_width(cluster, env);
        memo.put(key, width);
        width
    }

    /// Measure a whole string through the memo.
    pub fn str_width(&self, s: &str, env: &TerminalEnv) -> usize {
        graphemes(s).map(|g| self.cluster_width(g, env)).sum()
    }

    /// Fraction of lookups served from the memo.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}
