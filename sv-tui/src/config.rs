//! Runtime feature toggles.
//!
//! Every toggle reads from the environment once at startup; the rest of
//! the runtime takes the options struct, never the environment.

/// Default per-frame output budget in bytes.
pub const DEFAULT_BYTES_CAP: usize = 6144;

/// TUI runtime options.
#[derive(Clone, Copy, Debug)]
pub struct TuiOptions {
    /// Per-frame output budget (`TUI_BYTES_CAP`).
    pub bytes_cap: usize,
    /// Tail-edit fast path (`TUI_TAIL_EDIT`).
    pub tail_edit: bool,
    /// Cell-width memo cache (`TUI_WIDTH_CACHE`).
    pub width_cache: bool,
    /// Dirty-graph reconciler (`TUI_DIRTY_GRAPH`).
    pub dirty_graph: bool,
    /// Damage-rect diffing (`TUI_DAMAGE_RECTS`).
    pub damage_rects: bool,
    /// Verbose per-frame diagnostics on stderr (`TUI_PERF_DETAILED`).
    pub perf_detailed: bool,
}

impl Default for TuiOptions {
    fn default() -> Self {
        Self {
            bytes_cap: DEFAULT_BYTES_CAP,
            tail_edit: true,
            width_cache: true,
            dirty_graph: true,
            damage_rects: true,
            perf_detailed: false,
        }
    }
}

impl TuiOptions {
    /// Read every toggle from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bytes_cap: std::env::var("TUI_BYTES_CAP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bytes_cap),
            tail_edit: flag("TUI_TAIL_EDIT", defaults.tail_edit),
            width_cache: flag("TUI_WIDTH_CACHE", defaults.width_cache),
            dirty_graph: flag("TUI_DIRTY_GRAPH", defaults.dirty_graph),
            damage_rects: flag("TUI_DAMAGE_RECTS", defaults.damage_rects),
            perf_detailed: flag("TUI_PERF_DETAILED", defaults.perf_detailed),
        }
    }
}

fn flag(name: &str, default: bool) -> bool {
    match std::env::var(name).ok().as_deref() {
        Some("0") => false,
        Some("1") => true,
        _ => default,
    }
}
