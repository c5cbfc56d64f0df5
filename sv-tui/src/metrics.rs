//! Runtime counters and percentiles.
//!
//! Everything the render pipeline measures lands here; a JSON snapshot
//! with a fixed schema can be written for CI gates and perf triage.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Samples retained per percentile window.
const WINDOW: usize = 512;

/// A bounded sample window with percentile queries.
#[derive(Debug, Default)]
struct Window {
    samples: VecDeque<f64>,
}

impl Window {
    fn record(&mut self, value: f64) {
        if self.samples.len() == WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((sorted.len() as f64 * p).ceil() as usize).clamp(1, sorted.len());
        sorted[rank - 1]
    }
}

/// Percentile pair in a snapshot.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct P50P95 {
    /// Median.
    pub p50: f64,
    /// 95th percentile.
    pub p95: f64,
}

/// The exported snapshot schema.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    /// Nodes visited by dirty traversal.
    pub render_nodes_walked: u64,
    /// Nodes actually painted.
    pub render_nodes_painted: u64,
    /// Damage rects emitted.
    pub damage_rects_count: u64,
    /// Bytes per frame, median.
    pub bytes_per_frame_p50: f64,
    /// Bytes per frame, 95th percentile.
    pub bytes_per_frame_p95: f64,
    /// Frames per second, median.
    pub frames_per_sec_p50: f64,
    /// Frames per second, 95th percentile.
    pub frames_per_sec_p95: f64,
    /// Width-memo hit rate.
    pub width_cache_hit_rate: f64,
    /// Tail fast-path hit rate.
    pub tail_fastpath_hit_rate: f64,
    /// Render-cache hits.
    pub cache_hit_count: u64,
    /// Render-cache misses.
    pub cache_miss_count: u64,
    /// Render-cache evictions.
    pub cache_eviction_count: u64,
    /// `EAGAIN` retries on the tty.
    pub tty_write_eagain: u64,
    /// `EPIPE` writes on the tty.
    pub tty_write_sigpipe: u64,
    /// Full graph render time, median (ms).
    pub graph_render_time_p50: f64,
    /// Full graph render time, 95th percentile (ms).
    pub graph_render_time_p95: f64,
    /// Fraction of frames per diff strategy.
    pub graph_mode_rates: BTreeMap<String, f64>,
    /// Per-phase timing stats (ms).
    pub render_phase_stats: BTreeMap<String, P50P95>,
}

/// The metrics registry.
#[derive(Debug, Default)]
pub struct TuiMetrics {
    render_nodes_walked: AtomicU64,
    render_nodes_painted: AtomicU64,
    damage_rects_count: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,
    tty_write_eagain: AtomicU64,
    tty_write_sigpipe: AtomicU64,
    width_cache_hit_rate: Mutex<f64>,
    tail_fastpath_hit_rate: Mutex<f64>,
    bytes_per_frame: Mutex<Window>,
    frame_intervals: Mutex<Window>,
    graph_render_time: Mutex<Window>,
    mode_counts: Mutex<BTreeMap<String, u64>>,
    phase_stats: Mutex<BTreeMap<String, Window>>,
}

impl TuiMetrics {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dirty traversal.
    pub fn record_traversal(&self, walked: usize, painted: usize) {
        self.render_nodes_walked
            .fetch_add(walked as u64, Ordering::Relaxed);
        self.render_nodes_painted
            .fetch_add(painted as u64, Ordering::Relaxed);
    }

    /// Record one emitted frame.
    pub fn record_frame(&self, bytes: usize, strategy: &str, damage_rects: usize) {
        self.damage_rects_count
            .fetch_add(damage_rects as u64, Ordering::Relaxed);
        self.bytes_per_frame
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(bytes as f64);
        *self
            .mode_counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(strategy.to_string())
            .or_default() += 1;
    }

    /// Record the gap since the previous frame.
    pub fn record_frame_interval(&self, seconds: f64) {
        if seconds > 0.0 {
            self.frame_intervals
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .record(1.0 / seconds);
        }
    }

    /// Record a full graph render duration (ms).
    pub fn record_graph_render_ms(&self, ms: f64) {
        self.graph_render_time
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(ms);
    }

    /// Record one named render phase (ms).
    pub fn record_phase_ms(&self, phase: &str, ms: f64) {
        self.phase_stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(phase.to_string())
            .or_default()
            .record(ms);
    }

    /// Update render-cache counters from the cache's own accounting.
    pub fn set_cache_counters(&self, hits: u64, misses: u64, evictions: u64) {
        self.cache_hits.store(hits, Ordering::Relaxed);
        self.cache_misses.store(misses, Ordering::Relaxed);
        self.cache_evictions.store(evictions, Ordering::Relaxed);
    }

    /// Update the width-memo hit rate gauge.
    pub fn set_width_cache_hit_rate(&self, rate: f64) {
        *self
            .width_cache_hit_rate
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = rate;
    }

    /// Update the tail fast-path hit rate gauge.
    pub fn set_tail_fastpath_hit_rate(&self, rate: f64) {
        *self
            .tail_fastpath_hit_rate
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = rate;
    }

    /// Update tty write counters from the sink's accounting.
    pub fn set_tty_counters(&self, eagain: u64, sigpipe: u64) {
        self.tty_write_eagain.store(eagain, Ordering::Relaxed);
        self.tty_write_sigpipe.store(sigpipe, Ordering::Relaxed);
    }

    /// Build the exportable snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let bytes = self.bytes_per_frame.lock().unwrap_or_else(|e| e.into_inner());
        let fps = self.frame_intervals.lock().unwrap_or_else(|e| e.into_inner());
        let graph = self.graph_render_time.lock().unwrap_or_else(|e| e.into_inner());
        let modes = self.mode_counts.lock().unwrap_or_else(|e| e.into_inner());
        let phases = self.phase_stats.lock().unwrap_or_else(|e| e.into_inner());

        let total_frames: u64 = modes.values().sum();
        let graph_mode_rates = modes
            .iter()
            .map(|(mode, count)| {
                let rate = if total_frames == 0 {
                    0.0
                } else {
                    *count as f64 / total_frames as f64
                };
                (mode.clone(), rate)
            })
            .collect();

        MetricsSnapshot {
            render_nodes_walked: self.render_nodes_walked.load(Ordering::Relaxed),
            render_nodes_painted: self.render_nodes_painted.load(Ordering::Relaxed),
            damage_rects_count: self.damage_rects_count.load(Ordering::Relaxed),
            bytes_per_frame_p50: bytes.percentile(0.50),
            bytes_per_frame_p95: bytes.percentile(0.95),
            frames_per_sec_p50: fps.percentile(0.50),
            frames_per_sec_p95: fps.percentile(0.95),
            width_cache_hit_rate: *self
                .width_cache_hit_rate
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
            tail_fastpath_hit_rate: *self
                .tail_fastpath_hit_rate
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
            cache_hit_count: self.cache_hits.load(Ordering::Relaxed),
            cache_miss_count: self.cache_misses.load(Ordering::Relaxed),
            cache_eviction_count: self.cache_evictions.load(Ordering::Relaxed),
            tty_write_eagain: self.tty_write_eagain.load(Ordering::Relaxed),
            tty_write_sigpipe: self.tty_write_sigpipe.load(Ordering::Relaxed),
            graph_render_time_p50: graph.percentile(0.50),
            graph_render_time_p95: graph.percentile(0.95),
            graph_mode_rates,
            render_phase_stats: phases
                .iter()
                .map(|(phase, window)| {
                    (
                        phase.clone(),
                        P50P95 {
                            p50: window.percentile(0.50),
                            p95: window.percentile(0.95),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Write the snapshot as pretty JSON.
    pub fn export(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_window() {
        let mut window = Window::default();
        for i in 1..=100 {
            window.record(i as f64);
        }
        assert_eq!(window.percentile(0.50), 50.0);
        assert_eq!(window.percentile(0.95), 95.0);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut window = Window::default();
        for i in 0..(WINDOW + 100) {
            window.record(i as f64);
        }
        assert_eq!(window.samples.len(), WINDOW);
    }

    #[test]
    fn test_mode_rates_sum_to_one() {
        let metrics = TuiMetrics::new();
        metrics.record_frame(100, "tail_edit", 0);
        metrics.record_frame(200, "damage_rects", 3);
        metrics.record_frame(300, "damage_rects", 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.damage_rects_count, 4);
        let total: f64 = snapshot.graph_mode_rates.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((snapshot.graph_mode_rates["damage_rects"] - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_schema_field_names() {
        let metrics = TuiMetrics::new();
        metrics.record_frame(128, "line_diff", 0);
        metrics.record_phase_ms("paint", 2.0);
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        for field in [
            "render_nodes_walked",
            "render_nodes_painted",
            "damage_rects_count",
            "bytes_per_frame_p50",
            "bytes_per_frame_p95",
            "frames_per_sec_p50",
            "frames_per_sec_p95",
            "width_cache_hit_rate",
            "tail_fastpath_hit_rate",
            "cache_hit_count",
            "tty_write_eagain",
            "tty_write_sigpipe",
            "graph_render_time_p50",
            "graph_render_time_p95",
            "graph_mode_rates",
            "render_phase_stats",
        ] {
            assert!(json.contains(field), "missing {}", field);
        }
    }

    #[test]
    fn test_export_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tui_metrics.json");
        let metrics = TuiMetrics::new();
        metrics.record_frame(64, "full_redraw", 0);
        metrics.export(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("full_redraw"));
    }
}
