//! Frame diff rendering.
//!
//! Turns (previous, current) buffer pairs into one byte stream per frame,
//! under a byte cap. Strategies escalate: tail-edit fast path, merged
//! damage rects, per-line diff, full redraw. Lines that do not fit the
//! cap are deferred to the next frame rather than split mid-sequence.

use crate::ansi;
use crate::buffer::{AttrRun, BufferDiff, TerminalBuffer};
use crate::config::TuiOptions;
use crate::width::{cluster_width, graphemes, str_width};

/// How a frame was encoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Strategy {
    /// Cursor-relative tail emission on a single changed line.
    TailEdit,
    /// Merged damage rectangles.
    DamageRects,
    /// Whole-line rewrites of changed lines.
    LineDiff,
    /// Home, clear, and repaint everything.
    FullRedraw,
}

/// One encoded frame.
#[derive(Clone, Debug)]
pub struct FramePlan {
    /// The byte stream for the frame's single write. Empty = no output.
    pub bytes: Vec<u8>,
    /// Strategy used.
    pub strategy: Strategy,
    /// Lines that did not fit the byte cap and must re-render next frame.
    pub deferred: Vec<usize>,
    /// Damage rectangles emitted (zero for other strategies).
    pub damage_rects: usize,
}

impl FramePlan {
    fn empty(strategy: Strategy) -> Self {
        Self {
            bytes: Vec::new(),
            strategy,
            deferred: Vec::new(),
            damage_rects: 0,
        }
    }
}

/// A damage rectangle in cell coordinates.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DamageRect {
    /// Left cell column.
    pub x: u16,
    /// Top line.
    pub y: u16,
    /// Width in cells.
    pub w: u16,
    /// Height in lines.
    pub h: u16,
}

impl DamageRect {
    fn right(&self) -> u16 {
        self.x + self.w
    }

    fn bottom(&self) -> u16 {
        self.y + self.h
    }

    fn intersects(&self, other: &DamageRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    fn same_row_adjacent(&self, other: &DamageRect) -> bool {
        self.y == other.y
            && self.h == other.h
            && (self.right() == other.x || other.right() == self.x)
    }

    fn union(&self, other: &DamageRect) -> DamageRect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        DamageRect {
            x,
            y,
            w: self.right().max(other.right()) - x,
            h: self.bottom().max(other.bottom()) - y,
        }
    }
}

/// Merge overlapping and same-row-abutting rects, y-major then x order.
pub fn merge_rects(mut rects: Vec<DamageRect>) -> Vec<DamageRect> {
    rects.sort_by_key(|r| (r.y, r.x));
    let mut merged: Vec<DamageRect> = Vec::with_capacity(rects.len());
    'outer: for rect in rects {
        for slot in merged.iter_mut() {
            if slot.intersects(&rect) || slot.same_row_adjacent(&rect) {
                *slot = slot.union(&rect);
                continue 'outer;
            }
        }
        merged.push(rect);
    }
    merged
}

/// The diff renderer. Holds the fast-path and strategy counters exported
/// through metrics.
pub struct DiffRenderer {
    options: TuiOptions,
    tail_hits: u64,
    tail_misses: u64,
    strategy_counts: [u64; 4],
}

impl DiffRenderer {
    /// Create a renderer with the given options.
    pub fn new(options: TuiOptions) -> Self {
        Self {
            options,
            tail_hits: 0,
            tail_misses: 0,
            strategy_counts: [0; 4],
        }
    }

    /// Encode the difference between two frames.
    pub fn render(&mut self, prev: &TerminalBuffer, curr: &TerminalBuffer) -> FramePlan {
        let changed = match curr.diff(prev) {
            BufferDiff::FullRepaint => {
                return self.finish(self.full_redraw(curr));
            }
            BufferDiff::Lines(changed) => changed,
        };
        if changed.is_empty() {
            return FramePlan::empty(Strategy::LineDiff);
        }

        if self.options.tail_edit && changed.len() == 1 {
            if let Some(plan) = self.tail_edit(prev, curr, changed[0]) {
                self.tail_hits += 1;
                return self.finish(plan);
            }
            self.tail_misses += 1;
        }

        let plan = if self.options.damage_rects {
            self.damage_rects(prev, curr, &changed)
        } else {
            self.line_diff(curr, &changed)
        };
        self.finish(plan)
    }

    fn finish(&mut self, plan: FramePlan) -> FramePlan {
        let slot = match plan.strategy {
            Strategy::TailEdit => 0,
            Strategy::DamageRects => 1,
            Strategy::LineDiff => 2,
            Strategy::FullRedraw => 3,
        };
        self.strategy_counts[slot] += 1;
        plan
    }

    /// Tail-edit: reuse a large common prefix of the single changed line.
    ///
    /// Only plain (run-free) lines qualify; attribute runs shift with the
    /// text and would need a full line rewrite anyway.
    fn tail_edit(
        &self,
        prev: &TerminalBuffer,
        curr: &TerminalBuffer,
        y: usize,
    ) -> Option<FramePlan> {
        let old = prev.line(y);
        let new = curr.line(y);
        if !old.runs().is_empty() || !new.runs().is_empty() {
            return None;
        }

        let old_text = old.as_str();
        let new_text = new.as_str();
        let min_len = old_text.len().min(new_text.len());
        if min_len == 0 {
            return None;
        }

        // Grapheme-aligned common prefix.
        let mut prefix = 0;
        let mut prefix_cells = 0;
        let env = curr.env();
        for cluster in graphemes(old_text) {
            let end = prefix + cluster.len();
            if new_text.len() < end || new_text.as_bytes()[prefix..end] != old_text.as_bytes()[prefix..end] {
                break;
            }
            prefix = end;
            prefix_cells += cluster_width(cluster, env);
        }

        if (prefix as f64) < 0.9 * (min_len as f64) {
            return None;
        }

        let mut bytes = Vec::new();
        ansi::cursor_to(&mut bytes, y as u16, prefix_cells as u16);
        bytes.extend_from_slice(new_text[prefix..].as_bytes());
        if str_width(new_text, env) < str_width(old_text, env) {
            ansi::erase_to_eol(&mut bytes);
        }

        if bytes.len() > self.options.bytes_cap {
            return None;
        }
        Some(FramePlan {
            bytes,
            strategy: Strategy::TailEdit,
            deferred: Vec::new(),
            damage_rects: 0,
        })
    }

    /// One rect per changed line span, merged, then emitted row by row.
    fn damage_rects(
        &self,
        prev: &TerminalBuffer,
        curr: &TerminalBuffer,
        changed: &[usize],
    ) -> FramePlan {
        let (width, _) = curr.size();
        let env = *curr.env();

        let mut rects = Vec::with_capacity(changed.len());
        for &y in changed {
            let old = prev.line(y);
            let new = curr.line(y);
            let rect = if old.runs() != new.runs() {
                // Attr changes can touch the whole line.
                DamageRect {
                    x: 0,
                    y: y as u16,
                    w: width,
                    h: 1,
                }
            } else {
                changed_span(old.as_str(), new.as_str(), &env, width, y as u16)
            };
            rects.push(rect);
        }
        let rects = merge_rects(rects);

        let mut bytes = Vec::new();
        let mut deferred = Vec::new();
        let mut emitted = 0;
        for rect in &rects {
            let mut chunk = Vec::new();
            for row in rect.y..rect.bottom() {
                ansi::cursor_to(&mut chunk, row, rect.x);
                emit_cells(&mut chunk, curr, row as usize, rect.x as usize, rect.w as usize);
            }
            if bytes.len() + chunk.len() > self.options.bytes_cap {
                deferred.extend(rect.y..rect.bottom());
                continue;
            }
            bytes.extend_from_slice(&chunk);
            emitted += 1;
        }
        deferred.sort_unstable();
        deferred.dedup();

        FramePlan {
            bytes,
            strategy: Strategy::DamageRects,
            deferred: deferred.into_iter().map(|y| y as usize).collect(),
            damage_rects: emitted,
        }
    }

    /// Whole-line rewrites, clear-to-EOL before each.
    fn line_diff(&self, curr: &TerminalBuffer, changed: &[usize]) -> FramePlan {
        let mut bytes = Vec::new();
        let mut deferred = Vec::new();
        for &y in changed {
            let mut chunk = Vec::new();
            ansi::cursor_to(&mut chunk, y as u16, 0);
            ansi::erase_to_eol(&mut chunk);
            emit_styled_line(&mut chunk, curr, y);
            if bytes.len() + chunk.len() > self.options.bytes_cap {
                deferred.push(y);
                continue;
            }
            bytes.extend_from_slice(&chunk);
        }
        FramePlan {
            bytes,
            strategy: Strategy::LineDiff,
            deferred,
            damage_rects: 0,
        }
    }

    /// Home, clear display, repaint every line.
    fn full_redraw(&self, curr: &TerminalBuffer) -> FramePlan {
        let mut bytes = Vec::new();
        ansi::home(&mut bytes);
        ansi::clear_display(&mut bytes);
        let mut deferred = Vec::new();
        for y in 0..curr.line_count() {
            if curr.line(y).as_str().is_empty() {
                continue;
            }
            let mut chunk = Vec::new();
            ansi::cursor_to(&mut chunk, y as u16, 0);
            emit_styled_line(&mut chunk, curr, y);
            if bytes.len() + chunk.len() > self.options.bytes_cap {
                deferred.push(y);
                continue;
            }
            bytes.extend_from_slice(&chunk);
        }
        FramePlan {
            bytes,
            strategy: Strategy::FullRedraw,
            deferred,
            damage_rects: 0,
        }
    }

    /// Fraction of single-line frames served by the tail fast path.
    pub fn tail_fastpath_hit_rate(&self) -> f64 {
        let total = self.tail_hits + self.tail_misses;
        if total == 0 {
            0.0
        } else {
            self.tail_hits as f64 / total as f64
        }
    }

    /// Frames per strategy: (tail, rects, lines, full).
    pub fn strategy_counts(&self) -> [u64; 4] {
        self.strategy_counts
    }
}

/// The changed cell span of a line pair as a one-line rect.
fn changed_span(
    old: &str,
    new: &str,
    env: &crate::width::TerminalEnv,
    width: u16,
    y: u16,
) -> DamageRect {
    // Common grapheme prefix in cells.
    let mut prefix_bytes = 0;
    let mut prefix_cells: usize = 0;
    for cluster in graphemes(old) {
        let end = prefix_bytes + cluster.len();
        if new.len() < end || new.as_bytes()[prefix_bytes..end] != old.as_bytes()[prefix_bytes..end]
        {
            break;
        }
        prefix_bytes = end;
        prefix_cells += cluster_width(cluster, env);
    }

    let old_cells = str_width(old, env);
    let new_cells = str_width(new, env);
    let end_cells = old_cells.max(new_cells).min(width as usize);
    let x = prefix_cells.min(end_cells);
    DamageRect {
        x: x as u16,
        y,
        w: (end_cells - x).max(1) as u16,
        h: 1,
    }
}

/// Emit the cells `[x, x + w)` of a line, space-padded, with attributes.
fn emit_cells(out: &mut Vec<u8>, buffer: &TerminalBuffer, y: usize, x: usize, w: usize) {
    let line = buffer.line(y);
    let env = buffer.env();
    let text = line.as_str();

    // Byte range covering the requested cells.
    let mut cell = 0;
    let mut start = None;
    let mut end = text.len();
    let mut offset = 0;
    for cluster in graphemes(text) {
        let cw = cluster_width(cluster, env);
        if start.is_none() && cell + cw > x {
            start = Some(offset);
        }
        if cell >= x + w {
            end = offset;
            break;
        }
        cell += cw;
        offset += cluster.len();
    }
    let start = start.unwrap_or(text.len());
    let slice_cells = str_width(&text[start..end], env);

    emit_styled(out, &text[start..end], line.runs(), start);
    if slice_cells < w {
        out.extend_from_slice(" ".repeat(w - slice_cells).as_bytes());
    }
}

/// Emit a whole line with attributes.
fn emit_styled_line(out: &mut Vec<u8>, buffer: &TerminalBuffer, y: usize) {
    let line = buffer.line(y);
    emit_styled(out, line.as_str(), line.runs(), 0);
}

/// Emit `text` (whose first byte sits at `base` in its line) applying the
/// line's attribute runs; always leaves attributes reset.
fn emit_styled(out: &mut Vec<u8>, text: &str, runs: &[AttrRun], base: usize) {
    if runs.is_empty() {
        out.extend_from_slice(text.as_bytes());
        return;
    }

    let end = base + text.len();
    let mut cursor = base;
    for run in runs {
        let run_start = run.start.max(base);
        let run_end = (run.start + run.len).min(end);
        if run_end <= run_start {
            continue;
        }
        if run_start > cursor {
            out.extend_from_slice(text[cursor - base..run_start - base].as_bytes());
        }
        ansi::sgr(out, &run.attr);
        out.extend_from_slice(text[run_start - base..run_end - base].as_bytes());
        ansi::sgr_reset(out);
        cursor = run_end;
    }
    if cursor < end {
        out.extend_from_slice(text[cursor - base..].as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Point;
    use crate::width::TerminalEnv;

    fn buffer_with(lines: &[(usize, &str)]) -> TerminalBuffer {
        let mut buf = TerminalBuffer::new(80, 24, TerminalEnv::default());
        for (y, text) in lines {
            buf.write(text, Point { x: 0, y: *y as u16 }, None);
        }
        buf
    }

    #[test]
    fn test_no_change_is_empty_plan() {
        let prev = buffer_with(&[(0, "hello")]);
        let curr = prev.clone();
        let mut renderer = DiffRenderer::new(TuiOptions::default());
        let plan = renderer.render(&prev, &curr);
        assert!(plan.bytes.is_empty());
    }

    #[test]
    fn test_tail_edit_hit() {
        // 37-byte lines sharing a 34-byte prefix: 91% > the 90% bar.
        let prev = buffer_with(&[(3, "price: btc 64_120.00 eth 3_410.00 usd")]);
        let curr = buffer_with(&[(3, "price: btc 64_120.00 eth 3_410.00 eur")]);
        let mut renderer = DiffRenderer::new(TuiOptions::default());

        let plan = renderer.render(&prev, &curr);
        assert_eq!(plan.strategy, Strategy::TailEdit);
        // Cursor to row 4, col 35 (1-based), then the 3-byte tail.
        assert_eq!(plan.bytes, b"\x1b[4;35Heur");
        assert!(renderer.tail_fastpath_hit_rate() > 0.99);
    }

    #[test]
    fn test_tail_edit_erases_when_shorter() {
        let prev = buffer_with(&[(0, "0123456789abcdef")]);
        let curr = buffer_with(&[(0, "0123456789abcd")]);
        let mut renderer = DiffRenderer::new(TuiOptions::default());

        let plan = renderer.render(&prev, &curr);
        assert_eq!(plan.strategy, Strategy::TailEdit);
        assert!(plan.bytes.ends_with(b"\x1b[K"));
    }

    #[test]
    fn test_tail_edit_miss_falls_to_rects() {
        let prev = buffer_with(&[(0, "aaaaaaaaaa")]);
        let curr = buffer_with(&[(0, "bbbbbbbbbb")]); // nothing shared
        let mut renderer = DiffRenderer::new(TuiOptions::default());

        let plan = renderer.render(&prev, &curr);
        assert_eq!(plan.strategy, Strategy::DamageRects);
        assert_eq!(plan.damage_rects, 1);
        assert_eq!(renderer.tail_fastpath_hit_rate(), 0.0);
    }

    #[test]
    fn test_multi_line_uses_rects() {
        let prev = buffer_with(&[(2, "one"), (7, "two")]);
        let curr = buffer_with(&[(2, "ONE"), (7, "TWO")]);
        let mut renderer = DiffRenderer::new(TuiOptions::default());

        let plan = renderer.render(&prev, &curr);
        assert_eq!(plan.strategy, Strategy::DamageRects);
        assert_eq!(plan.damage_rects, 2);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn test_rects_disabled_uses_line_diff() {
        let options = TuiOptions {
            damage_rects: false,
            tail_edit: false,
            ..TuiOptions::default()
        };
        let prev = buffer_with(&[(2, "one"), (7, "two")]);
        let curr = buffer_with(&[(2, "ONE"), (7, "TWO")]);
        let mut renderer = DiffRenderer::new(options);

        let plan = renderer.render(&prev, &curr);
        assert_eq!(plan.strategy, Strategy::LineDiff);
        // clear-to-EOL before each rewritten line
        assert_eq!(
            plan.bytes
                .windows(3)
                .filter(|window| *window == b"\x1b[K")
                .count(),
            2
        );
    }

    #[test]
    fn test_resize_forces_full_redraw() {
        let prev = buffer_with(&[(0, "x")]);
        let mut curr = prev.clone();
        curr.resize(40, 12);
        let mut renderer = DiffRenderer::new(TuiOptions::default());

        let plan = renderer.render(&prev, &curr);
        assert_eq!(plan.strategy, Strategy::FullRedraw);
        assert!(plan.bytes.starts_with(b"\x1b[H\x1b[2J"));
    }

    #[test]
    fn test_bytes_cap_defers_lines() {
        let options = TuiOptions {
            bytes_cap: 120,
            tail_edit: false,
            ..TuiOptions::default()
        };
        let big = "z".repeat(70);
        let prev = buffer_with(&[]);
        let curr = buffer_with(&[(0, &big), (1, &big), (2, &big)]);
        let mut renderer = DiffRenderer::new(options);

        let plan = renderer.render(&prev, &curr);
        assert!(plan.bytes.len() <= 120);
        assert!(!plan.deferred.is_empty());
    }

    #[test]
    fn test_merge_rects_same_row_adjacent() {
        let rects = vec![
            DamageRect { x: 0, y: 1, w: 5, h: 1 },
            DamageRect { x: 5, y: 1, w: 3, h: 1 },
            DamageRect { x: 20, y: 1, w: 2, h: 1 },
        ];
        let merged = merge_rects(rects);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], DamageRect { x: 0, y: 1, w: 8, h: 1 });
    }

    #[test]
    fn test_merge_rects_intersecting() {
        let rects = vec![
            DamageRect { x: 0, y: 0, w: 10, h: 2 },
            DamageRect { x: 5, y: 1, w: 10, h: 2 },
        ];
        let merged = merge_rects(rects);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0], DamageRect { x: 0, y: 0, w: 15, h: 3 });
    }
}
