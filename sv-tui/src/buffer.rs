//! Line + attribute grid.
//!
//! A buffer is `height` lines of UTF-8 text with attribute runs over byte
//! ranges. Writes are cell-addressed; a write that cuts into a
//! double-width cluster removes the whole cluster and pads the exposed
//! half with a space, the way real terminals clip wide glyphs.

use std::collections::BTreeSet;
use std::ops::Range;

use crate::width::{cluster_width, graphemes, str_width, TerminalEnv};

/// A cell coordinate, column-major within a line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Point {
    /// Cell column.
    pub x: u16,
    /// Line index.
    pub y: u16,
}

/// Display attributes for a run of text.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Attr {
    /// 256-color foreground index.
    pub fg: Option<u8>,
    /// 256-color background index.
    pub bg: Option<u8>,
    /// Bold.
    pub bold: bool,
    /// Dim.
    pub dim: bool,
    /// Italic.
    pub italic: bool,
    /// Underline.
    pub underline: bool,
    /// Reverse video.
    pub reverse: bool,
}

impl Attr {
    /// Whether this attribute set changes nothing.
    pub fn is_plain(&self) -> bool {
        *self == Attr::default()
    }
}

/// One attribute run over a byte range of its line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AttrRun {
    /// Byte offset of the run start.
    pub start: usize,
    /// Byte length of the run.
    pub len: usize,
    /// Attributes applied to the range.
    pub attr: Attr,
}

/// One buffer line: UTF-8 text plus attribute runs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Line {
    text: String,
    runs: Vec<AttrRun>,
}

impl Line {
    /// The line text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The attribute runs, ordered by start offset.
    pub fn runs(&self) -> &[AttrRun] {
        &self.runs
    }

    fn clear(&mut self) {
        self.text.clear();
        self.runs.clear();
    }
}

/// Change set between two equally-sized buffers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BufferDiff {
    /// Indices of lines that differ. Empty means identical.
    Lines(Vec<usize>),
    /// Sizes differ; the whole surface must repaint.
    FullRepaint,
}

/// The terminal grid.
#[derive(Clone, Debug)]
pub struct TerminalBuffer {
    width: u16,
    height: u16,
    env: TerminalEnv,
    lines: Vec<Line>,
    dirty: BTreeSet<usize>,
}

impl TerminalBuffer {
    /// Create an empty grid.
    pub fn new(width: u16, height: u16, env: TerminalEnv) -> Self {
        Self {
            width,
            height,
            env,
            lines: vec![Line::default(); height as usize],
            dirty: BTreeSet::new(),
        }
    }

    /// Grid size in cells.
    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// The width environment this grid measures with.
    pub fn env(&self) -> &TerminalEnv {
        &self.env
    }

    /// Borrow a line. Out-of-range indices return an empty line.
    pub fn line(&self, y: usize) -> &Line {
        static EMPTY: Line = Line {
            text: String::new(),
            runs: Vec::new(),
        };
        self.lines.get(y).unwrap_or(&EMPTY)
    }

    /// Number of lines.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Write `text` at a cell position, optionally attributed.
    ///
    /// The write clips to the grid width. Lines shorter than the start
    /// column are padded with spaces.
    pub fn write(&mut self, text: &str, point: Point, attr: Option<Attr>) {
        let y = point.y as usize;
        if y >= self.lines.len() || text.is_empty() {
            return;
        }

        // Clip to the grid width.
        let budget = (self.width as usize).saturating_sub(point.x as usize);
        if budget == 0 {
            return;
        }
        let mut clipped_end = 0;
        let mut used = 0;
        for cluster in graphemes(text) {
            let w = cluster_width(cluster, &self.env);
            if used + w > budget {
                break;
            }
            used += w;
            clipped_end += cluster.len();
        }
        let text = &text[..clipped_end];
        if text.is_empty() {
            return;
        }

        let env = self.env;
        let line = &mut self.lines[y];
        splice(line, point.x as usize, text, attr, &env);
        self.dirty.insert(y);
    }

    /// Clear a line to empty.
    pub fn clear_line(&mut self, y: usize) {
        if let Some(line) = self.lines.get_mut(y) {
            line.clear();
            self.dirty.insert(y);
        }
    }

    /// Resize the grid, preserving the surviving prefix of each line.
    pub fn resize(&mut self, width: u16, height: u16) {
        self.lines.resize(height as usize, Line::default());
        if width < self.width {
            for line in &mut self.lines {
                let cut = byte_prefix_for_cells(&line.text, width as usize, &self.env);
                if cut < line.text.len() {
                    line.text.truncate(cut);
                    truncate_runs(&mut line.runs, cut);
                }
            }
        }
        self.width = width;
        self.height = height;
        self.dirty = (0..self.lines.len()).collect();
    }

    /// Mark a line range dirty regardless of content changes.
    pub fn mark_dirty(&mut self, range: Range<usize>) {
        for y in range {
            if y < self.lines.len() {
                self.dirty.insert(y);
            }
        }
    }

    /// Drain the dirty-line set.
    pub fn take_dirty(&mut self) -> BTreeSet<usize> {
        std::mem::take(&mut self.dirty)
    }

    /// Copy one line (text and runs) from another buffer.
    pub(crate) fn clone_line_from(&mut self, other: &TerminalBuffer, y: usize) {
        if y < self.lines.len() {
            self.lines[y] = other.line(y).clone();
            self.dirty.insert(y);
        }
    }

    /// Line-granular change list against a previous frame.
    ///
    /// Equal sizes produce an exact per-line diff; a size change always
    /// produces a full-surface repaint.
    pub fn diff(&self, prev: &TerminalBuffer) -> BufferDiff {
        if self.size() != prev.size() {
            return BufferDiff::FullRepaint;
        }
        let changed = self
            .lines
            .iter()
            .zip(prev.lines.iter())
            .enumerate()
            .filter(|(_, (cur, old))| cur != old)
            .map(|(y, _)| y)
            .collect();
        BufferDiff::Lines(changed)
    }
}

/// Byte length of the longest prefix fitting in `cells` cells.
fn byte_prefix_for_cells(s: &str, cells: usize, env: &TerminalEnv) -> usize {
    let mut used = 0;
    let mut offset = 0;
    for cluster in graphemes(s) {
        let w = cluster_width(cluster, env);
        if used + w > cells {
            break;
        }
        used += w;
        offset += cluster.len();
    }
    offset
}

fn truncate_runs(runs: &mut Vec<AttrRun>, cut: usize) {
    runs.retain_mut(|run| {
        if run.start >= cut {
            return false;
        }
        if run.start + run.len > cut {
            run.len = cut - run.start;
        }
        run.len > 0
    });
}

/// Replace the cells `[x, x + width(text))` of `line` with `text`.
fn splice(line: &mut Line, x: usize, text: &str, attr: Option<Attr>, env: &TerminalEnv) {
    let line_width = str_width(&line.text, env);

    // Pad out to the start column.
    if line_width < x {
        line.text.push_str(&" ".repeat(x - line_width));
    }

    let text_width = str_width(text, env);
    let end_cell = x + text_width;

    // Locate the byte span covering [x, end_cell), expanding to whole
    // clusters; halves exposed by the cut are padded with spaces.
    let mut cell = 0;
    let mut offset = 0;
    let mut start_byte = line.text.len();
    let mut lead_pad = 0;
    let mut end_byte = line.text.len();
    let mut trail_pad = 0;
    let mut start_found = false;

    for cluster in graphemes(&line.text) {
        let w = cluster_width(cluster, env);
        if !start_found && cell + w > x {
            start_byte = offset;
            lead_pad = x - cell;
            start_found = true;
        }
        if cell >= end_cell {
            end_byte = offset;
            trail_pad = 0;
            break;
        }
        if start_found && cell < end_cell && cell + w > end_cell {
            // Wide cluster straddling the end: drop it whole, pad the rest.
            end_byte = offset + cluster.len();
            trail_pad = (cell + w) - end_cell;
            break;
        }
        cell += w;
        offset += cluster.len();
        end_byte = offset;
    }
    if !start_found {
        start_byte = line.text.len();
        end_byte = line.text.len();
    }

    let mut inserted = String::with_capacity(lead_pad + text.len() + trail_pad);
    inserted.push_str(&" ".repeat(lead_pad));
    inserted.push_str(text);
    inserted.push_str(&" ".repeat(trail_pad));

    let removed = end_byte - start_byte;
    line.text.replace_range(start_byte..end_byte, &inserted);

    // Re-thread the attribute runs around the replaced range.
    let delta = inserted.len() as isize - removed as isize;
    let mut updated: Vec<AttrRun> = Vec::with_capacity(line.runs.len() + 1);
    for run in &line.runs {
        let run_end = run.start + run.len;
        if run_end <= start_byte {
            updated.push(*run);
            continue;
        }
        if run.start >= end_byte {
            updated.push(AttrRun {
                start: (run.start as isize + delta) as usize,
                len: run.len,
                attr: run.attr,
            });
            continue;
        }
        // Overlap: keep the pieces outside the replaced range.
        if run.start < start_byte {
            updated.push(AttrRun {
                start: run.start,
                len: start_byte - run.start,
                attr: run.attr,
            });
        }
        if run_end > end_byte {
            updated.push(AttrRun {
                start: (end_byte as isize + delta) as usize,
                len: run_end - end_byte,
                attr: run.attr,
            });
        }
    }
    if let Some(attr) = attr {
        if !attr.is_plain() {
            updated.push(AttrRun {
                start: start_byte + lead_pad,
                len: text.len(),
                attr,
            });
        }
    }
    updated.sort_by_key(|run| run.start);
    line.runs = updated;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> TerminalEnv {
        TerminalEnv {
            cjk: true,
            tab_width: 4,
        }
    }

    fn buffer() -> TerminalBuffer {
        TerminalBuffer::new(40, 10, env())
    }

    #[test]
    fn test_write_and_read_back() {
        let mut buf = buffer();
        buf.write("hello", Point { x: 2, y: 1 }, None);
        assert_eq!(buf.line(1).as_str(), "  hello");
    }

    #[test]
    fn test_overwrite_middle() {
        let mut buf = buffer();
        buf.write("abcdefgh", Point { x: 0, y: 0 }, None);
        buf.write("XY", Point { x: 3, y: 0 }, None);
        assert_eq!(buf.line(0).as_str(), "abcXYfgh");
    }

    #[test]
    fn test_write_clips_to_width() {
        let mut buf = TerminalBuffer::new(5, 2, env());
        buf.write("abcdefgh", Point { x: 0, y: 0 }, None);
        assert_eq!(buf.line(0).as_str(), "abcde");
        buf.write("zz", Point { x: 5, y: 0 }, None);
        assert_eq!(buf.line(0).as_str(), "abcde");
    }

    #[test]
    fn test_wide_cluster_clipped_with_pad() {
        let mut buf = buffer();
        buf.write("漢字", Point { x: 0, y: 0 }, None);
        // Overwrite cell 1, the right half of 漢: the glyph is gone and
        // its left half becomes a space.
        buf.write("x", Point { x: 1, y: 0 }, None);
        assert_eq!(buf.line(0).as_str(), " x字");
    }

    #[test]
    fn test_attr_runs_follow_splice() {
        let mut buf = buffer();
        let red = Attr {
            fg: Some(1),
            ..Default::default()
        };
        buf.write("redrun", Point { x: 0, y: 0 }, Some(red));
        buf.write("--", Point { x: 2, y: 0 }, None);

        let line = buf.line(0);
        assert_eq!(line.as_str(), "re--un");
        let runs = line.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!((runs[0].start, runs[0].len), (0, 2));
        assert_eq!((runs[1].start, runs[1].len), (4, 2));
        assert_eq!(runs[0].attr, red);
    }

    #[test]
    fn test_clear_line() {
        let mut buf = buffer();
        buf.write("data", Point { x: 0, y: 3 }, None);
        buf.clear_line(3);
        assert_eq!(buf.line(3).as_str(), "");
        assert!(buf.line(3).runs().is_empty());
    }

    #[test]
    fn test_diff_lines() {
        let mut prev = buffer();
        prev.write("aaa", Point { x: 0, y: 0 }, None);
        prev.write("bbb", Point { x: 0, y: 5 }, None);

        let mut curr = prev.clone();
        curr.write("BBB", Point { x: 0, y: 5 }, None);
        curr.write("ccc", Point { x: 0, y: 7 }, None);

        assert_eq!(curr.diff(&prev), BufferDiff::Lines(vec![5, 7]));
    }

    #[test]
    fn test_diff_detects_attr_only_change() {
        let mut prev = buffer();
        prev.write("same", Point { x: 0, y: 2 }, None);
        let mut curr = buffer();
        curr.write(
            "same",
            Point { x: 0, y: 2 },
            Some(Attr {
                bold: true,
                ..Default::default()
            }),
        );
        assert_eq!(curr.diff(&prev), BufferDiff::Lines(vec![2]));
    }

    #[test]
    fn test_diff_resize_is_full_repaint() {
        let prev = buffer();
        let mut curr = buffer();
        curr.resize(80, 10);
        assert_eq!(curr.diff(&prev), BufferDiff::FullRepaint);
    }

    #[test]
    fn test_resize_preserves_prefix() {
        let mut buf = buffer();
        buf.write("0123456789", Point { x: 0, y: 0 }, None);
        buf.resize(4, 2);
        assert_eq!(buf.line(0).as_str(), "0123");
        assert_eq!(buf.line_count(), 2);

        buf.resize(10, 4);
        assert_eq!(buf.line(0).as_str(), "0123");
        assert_eq!(buf.line_count(), 4);
    }

    #[test]
    fn test_mark_dirty_and_take() {
        let mut buf = buffer();
        buf.mark_dirty(2..5);
        buf.mark_dirty(99..120); // out of range ignored
        let dirty: Vec<usize> = buf.take_dirty().into_iter().collect();
        assert_eq!(dirty, vec![2, 3, 4]);
        assert!(buf.take_dirty().is_empty());
    }
}
