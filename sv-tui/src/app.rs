//! TUI application wiring.
//!
//! The composition core is headless: an [`Update`] goes in, a frame plan
//! comes out. The `run` entry point owns the real terminal: it ties the
//! bus subscriber, the input pump, the coalescing loop, and the sink
//! task together and restores the terminal on every exit path.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::{Point, TerminalBuffer};
use crate::cache::{CacheKey, RenderCache, Surface};
use crate::config::TuiOptions;
use crate::diff::{DiffRenderer, FramePlan, Strategy};
use crate::graph::{Rect, RenderGraph};
use crate::input::Key;
use crate::metrics::TuiMetrics;
use crate::panels::{
    panel_body, BorderStyle, PanelBehavior, PanelCtx, PanelKind, PanelToggleManager,
    RenderedPanel,
};
use crate::reconciler::TreeReconciler;
use crate::update::Update;
use crate::width::{TerminalEnv, WidthCache};

/// Default panel config location, relative to `$HOME`.
pub const PANEL_CONFIG_RELATIVE: &str = ".config/smartvestor/tui-panel-config.json";

/// Default metrics export path.
pub const METRICS_EXPORT_PATH: &str = "/tmp/tui_metrics.json";

/// The panel config path under the user's home directory.
pub fn panel_config_path() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(PANEL_CONFIG_RELATIVE)
}

/// Height of the status strip when visible.
const STATUS_HEIGHT: u16 = 5;

/// What a key did to the app.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppEvent {
    /// Exit requested.
    Quit,
    /// State changed; re-render wanted.
    Redraw,
    /// Nothing to do.
    Ignored,
}

/// The headless composition core.
pub struct App {
    options: TuiOptions,
    env: TerminalEnv,
    toggles: PanelToggleManager,
    reconciler: TreeReconciler,
    diff: DiffRenderer,
    metrics: Arc<TuiMetrics>,
    width_cache: WidthCache,
    render_cache: RenderCache,
    prev: TerminalBuffer,
    size: (u16, u16),
    scroll: BTreeMap<PanelKind, usize>,
    last_update: Update,
    /// Lines dropped by the byte cap, owed to the next frame.
    carry_deferred: Vec<usize>,
}

impl App {
    /// Create an app over a surface of the given size.
    pub fn new(
        options: TuiOptions,
        env: TerminalEnv,
        toggles: PanelToggleManager,
        size: (u16, u16),
        metrics: Arc<TuiMetrics>,
    ) -> Self {
        Self {
            options,
            env,
            toggles,
            reconciler: TreeReconciler::default(),
            diff: DiffRenderer::new(options),
            metrics,
            width_cache: WidthCache::new(options.width_cache),
            render_cache: RenderCache::new(),
            prev: TerminalBuffer::new(size.0, size.1, env),
            size,
            scroll: BTreeMap::new(),
            last_update: Update::default(),
            carry_deferred: Vec::new(),
        }
    }

    /// Visible panels laid out top to bottom: the status strip keeps a
    /// fixed height, the rest split the remainder evenly.
    fn layout(&self) -> Vec<(PanelKind, Rect)> {
        let (width, height) = self.size;
        let visible = self.toggles.visible_panels();
        let mut out = Vec::with_capacity(visible.len());
        let mut y = 0u16;

        let has_status = visible.contains(&PanelKind::Status);
        let flexible: Vec<PanelKind> = visible
            .iter()
            .copied()
            .filter(|&kind| kind != PanelKind::Status)
            .collect();

        if has_status {
            let h = STATUS_HEIGHT.min(height);
            out.push((PanelKind::Status, Rect { x: 0, y, w: width, h }));
            y += h;
        }

        if !flexible.is_empty() && y < height {
            let each = ((height - y) / flexible.len() as u16).max(3);
            for (i, kind) in flexible.iter().enumerate() {
                if y >= height {
                    break;
                }
                let h = if i == flexible.len() - 1 {
                    height - y
                } else {
                    each.min(height - y)
                };
                out.push((*kind, Rect { x: 0, y, w: width, h }));
                y += h;
            }
        }
        out
    }

    /// Compose one frame for an update. Returns the plan for the sink.
    pub fn compose(&mut self, update: &Update) -> FramePlan {
        let started = Instant::now();
        self.last_update = update.clone();

        let layout = self.layout();
        let selected = self.toggles.selected();

        // Candidate graph: one leaf per visible panel. The value hash is
        // over the panel's rendered body so text changes mark it dirty.
        let mut graph = RenderGraph::new();
        let root = graph.insert(
            None,
            0,
            Rect {
                x: 0,
                y: 0,
                w: self.size.0,
                h: self.size.1,
            },
            false,
            0,
        );
        let mut rendered: BTreeMap<PanelKind, RenderedPanel> = BTreeMap::new();
        for (kind, bounds) in &layout {
            let focused = *kind == selected;
            let scroll_offset = self.scroll.get(kind).copied().unwrap_or(0);

            // The body carries the display values; its hash is the value
            // hash, everything else on the key is shape.
            let body = panel_body(*kind, update);
            let mut hasher = DefaultHasher::new();
            body.hash(&mut hasher);
            let body_hash = hasher.finish();

            let mut hasher = DefaultHasher::new();
            (bounds, focused, scroll_offset, body_hash).hash(&mut hasher);
            let key = CacheKey {
                node_id: kind.stable_id(),
                struct_hash: hasher.finish(),
                env: self.env,
            };

            let panel = match self.render_cache.get(&key) {
                Some(surface) => RenderedPanel {
                    lines: surface.lines,
                    width: surface.bounds.w,
                    height: surface.bounds.h,
                },
                None => {
                    let ctx = PanelCtx {
                        width: bounds.w,
                        height: bounds.h,
                        color: true,
                        border: BorderStyle::Rounded,
                        unicode_supported: true,
                        focused,
                        scroll_offset,
                        env: &self.env,
                        widths: &self.width_cache,
                    };
                    let panel = kind.render(update, &ctx);
                    self.render_cache.put(
                        key,
                        Surface {
                            lines: panel.lines.clone(),
                            bounds: *bounds,
                        },
                    );
                    panel
                }
            };

            graph.insert(Some(root), kind.stable_id(), *bounds, focused, body_hash);
            rendered.insert(*kind, panel);
        }
        let (cache_hits, cache_misses, cache_evictions) = self.render_cache.counters();
        self.metrics
            .set_cache_counters(cache_hits, cache_misses, cache_evictions);
        self.metrics
            .set_width_cache_hit_rate(self.width_cache.hit_rate());

        self.reconciler.reconcile(graph);
        let viewport = Rect {
            x: 0,
            y: 0,
            w: self.size.0,
            h: self.size.1,
        };

        // A size change starts from a blank surface of the new size; the
        // structural rebuild that comes with it repaints every panel.
        let mut curr = if self.prev.size() == self.size {
            self.prev.clone()
        } else {
            TerminalBuffer::new(self.size.0, self.size.1, self.env)
        };
        let carry = std::mem::take(&mut self.carry_deferred);
        if let Some(tree) = self.reconciler.tree() {
            if !self.options.dirty_graph {
                tree.mark_all_dirty();
            }
            // Lines the byte cap dropped last frame owe a repaint even if
            // their panel is otherwise clean.
            for &y in &carry {
                let Ok(y) = u16::try_from(y) else { continue };
                if let Some(root) = tree.root() {
                    for id in tree.children(root).to_vec() {
                        if tree.node(id).bounds.intersects(&Rect { x: 0, y, w: viewport.w, h: 1 }) {
                            tree.mark_dirty(id);
                        }
                    }
                }
            }
            let paint = tree.paint_list(viewport);
            self.metrics
                .record_traversal(paint.walked, paint.nodes.len());

            for id in &paint.nodes {
                let node = tree.node(*id);
                let kind = PanelKind::ALL
                    .iter()
                    .copied()
                    .find(|k| k.stable_id() == node.stable_id);
                let Some(kind) = kind else { continue };
                let Some(panel) = rendered.get(&kind) else { continue };
                for (row, line) in panel.lines.iter().enumerate() {
                    let y = node.bounds.y as usize + row;
                    if y >= curr.line_count() {
                        break;
                    }
                    curr.clear_line(y);
                    curr.write(
                        line,
                        Point {
                            x: node.bounds.x,
                            y: y as u16,
                        },
                        None,
                    );
                }
            }
            tree.clear_dirty();
        }

        let plan = self.diff.render(&self.prev, &curr);
        // The screen did not receive deferred lines; remember them and
        // keep `prev` truthful about what is actually displayed.
        if !plan.deferred.is_empty() && self.prev.size() == curr.size() {
            let mut displayed = curr.clone();
            for &y in &plan.deferred {
                displayed.clone_line_from(&self.prev, y);
            }
            self.prev = displayed;
            self.carry_deferred = plan.deferred.clone();
        } else {
            self.prev = curr;
        }

        self.metrics.record_frame(
            plan.bytes.len(),
            strategy_name(plan.strategy),
            plan.damage_rects,
        );
        self.metrics
            .set_tail_fastpath_hit_rate(self.diff.tail_fastpath_hit_rate());
        self.metrics
            .record_graph_render_ms(started.elapsed().as_secs_f64() * 1_000.0);

        if self.options.perf_detailed {
            eprintln!(
                "frame: {} bytes, {:?}, {} rects",
                plan.bytes.len(),
                plan.strategy,
                plan.damage_rects
            );
        }
        plan
    }

    /// Re-compose the last update (after focus/toggle changes).
    pub fn recompose(&mut self) -> FramePlan {
        let update = self.last_update.clone();
        self.compose(&update)
    }

    /// Apply a key.
    pub fn handle_key(&mut self, key: Key) -> AppEvent {
        match key {
            Key::Ctrl('c') | Key::Char('q') => AppEvent::Quit,
            Key::Tab => {
                self.toggles.cycle();
                AppEvent::Redraw
            }
            Key::Up | Key::Down => {
                self.toggles.focus_step(if key == Key::Up { -1 } else { 1 });
                AppEvent::Redraw
            }
            Key::Char('j') | Key::Char('k') => {
                let selected = self.toggles.selected();
                if !selected.focusable() {
                    return AppEvent::Ignored;
                }
                match selected.handle_input(key) {
                    Some(crate::panels::PanelAction::Scroll(delta)) => {
                        let slot = self.scroll.entry(selected).or_default();
                        *slot = slot.saturating_add_signed(delta as isize);
                        AppEvent::Redraw
                    }
                    None => AppEvent::Ignored,
                }
            }
            Key::Char(c @ '1'..='7') => {
                let index = (c as u8 - b'1') as usize;
                let kind = PanelKind::ALL[index];
                if self.toggles.toggle(kind) {
                    if let Err(err) = self.toggles.save() {
                        tracing::warn!(error = %err, "panel config save failed");
                    }
                    AppEvent::Redraw
                } else {
                    AppEvent::Ignored
                }
            }
            _ => AppEvent::Ignored,
        }
    }

    /// Resize the surface; the next frame repaints fully.
    pub fn resize(&mut self, width: u16, height: u16) {
        self.size = (width, height);
    }

    /// The previous frame's surface (for tests and the smoke loop).
    pub fn surface(&self) -> &TerminalBuffer {
        &self.prev
    }

    /// The metrics registry.
    pub fn metrics(&self) -> &Arc<TuiMetrics> {
        &self.metrics
    }
}

fn strategy_name(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::TailEdit => "tail_edit",
        Strategy::DamageRects => "damage_rects",
        Strategy::LineDiff => "line_diff",
        Strategy::FullRedraw => "full_redraw",
    }
}

/// Query the terminal size of an fd.
#[cfg(unix)]
pub fn terminal_size(fd: std::os::unix::io::RawFd) -> (u16, u16) {
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let ok = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut size) };
    if ok == 0 && size.ws_col > 0 && size.ws_row > 0 {
        (size.ws_col, size.ws_row)
    } else {
        (80, 24)
    }
}

/// Attach a terminal client to the state bus and run until quit.
#[cfg(unix)]
pub async fn run(socket_path: PathBuf, options: TuiOptions) -> io::Result<()> {
    use crate::input::InputPipeline;
    use crate::publisher::StateSubscriber;
    use crate::render_loop::{Coalescer, FrameIntent, Priority};
    use crate::term::{TerminalSession, TerminalSink};

    let stdout = libc::STDOUT_FILENO;
    let mut session = TerminalSession::enter(stdout)?;
    let mut sink = TerminalSink::new(stdout);

    let size = terminal_size(stdout);
    let env = TerminalEnv::default();
    let toggles = PanelToggleManager::load(panel_config_path());
    let metrics = Arc::new(TuiMetrics::new());
    let mut app = App::new(options, env, toggles, size, Arc::clone(&metrics));

    let mut subscriber = StateSubscriber::connect(&socket_path).await?;

    // Input pump: a blocking poll loop feeding a channel.
    let (key_tx, mut key_rx) = tokio::sync::mpsc::channel::<Key>(64);
    std::thread::spawn(move || {
        let mut pipeline = match InputPipeline::new(libc::STDIN_FILENO) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                tracing::error!(error = %err, "input pipeline init failed");
                return;
            }
        };
        loop {
            match pipeline.poll_once() {
                Ok(keys) => {
                    for key in keys {
                        if key_tx.blocking_send(key).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "input poll failed");
                    return;
                }
            }
        }
    });

    let mut coalescer = Coalescer::new();
    let mut pending_update: Option<Update> = None;
    let mut last_flush: Option<Instant> = None;

    loop {
        let due = coalescer.due_at();
        tokio::select! {
            frame = subscriber.next_frame() => {
                match frame? {
                    Some(frame) => {
                        pending_update = Some(frame.update);
                        coalescer.offer(
                            FrameIntent { priority: Priority::Normal, resize: false },
                            Instant::now(),
                        );
                    }
                    None => break,
                }
            }
            key = key_rx.recv() => {
                let Some(key) = key else { break };
                match app.handle_key(key) {
                    AppEvent::Quit => break,
                    AppEvent::Redraw => coalescer.offer(
                        FrameIntent { priority: Priority::Input, resize: false },
                        Instant::now(),
                    ),
                    AppEvent::Ignored => {}
                }
            }
            _ = sleep_until(due) => {}
        }

        if let Some(frame) = coalescer.ready(Instant::now()) {
            let flush_started = Instant::now();
            if frame.resize {
                let (w, h) = terminal_size(stdout);
                app.resize(w, h);
            }
            let plan = match pending_update.take() {
                Some(update) => app.compose(&update),
                None => app.recompose(),
            };
            if !plan.bytes.is_empty() {
                if let Err(err) = sink.write_frame(&plan.bytes) {
                    tracing::error!(error = %err, "frame write failed");
                    break;
                }
            }
            metrics.set_tty_counters(sink.eagain_count(), sink.sigpipe_count());
            if let Some(previous) = last_flush {
                metrics.record_frame_interval(previous.elapsed().as_secs_f64());
            }
            last_flush = Some(Instant::now());
            coalescer.after_flush(flush_started.elapsed(), frame.priority);
        }
    }

    let _ = metrics.export(METRICS_EXPORT_PATH);
    session.exit();
    Ok(())
}

#[cfg(unix)]
async fn sleep_until(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(tokio::time::Instant::from_std(due)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{Balance, UpdateData};

    fn app() -> App {
        let dir = tempfile::tempdir().unwrap();
        let toggles = PanelToggleManager::load(dir.path().join("panels.json"));
        App::new(
            TuiOptions::default(),
            TerminalEnv::default(),
            toggles,
            (80, 30),
            Arc::new(TuiMetrics::new()),
        )
    }

    fn update(balance: f64) -> Update {
        Update {
            data: UpdateData {
                balances: vec![Balance {
                    exchange: "kraken".into(),
                    asset: "BTC".into(),
                    available: balance,
                    total: balance,
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_first_compose_paints_everything() {
        let mut app = app();
        let plan = app.compose(&update(1.0));
        assert!(!plan.bytes.is_empty());
        // The surface now holds the rendered panels.
        let painted: Vec<&str> = (0..app.surface().line_count())
            .map(|y| app.surface().line(y).as_str())
            .collect();
        assert!(painted.iter().any(|line| line.contains("Balances")));
    }

    #[test]
    fn test_unchanged_update_emits_nothing() {
        let mut app = app();
        app.compose(&update(1.0));
        let plan = app.compose(&update(1.0));
        assert!(plan.bytes.is_empty(), "no change, no write");
    }

    #[test]
    fn test_value_change_repaints_subset() {
        let mut app = app();
        app.compose(&update(1.0));
        let plan = app.compose(&update(2.0));
        assert!(!plan.bytes.is_empty());
        assert_ne!(plan.strategy, Strategy::FullRedraw);
    }

    #[test]
    fn test_quit_keys() {
        let mut app = app();
        assert_eq!(app.handle_key(Key::Ctrl('c')), AppEvent::Quit);
        assert_eq!(app.handle_key(Key::Char('q')), AppEvent::Quit);
    }

    #[test]
    fn test_tab_changes_focus_and_redraws() {
        let mut app = app();
        app.compose(&update(1.0));
        assert_eq!(app.handle_key(Key::Tab), AppEvent::Redraw);
        let plan = app.recompose();
        assert!(!plan.bytes.is_empty(), "focus marker moved");
    }

    #[test]
    fn test_resize_forces_full_redraw() {
        let mut app = app();
        app.compose(&update(1.0));
        app.resize(100, 40);
        let plan = app.recompose();
        assert_eq!(plan.strategy, Strategy::FullRedraw);
    }

    #[test]
    fn test_panel_toggle_by_number() {
        let mut app = app();
        app.compose(&update(1.0));
        // '4' toggles the price panel off.
        assert_eq!(app.handle_key(Key::Char('4')), AppEvent::Redraw);
        let plan = app.recompose();
        assert!(!plan.bytes.is_empty());
    }
}
