//! Frame coalescing.
//!
//! Render intents funnel into one pending frame slot; at most one flush
//! happens per 60 Hz window. Input-priority intents pre-empt the
//! debounce, telemetry rides the adaptive debounce, and at most one
//! resize is folded into any frame. The decision core is clock-
//! parameterised so the timing rules are testable without sleeping.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;

/// Frame priorities, lowest first.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Priority {
    /// Periodic telemetry refresh.
    Telemetry,
    /// Ordinary state change.
    Normal,
    /// Direct response to a keypress.
    Input,
}

/// A request to render.
#[derive(Clone, Copy, Debug)]
pub struct FrameIntent {
    /// Scheduling priority.
    pub priority: Priority,
    /// Whether the surface was resized.
    pub resize: bool,
}

/// The merged pending frame handed to the flusher.
#[derive(Clone, Copy, Debug)]
pub struct Coalesced {
    /// Highest priority coalesced in.
    pub priority: Priority,
    /// Whether any coalesced intent carried a resize.
    pub resize: bool,
}

/// The 60 Hz flush window.
pub const FRAME_WINDOW: Duration = Duration::from_micros(16_670);

/// Debounce ceiling under sustained slow flushes.
pub const MAX_DEBOUNCE: Duration = Duration::from_millis(100);

/// Flush duration beyond which telemetry debounce adapts upward.
const SLOW_FLUSH: Duration = Duration::from_millis(16);

/// Clock-parameterised coalescing core.
pub struct Coalescer {
    debounce: Duration,
    last_flush: Option<Instant>,
    pending: Option<Coalesced>,
    pending_since: Option<Instant>,
}

impl Coalescer {
    /// Create with the default debounce (one frame window).
    pub fn new() -> Self {
        Self {
            debounce: FRAME_WINDOW,
            last_flush: None,
            pending: None,
            pending_since: None,
        }
    }

    /// Merge an intent into the pending slot.
    pub fn offer(&mut self, intent: FrameIntent, now: Instant) {
        match &mut self.pending {
            Some(pending) => {
                pending.priority = pending.priority.max(intent.priority);
                // Resizes coalesce: one per frame, whatever arrived.
                pending.resize |= intent.resize;
            }
            None => {
                self.pending = Some(Coalesced {
                    priority: intent.priority,
                    resize: intent.resize,
                });
                self.pending_since = Some(now);
            }
        }
    }

    /// When the pending frame becomes due, if anything is pending.
    pub fn due_at(&self) -> Option<Instant> {
        let pending = self.pending?;
        let since = self.pending_since?;

        // One flush per window, always.
        let window_open = match self.last_flush {
            Some(at) => at + FRAME_WINDOW,
            None => since,
        };
        // Input pre-empts the debounce; everything else waits it out.
        let debounced = if pending.priority == Priority::Input {
            since
        } else {
            since + self.debounce
        };
        Some(window_open.max(debounced))
    }

    /// Take the pending frame if it is due.
    pub fn ready(&mut self, now: Instant) -> Option<Coalesced> {
        let due = self.due_at()?;
        if now < due {
            return None;
        }
        self.last_flush = Some(now);
        self.pending_since = None;
        self.pending.take()
    }

    /// Feed back the flush duration; slow telemetry flushes stretch the
    /// debounce (×1.5, capped).
    pub fn after_flush(&mut self, took: Duration, priority: Priority) {
        if priority == Priority::Telemetry && took > SLOW_FLUSH {
            self.debounce = Duration::from_secs_f64(self.debounce.as_secs_f64() * 1.5)
                .min(MAX_DEBOUNCE);
        }
    }

    /// The current debounce.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}

impl Default for Coalescer {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive a coalescer from an intent channel, calling `flush` for each
/// due frame. Returns when every sender is dropped and the slot drains.
pub async fn run<F>(mut rx: mpsc::Receiver<FrameIntent>, mut flush: F)
where
    F: FnMut(Coalesced) -> Duration,
{
    let mut coalescer = Coalescer::new();
    loop {
        let due = coalescer.due_at();
        tokio::select! {
            intent = rx.recv() => {
                match intent {
                    Some(intent) => coalescer.offer(intent, Instant::now()),
                    None => {
                        // Drain the slot, then stop.
                        if let Some(frame) = coalescer.pending.take() {
                            let took = flush(frame);
                            coalescer.after_flush(took, frame.priority);
                        }
                        return;
                    }
                }
            }
            _ = sleep_until_or_forever(due) => {}
        }
        if let Some(frame) = coalescer.ready(Instant::now()) {
            let took = flush(frame);
            coalescer.after_flush(took, frame.priority);
        }
    }
}

async fn sleep_until_or_forever(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(tokio::time::Instant::from_std(due)).await,
        None => std::future::pending().await,
    }
}
