//! Declarative terminal UI runtime for the smartvestor agent.
//!
//! The runtime renders live portfolio state at 60 Hz from a local state
//! bus. The pipeline: a unix-socket [`publisher::StateSubscriber`] feeds
//! updates, [`panels`] render pure line surfaces, the dirty-graph
//! [`reconciler`] decides what repaints, [`diff::DiffRenderer`] encodes
//! the frame under a byte cap, and [`term::TerminalSink`] issues exactly
//! one write per frame.
//!
//! # Quick Start
//!
//! ```no_run
//! use sv_tui::app;
//! use sv_tui::config::TuiOptions;
//! use sv_tui::publisher::DEFAULT_SOCKET_PATH;
//!
//! # async fn attach() -> std::io::Result<()> {
//! app::run(DEFAULT_SOCKET_PATH.into(), TuiOptions::from_env()).await
//! # }
//! ```
//!
//! Every feature is individually toggleable through `TUI_*` environment
//! variables (see [`config::TuiOptions`]); rendering internals expose
//! their counters through [`metrics::TuiMetrics`].

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod ansi;
pub mod app;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod diff;
pub mod graph;
pub mod input;
pub mod metrics;
pub mod panels;
pub mod publisher;
pub mod reconciler;
pub mod render_loop;
#[cfg(unix)]
pub mod term;
pub mod update;
pub mod width;

pub use buffer::{Attr, AttrRun, BufferDiff, Point, TerminalBuffer};
pub use config::TuiOptions;
pub use diff::{DiffRenderer, FramePlan, Strategy};
pub use update::{Frame, FrameKind, Update};
pub use width::TerminalEnv;
