//! The "similar documents" list.
//!
//! # Architecture
//!
//! - `orchestrator`: refresh triggers, generation tokens, timers
//! - `list`: rendered items, their hover controllers and detail panels
//! - `render`: presentation sink trait and the terminal implementation
//! - `markdown`: markdown to terminal text, with a plain-text fallback

mod list;
pub mod markdown;
mod orchestrator;
mod render;

pub use list::{ListItem, ListState, Panel, PanelStatus, ResultList, Row, SUMMARY_PROMPT};
pub use orchestrator::{
    QueryDispatcher, RefreshPhase, RefreshTrigger, SimilarityRefreshOrchestrator, ViewSettings,
    ViewTimer,
};
pub use render::{Renderer, TerminalRenderer};
