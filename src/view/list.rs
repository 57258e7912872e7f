use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use super::orchestrator::ViewTimer;
use super::render::Renderer;
use crate::color::Gradient;
use crate::doc_id::DocumentId;
use crate::hover::{
    HoverDelays, HoverEffect, HoverEvent, HoverPhase, HoverRevealController, TimerIntent,
};
use crate::runtime::{TimerHandle, Timers};
use crate::similarity::{ResultGeneration, ScoreRange, SimilarityResult};
use crate::stream::{
    SessionHandle, StreamAggregator, StreamCallbacks, StreamError, StreamRequest,
};

/// Query sent when a result's detail panel is first revealed.
pub const SUMMARY_PROMPT: &str = "Summarize the provided document in a few sentences. \
The provided document is actually a search result from Voyagers similar documents view.";

#[derive(Debug, Clone, PartialEq)]
pub enum ListState {
    NoActiveDocument,
    NotIndexed,
    Loading,
    Empty,
    Failed(String),
    Ready,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelStatus {
    Pending,
    Streaming,
    Complete,
    /// Torn down before the summary finished; the partial text is kept.
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub text: String,
    pub status: PanelStatus,
    pub visible: bool,
}

impl Default for Panel {
    fn default() -> Self {
        Self {
            text: String::new(),
            status: PanelStatus::Pending,
            visible: false,
        }
    }
}

/// What the renderer gets for each list entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: DocumentId,
    pub title: String,
    pub score: f64,
    pub color: String,
}

/// Everything a hover effect may touch outside its own item.
pub(crate) struct EffectContext<'a> {
    pub timers: &'a mut Timers<ViewTimer>,
    pub streams: &'a mut StreamAggregator,
    pub renderer: &'a Rc<dyn Renderer>,
    pub generation: u64,
    pub index: usize,
    pub now: Instant,
}

pub struct ListItem {
    pub result: SimilarityResult,
    pub color: String,
    hover: HoverRevealController,
    panel: Rc<RefCell<Panel>>,
    summary: Option<SessionHandle>,
    show_timer: Option<TimerHandle>,
    hide_timer: Option<TimerHandle>,
}

impl ListItem {
    fn new(result: SimilarityResult, color: String, delays: HoverDelays) -> Self {
        Self {
            result,
            color,
            hover: HoverRevealController::new(delays),
            panel: Rc::new(RefCell::new(Panel::default())),
            summary: None,
            show_timer: None,
            hide_timer: None,
        }
    }

    pub fn hover_phase(&self) -> HoverPhase {
        self.hover.phase()
    }

    pub fn summary_loaded(&self) -> bool {
        self.hover.state().summary_loaded
    }

    pub fn panel(&self) -> Panel {
        self.panel.borrow().clone()
    }

    pub fn row(&self) -> Row {
        Row {
            id: self.result.id.clone(),
            title: self.result.title.clone(),
            score: self.result.score,
            color: self.color.clone(),
        }
    }

    pub(crate) fn handle(&mut self, event: HoverEvent, cx: &mut EffectContext) {
        for effect in self.hover.handle(event) {
            self.apply(effect, cx);
        }
    }

    fn apply(&mut self, effect: HoverEffect, cx: &mut EffectContext) {
        match effect {
            HoverEffect::StartTimer {
                intent,
                token,
                delay,
            } => {
                let handle = cx.timers.schedule_at(
                    cx.now + delay,
                    ViewTimer::Hover {
                        generation: cx.generation,
                        index: cx.index,
                        intent,
                        token,
                    },
                );
                let slot = match intent {
                    TimerIntent::Show => &mut self.show_timer,
                    TimerIntent::Hide => &mut self.hide_timer,
                };
                if let Some(previous) = slot.replace(handle) {
                    cx.timers.cancel(previous);
                }
            }
            HoverEffect::CancelTimer { intent, .. } => {
                let slot = match intent {
                    TimerIntent::Show => &mut self.show_timer,
                    TimerIntent::Hide => &mut self.hide_timer,
                };
                if let Some(handle) = slot.take() {
                    cx.timers.cancel(handle);
                }
            }
            HoverEffect::ShowPanel => {
                let mut panel = self.panel.borrow_mut();
                panel.visible = true;
                cx.renderer.render_panel(cx.index, &self.result.title, &panel);
            }
            HoverEffect::HidePanel => {
                self.panel.borrow_mut().visible = false;
                cx.renderer.hide_panel(cx.index);
            }
            HoverEffect::FetchSummary => self.fetch_summary(cx),
            HoverEffect::CancelSummary => {
                if let Some(handle) = self.summary.take() {
                    if cx.streams.is_active(handle) {
                        cx.streams.cancel(handle);
                        self.panel.borrow_mut().status = PanelStatus::Cancelled;
                    }
                }
            }
        }
    }

    fn fetch_summary(&mut self, cx: &mut EffectContext) {
        let request = StreamRequest::new(SUMMARY_PROMPT, Some(self.result.id.clone()));
        let index = cx.index;

        let on_fragment = {
            let panel = self.panel.clone();
            let renderer = cx.renderer.clone();
            let title = self.result.title.clone();
            move |text: &str| {
                let mut panel = panel.borrow_mut();
                panel.text = text.to_string();
                panel.status = PanelStatus::Streaming;
                if panel.visible {
                    renderer.render_panel(index, &title, &panel);
                }
            }
        };

        let on_complete = {
            let panel = self.panel.clone();
            let renderer = cx.renderer.clone();
            let title = self.result.title.clone();
            move |text: &str| {
                let mut panel = panel.borrow_mut();
                panel.text = text.to_string();
                panel.status = PanelStatus::Complete;
                if panel.visible {
                    renderer.render_panel(index, &title, &panel);
                }
            }
        };

        let on_error = {
            let panel = self.panel.clone();
            let renderer = cx.renderer.clone();
            let title = self.result.title.clone();
            move |err: &StreamError, partial: &str| {
                let mut panel = panel.borrow_mut();
                panel.text = partial.to_string();
                panel.status = PanelStatus::Failed(err.to_string());
                if panel.visible {
                    renderer.render_panel(index, &title, &panel);
                }
            }
        };

        let callbacks = StreamCallbacks::new(on_fragment, on_complete).on_error(on_error);
        match cx.streams.open(request, callbacks, cx.now) {
            Ok(handle) => {
                log::debug!("summary for {} on {}", self.result.id, handle.id());
                self.summary = Some(handle);
                self.panel.borrow_mut().status = PanelStatus::Streaming;
            }
            Err(err) => {
                log::warn!("failed to open summary for {}: {err}", self.result.id);
                let mut panel = self.panel.borrow_mut();
                panel.status = PanelStatus::Failed(err.to_string());
                if panel.visible {
                    cx.renderer.render_panel(index, &self.result.title, &panel);
                }
            }
        }
    }
}

/// The rendered generation. Rebuilt wholesale on every applied result.
pub struct ResultList {
    generation: u64,
    state: ListState,
    range: Option<ScoreRange>,
    items: Vec<ListItem>,
}

impl Default for ResultList {
    fn default() -> Self {
        Self {
            generation: 0,
            state: ListState::NoActiveDocument,
            range: None,
            items: vec![],
        }
    }
}

impl ResultList {
    pub fn state(&self) -> &ListState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn items(&self) -> &[ListItem] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&ListItem> {
        self.items.get(index)
    }

    pub fn results(&self) -> Vec<SimilarityResult> {
        self.items.iter().map(|item| item.result.clone()).collect()
    }

    pub fn rows(&self) -> Vec<Row> {
        self.items.iter().map(ListItem::row).collect()
    }

    pub(crate) fn item_mut(&mut self, index: usize) -> Option<&mut ListItem> {
        self.items.get_mut(index)
    }

    pub(crate) fn set_state(&mut self, state: ListState) {
        self.state = state;
    }

    /// Replaces all items with fresh ones for `generation`. The caller must
    /// have torn down the previous items first.
    pub(crate) fn rebuild(
        &mut self,
        generation: ResultGeneration,
        gradient: &Gradient,
        delays: HoverDelays,
    ) {
        let range = generation.range;
        self.generation = generation.token;
        self.range = range;
        self.state = if generation.is_empty() {
            ListState::Empty
        } else {
            ListState::Ready
        };

        self.items = generation
            .results
            .into_iter()
            .map(|result| {
                let color = match range {
                    Some(range) => gradient.interpolate(result.score, range.min, range.max),
                    None => gradient.spec().end_color.clone(),
                };
                ListItem::new(result, color, delays)
            })
            .collect();
    }

    pub(crate) fn recolor(&mut self, gradient: &Gradient) {
        let Some(range) = self.range else {
            return;
        };

        for item in &mut self.items {
            item.color = gradient.interpolate(item.result.score, range.min, range.max);
        }
    }

    /// Disposes every item: timers cancelled, panels hidden, summaries
    /// cancelled.
    pub(crate) fn teardown(
        &mut self,
        timers: &mut Timers<ViewTimer>,
        streams: &mut StreamAggregator,
        renderer: &Rc<dyn Renderer>,
        now: Instant,
    ) {
        let generation = self.generation;
        for (index, mut item) in self.items.drain(..).enumerate() {
            let mut cx = EffectContext {
                timers: &mut *timers,
                streams: &mut *streams,
                renderer,
                generation,
                index,
                now,
            };
            item.handle(HoverEvent::Dispose, &mut cx);
        }
        self.range = None;
    }
}
