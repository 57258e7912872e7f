use std::rc::Rc;
use std::time::{Duration, Instant};

use super::list::{EffectContext, ListState, ResultList};
use super::render::Renderer;
use crate::api::ApiError;
use crate::color::{ColorError, Gradient, GradientSpec};
use crate::config::Config;
use crate::doc_id::DocumentId;
use crate::hover::{HoverDelays, HoverEvent, TimerIntent, TimerToken};
use crate::runtime::{TimerHandle, Timers};
use crate::similarity::{self, ResultGeneration, SimilarityResult};
use crate::store::DocumentStore;
use crate::stream::StreamAggregator;

/// Starts a similarity query in the background. The outcome must be handed
/// back to [`SimilarityRefreshOrchestrator::apply_result`] with the same token.
pub trait QueryDispatcher {
    fn dispatch(&self, token: u64, document_id: DocumentId, window: String);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Fetching,
    Rendering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Opened,
    Modified,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewTimer {
    Debounce,
    QueryDeadline(u64),
    Hover {
        generation: u64,
        index: usize,
        intent: TimerIntent,
        token: TimerToken,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewSettings {
    /// Trailing characters sent as query context.
    pub window: usize,
    pub debounce: Duration,
    pub hover: HoverDelays,
    pub query_timeout: Duration,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ViewSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window: config.similarity_window,
            debounce: config.refresh_debounce(),
            hover: config.hover_delays(),
            query_timeout: config.query_timeout(),
        }
    }
}

/// Keeps the similar documents list in step with the active document.
///
/// Every issued query gets a fresh token, and only the result carrying the
/// token still in flight is applied. A newer trigger or the query deadline
/// clears the in-flight token, so late results are dropped on arrival.
pub struct SimilarityRefreshOrchestrator {
    store: Box<dyn DocumentStore>,
    queries: Box<dyn QueryDispatcher>,
    renderer: Rc<dyn Renderer>,
    gradient: Gradient,
    settings: ViewSettings,
    timers: Timers<ViewTimer>,
    list: ResultList,
    active: Option<String>,
    phase: RefreshPhase,
    last_token: u64,
    in_flight: Option<u64>,
    debounce: Option<TimerHandle>,
    deadline: Option<TimerHandle>,
}

impl SimilarityRefreshOrchestrator {
    pub fn new(
        store: Box<dyn DocumentStore>,
        queries: Box<dyn QueryDispatcher>,
        renderer: Rc<dyn Renderer>,
        gradient: &GradientSpec,
        settings: ViewSettings,
    ) -> Result<Self, ColorError> {
        Ok(Self {
            store,
            queries,
            renderer,
            gradient: Gradient::new(gradient)?,
            settings,
            timers: Timers::new(),
            list: ResultList::default(),
            active: None,
            phase: RefreshPhase::Idle,
            last_token: 0,
            in_flight: None,
            debounce: None,
            deadline: None,
        })
    }

    pub fn phase(&self) -> RefreshPhase {
        self.phase
    }

    pub fn list(&self) -> &ResultList {
        &self.list
    }

    pub fn active_document(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn gradient(&self) -> &GradientSpec {
        self.gradient.spec()
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Makes `doc` the active document and refreshes immediately.
    pub fn open_document(
        &mut self,
        doc: &str,
        streams: &mut StreamAggregator,
        now: Instant,
    ) -> Option<u64> {
        log::debug!("opened {doc}");
        self.cancel_debounce();
        if self.active.as_deref() != Some(doc) {
            self.clear_list(streams, now);
        }
        self.active = Some(doc.to_string());
        self.refresh(RefreshTrigger::Opened, streams, now)
    }

    pub fn close_document(&mut self, streams: &mut StreamAggregator, now: Instant) {
        self.active = None;
        self.cancel_debounce();
        self.abandon_query();
        self.clear_list(streams, now);
        self.show_state(ListState::NoActiveDocument);
    }

    /// Restarts the quiet period; the refresh runs once edits stop.
    pub fn document_modified(&mut self, doc: &str, now: Instant) {
        if self.active.as_deref() != Some(doc) {
            return;
        }

        self.cancel_debounce();
        self.debounce = Some(
            self.timers
                .schedule_at(now + self.settings.debounce, ViewTimer::Debounce),
        );
    }

    /// Issues a new generation for the active document. Returns its token,
    /// or `None` when no query was sent.
    pub fn refresh(
        &mut self,
        trigger: RefreshTrigger,
        streams: &mut StreamAggregator,
        now: Instant,
    ) -> Option<u64> {
        let Some(doc) = self.active.clone() else {
            self.show_state(ListState::NoActiveDocument);
            return None;
        };

        let document_id = match self.store.stable_id(&doc) {
            Ok(Some(id)) => id,
            Ok(None) => {
                log::info!("{doc} is not indexed, skipping similarity query");
                self.abandon_query();
                self.clear_list(streams, now);
                self.show_state(ListState::NotIndexed);
                return None;
            }
            Err(err) => {
                log::warn!("failed to read id of {doc}: {err}");
                self.abandon_query();
                self.clear_list(streams, now);
                self.show_state(ListState::Failed(err.to_string()));
                return None;
            }
        };

        let window = match self.store.read_window(&doc, self.settings.window) {
            Ok(window) => window,
            Err(err) => {
                log::warn!("failed to read {doc}: {err}");
                self.abandon_query();
                self.clear_list(streams, now);
                self.show_state(ListState::Failed(err.to_string()));
                return None;
            }
        };

        self.last_token += 1;
        let token = self.last_token;
        if let Some(stale) = self.in_flight.replace(token) {
            log::debug!("generation {token} supersedes {stale}");
        }
        self.phase = RefreshPhase::Fetching;

        if let Some(deadline) = self.deadline.take() {
            self.timers.cancel(deadline);
        }
        self.deadline = Some(self.timers.schedule_at(
            now + self.settings.query_timeout,
            ViewTimer::QueryDeadline(token),
        ));

        log::debug!("generation {token} ({trigger:?}) for {doc}, {} chars", window.chars().count());
        if self.list.items().is_empty() {
            self.show_state(ListState::Loading);
        }

        self.queries.dispatch(token, document_id, window);
        Some(token)
    }

    /// Applies the outcome of generation `token`. Returns false when the
    /// result was stale and dropped.
    pub fn apply_result(
        &mut self,
        token: u64,
        result: Result<Vec<SimilarityResult>, ApiError>,
        streams: &mut StreamAggregator,
        now: Instant,
    ) -> bool {
        if self.in_flight != Some(token) {
            log::debug!("dropping stale generation {token} (latest {})", self.last_token);
            return false;
        }

        self.in_flight = None;
        if let Some(deadline) = self.deadline.take() {
            self.timers.cancel(deadline);
        }
        self.phase = RefreshPhase::Rendering;

        match result {
            Ok(results) => {
                let generation = ResultGeneration::new(token, results);
                let delta = similarity::diff(&self.list.results(), &generation.results);
                if delta.is_unchanged() {
                    log::debug!("generation {token}: same {} documents", generation.results.len());
                } else {
                    log::debug!(
                        "generation {token}: +{} -{}, scores {:?}..{:?}",
                        delta.added.len(),
                        delta.removed.len(),
                        delta.min_score(),
                        delta.max_score()
                    );
                }

                self.clear_list(streams, now);
                self.list.rebuild(generation, &self.gradient, self.settings.hover);
                self.renderer
                    .render_list(self.list.state(), &self.list.rows());
            }
            Err(err) => {
                log::warn!("similarity query failed: {err}");
                self.clear_list(streams, now);
                self.show_state(ListState::Failed(err.to_string()));
            }
        }

        self.phase = RefreshPhase::Idle;
        true
    }

    /// Swaps the gradient and recolors the rendered items before returning.
    /// Nothing is re-fetched.
    pub fn set_gradient(&mut self, spec: &GradientSpec) -> Result<(), ColorError> {
        self.gradient = Gradient::new(spec)?;
        self.list.recolor(&self.gradient);

        if matches!(self.list.state(), ListState::Ready) {
            self.renderer
                .render_list(self.list.state(), &self.list.rows());
        }
        Ok(())
    }

    /// Pointer entered or left item `index` or its panel.
    pub fn pointer(
        &mut self,
        index: usize,
        event: HoverEvent,
        streams: &mut StreamAggregator,
        now: Instant,
    ) -> bool {
        let generation = self.list.generation();
        let Some(item) = self.list.item_mut(index) else {
            return false;
        };

        let mut cx = EffectContext {
            timers: &mut self.timers,
            streams,
            renderer: &self.renderer,
            generation,
            index,
            now,
        };
        item.handle(event, &mut cx);
        true
    }

    /// Runs every timer due at `now`.
    pub fn fire_due(&mut self, streams: &mut StreamAggregator, now: Instant) {
        for timer in self.timers.pop_due(now) {
            match timer {
                ViewTimer::Debounce => {
                    self.debounce = None;
                    self.refresh(RefreshTrigger::Modified, streams, now);
                }
                ViewTimer::QueryDeadline(token) => {
                    self.deadline = None;
                    if self.in_flight == Some(token) {
                        log::warn!("generation {token} timed out");
                        self.in_flight = None;
                        self.clear_list(streams, now);
                        self.show_state(ListState::Failed(
                            "similarity query timed out".to_string(),
                        ));
                        self.phase = RefreshPhase::Idle;
                    }
                }
                ViewTimer::Hover {
                    generation,
                    index,
                    intent,
                    token,
                } => {
                    if generation != self.list.generation() {
                        continue;
                    }
                    self.pointer(index, HoverEvent::TimerFired(intent, token), streams, now);
                }
            }
        }
    }

    /// Tears everything down, e.g. when the view closes.
    pub fn dispose(&mut self, streams: &mut StreamAggregator, now: Instant) {
        self.cancel_debounce();
        self.abandon_query();
        self.clear_list(streams, now);
        self.timers.clear();
    }

    fn cancel_debounce(&mut self) {
        if let Some(handle) = self.debounce.take() {
            self.timers.cancel(handle);
        }
    }

    fn abandon_query(&mut self) {
        if let Some(token) = self.in_flight.take() {
            log::debug!("abandoning generation {token}");
        }
        if let Some(deadline) = self.deadline.take() {
            self.timers.cancel(deadline);
        }
        self.phase = RefreshPhase::Idle;
    }

    fn clear_list(&mut self, streams: &mut StreamAggregator, now: Instant) {
        self.list
            .teardown(&mut self.timers, streams, &self.renderer, now);
    }

    fn show_state(&mut self, state: ListState) {
        self.list.set_state(state);
        self.renderer.render_list(self.list.state(), &[]);
    }
}
