//! Delayed show/hide of a result's detail panel.
//!
//! Every transition is a pure function of the current state and one event.
//! It returns the next state plus the effects the owner must carry out
//! (start/cancel timers, show/hide the panel, start/cancel the summary
//! stream). Nothing here touches a clock.
//!
//! ```text
//! Idle --enter--> PendingShow --show timer--> Visible --leave--> PendingHide --hide timer--> Idle
//!                     |                          ^                    |
//!                     +----------leave---------> Idle        enter ---+
//! ```

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoverPhase {
    Idle,
    PendingShow,
    Visible,
    PendingHide,
}

/// What the pointer entered or left. The item stays hovered while the pointer
/// is over either one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoverTarget {
    Item,
    Panel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerIntent {
    Show,
    Hide,
}

/// Identifies one timer of one item; a fired timer whose token no longer
/// matches the state is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoverEvent {
    PointerEnter(HoverTarget),
    PointerLeave(HoverTarget),
    TimerFired(TimerIntent, TimerToken),
    /// The list is being torn down.
    Dispose,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoverEffect {
    StartTimer {
        intent: TimerIntent,
        token: TimerToken,
        delay: Duration,
    },
    CancelTimer {
        intent: TimerIntent,
        token: TimerToken,
    },
    ShowPanel,
    FetchSummary,
    HidePanel,
    CancelSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoverDelays {
    pub show: Duration,
    pub hide: Duration,
}

impl Default for HoverDelays {
    fn default() -> Self {
        Self {
            show: Duration::from_millis(200),
            hide: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoverItemState {
    pub phase: HoverPhase,
    pub show_timer: Option<TimerToken>,
    pub hide_timer: Option<TimerToken>,
    /// Set when the summary fetch starts, never cleared.
    pub summary_loaded: bool,
    over_item: bool,
    over_panel: bool,
    next_token: u64,
}

impl Default for HoverItemState {
    fn default() -> Self {
        Self {
            phase: HoverPhase::Idle,
            show_timer: None,
            hide_timer: None,
            summary_loaded: false,
            over_item: false,
            over_panel: false,
            next_token: 1,
        }
    }
}

impl HoverItemState {
    pub fn is_hovered(&self) -> bool {
        self.over_item || self.over_panel
    }

    fn set_hovered(&mut self, target: HoverTarget, hovered: bool) {
        match target {
            HoverTarget::Item => self.over_item = hovered,
            HoverTarget::Panel => self.over_panel = hovered,
        }
    }

    fn issue_token(&mut self) -> TimerToken {
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        token
    }
}

pub fn transition(
    state: &HoverItemState,
    event: HoverEvent,
    delays: &HoverDelays,
) -> (HoverItemState, Vec<HoverEffect>) {
    let mut next = state.clone();
    let mut effects = vec![];

    match event {
        HoverEvent::PointerEnter(target) => next.set_hovered(target, true),
        HoverEvent::PointerLeave(target) => next.set_hovered(target, false),
        _ => {}
    }

    match (state.phase, event) {
        (HoverPhase::Idle, HoverEvent::PointerEnter(_)) => {
            let token = next.issue_token();
            next.show_timer = Some(token);
            next.phase = HoverPhase::PendingShow;
            effects.push(HoverEffect::StartTimer {
                intent: TimerIntent::Show,
                token,
                delay: delays.show,
            });
        }

        (HoverPhase::PendingShow, HoverEvent::PointerLeave(_)) if !next.is_hovered() => {
            if let Some(token) = next.show_timer.take() {
                effects.push(HoverEffect::CancelTimer {
                    intent: TimerIntent::Show,
                    token,
                });
            }
            next.phase = HoverPhase::Idle;
        }

        (HoverPhase::PendingShow, HoverEvent::TimerFired(TimerIntent::Show, token))
            if state.show_timer == Some(token) =>
        {
            next.show_timer = None;
            next.phase = HoverPhase::Visible;
            effects.push(HoverEffect::ShowPanel);
            if !next.summary_loaded {
                next.summary_loaded = true;
                effects.push(HoverEffect::FetchSummary);
            }
        }

        (HoverPhase::Visible, HoverEvent::PointerLeave(_)) if !next.is_hovered() => {
            let token = next.issue_token();
            next.hide_timer = Some(token);
            next.phase = HoverPhase::PendingHide;
            effects.push(HoverEffect::StartTimer {
                intent: TimerIntent::Hide,
                token,
                delay: delays.hide,
            });
        }

        (HoverPhase::PendingHide, HoverEvent::PointerEnter(_)) => {
            if let Some(token) = next.hide_timer.take() {
                effects.push(HoverEffect::CancelTimer {
                    intent: TimerIntent::Hide,
                    token,
                });
            }
            next.phase = HoverPhase::Visible;
        }

        (HoverPhase::PendingHide, HoverEvent::TimerFired(TimerIntent::Hide, token))
            if state.hide_timer == Some(token) =>
        {
            next.hide_timer = None;
            next.phase = HoverPhase::Idle;
            effects.push(HoverEffect::HidePanel);
            if next.summary_loaded {
                effects.push(HoverEffect::CancelSummary);
            }
        }

        (phase, HoverEvent::Dispose) => {
            if let Some(token) = next.show_timer.take() {
                effects.push(HoverEffect::CancelTimer {
                    intent: TimerIntent::Show,
                    token,
                });
            }
            if let Some(token) = next.hide_timer.take() {
                effects.push(HoverEffect::CancelTimer {
                    intent: TimerIntent::Hide,
                    token,
                });
            }
            if matches!(phase, HoverPhase::Visible | HoverPhase::PendingHide) {
                effects.push(HoverEffect::HidePanel);
            }
            if next.summary_loaded {
                effects.push(HoverEffect::CancelSummary);
            }
            next.over_item = false;
            next.over_panel = false;
            next.phase = HoverPhase::Idle;
        }

        // leaving one target while still over the other, re-entering while pending/visible, leaving while already idle or
        // hiding, stale timers
        _ => {}
    }

    (next, effects)
}

/// One controller per rendered result.
#[derive(Debug, Clone)]
pub struct HoverRevealController {
    state: HoverItemState,
    delays: HoverDelays,
}

impl HoverRevealController {
    pub fn new(delays: HoverDelays) -> Self {
        Self {
            state: HoverItemState::default(),
            delays,
        }
    }

    pub fn handle(&mut self, event: HoverEvent) -> Vec<HoverEffect> {
        let (next, effects) = transition(&self.state, event, &self.delays);
        if next.phase != self.state.phase {
            log::debug!("hover {:?} -> {:?} on {event:?}", self.state.phase, next.phase);
        }
        self.state = next;
        effects
    }

    pub fn state(&self) -> &HoverItemState {
        &self.state
    }

    pub fn phase(&self) -> HoverPhase {
        self.state.phase
    }
}
