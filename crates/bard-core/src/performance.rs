use crate::debounce::DebounceGuard;
use crate::flags::PerformanceFlags;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceState {
    Idle,
    Performing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Started,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started,
    Stopped,
    /// Inside the debounce window; dropped.
    Debounced,
    NotEquipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Override {
    None,
    /// Manual start: stay performing until an explicit stop.
    HeldOn,
    /// Automatic start is blocked until this note deadline passes.
    Suppressed(Option<Instant>),
}

/// Two-state performance signal.
///
/// Runs on the polling domain and is the only writer of
/// `PerformanceFlags::performing`; each transition is exactly one write.
#[derive(Debug)]
pub struct PerformanceStateMachine {
    state: PerformanceState,
    debounce: DebounceGuard,
    manual: Override,
}

impl PerformanceStateMachine {
    pub fn new(debounce_interval: Duration) -> Self {
        Self {
            state: PerformanceState::Idle,
            debounce: DebounceGuard::new(debounce_interval),
            manual: Override::None,
        }
    }

    pub fn state(&self) -> PerformanceState {
        self.state
    }

    pub fn is_manual_hold(&self) -> bool {
        self.manual == Override::HeldOn
    }

    pub fn tick(&mut self, now: Instant, flags: &PerformanceFlags) -> Option<Transition> {
        if !flags.has_instrument_equipped() {
            self.manual = Override::None;
            return self.enter(PerformanceState::Idle, flags);
        }

        let note_playing = flags.note_playing(now);
        match self.manual {
            Override::HeldOn => return None,
            Override::Suppressed(until) => {
                if until.is_some_and(|deadline| now < deadline) {
                    return None;
                }
                self.manual = Override::None;
            }
            Override::None => {}
        }

        match self.state {
            PerformanceState::Idle if note_playing => self.enter(PerformanceState::Performing, flags),
            PerformanceState::Performing if !note_playing && !flags.session_active() => {
                self.enter(PerformanceState::Idle, flags)
            }
            _ => None,
        }
    }

    pub fn request_manual_toggle(
        &mut self,
        now: Instant,
        flags: &PerformanceFlags,
    ) -> ToggleOutcome {
        if !flags.has_instrument_equipped() {
            return ToggleOutcome::NotEquipped;
        }
        if !self.debounce.try_accept(now) {
            tracing::info!("manual toggle rejected inside debounce window");
            return ToggleOutcome::Debounced;
        }

        match self.state {
            PerformanceState::Idle => {
                self.manual = Override::HeldOn;
                self.enter(PerformanceState::Performing, flags);
                ToggleOutcome::Started
            }
            PerformanceState::Performing => {
                self.manual = Override::Suppressed(flags.note_deadline());
                self.enter(PerformanceState::Idle, flags);
                ToggleOutcome::Stopped
            }
        }
    }

    /// Explicit stop: goes idle and keeps the automatic start off until the
    /// current note window has run out.
    pub fn stop(&mut self, flags: &PerformanceFlags) -> Option<Transition> {
        self.manual = Override::Suppressed(flags.note_deadline());
        self.enter(PerformanceState::Idle, flags)
    }

    /// Goes idle and drops any manual override.
    pub fn reset(&mut self, flags: &PerformanceFlags) -> Option<Transition> {
        self.manual = Override::None;
        self.enter(PerformanceState::Idle, flags)
    }

    fn enter(&mut self, next: PerformanceState, flags: &PerformanceFlags) -> Option<Transition> {
        if self.state == next {
            return None;
        }
        self.state = next;
        let performing = next == PerformanceState::Performing;
        flags.set_performing(performing);
        Some(if performing {
            Transition::Started
        } else {
            Transition::Stopped
        })
    }
}
