//! The Resolution State Machine.
//!
//! ```text
//! ACTIVE   --[marker observed]--------> RESOLVED(n)
//! RESOLVED --[tick, n > 1]------------> RESOLVED(n-1)
//! RESOLVED --[tick, n = 1]------------> RESET -> ACTIVE (new ticket)
//! RESOLVED --[continue]---------------> ACTIVE (same ticket)
//! RESOLVED --[new request]------------> RESET -> ACTIVE (new ticket)
//! ```
//!
//! `RESET` is transient: the machine reports it and is `Active` again. The
//! caller performs the reset itself (clearing the ticket, reseeding the
//! transcript). The countdown's timer lives with the driver; this type only
//! counts.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResolutionState {
    Active,
    Resolved { remaining: u32 },
}

impl ResolutionState {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ResolutionState::Resolved { .. })
    }
}

/// Outcome of feeding one input to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The input had no effect in the current state.
    Ignored,
    Resolved { remaining: u32 },
    Ticked { remaining: u32 },
    Continued,
    Reset,
}

#[derive(Debug, Clone)]
pub struct ResolutionMachine {
    state: ResolutionState,
    countdown_secs: u32,
}

impl ResolutionMachine {
    pub fn new(countdown_secs: u32) -> Self {
        Self {
            state: ResolutionState::Active,
            countdown_secs: countdown_secs.max(1),
        }
    }

    pub fn state(&self) -> ResolutionState {
        self.state
    }

    pub fn is_resolved(&self) -> bool {
        self.state.is_resolved()
    }

    /// A resolution marker was seen. Level-triggered: repeated observations
    /// while already resolved do not restart the countdown.
    pub fn observe_marker(&mut self) -> Transition {
        match self.state {
            ResolutionState::Active => {
                self.state = ResolutionState::Resolved {
                    remaining: self.countdown_secs,
                };
                Transition::Resolved {
                    remaining: self.countdown_secs,
                }
            }
            ResolutionState::Resolved { .. } => Transition::Ignored,
        }
    }

    /// One second of countdown elapsed.
    pub fn tick(&mut self) -> Transition {
        match self.state {
            ResolutionState::Resolved { remaining } if remaining > 1 => {
                self.state = ResolutionState::Resolved {
                    remaining: remaining - 1,
                };
                Transition::Ticked {
                    remaining: remaining - 1,
                }
            }
            ResolutionState::Resolved { .. } => {
                self.state = ResolutionState::Active;
                Transition::Reset
            }
            ResolutionState::Active => Transition::Ignored,
        }
    }

    /// "Continue the subject": back to the same ticket.
    pub fn continue_subject(&mut self) -> Transition {
        match self.state {
            ResolutionState::Resolved { .. } => {
                self.state = ResolutionState::Active;
                Transition::Continued
            }
            ResolutionState::Active => Transition::Ignored,
        }
    }

    /// "New request": always resets, from either state.
    pub fn new_request(&mut self) -> Transition {
        self.state = ResolutionState::Active;
        Transition::Reset
    }

    /// Return to `Active` without reporting a transition.
    pub fn clear(&mut self) {
        self.state = ResolutionState::Active;
    }
}
