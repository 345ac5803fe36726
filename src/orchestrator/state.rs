//! Automation run state machine
//!
//! Phases of one installation run and the events that move between them.
//! Transitions come from a fixed table; anything else is rejected.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Phase of an automation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    PreCheck,
    Installing,
    Stabilizing,
    PostVerify,
    Recovering,
    Recovered,
    RecoveryFailed,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Something that happened during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Begin,
    Install,
    Settle,
    Verify,
    Recover,
    Succeed,
    Fail,
    Finish,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Target phase for `event` in phase `from`, if the move is legal
pub fn transition(from: Phase, event: Event) -> Option<Phase> {
    use Event::*;
    use Phase::*;

    match (from, event) {
        (Idle, Begin) => Some(PreCheck),
        (PreCheck, Install) => Some(Installing),
        (Installing, Settle) => Some(Stabilizing),
        (Stabilizing, Verify) => Some(PostVerify),
        (Installing | PostVerify | Recovered | RecoveryFailed, Recover) => Some(Recovering),
        (Recovering, Succeed) => Some(Recovered),
        (Recovering, Fail) => Some(RecoveryFailed),
        (Done, Finish) => None,
        (_, Finish) => Some(Done),
        _ => None,
    }
}

/// Current phase of one run
#[derive(Debug)]
pub struct RunMachine {
    phase: Phase,
}

impl Default for RunMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMachine {
    pub fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Apply an event, failing on an illegal transition
    pub fn handle(&mut self, event: Event) -> Result<Phase> {
        let next = transition(self.phase, event).ok_or_else(|| Error::InvalidTransition {
            event: event.to_string(),
            from: self.phase.to_string(),
        })?;
        tracing::debug!("phase {} -> {} on {}", self.phase, next, event);
        self.phase = next;
        Ok(next)
    }
}
