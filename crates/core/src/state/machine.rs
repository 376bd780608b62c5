//! Connection state machine.
//!
//! The legal transitions live in one table ([`next_state`]); everything the
//! table does not list is rejected. [`ConnectionMachine`] wraps the table
//! with the attempt counter and the retry budget.

use pb_protocol::status_models::ConnectionState;
use std::fmt;
use thiserror::Error;

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A frame was bound or rebound.
    Attach,
    /// `REMOTE_READY` or `BRIDGE_READY` arrived.
    Ready,
    /// `CRM_INIT_COMPLETE` arrived.
    InitAcknowledged,
    /// Transport or protocol failure.
    Fail,
    /// Explicit retry requested by the host.
    Retry,
    /// Controller torn down.
    Detach,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::Attach => "attach",
            Transition::Ready => "ready",
            Transition::InitAcknowledged => "init-acknowledged",
            Transition::Fail => "fail",
            Transition::Retry => "retry",
            Transition::Detach => "detach",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot apply {event} while {from}")]
    Invalid {
        from: ConnectionState,
        event: Transition,
    },

    #[error("retry budget exhausted after {attempts} of {max_attempts} attempts")]
    AttemptsExhausted { attempts: u32, max_attempts: u32 },
}

/// The transition table.
///
/// Returns `None` for every (state, event) pair that is not a legal move.
pub fn next_state(from: ConnectionState, event: Transition) -> Option<ConnectionState> {
    use ConnectionState::*;

    match (from, event) {
        (_, Transition::Detach) => Some(Disconnected),
        (_, Transition::Fail) => Some(Error),
        (_, Transition::Attach) => Some(Connecting),
        (Connecting | AwaitingBridge, Transition::Ready) => Some(AwaitingBridge),
        (AwaitingBridge | Connected, Transition::InitAcknowledged) => Some(Connected),
        (Error, Transition::Retry) => Some(Connecting),
        _ => None,
    }
}

/// State value plus attempt accounting.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
    /// Whether the current attempt already incremented `attempts`.
    attempt_counted: bool,
}

impl ConnectionMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            max_attempts,
            attempt_counted: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Apply `event` and return the new state.
    ///
    /// A ready signal from `Connecting` counts the current attempt. Leaving
    /// `Error`, by retry or by binding a new frame, first counts the failed
    /// attempt if it never reached readiness and then checks the budget;
    /// once `attempts >= max_attempts` it is refused and `Error` is final.
    pub fn apply(&mut self, event: Transition) -> Result<ConnectionState, TransitionError> {
        let to = next_state(self.state, event).ok_or(TransitionError::Invalid {
            from: self.state,
            event,
        })?;

        match event {
            Transition::Ready if self.state == ConnectionState::Connecting => {
                if !self.attempt_counted {
                    self.attempts += 1;
                    self.attempt_counted = true;
                }
            }
            Transition::Retry => self.charge_failed_attempt()?,
            Transition::Attach if self.state == ConnectionState::Error => {
                self.charge_failed_attempt()?
            }
            Transition::Attach => {
                self.attempt_counted = false;
            }
            _ => {}
        }

        self.state = to;
        Ok(to)
    }

    /// Whether leaving `Error` would currently be refused for budget reasons.
    pub fn is_exhausted(&self) -> bool {
        self.charged_attempts() >= self.max_attempts
    }

    /// Attempts used once the current one is counted.
    fn charged_attempts(&self) -> u32 {
        if self.attempt_counted {
            self.attempts
        } else {
            self.attempts + 1
        }
    }

    fn charge_failed_attempt(&mut self) -> Result<(), TransitionError> {
        let exhausted = self.is_exhausted();
        self.attempts = self.charged_attempts();
        // A refused attempt stays counted so repeated refusals do not add up.
        self.attempt_counted = exhausted;
        if exhausted {
            return Err(TransitionError::AttemptsExhausted {
                attempts: self.attempts,
                max_attempts: self.max_attempts,
            });
        }
        Ok(())
    }
}
