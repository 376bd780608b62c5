//! Connection state management.
//!
//! This module provides:
//! - The transition table for the bridge connection lifecycle
//! - `ConnectionMachine`, which adds attempt accounting on top of it

pub mod machine;

pub use machine::{next_state, ConnectionMachine, Transition, TransitionError};
