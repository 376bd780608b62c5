//! Common test utilities shared by the integration tests.
//!
//! This module provides:
//! - Test fixtures (configs, deals, inbound events)
//! - Recording doubles for the frame and the deal store
//! - Custom assertions

pub mod assertions;
pub mod doubles;
pub mod fixtures;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use doubles::*;
#[allow(unused_imports)]
pub use fixtures::*;
