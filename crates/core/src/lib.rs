//! # pb-core
//!
//! Host controller, remote runtime and reconciliation for the pipeline bridge.
//!
//! This crate provides:
//! - Configuration loading from the `.pipeline-bridge/` directory
//! - The origin guard applied to every inbound message
//! - The connection state machine and the host-side bridge controller
//! - The remote document and its bridge runtime
//! - Reconciliation of deal mutations against the host's deal store
//! - An in-process loopback transport for simulation and tests
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`guard`]: Origin allow-list and envelope checks
//! - [`state`]: Connection state machine
//! - [`bridge`]: Host-side controller
//! - [`remote`]: Remote document and runtime
//! - [`reconcile`]: Mutation reconciliation and wire mapping
//! - [`store`]: Deal store and contact lookup interfaces
//! - [`transport`]: Frame and window seams
//! - [`window`]: Host window listener registry
//! - [`loopback`]: In-process transport
//! - [`init`]: Project scaffolding

pub mod bridge;
pub mod config;
pub mod guard;
pub mod init;
pub mod loopback;
pub mod reconcile;
pub mod remote;
pub mod state;
pub mod store;
pub mod transport;
pub mod window;
