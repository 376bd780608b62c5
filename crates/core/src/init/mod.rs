//! Initialization module for creating `.pipeline-bridge` directories.
//!
//! This module scaffolds a new bridge project by generating a
//! `.pipeline-bridge/` directory from embedded templates:
//! - Bridge settings (`config.toml`)
//! - Pipeline stage vocabulary (`stages.yaml`)
//!
//! # Example
//!
//! ```no_run
//! use pb_core::init::{InitOptions, generate_bridge_structure};
//! use std::path::PathBuf;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = InitOptions {
//!     target_dir: PathBuf::from("."),
//!     remote_url: Some("https://pipeline.example.com".to_string()),
//!     force: false,
//!     minimal: false,
//! };
//!
//! generate_bridge_structure(options).await?;
//! println!("Pipeline bridge initialized successfully!");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod generator;
pub mod templates;

pub use error::{InitError, InitResult};
pub use generator::{generate_bridge_structure, InitOptions, DEFAULT_REMOTE_URL};
pub use templates::get_template;
