//! # pipeline-shell
//!
//! Steps a user through a multi-stage external data-processing pipeline, one
//! HTML module view per stage, handing JSON between the views and an
//! out-of-process script for each stage.
//!
//! ## Usage
//!
//! ```bash
//! pipeline-shell serve --app-dir ./app
//! pipeline-shell exec stage0.py '{"input": "data.csv"}' --app-dir ./app
//! ```
//!
//! ## Modules
//!
//! - `config` - Layered TOML/environment configuration
//! - `error` - Crate-level error type for host plumbing
//! - `ipc` - Channel frames and the message router
//! - `pipeline` - State store, navigator and external stage runner
//! - `server` - HTTP + WebSocket host serving the module views
//! - `subprocess` - Process runner abstraction with a mock for tests
pub mod config;
pub mod error;
pub mod ipc;
pub mod pipeline;
pub mod server;
pub mod subprocess;

pub use error::{Error, Result};
