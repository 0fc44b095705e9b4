//! hook-runner - Webhook receiver that runs local scripts per ref.
//!
//! An incoming event names a ref (usually a branch). The configured scripts
//! for that ref run one after another, and only one batch runs at a time
//! across the whole process.
//!
//! ## Architecture
//!
//! ```text
//! HTTP → panic guard → signature check → handler → Dispatcher → scripts
//! ```

pub mod config;
pub mod dispatch;
pub mod scripts;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError, Setting};
pub use dispatch::{DispatchError, Dispatcher, EventPayload};
pub use scripts::{run_script, ScriptError, ScriptTable};
pub use web::{create_router, AppState};
