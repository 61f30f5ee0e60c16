//! # tasktree-foundation
//!
//! Foundation layer for tasktree:
//! - Error: engine error taxonomy
//! - Config: `EngineConfig` (file + environment)
//! - Event: typed, synchronous listener registry
//! - Logging: tracing-subscriber setup for embedding binaries

pub mod config;
pub mod error;
pub mod event;
pub mod logging;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{EngineConfig, CONFIG_DIR_NAME, ENGINE_CONFIG_FILE};

// ============================================================================
// Event
// ============================================================================
pub use event::{Event, EventFilter, Listener, ListenerId, ListenerRegistry};

// ============================================================================
// Logging
// ============================================================================
pub use logging::init_logging;
