//! Config - engine settings
//!
//! - `engine.rs` - EngineConfig (defaults, file loading, env overrides)

mod engine;

pub use engine::{EngineConfig, CONFIG_DIR_NAME, ENGINE_CONFIG_FILE};
