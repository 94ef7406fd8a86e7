// sweepforge - fork-combination experiment generation and batch completion tracking
//
// This is the library crate containing the core logic and data structures.
// The binary crate (main.rs) provides the command line entry point.

pub mod cli;
pub mod config;
pub mod definitions;
pub mod logging;
pub mod models;
pub mod services;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use definitions::DefinitionRegistry;
pub use models::{ConfigNode, ExperimentBatch, SaveMode, Settings, UnitSelection, UnitStatus};
pub use services::{BatchLoader, ExperimentGenerator, UnitStatusTracker};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
