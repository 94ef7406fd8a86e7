//! Services module - experiment generation and batch completion tracking.
//!
//! # Components
//!
//! - [`ExperimentGenerator`]: loads an app definition (plus optional config values)
//!   into a tree of [`ConfigNode`](crate::models::ConfigNode)s and:
//!   - counts fork combinations with overflow detection
//!   - selects one combination by index (mixed radix, first node fastest)
//!   - saves one fork-preserving document or one document per combination
//!
//! - [`BatchLoader`] / [`BatchWriter`]: read and write batch descriptor documents
//!   listing the experimental units dispatched for execution
//!
//! - [`UnitStatusTracker`]: derives completion of each unit from its two sidecar
//!   files, counts units by [`UnitSelection`](crate::models::UnitSelection) and
//!   deletes sidecars in bulk
//!
//! - [`document`]: shared XML reading with a typed [`DocumentError`]
//!
//! # Error Tiers
//!
//! Undefined classes, enumerations and aux categories are logged and degrade to
//! `None`. Missing or corrupt documents surface as [`DocumentError`] from the
//! `try_*` operations; the plain variants log them and return empty results.
//!
//! # Usage Example
//!
//! ```ignore
//! use sweepforge::models::{SaveMode, UnitSelection};
//! use sweepforge::services::{ExperimentGenerator, UnitStatusTracker};
//!
//! let mut generator = ExperimentGenerator::load(app_path, Some(config_path), "sweep")?;
//! let written = generator.save_all(out_dir, SaveMode::CombineForks, ".exp")?;
//!
//! let tracker = UnitStatusTracker::default();
//! let pending = tracker.count_by_selection(batch_path, UnitSelection::OnlyUnfinished);
//! ```

pub mod batch;
pub mod document;
pub mod generator;
pub mod status;

pub use batch::{BatchLoader, BatchWriter};
pub use document::DocumentError;
pub use generator::{ExperimentGenerator, GeneratorError};
pub use status::{DeletionFailure, DeletionReport, UnitStatusTracker};
