//! Data models for sweepforge.
//!
//! - [`ConfigNode`] / [`NodeDefinition`]: the experiment configuration tree and its parsed schema
//! - [`ExperimentBatch`]: experiments and experimental units listed by a batch descriptor
//! - [`UnitStatus`] / [`UnitSelection`]: completion classification and count filters
//! - [`Settings`]: tool settings loaded from `sweepforge.yaml`

pub mod batch;
pub mod config;
pub mod node;

pub use batch::{
    Experiment, ExperimentBatch, ExperimentalUnit, SidecarPaths, UnitSelection, UnitStatus,
};
pub use config::{LoggingSettings, OutputSettings, Settings, SidecarRules};
pub use node::{
    AuxRefNode, BranchNode, ChoiceSlot, ConfigNode, DefinitionKind, EnumNode, ForkNode, ForkValue,
    NodeDefinition, SaveMode, ValueKind, ValueNode,
};
