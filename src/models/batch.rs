use crate::models::SidecarRules;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;

/// A batch of dispatched experiments as described by a batch descriptor document.
///
/// Rebuilt from scratch on every load; nothing here caches completion state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentBatch {
    pub file_path: Option<Utf8PathBuf>,
    pub experiments: Vec<Experiment>,
}

impl ExperimentBatch {
    pub fn new(file_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            file_path: Some(file_path.into()),
            experiments: Vec::new(),
        }
    }

    /// Sum of unit counts across all experiments.
    pub fn count_experimental_units(&self) -> usize {
        self.experiments.iter().map(|e| e.units.len()).sum()
    }

    /// Every unit of every experiment, in document order.
    pub fn units(&self) -> impl Iterator<Item = &ExperimentalUnit> {
        self.experiments.iter().flat_map(|e| e.units.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Experiment {
    pub name: Option<String>,
    pub units: Vec<ExperimentalUnit>,
}

/// Smallest trackable piece of dispatched work, identified by its base path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExperimentalUnit {
    pub path: Utf8PathBuf,
}

impl ExperimentalUnit {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn sidecars(&self, rules: &SidecarRules) -> SidecarPaths {
        SidecarPaths::derive(&self.path, rules)
    }
}

/// The two sidecar files whose joint presence marks a unit as finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarPaths {
    pub descriptor: Utf8PathBuf,
    pub binary: Utf8PathBuf,
}

impl SidecarPaths {
    /// Derive both sidecar paths from a unit base path.
    ///
    /// `runs/a.exp` with the default rules gives `runs/a.log` and `runs/a.log.bin`.
    /// A base path without the experiment extension keeps its full name.
    pub fn derive(base: &Utf8Path, rules: &SidecarRules) -> Self {
        let raw = base.as_str();
        let stem = if rules.experiment_extension.is_empty() {
            raw
        } else {
            raw.strip_suffix(rules.experiment_extension.as_str())
                .unwrap_or(raw)
        };

        Self {
            descriptor: Utf8PathBuf::from(format!("{}{}", stem, rules.descriptor_suffix)),
            binary: Utf8PathBuf::from(format!("{}{}", stem, rules.binary_suffix)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utf8Path> {
        [self.descriptor.as_path(), self.binary.as_path()].into_iter()
    }
}

/// Completion state of a unit. Any state short of both sidecars present is unfinished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitStatus {
    Finished,
    Unfinished,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Finished => write!(f, "finished"),
            UnitStatus::Unfinished => write!(f, "unfinished"),
        }
    }
}

/// Which units a filtered count includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnitSelection {
    #[default]
    All,
    OnlyFinished,
    OnlyUnfinished,
}

impl UnitSelection {
    pub fn matches(self, status: UnitStatus) -> bool {
        match self {
            UnitSelection::All => true,
            UnitSelection::OnlyFinished => status == UnitStatus::Finished,
            UnitSelection::OnlyUnfinished => status == UnitStatus::Unfinished,
        }
    }
}
