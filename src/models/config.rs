use serde::{Deserialize, Serialize};

/// Tool settings from sweepforge.yaml
///
/// Every section has defaults so a partial (or absent) file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub sidecars: SidecarRules,

    #[serde(default)]
    pub output: OutputSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Fixed suffix rules deriving a unit's sidecar files from its base path.
///
/// The experiment extension is stripped from the base path (when present)
/// before the descriptor or binary suffix is appended. `generate` gives every
/// experiment document this same extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarRules {
    #[serde(default = "default_experiment_extension")]
    pub experiment_extension: String,

    #[serde(default = "default_descriptor_suffix")]
    pub descriptor_suffix: String,

    #[serde(default = "default_binary_suffix")]
    pub binary_suffix: String,
}

impl Default for SidecarRules {
    fn default() -> Self {
        Self {
            experiment_extension: default_experiment_extension(),
            descriptor_suffix: default_descriptor_suffix(),
            binary_suffix: default_binary_suffix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// File name of the batch descriptor written next to generated experiments
    #[serde(default = "default_batch_file_name")]
    pub batch_file_name: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            batch_file_name: default_batch_file_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,

    #[serde(default)]
    pub debug_mode: bool,

    #[serde(default = "default_console_output")]
    pub console_output: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            debug_mode: false,
            console_output: default_console_output(),
        }
    }
}

fn default_experiment_extension() -> String {
    ".exp".to_string()
}

fn default_descriptor_suffix() -> String {
    ".log".to_string()
}

fn default_binary_suffix() -> String {
    ".log.bin".to_string()
}

fn default_batch_file_name() -> String {
    "batch.xml".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_prefix() -> String {
    "sweepforge".to_string()
}

fn default_console_output() -> bool {
    true
}
