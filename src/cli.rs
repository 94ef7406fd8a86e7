use crate::models::{SaveMode, UnitSelection};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};

pub const DEFAULT_CONFIG_DIR: &str = ".sweepforge";

#[derive(Parser, Debug)]
#[command(
    name = "sweepforge",
    version,
    about = "Generate fork-combination experiments and track batch completion"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = DEFAULT_CONFIG_DIR,
        help = "Directory holding sweepforge.yaml"
    )]
    pub config_dir: Utf8PathBuf,
    #[arg(long, global = true, help = "Enable debug logging")]
    pub debug: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write experiment documents for an app definition
    Generate {
        #[command(flatten)]
        source: ExperimentSource,
        #[arg(long, help = "Output directory")]
        out: Utf8PathBuf,
        #[arg(long, help = "Experiment name (defaults to the app definition's file stem)")]
        name: Option<String>,
        #[arg(long, value_enum, default_value_t = ModeArg::CombineForks)]
        mode: ModeArg,
        #[arg(
            long,
            num_args = 0..=1,
            help = "Also write a batch descriptor listing the written files (default: <OUT>/batch.xml)"
        )]
        batch: Option<Option<Utf8PathBuf>>,
    },
    /// Print the number of fork combinations
    Combinations {
        #[command(flatten)]
        source: ExperimentSource,
    },
    /// Count the units of a batch
    Count {
        batch: Utf8PathBuf,
        #[arg(long, value_enum, default_value_t = SelectArg::All)]
        select: SelectArg,
    },
    /// List every unit of a batch with its completion status
    Status { batch: Utf8PathBuf },
    /// Delete the sidecar files of every unit of a batch
    Clean { batch: Utf8PathBuf },
}

#[derive(Args, Debug, Clone)]
pub struct ExperimentSource {
    #[arg(long, help = "App definition document")]
    pub app: Utf8PathBuf,
    #[arg(long, help = "Config values document (may contain forks)")]
    pub config: Option<Utf8PathBuf>,
    #[arg(long, help = "Aux definitions document; may be repeated")]
    pub aux: Vec<Utf8PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    SaveForks,
    CombineForks,
}

impl From<ModeArg> for SaveMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::SaveForks => SaveMode::SaveForks,
            ModeArg::CombineForks => SaveMode::CombineForks,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectArg {
    All,
    Finished,
    Unfinished,
}

impl From<SelectArg> for UnitSelection {
    fn from(value: SelectArg) -> Self {
        match value {
            SelectArg::All => UnitSelection::All,
            SelectArg::Finished => UnitSelection::OnlyFinished,
            SelectArg::Unfinished => UnitSelection::OnlyUnfinished,
        }
    }
}
