use crate::models::{Experiment, ExperimentBatch, ExperimentalUnit};
use crate::services::document::{
    DocumentError, element_children, escape_xml, parse_document, read_document,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::File;
use std::io::{BufWriter, Write};

/// Root tag of a batch descriptor document
pub const BATCH_TAG: &str = "ExperimentBatch";
pub const EXPERIMENT_TAG: &str = "Experiment";
pub const UNIT_TAG: &str = "ExperimentalUnit";
pub const PATH_ATTRIBUTE: &str = "Path";
pub const NAME_ATTRIBUTE: &str = "Name";

/// Loader for batch descriptor documents
///
/// Holds the batch from the last [`load`](Self::load). A failed load leaves an
/// empty batch behind instead of an error; use [`try_load`](Self::try_load)
/// to tell a missing file from a corrupt one.
#[derive(Debug, Clone, Default)]
pub struct BatchLoader {
    batch: ExperimentBatch,
}

impl BatchLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a batch descriptor without touching any loader state.
    ///
    /// A root other than `ExperimentBatch` yields an empty batch. Children
    /// other than `Experiment` / `ExperimentalUnit` are ignored. Unit paths
    /// are kept verbatim; nothing checks that they exist.
    pub fn try_load(path: &Utf8Path) -> Result<ExperimentBatch, DocumentError> {
        let text = read_document(path)?;
        let doc = parse_document(path, &text)?;
        let root = doc.root_element();

        let mut batch = ExperimentBatch::new(path);
        if !root.has_tag_name(BATCH_TAG) {
            tracing::warn!(
                "{} has root <{}>, expected <{}>",
                path,
                root.tag_name().name(),
                BATCH_TAG
            );
            return Ok(batch);
        }

        for experiment in element_children(root).filter(|n| n.has_tag_name(EXPERIMENT_TAG)) {
            let mut units = Vec::new();
            for unit in element_children(experiment).filter(|n| n.has_tag_name(UNIT_TAG)) {
                match unit.attribute(PATH_ATTRIBUTE) {
                    Some(unit_path) => units.push(ExperimentalUnit::new(unit_path)),
                    None => tracing::warn!(
                        "Skipping experimental unit without a {} attribute in {}",
                        PATH_ATTRIBUTE,
                        path
                    ),
                }
            }

            batch.experiments.push(Experiment {
                name: experiment.attribute(NAME_ATTRIBUTE).map(str::to_string),
                units,
            });
        }

        tracing::debug!(
            "Parsed {}: {} experiments, {} units",
            path,
            batch.experiments.len(),
            batch.count_experimental_units()
        );
        Ok(batch)
    }

    /// Replace the held batch with the one described at `path`.
    ///
    /// Failures are logged and leave the batch empty; check
    /// [`experiments`](Self::experiments) for emptiness.
    pub fn load(&mut self, path: &Utf8Path) {
        self.batch = ExperimentBatch::new(path);

        match Self::try_load(path) {
            Ok(batch) => self.batch = batch,
            Err(e) => tracing::error!("Failed to load experiment batch: {}", e),
        }
    }

    pub fn batch(&self) -> &ExperimentBatch {
        &self.batch
    }

    pub fn experiments(&self) -> &[Experiment] {
        &self.batch.experiments
    }

    /// Sum of unit counts across the loaded experiments.
    pub fn count_experimental_units(&self) -> usize {
        self.batch.count_experimental_units()
    }
}

/// Writes batch descriptor documents in the format [`BatchLoader`] reads.
pub struct BatchWriter;

impl BatchWriter {
    /// One experiment named `name` holding `units`, each resolved to an
    /// absolute path so the batch reads the same from any working directory.
    ///
    /// Every unit must already exist on disk.
    pub fn single_experiment(
        name: &str,
        units: &[Utf8PathBuf],
    ) -> Result<ExperimentBatch, DocumentError> {
        let units = units
            .iter()
            .map(|unit| {
                unit.canonicalize_utf8()
                    .map(ExperimentalUnit::new)
                    .map_err(|source| DocumentError::Io {
                        path: unit.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ExperimentBatch {
            file_path: None,
            experiments: vec![Experiment {
                name: Some(name.to_string()),
                units,
            }],
        })
    }

    pub fn write(batch: &ExperimentBatch, path: &Utf8Path) -> Result<(), DocumentError> {
        let io_error = |source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::create(path).map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        Self::write_to(batch, &mut writer).map_err(io_error)?;
        writer.flush().map_err(io_error)?;

        tracing::info!(
            "Wrote batch {} with {} units",
            path,
            batch.count_experimental_units()
        );
        Ok(())
    }

    pub fn write_to(batch: &ExperimentBatch, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "<{BATCH_TAG}>")?;
        for experiment in &batch.experiments {
            match &experiment.name {
                Some(name) => writeln!(
                    out,
                    "  <{EXPERIMENT_TAG} {NAME_ATTRIBUTE}=\"{}\">",
                    escape_xml(name)
                )?,
                None => writeln!(out, "  <{EXPERIMENT_TAG}>")?,
            }
            for unit in &experiment.units {
                writeln!(
                    out,
                    "    <{UNIT_TAG} {PATH_ATTRIBUTE}=\"{}\"/>",
                    escape_xml(unit.path.as_str())
                )?;
            }
            writeln!(out, "  </{EXPERIMENT_TAG}>")?;
        }
        writeln!(out, "</{BATCH_TAG}>")
    }
}
