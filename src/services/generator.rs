use crate::definitions::DefinitionRegistry;
use crate::models::node::{FORK_TAG, FORK_VALUE_TAG, product_of, select_in};
use crate::models::{
    AuxRefNode, ChoiceSlot, ConfigNode, DefinitionKind, EnumNode, ForkValue, NodeDefinition,
    SaveMode,
};
use crate::services::document::{
    DocumentError, element_children, element_text, escape_xml, is_valid_element_name,
    parse_document, read_document, resolve_relative,
};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::sync::LazyLock;
use thiserror::Error;

/// Root tag of an app-definition document
pub const APP_TAG: &str = "App";
pub const EXE_TAG: &str = "Exe";
pub const PRE_TAG: &str = "Pre";
pub const INCLUDE_TAG: &str = "Include";

/// Class expansion deeper than this is treated as a recursive class definition
const MAX_NESTING_DEPTH: usize = 64;

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("Invalid file name regex"));

/// Errors that can occur while loading or saving experiments
#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Number of fork combinations overflows a 64-bit counter")]
    CombinationOverflow,

    #[error("Combination {index} out of range, the tree has {total} combinations")]
    CombinationOutOfRange { index: u64, total: u64 },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An experiment configuration: the node tree plus the definitions it was built against.
///
/// # Forks and combinations
///
/// Every node contributes a cardinality (1 for unforked nodes). The tree's
/// combinations are numbered `0..total_combinations()` in mixed radix, the
/// first child being the fastest-varying digit, so
/// [`select_combination`](Self::select_combination) maps each index to exactly
/// one combination and back.
///
/// # Saving
///
/// - [`SaveMode::SaveForks`]: one document, forks and all their alternatives kept
/// - [`SaveMode::CombineForks`]: one resolved document per combination
#[derive(Debug)]
pub struct ExperimentGenerator {
    name: String,
    app_name: String,
    version: String,
    exe_file: Option<String>,
    prerequisites: Vec<String>,
    children: Vec<ConfigNode>,
    registry: DefinitionRegistry,
    file_name: Option<Utf8PathBuf>,
}

impl ExperimentGenerator {
    /// Create an empty experiment for programmatic tree building.
    pub fn new(
        name: impl Into<String>,
        app_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            app_name: app_name.into(),
            version: version.into(),
            exe_file: None,
            prerequisites: Vec::new(),
            children: Vec::new(),
            registry: DefinitionRegistry::new(),
            file_name: None,
        }
    }

    /// Load an app definition, optionally filled with values from a config document.
    ///
    /// Phase 1 walks the app definition: `Exe` and `Pre` are recorded,
    /// `Include` documents are merged into the registry, node declarations are
    /// parsed into [`NodeDefinition`]s. Phase 2 builds the tree against the
    /// complete registry, then the queued deferred steps resolve enumerations.
    ///
    /// Undefined classes and enumerations are logged and leave the affected
    /// node empty or unresolved; a missing or corrupt document is an error.
    pub fn load(
        app_definition: &Utf8Path,
        config: Option<&Utf8Path>,
        experiment_name: &str,
    ) -> Result<Self, GeneratorError> {
        let text = read_document(app_definition)?;
        let doc = parse_document(app_definition, &text)?;
        let root = doc.root_element();

        if !root.has_tag_name(APP_TAG) {
            return Err(DocumentError::parse(
                app_definition,
                format!("root is <{}>, expected <{}>", root.tag_name().name(), APP_TAG),
            )
            .into());
        }
        let Some(app_name) = root.attribute("Name") else {
            return Err(
                DocumentError::parse(app_definition, "app definition has no Name").into(),
            );
        };
        if !is_valid_element_name(app_name) {
            return Err(DocumentError::parse(
                app_definition,
                format!("app name {:?} is not a valid element name", app_name),
            )
            .into());
        }
        let version = root.attribute("Version").unwrap_or("0");

        let mut generator = Self::new(experiment_name, app_name, version);

        let mut definitions = Vec::new();
        for child in element_children(root) {
            match child.tag_name().name() {
                EXE_TAG => generator.exe_file = Some(element_text(child)),
                PRE_TAG => generator.prerequisites.push(element_text(child)),
                INCLUDE_TAG => {
                    let included = resolve_relative(app_definition, &element_text(child));
                    generator.registry.load_included_definitions(&included)?;
                }
                other => match NodeDefinition::from_element(child) {
                    Some(definition) => definitions.push(definition),
                    None => tracing::debug!("Ignoring <{}> in {}", other, app_definition),
                },
            }
        }

        let config_text = match config {
            Some(path) => Some((path, read_document(path)?)),
            None => None,
        };
        let config_doc = match &config_text {
            Some((path, text)) => Some(parse_document(path, text)?),
            None => None,
        };
        let config_root = config_doc.as_ref().map(|doc| doc.root_element());
        if let Some(config_root) = config_root {
            if !config_root.has_tag_name(app_name) {
                tracing::warn!(
                    "Config root <{}> does not match app {}, reading values anyway",
                    config_root.tag_name().name(),
                    app_name
                );
            }
        }

        let mut children = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            children.push(build_node(&mut generator.registry, definition, config_root, 0));
        }
        generator.children = children;
        generator.registry.run_deferred_steps();
        generator.file_name = config.map(Utf8Path::to_path_buf);

        tracing::info!(
            "Loaded {} ({} v{}) with {} top-level nodes",
            generator.name,
            generator.app_name,
            generator.version,
            generator.children.len()
        );
        Ok(generator)
    }

    /// Load an aux definitions document into this experiment's registry.
    pub fn load_aux_definitions(&mut self, path: &Utf8Path) -> Result<usize, DocumentError> {
        self.registry.load_aux_definitions(path)
    }

    pub fn push_child(&mut self, node: ConfigNode) {
        self.children.push(node);
    }

    /// True if every node holds a valid value.
    pub fn validate(&self) -> bool {
        let mut valid = true;
        for child in &self.children {
            if !child.validate() {
                tracing::warn!("Node {} has an invalid value", child.name());
                valid = false;
            }
        }
        valid
    }

    /// Product of every top-level node's cardinality; at least 1.
    pub fn total_combinations(&self) -> Result<u64, GeneratorError> {
        product_of(&self.children).ok_or(GeneratorError::CombinationOverflow)
    }

    /// Resolve every fork to combination `index` and return the combination's name.
    ///
    /// The name is the experiment name followed by one `-token` per selected
    /// fork alternative, in tree order.
    pub fn select_combination(&mut self, index: u64) -> Result<String, GeneratorError> {
        let total = self.total_combinations()?;
        if index >= total {
            return Err(GeneratorError::CombinationOutOfRange { index, total });
        }

        let mut combination_name = self.name.clone();
        select_in(&mut self.children, index, &mut combination_name);
        Ok(combination_name)
    }

    /// Write the experiment document to `out`.
    pub fn write_to(&self, out: &mut dyn Write, mode: SaveMode, indent: &str) -> io::Result<()> {
        writeln!(
            out,
            "{indent}<{} Version=\"{}\">",
            self.app_name,
            escape_xml(&self.version)
        )?;
        let inner = format!("{indent}  ");
        for child in &self.children {
            child.write_xml(out, mode, &inner)?;
        }
        writeln!(out, "{indent}</{}>", self.app_name)
    }

    /// Save the current state of the tree to a single file.
    ///
    /// In `CombineForks` mode, call [`select_combination`](Self::select_combination)
    /// first; the file holds whichever alternatives are selected.
    pub fn save(&mut self, path: &Utf8Path, mode: SaveMode) -> Result<(), GeneratorError> {
        let io_error = |source| GeneratorError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::create(path).map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer, mode, "").map_err(io_error)?;
        writer.flush().map_err(io_error)?;

        self.file_name = Some(path.to_path_buf());
        tracing::debug!("Saved experiment to {}", path);
        Ok(())
    }

    /// Save the experiment into `out_dir` according to `mode`.
    ///
    /// `SaveForks` writes one file named after the experiment. `CombineForks`
    /// writes one file per combination, named after the combination, and
    /// stops at the first write failure leaving earlier files in place.
    ///
    /// # Returns
    /// The written paths, in combination order
    pub fn save_all(
        &mut self,
        out_dir: &Utf8Path,
        mode: SaveMode,
        extension: &str,
    ) -> Result<Vec<Utf8PathBuf>, GeneratorError> {
        fs::create_dir_all(out_dir).map_err(|source| GeneratorError::Io {
            path: out_dir.to_path_buf(),
            source,
        })?;

        if mode == SaveMode::SaveForks {
            let path = out_dir.join(format!("{}{}", sanitize_file_stem(&self.name), extension));
            self.save(&path, mode)?;
            tracing::info!("Saved {} with forks to {}", self.name, path);
            return Ok(vec![path]);
        }

        let total = self.total_combinations()?;
        let mut used_stems = HashSet::new();
        let mut written = Vec::new();

        for index in 0..total {
            let combination_name = self.select_combination(index)?;
            let mut stem = sanitize_file_stem(&combination_name);
            while !used_stems.insert(stem.clone()) {
                stem = format!("{}-{}", stem, index);
            }

            let path = out_dir.join(format!("{}{}", stem, extension));
            self.save(&path, mode)?;
            written.push(path);
        }

        tracing::info!("Saved {} combinations of {} to {}", total, self.name, out_dir);
        Ok(written)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn exe_file(&self) -> Option<&str> {
        self.exe_file.as_deref()
    }

    pub fn prerequisites(&self) -> &[String] {
        &self.prerequisites
    }

    pub fn children(&self) -> &[ConfigNode] {
        &self.children
    }

    /// File this experiment was last loaded from or saved to.
    pub fn file_name(&self) -> Option<&Utf8Path> {
        self.file_name.as_deref()
    }

    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DefinitionRegistry {
        &mut self.registry
    }
}

/// Replace characters that are unsafe in file names.
pub fn sanitize_file_stem(name: &str) -> String {
    let cleaned = UNSAFE_NAME_CHARS.replace_all(name.trim(), "_");
    if cleaned.is_empty() {
        "experiment".to_string()
    } else {
        cleaned.into_owned()
    }
}

/// Build the node declared by `definition`, reading its value from `parent`.
///
/// A `<Fork Name="..">` under `parent` turns the node into a fork whose
/// alternatives are read from the fork's `<Value>` wrappers.
fn build_node(
    registry: &mut DefinitionRegistry,
    definition: &NodeDefinition,
    parent: Option<roxmltree::Node<'_, '_>>,
    depth: usize,
) -> ConfigNode {
    let name = definition.name.as_str();

    let fork = parent.and_then(|parent| {
        element_children(parent)
            .find(|child| child.has_tag_name(FORK_TAG) && child.attribute("Name") == Some(name))
    });
    if let Some(fork) = fork {
        let mut alternatives = Vec::new();
        for value in element_children(fork).filter(|child| child.has_tag_name(FORK_VALUE_TAG)) {
            let element = element_children(value).find(|child| child.has_tag_name(name));
            alternatives.push(ForkValue {
                name: value.attribute("Name").map(str::to_string),
                node: build_plain(registry, definition, element, depth),
            });
        }
        tracing::debug!("Fork {} has {} alternatives", name, alternatives.len());
        return ConfigNode::fork(name, alternatives);
    }

    let element =
        parent.and_then(|parent| element_children(parent).find(|child| child.has_tag_name(name)));
    build_plain(registry, definition, element, depth)
}

fn build_plain(
    registry: &mut DefinitionRegistry,
    definition: &NodeDefinition,
    element: Option<roxmltree::Node<'_, '_>>,
    depth: usize,
) -> ConfigNode {
    let configured = element.map(element_text);

    match &definition.kind {
        DefinitionKind::Value { kind, default } => ConfigNode::value(
            *kind,
            &definition.name,
            configured.unwrap_or_else(|| default.clone()),
        ),
        DefinitionKind::Enum { enum_name, default } => {
            let choices = ChoiceSlot::new();
            let slot = choices.clone();
            let lookup = enum_name.clone();
            registry.register_deferred_step(Box::new(move |registry| {
                if let Some(values) = registry.get_enumerated_type(&lookup) {
                    slot.set(values.to_vec());
                }
            }));

            ConfigNode::Enum(EnumNode {
                name: definition.name.clone(),
                enum_name: enum_name.clone(),
                value: configured.or_else(|| default.clone()),
                choices,
            })
        }
        DefinitionKind::AuxRef { category, default } => {
            let choices = ChoiceSlot::new();
            if let Some(values) = registry.aux_values(category) {
                choices.set(values.to_vec());
            }
            let slot = choices.clone();
            let lookup = category.clone();
            registry.register_forward_reference(Box::new(move |registry| {
                if let Some(values) = registry.get_aux_definition(&lookup) {
                    slot.set(values.to_vec());
                }
            }));

            ConfigNode::AuxRef(AuxRefNode {
                name: definition.name.clone(),
                category: category.clone(),
                value: configured.or_else(|| default.clone()),
                choices,
            })
        }
        DefinitionKind::Branch { class, members } => {
            if depth >= MAX_NESTING_DEPTH {
                tracing::warn!(
                    "Branch {} nested deeper than {} levels, leaving it empty",
                    definition.name,
                    MAX_NESTING_DEPTH
                );
                return ConfigNode::branch(&definition.name, Vec::new());
            }

            let mut declared = Vec::new();
            if let Some(class) = class {
                if let Some(class_definition) = registry.get_class_definition(class) {
                    declared.extend(class_definition.members.iter().cloned());
                }
            }
            declared.extend(members.iter().cloned());

            let children = declared
                .iter()
                .map(|member| build_node(registry, member, element, depth + 1))
                .collect();
            ConfigNode::branch(&definition.name, children)
        }
    }
}
