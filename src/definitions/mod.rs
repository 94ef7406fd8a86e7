// Definition registry module
//
// Holds the named definition sets one generator session resolves against:
// class definitions, enumerations and auxiliary per-category value lists,
// plus the deferred-step queue and the forward-reference listeners.

use crate::models::NodeDefinition;
use crate::services::document::{
    DocumentError, element_children, element_text, parse_document, read_document,
};
use camino::Utf8Path;
use indexmap::IndexMap;
use std::fmt;

/// Root tag of an included definitions document
pub const DEFINITIONS_TAG: &str = "Definitions";
pub const CLASS_DEFINITION_TAG: &str = "ClassDef";
pub const ENUM_DEFINITION_TAG: &str = "EnumDef";

/// One-shot step run after every definition source of a load is in.
pub type DeferredStep = Box<dyn FnOnce(&DefinitionRegistry) + Send>;

/// Callback re-run every time aux definitions are (re)loaded.
pub type ForwardReference = Box<dyn FnMut(&DefinitionRegistry) + Send>;

/// A named group of node declarations that a `Branch` can expand.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDefinition {
    pub name: String,
    pub members: Vec<NodeDefinition>,
}

/// Per-session registry of definitions.
///
/// Never process-global: each [`ExperimentGenerator`](crate::services::ExperimentGenerator)
/// owns its own, so several configurations can be loaded side by side.
///
/// # Resolution order
///
/// 1. Definitions are added (included files, enumerations, aux documents)
/// 2. Nodes register [`DeferredStep`]s and [`ForwardReference`]s naming what they need
/// 3. [`run_deferred_steps`](Self::run_deferred_steps) runs every queued step once
/// 4. Each [`load_aux_definitions`](Self::load_aux_definitions) re-notifies the listeners
#[derive(Default)]
pub struct DefinitionRegistry {
    classes: IndexMap<String, ClassDefinition>,
    enums: IndexMap<String, Vec<String>>,
    aux: IndexMap<String, Vec<String>>,
    deferred: Vec<DeferredStep>,
    listeners: Vec<ForwardReference>,
}

impl fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionRegistry")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .field("enums", &self.enums)
            .field("aux", &self.aux)
            .field("deferred", &self.deferred.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Classes ---

    pub fn add_class_definition(&mut self, definition: ClassDefinition) {
        if self.classes.contains_key(&definition.name) {
            tracing::warn!("Class {} redefined, keeping the latest", definition.name);
        }
        self.classes.insert(definition.name.clone(), definition);
    }

    /// Look up a class definition; undefined classes are logged and yield `None`.
    pub fn get_class_definition(&self, class_name: &str) -> Option<&ClassDefinition> {
        let definition = self.classes.get(class_name);
        if definition.is_none() {
            tracing::warn!("Undefined class: {}", class_name);
        }
        definition
    }

    // --- Enumerations ---

    /// Record an enumeration's ordered values.
    pub fn add_enumerated_type(&mut self, enum_name: impl Into<String>, values: Vec<String>) {
        let enum_name = enum_name.into();
        if self.enums.contains_key(&enum_name) {
            tracing::warn!("Enumerated type {} redefined, keeping the latest", enum_name);
        }
        self.enums.insert(enum_name, values);
    }

    /// Look up an enumeration; undefined enumerations are logged and yield `None`.
    pub fn get_enumerated_type(&self, enum_name: &str) -> Option<&[String]> {
        let values = self.enums.get(enum_name).map(Vec::as_slice);
        if values.is_none() {
            tracing::warn!("Undefined enumerated type: {}", enum_name);
        }
        values
    }

    // --- Aux definitions ---

    /// Load an aux definitions document and notify forward references.
    ///
    /// Every element child of the root is a category; its values are the
    /// texts of the `Name` elements under its `Variable` children. A loaded
    /// category replaces any previous list of the same name.
    ///
    /// # Returns
    /// The number of categories loaded
    pub fn load_aux_definitions(&mut self, path: &Utf8Path) -> Result<usize, DocumentError> {
        let text = read_document(path)?;
        let doc = parse_document(path, &text)?;

        let mut loaded = 0;
        for category in element_children(doc.root_element()) {
            let values: Vec<String> = element_children(category)
                .filter(|child| child.has_tag_name("Variable"))
                .flat_map(element_children)
                .filter(|child| child.has_tag_name("Name"))
                .map(element_text)
                .collect();

            tracing::debug!(
                "Aux category {} defines {} values",
                category.tag_name().name(),
                values.len()
            );
            self.aux.insert(category.tag_name().name().to_string(), values);
            loaded += 1;
        }

        tracing::info!("Loaded {} aux categories from {}", loaded, path);
        self.notify_forward_references();
        Ok(loaded)
    }

    /// Look up an aux category; a never-loaded category is an undefined reference.
    pub fn get_aux_definition(&self, category: &str) -> Option<&[String]> {
        let values = self.aux_values(category);
        if values.is_none() {
            tracing::warn!("Undefined reference to aux category: {}", category);
        }
        values
    }

    /// Lookup without the undefined-reference warning, for seeding nodes before any aux load.
    pub fn aux_values(&self, category: &str) -> Option<&[String]> {
        self.aux.get(category).map(Vec::as_slice)
    }

    // --- Forward references ---

    pub fn register_forward_reference(&mut self, listener: ForwardReference) {
        self.listeners.push(listener);
    }

    /// Invoke every listener synchronously, in registration order.
    pub fn notify_forward_references(&mut self) {
        let mut listeners = std::mem::take(&mut self.listeners);
        for listener in listeners.iter_mut() {
            listener(&*self);
        }
        self.listeners = listeners;
    }

    pub fn forward_reference_count(&self) -> usize {
        self.listeners.len()
    }

    // --- Deferred steps ---

    pub fn register_deferred_step(&mut self, step: DeferredStep) {
        self.deferred.push(step);
    }

    /// Run every queued step exactly once, in registration order, and empty the queue.
    ///
    /// # Returns
    /// The number of steps run
    pub fn run_deferred_steps(&mut self) -> usize {
        let steps = std::mem::take(&mut self.deferred);
        let count = steps.len();
        for step in steps {
            step(&*self);
        }
        if count > 0 {
            tracing::debug!("Ran {} deferred load steps", count);
        }
        count
    }

    pub fn pending_deferred_steps(&self) -> usize {
        self.deferred.len()
    }

    // --- Included definition files ---

    /// Merge an included definitions document.
    ///
    /// `ClassDef` children become class definitions, `EnumDef` children
    /// become enumerations (one value per element child, in order). Children
    /// without a `Name` attribute are skipped.
    pub fn load_included_definitions(&mut self, path: &Utf8Path) -> Result<(), DocumentError> {
        let text = read_document(path)?;
        let doc = parse_document(path, &text)?;
        let root = doc.root_element();

        if !root.has_tag_name(DEFINITIONS_TAG) {
            tracing::warn!(
                "{} has root <{}>, expected <{}>; nothing included",
                path,
                root.tag_name().name(),
                DEFINITIONS_TAG
            );
            return Ok(());
        }

        for definition in element_children(root) {
            let Some(name) = definition.attribute("Name") else {
                tracing::warn!(
                    "Skipping <{}> without a Name attribute in {}",
                    definition.tag_name().name(),
                    path
                );
                continue;
            };

            match definition.tag_name().name() {
                CLASS_DEFINITION_TAG => self.add_class_definition(ClassDefinition {
                    name: name.to_string(),
                    members: NodeDefinition::members_of(definition),
                }),
                ENUM_DEFINITION_TAG => {
                    let values = element_children(definition).map(element_text).collect();
                    self.add_enumerated_type(name, values);
                }
                other => tracing::debug!("Ignoring <{}> in {}", other, path),
            }
        }

        tracing::info!(
            "Included {}: {} classes, {} enumerations known",
            path,
            self.classes.len(),
            self.enums.len()
        );
        Ok(())
    }
}
