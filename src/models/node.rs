//! Configuration tree nodes.
//!
//! A tree is described twice:
//! - [`NodeDefinition`]: the owned schema parsed out of an app-definition or
//!   class-definition element. References to classes, enumerations and aux
//!   categories are still plain names at this point.
//! - [`ConfigNode`]: the built node carrying a concrete value (or several, for
//!   a [`ForkNode`]). Enumerations and aux categories are filled into a
//!   [`ChoiceSlot`] once the registry resolves them.
//!
//! The combinatorial walk only needs three capabilities from a node:
//! [`validate`](ConfigNode::validate), [`cardinality`](ConfigNode::cardinality)
//! and [`select`](ConfigNode::select) followed by
//! [`write_xml`](ConfigNode::write_xml).

use crate::services::document::{element_children, escape_xml, is_valid_element_name};
use std::io::{self, Write};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Tag of a fork element in config-values and SaveForks documents
pub const FORK_TAG: &str = "Fork";
/// Tag wrapping each alternative of a fork
pub const FORK_VALUE_TAG: &str = "Value";

/// How an experiment is written out.
///
/// - `SaveForks`: one document keeping every fork alternative
/// - `CombineForks`: one document per combination, forks reduced to the selected alternative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    CombineForks,
    #[default]
    SaveForks,
}

/// Type of a leaf value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Integer,
    Double,
    Bool,
    String,
    FilePath,
}

impl ValueKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Integer" => Some(ValueKind::Integer),
            "Double" => Some(ValueKind::Double),
            "Bool" => Some(ValueKind::Bool),
            "String" => Some(ValueKind::String),
            "FilePath" => Some(ValueKind::FilePath),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            ValueKind::Integer => "Integer",
            ValueKind::Double => "Double",
            ValueKind::Bool => "Bool",
            ValueKind::String => "String",
            ValueKind::FilePath => "FilePath",
        }
    }

    /// Whether `value` is a well-formed literal of this kind.
    pub fn accepts(self, value: &str) -> bool {
        let value = value.trim();
        match self {
            ValueKind::Integer => value.parse::<i64>().is_ok(),
            ValueKind::Double => value.parse::<f64>().is_ok(),
            ValueKind::Bool => matches!(value, "true" | "false"),
            ValueKind::String => true,
            ValueKind::FilePath => !value.is_empty(),
        }
    }
}

/// Parsed schema of one node, before any reference is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDefinition {
    pub name: String,
    pub kind: DefinitionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionKind {
    Value {
        kind: ValueKind,
        default: String,
    },
    Enum {
        enum_name: String,
        default: Option<String>,
    },
    AuxRef {
        category: String,
        default: Option<String>,
    },
    Branch {
        class: Option<String>,
        members: Vec<NodeDefinition>,
    },
}

impl NodeDefinition {
    /// Parse a definition element.
    ///
    /// Returns `None` for elements that are not node declarations, and for
    /// declarations missing their `Name` attribute (logged).
    pub fn from_element(element: roxmltree::Node<'_, '_>) -> Option<Self> {
        let tag = element.tag_name().name();
        let kind = if let Some(value_kind) = ValueKind::from_tag(tag) {
            DefinitionKind::Value {
                kind: value_kind,
                default: element.attribute("Default").unwrap_or_default().to_string(),
            }
        } else {
            match tag {
                "Enum" => DefinitionKind::Enum {
                    enum_name: element.attribute("Class").unwrap_or_default().to_string(),
                    default: element.attribute("Default").map(str::to_string),
                },
                "AuxRef" => DefinitionKind::AuxRef {
                    category: element.attribute("Category").unwrap_or_default().to_string(),
                    default: element.attribute("Default").map(str::to_string),
                },
                "Branch" => DefinitionKind::Branch {
                    class: element.attribute("Class").map(str::to_string),
                    members: Self::members_of(element),
                },
                _ => return None,
            }
        };

        let Some(name) = element.attribute("Name") else {
            tracing::warn!("Ignoring <{}> declaration without a Name attribute", tag);
            return None;
        };
        if !is_valid_element_name(name) {
            tracing::warn!("Ignoring <{}> declaration with invalid name {:?}", tag, name);
            return None;
        }

        Some(Self {
            name: name.to_string(),
            kind,
        })
    }

    /// Node declarations nested directly under an element, in document order.
    pub fn members_of(element: roxmltree::Node<'_, '_>) -> Vec<NodeDefinition> {
        element_children(element)
            .filter_map(NodeDefinition::from_element)
            .collect()
    }
}

/// Resolved list of admissible values, shared between a node and the
/// registry callback that fills it in.
#[derive(Debug, Clone, Default)]
pub struct ChoiceSlot(Arc<RwLock<Option<Vec<String>>>>);

impl ChoiceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, values: Vec<String>) {
        *self.write() = Some(values);
    }

    pub fn get(&self) -> Option<Vec<String>> {
        self.read().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.read().is_some()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.read()
            .as_ref()
            .is_some_and(|values| values.iter().any(|v| v == value))
    }

    pub fn first(&self) -> Option<String> {
        self.read().as_ref().and_then(|values| values.first().cloned())
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Vec<String>>> {
        self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Vec<String>>> {
        self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A node of the experiment configuration tree.
#[derive(Debug, Clone)]
pub enum ConfigNode {
    Value(ValueNode),
    Enum(EnumNode),
    AuxRef(AuxRefNode),
    Branch(BranchNode),
    Fork(ForkNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueNode {
    pub name: String,
    pub kind: ValueKind,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct EnumNode {
    pub name: String,
    pub enum_name: String,
    pub value: Option<String>,
    pub choices: ChoiceSlot,
}

#[derive(Debug, Clone)]
pub struct AuxRefNode {
    pub name: String,
    pub category: String,
    pub value: Option<String>,
    pub choices: ChoiceSlot,
}

#[derive(Debug, Clone)]
pub struct BranchNode {
    pub name: String,
    pub children: Vec<ConfigNode>,
}

/// One candidate of a fork.
#[derive(Debug, Clone)]
pub struct ForkValue {
    pub name: Option<String>,
    pub node: ConfigNode,
}

/// A parameter carrying several candidate alternatives.
#[derive(Debug, Clone)]
pub struct ForkNode {
    pub name: String,
    pub alternatives: Vec<ForkValue>,
    selected: usize,
}

impl ForkNode {
    pub fn new(name: impl Into<String>, alternatives: Vec<ForkValue>) -> Self {
        Self {
            name: name.into(),
            alternatives,
            selected: 0,
        }
    }

    /// Position of the alternative picked by the last selection.
    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn selected_alternative(&self) -> Option<&ForkValue> {
        self.alternatives.get(self.selected)
    }
}

impl ForkValue {
    pub fn new(node: ConfigNode) -> Self {
        Self { name: None, node }
    }

    pub fn named(name: impl Into<String>, node: ConfigNode) -> Self {
        Self {
            name: Some(name.into()),
            node,
        }
    }

    /// Token appended to a combination name when this alternative is selected.
    pub fn token(&self, position: usize) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.node {
            ConfigNode::Branch(_) | ConfigNode::Fork(_) => format!("Value-{}", position),
            leaf => leaf.rendered_value().unwrap_or_default(),
        }
    }
}

impl ConfigNode {
    pub fn value(kind: ValueKind, name: impl Into<String>, value: impl Into<String>) -> Self {
        ConfigNode::Value(ValueNode {
            name: name.into(),
            kind,
            value: value.into(),
        })
    }

    pub fn branch(name: impl Into<String>, children: Vec<ConfigNode>) -> Self {
        ConfigNode::Branch(BranchNode {
            name: name.into(),
            children,
        })
    }

    pub fn fork(name: impl Into<String>, alternatives: Vec<ForkValue>) -> Self {
        ConfigNode::Fork(ForkNode::new(name, alternatives))
    }

    pub fn name(&self) -> &str {
        match self {
            ConfigNode::Value(node) => &node.name,
            ConfigNode::Enum(node) => &node.name,
            ConfigNode::AuxRef(node) => &node.name,
            ConfigNode::Branch(node) => &node.name,
            ConfigNode::Fork(node) => &node.name,
        }
    }

    /// Textual value of a leaf; `None` for branches and forks.
    ///
    /// Enum and aux leaves without an explicit value fall back to the first
    /// resolved choice.
    pub fn rendered_value(&self) -> Option<String> {
        match self {
            ConfigNode::Value(node) => Some(node.value.clone()),
            ConfigNode::Enum(node) => Some(
                node.value
                    .clone()
                    .or_else(|| node.choices.first())
                    .unwrap_or_default(),
            ),
            ConfigNode::AuxRef(node) => Some(
                node.value
                    .clone()
                    .or_else(|| node.choices.first())
                    .unwrap_or_default(),
            ),
            ConfigNode::Branch(_) | ConfigNode::Fork(_) => None,
        }
    }

    pub fn validate(&self) -> bool {
        match self {
            ConfigNode::Value(node) => node.kind.accepts(&node.value),
            ConfigNode::Enum(EnumNode { choices, .. })
            | ConfigNode::AuxRef(AuxRefNode { choices, .. }) => self
                .rendered_value()
                .is_some_and(|value| choices.contains(&value)),
            ConfigNode::Branch(node) => node.children.iter().all(ConfigNode::validate),
            ConfigNode::Fork(node) => {
                !node.alternatives.is_empty()
                    && node.alternatives.iter().all(|alt| alt.node.validate())
            }
        }
    }

    /// Number of combinations this subtree contributes, `None` on overflow.
    ///
    /// Unforked leaves count 1, branches multiply their children, forks add
    /// up their alternatives. An empty fork still counts 1 so the product
    /// never collapses to zero.
    pub fn cardinality(&self) -> Option<u64> {
        match self {
            ConfigNode::Value(_) | ConfigNode::Enum(_) | ConfigNode::AuxRef(_) => Some(1),
            ConfigNode::Branch(node) => product_of(&node.children),
            ConfigNode::Fork(node) => {
                let mut total: u64 = 0;
                for alt in &node.alternatives {
                    total = total.checked_add(alt.node.cardinality()?)?;
                }
                Some(total.max(1))
            }
        }
    }

    /// Resolve this subtree to the combination `local` in `[0, cardinality)`,
    /// appending selected fork tokens to `combination_name`.
    pub fn select(&mut self, local: u64, combination_name: &mut String) {
        match self {
            ConfigNode::Value(_) | ConfigNode::Enum(_) | ConfigNode::AuxRef(_) => {}
            ConfigNode::Branch(node) => select_in(&mut node.children, local, combination_name),
            ConfigNode::Fork(node) => {
                let mut remaining = local;
                for (position, alt) in node.alternatives.iter_mut().enumerate() {
                    let count = alt.node.cardinality().unwrap_or(u64::MAX);
                    if remaining < count {
                        node.selected = position;
                        combination_name.push('-');
                        combination_name.push_str(&alt.token(position));
                        alt.node.select(remaining, combination_name);
                        return;
                    }
                    remaining -= count;
                }
            }
        }
    }

    /// Serialize this subtree, one element per line, indented by `indent`.
    pub fn write_xml(&self, out: &mut dyn Write, mode: SaveMode, indent: &str) -> io::Result<()> {
        match self {
            ConfigNode::Value(_) | ConfigNode::Enum(_) | ConfigNode::AuxRef(_) => {
                let value = self.rendered_value().unwrap_or_default();
                writeln!(
                    out,
                    "{indent}<{name}>{value}</{name}>",
                    name = self.name(),
                    value = escape_xml(&value)
                )
            }
            ConfigNode::Branch(node) => {
                writeln!(out, "{indent}<{}>", node.name)?;
                let inner = format!("{indent}  ");
                for child in &node.children {
                    child.write_xml(out, mode, &inner)?;
                }
                writeln!(out, "{indent}</{}>", node.name)
            }
            ConfigNode::Fork(node) => match mode {
                SaveMode::CombineForks => match node.selected_alternative() {
                    Some(alt) => alt.node.write_xml(out, mode, indent),
                    None => Ok(()),
                },
                SaveMode::SaveForks => {
                    writeln!(
                        out,
                        "{indent}<{FORK_TAG} Name=\"{}\">",
                        escape_xml(&node.name)
                    )?;
                    let value_indent = format!("{indent}  ");
                    let inner = format!("{indent}    ");
                    for (position, alt) in node.alternatives.iter().enumerate() {
                        writeln!(
                            out,
                            "{value_indent}<{FORK_VALUE_TAG} Name=\"{}\">",
                            escape_xml(&alt.token(position))
                        )?;
                        alt.node.write_xml(out, mode, &inner)?;
                        writeln!(out, "{value_indent}</{FORK_VALUE_TAG}>")?;
                    }
                    writeln!(out, "{indent}</{FORK_TAG}>")
                }
            },
        }
    }
}

/// Product of the children's cardinalities, `None` on overflow.
pub fn product_of(children: &[ConfigNode]) -> Option<u64> {
    let mut total: u64 = 1;
    for child in children {
        total = total.checked_mul(child.cardinality()?)?;
    }
    Some(total)
}

/// Mixed-radix walk: the first child is the fastest-varying digit.
pub fn select_in(children: &mut [ConfigNode], index: u64, combination_name: &mut String) {
    let mut index = index;
    for child in children.iter_mut() {
        let count = child.cardinality().unwrap_or(1).max(1);
        child.select(index % count, combination_name);
        index /= count;
    }
}
