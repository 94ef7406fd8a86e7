//! Shared helpers for reading the XML documents the crate consumes.
//!
//! Every document (app definitions, included definitions, aux definitions,
//! config values, batch descriptors) goes through [`read_document`] so that
//! "file absent" and "file corrupt" are reported as distinct [`DocumentError`]
//! variants instead of one opaque failure.

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::fs;
use std::io;
use std::sync::LazyLock;
use thiserror::Error;

static ELEMENT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9._-]*$").expect("Invalid element name regex")
});

/// Structural failure while reading a document from disk.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Document not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: Utf8PathBuf, message: String },
}

impl DocumentError {
    /// True if the document simply did not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocumentError::NotFound(_))
    }

    pub(crate) fn parse(path: &Utf8Path, message: impl Into<String>) -> Self {
        DocumentError::Parse {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Read a document's text, mapping a missing file to [`DocumentError::NotFound`].
pub fn read_document(path: &Utf8Path) -> Result<String, DocumentError> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            DocumentError::NotFound(path.to_path_buf())
        } else {
            DocumentError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

/// Parse previously read text into a DOM borrowing from it.
pub fn parse_document<'a>(
    path: &Utf8Path,
    text: &'a str,
) -> Result<roxmltree::Document<'a>, DocumentError> {
    roxmltree::Document::parse(text).map_err(|e| DocumentError::parse(path, e.to_string()))
}

/// Element children of a node, skipping text, comments and processing instructions.
pub fn element_children<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children().filter(|child| child.is_element())
}

/// Trimmed text content of an element, or an empty string.
pub fn element_text(node: roxmltree::Node<'_, '_>) -> String {
    node.text().map(str::trim).unwrap_or_default().to_string()
}

/// Whether `name` can be written verbatim as an element tag.
pub fn is_valid_element_name(name: &str) -> bool {
    ELEMENT_NAME.is_match(name)
}

/// Escape a string for use in XML text or a double-quoted attribute.
pub fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Resolve a path declared inside a document against that document's directory.
pub fn resolve_relative(document: &Utf8Path, declared: &str) -> Utf8PathBuf {
    let declared = Utf8Path::new(declared);
    if declared.is_absolute() {
        return declared.to_path_buf();
    }
    match document.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir.join(declared),
        _ => declared.to_path_buf(),
    }
}
