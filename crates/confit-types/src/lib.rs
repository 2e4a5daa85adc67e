//! Shared identifier, kind and scalar value types for the confit
//! configuration engine.
//!
//! This crate is the dependency-free leaf of the workspace: everything here
//! is `Send + Sync` and carries no reference to descriptors or live items.
//! The full runtime value type (which can embed nested configuration items)
//! lives in `confit-core`.

pub mod default_spec;
pub mod kind;
pub mod value;

pub use default_spec::{DefaultSpec, ItemTemplateSpec};
pub use kind::{DeclaredType, PropertyKind};
pub use value::{ComplexPayload, ComplexValue, EntryKey, InvalidEntryKey, ScalarValue};

use std::fmt;
use std::sync::Arc;

/// Identity of one configuration schema (a "configuration interface").
///
/// Schema ids are dot-separated names chosen by the schema author, e.g.
/// `widget` or `app.layout.column`. Identity is the full string; comparison
/// is case-sensitive. Cloning is cheap (shared buffer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(Arc<str>);

impl SchemaId {
    /// Identifier of the synthetic base schema every schema ultimately
    /// extends. It declares no properties and exists so that inheritance
    /// always shares a common root.
    pub const BASE_NAME: &'static str = "item";

    /// Create a schema id from its name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The synthetic base schema id.
    #[must_use]
    pub fn base() -> Self {
        Self::new(Self::BASE_NAME)
    }

    /// Whether this is the synthetic base schema.
    #[must_use]
    pub fn is_base(&self) -> bool {
        &*self.0 == Self::BASE_NAME
    }

    /// The schema name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SchemaId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for SchemaId {
    fn from(name: String) -> Self {
        Self(Arc::from(name.into_boxed_str()))
    }
}

impl serde::Serialize for SchemaId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Dense index of one property within its descriptor.
///
/// Property ids are the stable value-map keys of the instance runtime:
/// assigned in merge order when a descriptor is built and never reused.
/// They are only meaningful relative to one descriptor; properties of
/// different descriptors are matched by name, not by id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize,
)]
#[repr(transparent)]
pub struct PropertyId(u32);

impl PropertyId {
    /// Create a property id from its table index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The table index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Derive the conventional external (document) name from an internal
/// property name: camel-case boundaries and underscores become hyphens,
/// everything is lowercased. `maxRetryCount` and `max_retry_count` both
/// map to `max-retry-count`.
#[must_use]
pub fn external_name_of(internal: &str) -> String {
    let mut out = String::with_capacity(internal.len() + 4);
    let mut prev_lower = false;
    for ch in internal.chars() {
        if ch == '_' || ch == '-' {
            if !out.ends_with('-') {
                out.push('-');
            }
            prev_lower = false;
        } else if ch.is_ascii_uppercase() {
            if prev_lower && !out.ends_with('-') {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_id_identity() {
        let a = SchemaId::new("app.widget");
        let b = SchemaId::from("app.widget");
        let c = SchemaId::new("app.Widget");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "app.widget");
    }

    #[test]
    fn test_schema_id_base() {
        assert!(SchemaId::base().is_base());
        assert!(!SchemaId::new("pair").is_base());
        assert_eq!(SchemaId::base().as_str(), "item");
    }

    #[test]
    fn test_property_id_roundtrip() {
        let id = PropertyId::new(7);
        assert_eq!(id.index(), 7);
        assert_eq!(id.to_string(), "#7");
    }

    #[test]
    fn test_external_name_camel_case() {
        assert_eq!(external_name_of("maxRetryCount"), "max-retry-count");
        assert_eq!(external_name_of("name"), "name");
        assert_eq!(external_name_of("URLPrefix"), "urlprefix");
        assert_eq!(external_name_of("enabled2Fa"), "enabled2-fa");
    }

    #[test]
    fn test_external_name_underscores() {
        assert_eq!(external_name_of("max_retry_count"), "max-retry-count");
        assert_eq!(external_name_of("already-hyphenated"), "already-hyphenated");
        assert_eq!(external_name_of("mixed_styleName"), "mixed-style-name");
    }
}
