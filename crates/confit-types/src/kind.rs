//! Property kinds and declared types.

use std::fmt;

use crate::SchemaId;

/// How one property stores and serializes its value.
///
/// The kind is computed once at descriptor build time from the declared
/// type and the codec hints; it never changes afterwards.
///
/// One deliberate asymmetry is preserved from the source system and
/// enforced by item validation: a mandatory `Array` property counts as
/// set as soon as it was explicitly assigned, even to an empty array,
/// while mandatory `List` and `Map` properties count as set only when
/// they hold at least one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum PropertyKind {
    /// Scalar value translated by a named value codec; attribute form.
    Plain,
    /// Structured value translated by a value binding; subtree form
    /// unless the binding offers a flat rendering.
    Complex,
    /// Nested configuration item.
    Item,
    /// Ordered homogeneous collection; may carry a scalar codec for an
    /// attribute encoding (e.g. comma-separated).
    Array,
    /// Ordered homogeneous collection of entries, element form only.
    List,
    /// Keyed homogeneous collection; entry order carries no meaning.
    Map,
    /// Computed from the owning item by a registered algorithm; no
    /// storage, not settable.
    Derived,
    /// Alias for the enclosing container item; no storage, not settable,
    /// never serialized.
    Ref,
}

impl PropertyKind {
    /// Whether values of this kind hold multiple entries.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(self, Self::Array | Self::List | Self::Map)
    }

    /// Whether entry order is significant.
    #[must_use]
    pub const fn is_ordered(self) -> bool {
        matches!(self, Self::Array | Self::List)
    }

    /// Whether the property owns storage in the item's value map.
    #[must_use]
    pub const fn has_storage(self) -> bool {
        !matches!(self, Self::Derived | Self::Ref)
    }

    /// Lowercase kind name used in diagnostics and documents.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Complex => "complex",
            Self::Item => "item",
            Self::Array => "array",
            Self::List => "list",
            Self::Map => "map",
            Self::Derived => "derived",
            Self::Ref => "ref",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The type a property was declared with in its schema definition.
///
/// Declared types drive kind inference: named types resolve to scalar
/// codecs, schema references become nested items, and the three
/// collection shapes become the three collection kinds. Nested
/// collection shapes (`List` of `List`) are not supported and are
/// rejected at build time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeclaredType {
    /// A named scalar type, resolved against the codec registry
    /// (`"int"`, `"string"`, …).
    Named(String),
    /// A reference to another configuration schema.
    Schema(SchemaId),
    /// Ordered collection, list storage.
    List(Box<DeclaredType>),
    /// Ordered collection, array storage.
    Array(Box<DeclaredType>),
    /// Keyed collection; the key is supplied by the element schema's
    /// key property.
    Map(Box<DeclaredType>),
}

impl DeclaredType {
    /// Shorthand for a named scalar type.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Shorthand for a schema reference.
    pub fn schema(id: impl Into<SchemaId>) -> Self {
        Self::Schema(id.into())
    }

    /// Shorthand for a list of the given element type.
    #[must_use]
    pub fn list_of(element: Self) -> Self {
        Self::List(Box::new(element))
    }

    /// Shorthand for an array of the given element type.
    #[must_use]
    pub fn array_of(element: Self) -> Self {
        Self::Array(Box::new(element))
    }

    /// Shorthand for a map of the given element type.
    #[must_use]
    pub fn map_of(element: Self) -> Self {
        Self::Map(Box::new(element))
    }

    /// The element type of a collection shape, if this is one.
    #[must_use]
    pub fn element(&self) -> Option<&Self> {
        match self {
            Self::List(el) | Self::Array(el) | Self::Map(el) => Some(el),
            Self::Named(_) | Self::Schema(_) => None,
        }
    }

    /// Whether this is one of the three collection shapes.
    #[must_use]
    pub const fn is_collection(&self) -> bool {
        matches!(self, Self::List(_) | Self::Array(_) | Self::Map(_))
    }

    /// The schema id if this type refers to a schema directly.
    #[must_use]
    pub fn as_schema(&self) -> Option<&SchemaId> {
        match self {
            Self::Schema(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::Schema(id) => write!(f, "schema:{id}"),
            Self::List(el) => write!(f, "list<{el}>"),
            Self::Array(el) => write!(f, "array<{el}>"),
            Self::Map(el) => write!(f, "map<{el}>"),
        }
    }
}
