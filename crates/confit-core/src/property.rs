//! Frozen property metadata.
//!
//! A [`Property`] is immutable after the build: the descriptor builder
//! assembles all fields (including the resolved default initializer) and
//! nothing mutates them afterwards. Items consult properties for every
//! read and write.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use confit_codec::{ValueBinding, ValueCodec};
use confit_error::Result;
use confit_types::{ComplexValue, DeclaredType, PropertyId, PropertyKind, ScalarValue, SchemaId};

use crate::descriptor::Descriptor;
use crate::item::Item;
use crate::value::ConfigValue;

/// Algorithm of a derived property.
///
/// The closure itself is shared and thread-safe; the items it is applied
/// to are not, so evaluation stays on the owning thread.
pub type DerivedFn = Arc<dyn Fn(&Item) -> Result<ConfigValue> + Send + Sync>;

/// A default value resolved at build time and shared by all items.
///
/// Only immutable shapes qualify; anything that would hand out mutable
/// structure is re-evaluated per instance instead.
#[derive(Debug, Clone)]
pub(crate) enum SharedValue {
    Scalar(ScalarValue),
    Complex(ComplexValue),
}

impl SharedValue {
    pub(crate) fn to_value(&self) -> ConfigValue {
        match self {
            Self::Scalar(s) => ConfigValue::Scalar(s.clone()),
            Self::Complex(c) => ConfigValue::Complex(c.clone()),
        }
    }
}

/// A default that is re-evaluated on every read of an unset slot.
#[derive(Clone)]
pub(crate) enum PerInstanceInit {
    /// A fresh generic instance of the schema, built with its own
    /// defaults.
    Instance(Arc<Descriptor>),
    /// A fresh instance with template assignments applied on top.
    Template(Arc<Descriptor>, Vec<(String, ResolvedDefault)>),
    /// A fresh list built from element defaults.
    List(Vec<ResolvedDefault>),
}

/// One element of a resolved compound default.
#[derive(Clone)]
pub(crate) enum ResolvedDefault {
    Shared(SharedValue),
    Per(PerInstanceInit),
}

/// How an unset slot reads.
///
/// `None` means the kind default applies: null for item and complex
/// kinds, the empty collection for collection kinds, and a read error
/// for mandatory properties (which never carry a default).
#[derive(Clone, Default)]
pub(crate) enum DefaultInit {
    #[default]
    None,
    Shared(SharedValue),
    PerInstance(PerInstanceInit),
}

/// Frozen metadata of one property.
pub struct Property {
    pub(crate) id: PropertyId,
    pub(crate) name: String,
    pub(crate) external_name: String,
    pub(crate) kind: PropertyKind,
    pub(crate) declared_type: Option<DeclaredType>,
    /// Schema of item values, or of collection entries.
    pub(crate) element_schema: Option<SchemaId>,
    /// Scalar codec: the value codec for plain kind, the element codec
    /// for collections of scalars (and array attribute encoding).
    pub(crate) codec: Option<Arc<dyn ValueCodec>>,
    /// Value binding for complex kind.
    pub(crate) binding: Option<Arc<dyn ValueBinding>>,
    pub(crate) mandatory: bool,
    pub(crate) nullable: bool,
    pub(crate) is_abstract: bool,
    pub(crate) key_property: Option<String>,
    pub(crate) subtype_tags: IndexMap<String, SchemaId>,
    pub(crate) default: DefaultInit,
    /// Whether the default was declared rather than implied by the kind.
    /// Declared defaults propagate to sub-schemas; implied ones are
    /// recomputed there.
    pub(crate) default_explicit: bool,
    pub(crate) derived: Option<DerivedFn>,
    /// Schema that first declared this property, for diagnostics.
    pub(crate) declared_by: SchemaId,
}

impl Property {
    /// Dense per-descriptor index; the slot in the item value store.
    #[must_use]
    pub fn id(&self) -> PropertyId {
        self.id
    }

    /// Internal (programmatic) name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Document name.
    #[must_use]
    pub fn external_name(&self) -> &str {
        &self.external_name
    }

    /// Storage and serialization kind.
    #[must_use]
    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// Declared type, when the schema stated one.
    #[must_use]
    pub fn declared_type(&self) -> Option<&DeclaredType> {
        self.declared_type.as_ref()
    }

    /// Schema of item values or collection entries.
    #[must_use]
    pub fn element_schema(&self) -> Option<&SchemaId> {
        self.element_schema.as_ref()
    }

    /// Scalar codec, when one applies.
    #[must_use]
    pub fn codec(&self) -> Option<&Arc<dyn ValueCodec>> {
        self.codec.as_ref()
    }

    /// Value binding, for complex kind.
    #[must_use]
    pub fn binding(&self) -> Option<&Arc<dyn ValueBinding>> {
        self.binding.as_ref()
    }

    /// Whether the property must be set before reading.
    #[must_use]
    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    /// Whether explicit null is legal.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Whether the property was declared without an implementation.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Name of the element-schema property supplying entry keys.
    #[must_use]
    pub fn key_property(&self) -> Option<&str> {
        self.key_property.as_deref()
    }

    /// Child tag name to concrete sub-schema map.
    #[must_use]
    pub fn subtype_tags(&self) -> &IndexMap<String, SchemaId> {
        &self.subtype_tags
    }

    /// Derived-property algorithm, for derived kind.
    #[must_use]
    pub fn derived(&self) -> Option<&DerivedFn> {
        self.derived.as_ref()
    }

    /// Schema that first declared this property.
    #[must_use]
    pub fn declared_by(&self) -> &SchemaId {
        &self.declared_by
    }

    /// Whether `update` and `reset` may target this property.
    #[must_use]
    pub fn is_settable(&self) -> bool {
        self.kind.has_storage()
    }

    /// Whether this property addresses collection entries by key.
    #[must_use]
    pub fn is_keyed(&self) -> bool {
        self.key_property.is_some()
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("external_name", &self.external_name)
            .field("kind", &self.kind)
            .field("mandatory", &self.mandatory)
            .field("nullable", &self.nullable)
            .field("declared_by", &self.declared_by)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declared_by, self.name)
    }
}
