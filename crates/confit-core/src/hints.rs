//! Schema metadata input: the pre-parsed definition bags the builder
//! consumes.
//!
//! Host applications describe their configuration interfaces through
//! [`SchemaDef`] and [`PropertyDef`] and hand a [`SchemaSet`] (or any
//! [`SchemaSource`]) to the descriptor registry. Nothing here is
//! validated beyond duplicate detection; the descriptor builder reports
//! every structural defect in one pass.

use indexmap::IndexMap;

use confit_error::{ConfitError, Result};
use confit_types::{DefaultSpec, DeclaredType, SchemaId};

use crate::property::DerivedFn;

/// Definition of one property, as declared on a schema.
///
/// All hints are optional except the internal name; absent hints fall
/// back to convention at build time (external name de-camel-cased and
/// hyphenated, kind inferred from the declared type).
pub struct PropertyDef {
    /// Internal (programmatic) name.
    pub name: String,
    /// Document name override.
    pub external_name: Option<String>,
    /// Declared type, when the property has one.
    pub declared_type: Option<DeclaredType>,
    /// Explicit scalar codec name.
    pub codec: Option<String>,
    /// Explicit value binding name; forces complex kind.
    pub binding: Option<String>,
    /// No default applies; the property must be set before reading.
    pub mandatory: bool,
    /// Whether explicit null is a legal value.
    pub nullable: bool,
    /// Declared without an implementation; makes the schema abstract.
    pub is_abstract: bool,
    /// Default specification.
    pub default: Option<DefaultSpec>,
    /// Name of the element-schema property supplying entry keys.
    pub key_property: Option<String>,
    /// Container alias: the value is the enclosing item.
    pub container: bool,
    /// Receives child elements no other property matched.
    pub default_container: bool,
    /// Child tag name to concrete sub-schema, for collection entries.
    pub subtype_tags: IndexMap<String, SchemaId>,
    /// Algorithm for derived properties.
    pub derived: Option<DerivedFn>,
}

impl PropertyDef {
    /// A property with only its internal name; everything else by
    /// convention.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_name: None,
            declared_type: None,
            codec: None,
            binding: None,
            mandatory: false,
            nullable: false,
            is_abstract: false,
            default: None,
            key_property: None,
            container: false,
            default_container: false,
            subtype_tags: IndexMap::new(),
            derived: None,
        }
    }

    /// Set the declared type.
    #[must_use]
    pub fn declared(mut self, declared_type: DeclaredType) -> Self {
        self.declared_type = Some(declared_type);
        self
    }

    /// Set an explicit scalar codec by name.
    #[must_use]
    pub fn codec(mut self, name: impl Into<String>) -> Self {
        self.codec = Some(name.into());
        self
    }

    /// Set an explicit value binding by name.
    #[must_use]
    pub fn binding(mut self, name: impl Into<String>) -> Self {
        self.binding = Some(name.into());
        self
    }

    /// Override the document name.
    #[must_use]
    pub fn external_name(mut self, name: impl Into<String>) -> Self {
        self.external_name = Some(name.into());
        self
    }

    /// Mark mandatory.
    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Allow explicit null.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark abstract.
    #[must_use]
    pub fn abstract_property(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Set the default specification.
    #[must_use]
    pub fn default(mut self, spec: DefaultSpec) -> Self {
        self.default = Some(spec);
        self
    }

    /// Name the key property of the element schema.
    #[must_use]
    pub fn key_property(mut self, name: impl Into<String>) -> Self {
        self.key_property = Some(name.into());
        self
    }

    /// Make this a container alias (enclosing-item reference).
    #[must_use]
    pub fn container(mut self) -> Self {
        self.container = true;
        self
    }

    /// Route unmatched child elements into this property.
    #[must_use]
    pub fn default_container(mut self) -> Self {
        self.default_container = true;
        self
    }

    /// Map a child tag name to a concrete sub-schema.
    #[must_use]
    pub fn subtype_tag(mut self, tag: impl Into<String>, schema: impl Into<SchemaId>) -> Self {
        self.subtype_tags.insert(tag.into(), schema.into());
        self
    }

    /// Make this a derived property computed by `f`.
    #[must_use]
    pub fn derived(mut self, f: DerivedFn) -> Self {
        self.derived = Some(f);
        self
    }
}

/// Definition of one configuration schema.
pub struct SchemaDef {
    /// Schema identifier.
    pub id: SchemaId,
    /// Direct parents, in declaration order.
    pub supers: Vec<SchemaId>,
    /// Explicitly marked abstract.
    pub is_abstract: bool,
    /// Element name registered for this schema (collection entry tags).
    pub tag_name: Option<String>,
    /// Identity property name, when the schema carries one.
    pub id_property: Option<String>,
    /// Subtree of types the identity is unique within.
    pub id_scope: Option<SchemaId>,
    /// Own property declarations, in order.
    pub properties: Vec<PropertyDef>,
}

impl SchemaDef {
    /// A schema with no supers and no properties.
    pub fn new(id: impl Into<SchemaId>) -> Self {
        Self {
            id: id.into(),
            supers: Vec::new(),
            is_abstract: false,
            tag_name: None,
            id_property: None,
            id_scope: None,
            properties: Vec::new(),
        }
    }

    /// Add a direct parent.
    #[must_use]
    pub fn extends(mut self, parent: impl Into<SchemaId>) -> Self {
        self.supers.push(parent.into());
        self
    }

    /// Mark abstract.
    #[must_use]
    pub fn abstract_schema(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Register the element name for this schema.
    #[must_use]
    pub fn tag(mut self, name: impl Into<String>) -> Self {
        self.tag_name = Some(name.into());
        self
    }

    /// Declare the identity property, unique within `scope`.
    #[must_use]
    pub fn identity(mut self, property: impl Into<String>, scope: impl Into<SchemaId>) -> Self {
        self.id_property = Some(property.into());
        self.id_scope = Some(scope.into());
        self
    }

    /// Add a property declaration.
    #[must_use]
    pub fn property(mut self, def: PropertyDef) -> Self {
        self.properties.push(def);
        self
    }
}

/// Source of schema definitions, consulted during descriptor builds.
pub trait SchemaSource {
    /// The definition registered under `id`, if any.
    fn schema_def(&self, id: &SchemaId) -> Option<&SchemaDef>;

    /// The schema registered under an element tag name, if any. Serves
    /// tag-based subtype resolution when a property carries no explicit
    /// subtype map.
    fn schema_for_tag(&self, tag: &str) -> Option<&SchemaId>;
}

/// In-memory schema source: definitions keyed by id, tags indexed on
/// insertion.
#[derive(Default)]
pub struct SchemaSet {
    defs: IndexMap<SchemaId, SchemaDef>,
    tags: IndexMap<String, SchemaId>,
}

impl SchemaSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition.
    ///
    /// # Errors
    ///
    /// [`ConfitError::DuplicateSchema`] when the id is already taken.
    pub fn add(&mut self, def: SchemaDef) -> Result<()> {
        if self.defs.contains_key(&def.id) {
            return Err(ConfitError::DuplicateSchema {
                id: def.id.to_string(),
            });
        }
        if let Some(tag) = &def.tag_name {
            self.tags.insert(tag.clone(), def.id.clone());
        }
        self.defs.insert(def.id.clone(), def);
        Ok(())
    }

    /// Ids of every registered schema, in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &SchemaId> {
        self.defs.keys()
    }

    /// Number of registered definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl SchemaSource for SchemaSet {
    fn schema_def(&self, id: &SchemaId) -> Option<&SchemaDef> {
        self.defs.get(id)
    }

    fn schema_for_tag(&self, tag: &str) -> Option<&SchemaId> {
        self.tags.get(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_set_rejects_duplicates() {
        let mut set = SchemaSet::new();
        set.add(SchemaDef::new("a")).expect("first");
        let err = set.add(SchemaDef::new("a")).expect_err("duplicate");
        assert!(matches!(err, ConfitError::DuplicateSchema { ref id } if id == "a"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_tag_index() {
        let mut set = SchemaSet::new();
        set.add(SchemaDef::new("db.connection").tag("connection"))
            .expect("add");
        assert_eq!(
            set.schema_for_tag("connection"),
            Some(&SchemaId::new("db.connection"))
        );
        assert!(set.schema_for_tag("pool").is_none());
    }

    #[test]
    fn test_property_def_builder() {
        let def = PropertyDef::new("maxRetries")
            .declared(DeclaredType::named("int"))
            .mandatory()
            .external_name("retries");
        assert_eq!(def.name, "maxRetries");
        assert!(def.mandatory);
        assert_eq!(def.external_name.as_deref(), Some("retries"));
        assert!(def.default.is_none());
    }
}
