//! Frozen schema descriptors.
//!
//! A [`Descriptor`] is the runtime form of one configuration schema:
//! the merged property table (own plus inherited), the super graph, and
//! the schema-level markers the document layer needs. Descriptors are
//! immutable by construction; building happens in the builder module and
//! publication in the registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use confit_types::{PropertyId, SchemaId};

use crate::property::Property;

/// Frozen runtime descriptor of one schema.
pub struct Descriptor {
    pub(crate) schema: SchemaId,
    pub(crate) supers: Vec<Arc<Descriptor>>,
    /// Dense by [`PropertyId`]; inherited first, own additions after.
    pub(crate) properties: Vec<Arc<Property>>,
    pub(crate) by_internal: HashMap<String, PropertyId>,
    pub(crate) by_external: HashMap<String, PropertyId>,
    pub(crate) is_abstract: bool,
    pub(crate) tag_name: Option<String>,
    pub(crate) id_property: Option<PropertyId>,
    pub(crate) id_scope: Option<SchemaId>,
    pub(crate) default_container: Option<PropertyId>,
}

impl Descriptor {
    /// The schema this descriptor was built from.
    #[must_use]
    pub fn schema(&self) -> &SchemaId {
        &self.schema
    }

    /// Direct parents, in declaration order.
    #[must_use]
    pub fn supers(&self) -> &[Arc<Descriptor>] {
        &self.supers
    }

    /// All properties in slot order.
    pub fn properties(&self) -> impl Iterator<Item = &Arc<Property>> {
        self.properties.iter()
    }

    /// Number of properties, including inherited.
    #[must_use]
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Property by internal name, falling back to the document name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Arc<Property>> {
        self.by_internal
            .get(name)
            .or_else(|| self.by_external.get(name))
            .map(|id| &self.properties[id.index()])
    }

    /// Property by document name only.
    #[must_use]
    pub fn property_by_external(&self, name: &str) -> Option<&Arc<Property>> {
        self.by_external
            .get(name)
            .map(|id| &self.properties[id.index()])
    }

    /// Property by slot id.
    #[must_use]
    pub fn property_by_id(&self, id: PropertyId) -> Option<&Arc<Property>> {
        self.properties.get(id.index())
    }

    /// Whether instantiation is forbidden.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Element name registered for this schema.
    #[must_use]
    pub fn tag_name(&self) -> Option<&str> {
        self.tag_name.as_deref()
    }

    /// Identity property, when declared.
    #[must_use]
    pub fn id_property(&self) -> Option<&Arc<Property>> {
        self.id_property.map(|id| &self.properties[id.index()])
    }

    /// Subtree of types the identity is unique within.
    #[must_use]
    pub fn id_scope(&self) -> Option<&SchemaId> {
        self.id_scope.as_ref()
    }

    /// Property receiving unmatched child elements.
    #[must_use]
    pub fn default_container(&self) -> Option<&Arc<Property>> {
        self.default_container.map(|id| &self.properties[id.index()])
    }

    /// Whether values of this schema may stand where `target` is
    /// expected: the schema itself or any transitive super.
    #[must_use]
    pub fn is_assignable_to(&self, target: &SchemaId) -> bool {
        if &self.schema == target || target.is_base() {
            return true;
        }
        self.supers.iter().any(|s| s.is_assignable_to(target))
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("schema", &self.schema)
            .field(
                "supers",
                &self.supers.iter().map(|s| &s.schema).collect::<Vec<_>>(),
            )
            .field("properties", &self.properties)
            .field("abstract", &self.is_abstract)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.schema.as_str())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::plain_descriptor;
    use super::*;

    #[test]
    fn test_property_lookup_by_both_names() {
        let d = plain_descriptor(SchemaId::new("retry"), &["maxCount", "delayMillis"]);
        assert_eq!(d.property_count(), 2);

        let by_internal = d.property("maxCount").expect("internal name");
        let by_external = d.property("max-count").expect("external name");
        assert_eq!(by_internal.id(), by_external.id());

        assert!(d.property("missing").is_none());
        assert!(d.property_by_external("maxCount").is_none());
    }

    #[test]
    fn test_assignability_includes_self_and_base() {
        let d = plain_descriptor(SchemaId::new("retry"), &[]);
        assert!(d.is_assignable_to(&SchemaId::new("retry")));
        assert!(d.is_assignable_to(&SchemaId::base()));
        assert!(!d.is_assignable_to(&SchemaId::new("other")));
    }
}
