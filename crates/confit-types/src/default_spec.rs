//! Unresolved default specifications attached to schema definitions.

use crate::{ScalarValue, SchemaId};

/// How a property's default value is produced.
///
/// Scalar and complex forms are resolved once when the descriptor is
/// built and then shared by every item. Item and list forms stay
/// unresolved and are re-evaluated per access, so each item gets its
/// own mutable copy.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultSpec {
    /// A literal scalar, used as-is.
    Literal(ScalarValue),
    /// A textual form parsed by the named value codec at build time.
    FormattedText {
        /// Codec that understands `text`; empty selects the property's
        /// own codec.
        codec: String,
        /// Unparsed default text from the schema definition.
        text: String,
    },
    /// A fresh instance of the given schema, built with its own defaults.
    InstanceOf(SchemaId),
    /// A fresh instance built from a template of property defaults.
    ItemTemplate(ItemTemplateSpec),
    /// A list populated from element defaults, rebuilt for every item.
    ListLiteral(Vec<DefaultSpec>),
    /// A complex payload parsed from text by the named value binding.
    ComplexLiteral {
        /// Binding that understands `text`.
        binding: String,
        /// Unparsed payload text.
        text: String,
    },
    /// The codec's own type default, overriding any inherited explicit
    /// default back to the natural zero value.
    FromCodec,
}

impl DefaultSpec {
    /// Textual default parsed by the property's own codec.
    pub fn text(text: impl Into<String>) -> Self {
        Self::FormattedText {
            codec: String::new(),
            text: text.into(),
        }
    }

    /// Whether this default must be re-evaluated for every item.
    ///
    /// Item-valued and list-valued defaults hand out mutable state and
    /// may not be shared between items.
    #[must_use]
    pub const fn is_per_instance(&self) -> bool {
        matches!(
            self,
            Self::InstanceOf(_) | Self::ItemTemplate(_) | Self::ListLiteral(_)
        )
    }
}

impl From<ScalarValue> for DefaultSpec {
    fn from(value: ScalarValue) -> Self {
        Self::Literal(value)
    }
}

/// Template for an item-valued default: a schema plus property defaults
/// applied on top of the schema's own.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemTemplateSpec {
    /// Schema the templated item is built from.
    pub schema: SchemaId,
    /// Property assignments, by internal property name.
    pub values: Vec<(String, DefaultSpec)>,
}

impl ItemTemplateSpec {
    /// Template with no overriding assignments.
    pub fn new(schema: impl Into<SchemaId>) -> Self {
        Self {
            schema: schema.into(),
            values: Vec::new(),
        }
    }

    /// Adds one property assignment.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, spec: DefaultSpec) -> Self {
        self.values.push((name.into(), spec));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_instance_classification() {
        assert!(!DefaultSpec::Literal(ScalarValue::Int(3)).is_per_instance());
        assert!(!DefaultSpec::text("42").is_per_instance());
        assert!(!DefaultSpec::FromCodec.is_per_instance());
        assert!(!DefaultSpec::ComplexLiteral {
            binding: "dims".to_owned(),
            text: "4x3".to_owned(),
        }
        .is_per_instance());

        assert!(DefaultSpec::InstanceOf(SchemaId::new("child")).is_per_instance());
        assert!(DefaultSpec::ItemTemplate(ItemTemplateSpec::new("child")).is_per_instance());
        assert!(DefaultSpec::ListLiteral(Vec::new()).is_per_instance());
    }

    #[test]
    fn test_text_uses_property_codec() {
        let spec = DefaultSpec::text("7");
        match spec {
            DefaultSpec::FormattedText { codec, text } => {
                assert!(codec.is_empty());
                assert_eq!(text, "7");
            }
            other => panic!("unexpected spec: {other:?}"),
        }
    }

    #[test]
    fn test_item_template_builder() {
        let template = ItemTemplateSpec::new("connection")
            .with("port", DefaultSpec::Literal(ScalarValue::Int(5432)))
            .with("host", DefaultSpec::text("localhost"));
        assert_eq!(template.schema, SchemaId::new("connection"));
        assert_eq!(template.values.len(), 2);
        assert_eq!(template.values[0].0, "port");
    }
}
