//! Document writer: serialize an item tree back to markup.
//!
//! The writer builds an in-memory element tree first and renders it in
//! one pass at the end. Building first keeps the control-namespace
//! declaration honest: `xmlns:cfg` appears on the root only when some
//! element actually carries a control attribute.
//!
//! Only explicitly set properties are written, and a set value equal to
//! the default of the property's *declared* type is elided. A document
//! written this way parses back to an item that compares equal under
//! set-value equality, and writing that item again reproduces the
//! document.

use std::fmt::Write as _;
use std::io;
use std::sync::Arc;

use tracing::debug;

use confit_codec::BindingSink;
use confit_core::{config_eq, effective_default, ConfigValue, Descriptor, Item, Property};
use confit_error::{ConfitError, Result};
use confit_types::{ScalarValue, SchemaId};

use crate::control::{CONTROL_NS, CONTROL_PREFIX};
use crate::escape::{escape_attribute, escape_text, needs_cdata, needs_element_form, write_cdata};

/// Serialize an item as a complete document.
///
/// `declared` is the static schema of the root; values matching its
/// defaults are elided and a differing runtime schema earns the
/// concrete-type marker. The item's schema must be assignable to it.
pub fn write_document(item: &Item, declared: &SchemaId, root_tag: &str) -> Result<String> {
    let runtime = item.descriptor();
    let static_desc = static_descriptor_of(&runtime, declared).ok_or_else(|| {
        ConfitError::internal(format!(
            "schema '{}' is not assignable to declared '{declared}'",
            runtime.schema()
        ))
    })?;

    let mut writer = DocWriter::default();
    let mut root = writer.build_item(root_tag, item, Some(&static_desc), None)?;
    if runtime.schema() != declared {
        root.attributes.insert(
            0,
            (control_name("interface"), declared.to_string()),
        );
        root.attributes
            .insert(1, (control_name("impl"), runtime.schema().to_string()));
        writer.uses_control = true;
    }
    if writer.uses_control {
        root.attributes
            .push((format!("xmlns:{CONTROL_PREFIX}"), CONTROL_NS.to_owned()));
    }

    let mut out = String::new();
    render_element(&mut out, &root, 0)?;
    debug!(schema = %runtime.schema(), bytes = out.len(), "document written");
    Ok(out)
}

/// [`write_document`] into a byte stream.
pub fn write_to(
    out: &mut impl io::Write,
    item: &Item,
    declared: &SchemaId,
    root_tag: &str,
) -> Result<()> {
    let text = write_document(item, declared, root_tag)?;
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Walk the super graph for the descriptor of `target`.
fn static_descriptor_of(runtime: &Arc<Descriptor>, target: &SchemaId) -> Option<Arc<Descriptor>> {
    if runtime.schema() == target {
        return Some(Arc::clone(runtime));
    }
    runtime
        .supers()
        .iter()
        .find_map(|parent| static_descriptor_of(parent, target))
}

fn control_name(local: &str) -> String {
    format!("{CONTROL_PREFIX}:{local}")
}

// ---------------------------------------------------------------------------
// Element tree
// ---------------------------------------------------------------------------

struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

enum XmlNode {
    Element(XmlElement),
    Text(String),
    Cdata(String),
}

impl XmlElement {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    fn attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((name.into(), value.into()));
    }

    /// A child element holding one run of text content, CDATA-wrapped
    /// when line breaks must survive.
    fn text_child(&mut self, name: &str, text: String) {
        let mut child = Self::new(name);
        if needs_cdata(&text) {
            child.children.push(XmlNode::Cdata(text));
        } else {
            child.children.push(XmlNode::Text(text));
        }
        self.children.push(XmlNode::Element(child));
    }

    fn element_child(&mut self, child: Self) {
        self.children.push(XmlNode::Element(child));
    }
}

// ---------------------------------------------------------------------------
// Tree construction
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DocWriter {
    uses_control: bool,
}

impl DocWriter {
    /// Build the element of one item. `declared` is the static type the
    /// reader will see at this position; only its properties are
    /// default-elided. `keep` names a property exempt from elision (the
    /// entry key of a keyed collection must always be written).
    fn build_item(
        &mut self,
        tag: &str,
        item: &Item,
        declared: Option<&Arc<Descriptor>>,
        keep: Option<&str>,
    ) -> Result<XmlElement> {
        let descriptor = item.descriptor();
        let mut element = XmlElement::new(tag);
        for property in descriptor.properties() {
            if !property.kind().has_storage() || !item.value_set(property.name())? {
                continue;
            }
            let value = item.value_of(property)?;
            if keep != Some(property.name()) && elidable(property, declared, &value)? {
                continue;
            }
            self.write_value(&mut element, property, &value)?;
        }
        Ok(element)
    }

    fn write_value(
        &mut self,
        element: &mut XmlElement,
        property: &Arc<Property>,
        value: &ConfigValue,
    ) -> Result<()> {
        // Explicit null is an empty attribute, whatever the kind.
        if value.is_null() {
            element.attribute(property.external_name(), "");
            return Ok(());
        }
        match value {
            ConfigValue::Scalar(scalar) => self.write_scalar(element, property, scalar),
            ConfigValue::Complex(_) => self.write_complex(element, property, value),
            ConfigValue::Item(child) => self.write_item(element, property, child),
            ConfigValue::List(entries) => self.write_entries(
                element,
                property,
                entries.iter().collect::<Vec<_>>().as_slice(),
            ),
            ConfigValue::Map(entries) => self.write_entries(
                element,
                property,
                entries.values().collect::<Vec<_>>().as_slice(),
            ),
        }
    }

    fn write_scalar(
        &mut self,
        element: &mut XmlElement,
        property: &Arc<Property>,
        scalar: &ScalarValue,
    ) -> Result<()> {
        let codec = property.codec().ok_or_else(|| {
            ConfitError::internal(format!("property '{}' has no codec", property.name()))
        })?;
        let text = codec.format(scalar)?;
        if needs_element_form(&text) {
            element.text_child(property.external_name(), text);
        } else {
            element.attribute(property.external_name(), text);
        }
        Ok(())
    }

    fn write_complex(
        &mut self,
        element: &mut XmlElement,
        property: &Arc<Property>,
        value: &ConfigValue,
    ) -> Result<()> {
        let ConfigValue::Complex(payload) = value else {
            return Err(shape_mismatch(property, value));
        };
        let binding = property.binding().ok_or_else(|| {
            ConfitError::internal(format!("property '{}' has no binding", property.name()))
        })?;
        // Flat attribute form when the binding offers one and the payload
        // fits it; subtree form otherwise.
        if binding.supports_flat() {
            if let Ok(text) = binding.format_flat(payload) {
                if !needs_element_form(&text) {
                    element.attribute(property.external_name(), text);
                    return Ok(());
                }
            }
        }
        let mut sink = TreeSink {
            stack: vec![XmlElement::new(property.external_name())],
        };
        binding.store(payload, &mut sink)?;
        element.element_child(sink.finish()?);
        Ok(())
    }

    fn write_item(
        &mut self,
        element: &mut XmlElement,
        property: &Arc<Property>,
        child: &Item,
    ) -> Result<()> {
        let child_desc = child.descriptor();
        let element_schema = property.element_schema();

        // Attribute form: a reference-like child whose only set property
        // is its identity collapses to that identity's text.
        if let (Some(codec), Some(schema)) = (property.codec(), element_schema) {
            if child_desc.schema() == schema {
                if let Some(id_property) = child_desc.id_property() {
                    if child.value_set(id_property.name())?
                        && only_property_set(child, id_property)?
                    {
                        let value = child.value_of(id_property)?;
                        let scalar = value
                            .as_scalar()
                            .ok_or_else(|| shape_mismatch(id_property, &value))?;
                        let text = codec.format(scalar)?;
                        if !needs_element_form(&text) {
                            element.attribute(property.external_name(), text);
                            return Ok(());
                        }
                    }
                }
            }
        }

        let static_desc =
            element_schema.and_then(|schema| static_descriptor_of(&child_desc, schema));
        let mut entry =
            self.build_item(property.external_name(), child, static_desc.as_ref(), None)?;
        if element_schema.is_some_and(|schema| child_desc.schema() != schema) {
            entry
                .attributes
                .insert(0, (control_name("impl"), child_desc.schema().to_string()));
            self.uses_control = true;
        }
        element.element_child(entry);
        Ok(())
    }

    fn write_entries(
        &mut self,
        element: &mut XmlElement,
        property: &Arc<Property>,
        entries: &[&ConfigValue],
    ) -> Result<()> {
        // Scalar entries in attribute form when the joined rendering
        // survives attribute whitespace and re-splitting.
        if let Some(codec) = property.codec() {
            if entries.iter().all(|entry| entry.as_scalar().is_some()) {
                let mut parts = Vec::with_capacity(entries.len());
                for entry in entries {
                    let scalar = entry.as_scalar().ok_or_else(|| shape_mismatch(property, entry))?;
                    parts.push(codec.format(scalar)?);
                }
                let joined = codec.join_list(&parts);
                if !needs_element_form(&joined) && parts.iter().all(|part| !part.contains(',')) {
                    element.attribute(property.external_name(), joined);
                } else {
                    for part in parts {
                        element.text_child(property.external_name(), part);
                    }
                }
                return Ok(());
            }
        }

        for entry in entries {
            match entry {
                ConfigValue::Scalar(scalar) => {
                    let codec = property.codec().ok_or_else(|| {
                        ConfitError::internal(format!(
                            "property '{}' has no codec",
                            property.name()
                        ))
                    })?;
                    element.text_child(property.external_name(), codec.format(scalar)?);
                }
                ConfigValue::Item(child) => self.write_entry_item(element, property, child)?,
                other => return Err(shape_mismatch(property, other)),
            }
        }
        Ok(())
    }

    /// One item entry of a collection. The tag is chosen so the reader
    /// resolves the same concrete schema back: the schema's registered
    /// tag, a declared subtype tag, or the property name with an
    /// explicit concrete-type marker.
    fn write_entry_item(
        &mut self,
        element: &mut XmlElement,
        property: &Arc<Property>,
        child: &Item,
    ) -> Result<()> {
        let child_desc = child.descriptor();
        let element_schema = property.element_schema();

        let (tag, needs_marker) = if let Some(tag) = child_desc.tag_name() {
            (tag.to_owned(), false)
        } else if let Some((tag, _)) = property
            .subtype_tags()
            .iter()
            .find(|(_, schema)| *schema == child_desc.schema())
        {
            (tag.clone(), false)
        } else {
            let differs = element_schema.is_some_and(|schema| child_desc.schema() != schema);
            (property.external_name().to_owned(), differs)
        };

        let static_desc =
            element_schema.and_then(|schema| static_descriptor_of(&child_desc, schema));
        let mut entry = self.build_item(&tag, child, static_desc.as_ref(), property.key_property())?;
        if needs_marker {
            entry
                .attributes
                .insert(0, (control_name("impl"), child_desc.schema().to_string()));
            self.uses_control = true;
        }
        element.element_child(entry);
        Ok(())
    }
}

/// Whether a set value matches the default it would assume anyway, as
/// seen through the declared type at this position.
fn elidable(
    property: &Arc<Property>,
    declared: Option<&Arc<Descriptor>>,
    value: &ConfigValue,
) -> Result<bool> {
    let Some(declared_property) = declared.and_then(|d| d.property(property.name())) else {
        return Ok(false);
    };
    if declared_property.is_mandatory() {
        return Ok(false);
    }
    Ok(effective_default(declared_property)?
        .is_some_and(|default| config_eq(value, &default)))
}

fn only_property_set(item: &Item, only: &Arc<Property>) -> Result<bool> {
    for property in item.descriptor().properties() {
        if !property.kind().has_storage() || property.id() == only.id() {
            continue;
        }
        if item.value_set(property.name())? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn shape_mismatch(property: &Arc<Property>, value: &ConfigValue) -> ConfitError {
    ConfitError::internal(format!(
        "property '{}' holds an unexpected {}",
        property.name(),
        value.shape_name()
    ))
}

// ---------------------------------------------------------------------------
// BindingSink onto the element tree
// ---------------------------------------------------------------------------

/// Builds the subtree of one complex property; the property element
/// itself sits at the bottom of the stack.
struct TreeSink {
    stack: Vec<XmlElement>,
}

impl TreeSink {
    fn finish(mut self) -> Result<XmlElement> {
        if self.stack.len() != 1 {
            return Err(ConfitError::internal("binding left elements open"));
        }
        Ok(self.stack.remove(0))
    }
}

impl BindingSink for TreeSink {
    fn start_element(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let mut element = XmlElement::new(name);
        for (key, value) in attributes {
            element.attribute(*key, *value);
        }
        self.stack.push(element);
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<()> {
        let top = self
            .stack
            .last_mut()
            .ok_or_else(|| ConfitError::internal("text outside any element"))?;
        if needs_cdata(text) {
            top.children.push(XmlNode::Cdata(text.to_owned()));
        } else {
            top.children.push(XmlNode::Text(text.to_owned()));
        }
        Ok(())
    }

    fn end_element(&mut self) -> Result<()> {
        if self.stack.len() < 2 {
            return Err(ConfitError::internal("unbalanced end of element"));
        }
        let closed = self.stack.pop().expect("stack checked");
        self.stack
            .last_mut()
            .expect("stack checked")
            .children
            .push(XmlNode::Element(closed));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render_element(out: &mut String, element: &XmlElement, depth: usize) -> Result<()> {
    let pad = "  ".repeat(depth);
    write!(out, "{pad}<{}", element.name)?;
    for (name, value) in &element.attributes {
        write!(out, " {name}=\"{}\"", escape_attribute(value))?;
    }
    if element.children.is_empty() {
        write!(out, "/>")?;
        return Ok(());
    }
    write!(out, ">")?;

    let text_only = element
        .children
        .iter()
        .all(|child| !matches!(child, XmlNode::Element(_)));
    if text_only {
        for child in &element.children {
            render_text_node(out, child)?;
        }
        write!(out, "</{}>", element.name)?;
        return Ok(());
    }

    for child in &element.children {
        out.push('\n');
        match child {
            XmlNode::Element(inner) => render_element(out, inner, depth + 1)?,
            node => {
                write!(out, "{}", "  ".repeat(depth + 1))?;
                render_text_node(out, node)?;
            }
        }
    }
    write!(out, "\n{pad}</{}>", element.name)?;
    Ok(())
}

fn render_text_node(out: &mut String, node: &XmlNode) -> Result<()> {
    match node {
        XmlNode::Text(text) => write!(out, "{}", escape_text(text))?,
        XmlNode::Cdata(text) => write_cdata(out, text)?,
        XmlNode::Element(_) => unreachable!("element handed to text renderer"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use confit_codec::CodecRegistry;
    use confit_core::{
        DescriptorRegistry, FactoryTable, PropertyDef, SchemaDef, SchemaSet,
    };
    use confit_types::{DeclaredType, DefaultSpec};

    use crate::reader::{parse, DocumentContext};

    use super::*;

    struct Fixture {
        set: SchemaSet,
        registry: DescriptorRegistry,
        codecs: CodecRegistry,
        factories: FactoryTable,
    }

    impl Fixture {
        fn new(set: SchemaSet) -> Self {
            Self {
                set,
                registry: DescriptorRegistry::new(),
                codecs: CodecRegistry::with_builtins(),
                factories: FactoryTable::new(),
            }
        }

        fn ctx(&self) -> DocumentContext<'_> {
            DocumentContext {
                registry: &self.registry,
                source: &self.set,
                codecs: &self.codecs,
                factories: &self.factories,
            }
        }
    }

    fn pair_set() -> SchemaSet {
        let mut set = SchemaSet::new();
        set.add(
            SchemaDef::new("pair")
                .property(
                    PropertyDef::new("left")
                        .declared(DeclaredType::named("int"))
                        .mandatory(),
                )
                .property(
                    PropertyDef::new("right")
                        .declared(DeclaredType::named("int"))
                        .mandatory(),
                ),
        )
        .expect("pair");
        set
    }

    #[test]
    fn test_minimal_document_has_no_namespace_noise() {
        let fixture = Fixture::new(pair_set());
        let ctx = fixture.ctx();
        let descriptor = ctx
            .registry
            .resolve(&SchemaId::new("pair"), ctx.source, ctx.codecs)
            .expect("resolve");
        let item = ctx.factories.instantiate(&descriptor).expect("item");
        item.update("left", ConfigValue::from(ScalarValue::Int(1)))
            .expect("left");
        item.update("right", ConfigValue::from(ScalarValue::Int(2)))
            .expect("right");

        let text = write_document(&item, &SchemaId::new("pair"), "pair").expect("write");
        assert_eq!(text, r#"<pair left="1" right="2"/>"#);
    }

    #[test]
    fn test_default_values_are_elided() {
        let mut set = SchemaSet::new();
        set.add(
            SchemaDef::new("server").property(
                PropertyDef::new("host")
                    .declared(DeclaredType::named("string"))
                    .default(DefaultSpec::text("localhost")),
            ),
        )
        .expect("server");
        let fixture = Fixture::new(set);
        let ctx = fixture.ctx();
        let item = parse(
            r#"<server host="localhost"/>"#,
            &ctx,
            &SchemaId::new("server"),
            None,
        )
        .expect("parse");

        // Spelling the default out explicitly still writes as empty.
        let text = write_document(&item, &SchemaId::new("server"), "server").expect("write");
        assert_eq!(text, "<server/>");
    }

    #[test]
    fn test_round_trip_with_entries() {
        let mut set = SchemaSet::new();
        set.add(
            SchemaDef::new("connection")
                .tag("connection")
                .property(PropertyDef::new("name").declared(DeclaredType::named("string")))
                .property(PropertyDef::new("port").declared(DeclaredType::named("int"))),
        )
        .expect("connection");
        set.add(
            SchemaDef::new("server")
                .property(PropertyDef::new("host").declared(DeclaredType::named("string")))
                .property(
                    PropertyDef::new("connections")
                        .declared(DeclaredType::list_of(DeclaredType::schema("connection")))
                        .key_property("name"),
                ),
        )
        .expect("server");
        let fixture = Fixture::new(set);
        let ctx = fixture.ctx();
        let declared = SchemaId::new("server");

        let original = parse(
            r#"<server host="db1">
                 <connection name="a" port="1"/>
                 <connection name="b" port="2"/>
               </server>"#,
            &ctx,
            &declared,
            None,
        )
        .expect("parse");

        let text = write_document(&original, &declared, "server").expect("write");
        let reparsed = parse(&text, &ctx, &declared, None).expect("reparse");
        assert!(config_eq(
            &ConfigValue::Item(original),
            &ConfigValue::Item(reparsed)
        ));
        // Entries came back as registered-tag elements.
        assert!(text.contains(r#"<connection name="a" port="1"/>"#));
        assert!(!text.contains("cfg:"));
    }

    #[test]
    fn test_multiline_text_uses_cdata_element_form() {
        let mut set = SchemaSet::new();
        set.add(
            SchemaDef::new("script")
                .property(PropertyDef::new("body").declared(DeclaredType::named("string"))),
        )
        .expect("script");
        let fixture = Fixture::new(set);
        let ctx = fixture.ctx();
        let declared = SchemaId::new("script");
        let descriptor = ctx
            .registry
            .resolve(&declared, ctx.source, ctx.codecs)
            .expect("resolve");
        let item = ctx.factories.instantiate(&descriptor).expect("item");
        item.update("body", ConfigValue::from(ScalarValue::from("line1\nline2")))
            .expect("body");

        let text = write_document(&item, &declared, "script").expect("write");
        assert!(text.contains("<![CDATA[line1\nline2]]>"));

        let reparsed = parse(&text, &ctx, &declared, None).expect("reparse");
        assert!(config_eq(
            &reparsed.value("body").expect("body"),
            &ConfigValue::from(ScalarValue::from("line1\nline2"))
        ));
    }

    #[test]
    fn test_subtype_entries_round_trip_their_schema() {
        let mut set = SchemaSet::new();
        set.add(
            SchemaDef::new("task")
                .abstract_schema()
                .property(PropertyDef::new("name").declared(DeclaredType::named("string"))),
        )
        .expect("task");
        set.add(
            SchemaDef::new("shell.task")
                .extends("task")
                .property(PropertyDef::new("command").declared(DeclaredType::named("string"))),
        )
        .expect("shell");
        set.add(
            SchemaDef::new("plan").property(
                PropertyDef::new("tasks")
                    .declared(DeclaredType::list_of(DeclaredType::schema("task")))
                    .key_property("name")
                    .subtype_tag("shell", "shell.task"),
            ),
        )
        .expect("plan");
        let fixture = Fixture::new(set);
        let ctx = fixture.ctx();
        let declared = SchemaId::new("plan");

        let original = parse(
            r#"<plan><shell name="build" command="make"/></plan>"#,
            &ctx,
            &declared,
            None,
        )
        .expect("parse");
        let text = write_document(&original, &declared, "plan").expect("write");
        // The subtype tag carries the concrete schema; no marker needed.
        assert!(text.contains("<shell "));
        assert!(!text.contains("cfg:impl"));

        let reparsed = parse(&text, &ctx, &declared, None).expect("reparse");
        assert!(config_eq(
            &ConfigValue::Item(original),
            &ConfigValue::Item(reparsed)
        ));
    }

    #[test]
    fn test_runtime_schema_marker_on_root() {
        let mut set = SchemaSet::new();
        set.add(
            SchemaDef::new("base")
                .property(PropertyDef::new("name").declared(DeclaredType::named("string"))),
        )
        .expect("base");
        set.add(SchemaDef::new("derived").extends("base"))
            .expect("derived");
        let fixture = Fixture::new(set);
        let ctx = fixture.ctx();
        let descriptor = ctx
            .registry
            .resolve(&SchemaId::new("derived"), ctx.source, ctx.codecs)
            .expect("resolve");
        let item = ctx.factories.instantiate(&descriptor).expect("item");

        let text = write_document(&item, &SchemaId::new("base"), "thing").expect("write");
        assert!(text.contains(r#"cfg:interface="base""#));
        assert!(text.contains(r#"cfg:impl="derived""#));
        assert!(text.contains(&format!(r#"xmlns:cfg="{CONTROL_NS}""#)));

        let reparsed = parse(&text, &ctx, &SchemaId::new("base"), None).expect("reparse");
        assert_eq!(reparsed.descriptor().schema(), &SchemaId::new("derived"));
    }

    #[test]
    fn test_scalar_list_attribute_and_element_forms() {
        let mut set = SchemaSet::new();
        set.add(
            SchemaDef::new("box").property(
                PropertyDef::new("labels")
                    .declared(DeclaredType::array_of(DeclaredType::named("string"))),
            ),
        )
        .expect("box");
        let fixture = Fixture::new(set);
        let ctx = fixture.ctx();
        let declared = SchemaId::new("box");
        let descriptor = ctx
            .registry
            .resolve(&declared, ctx.source, ctx.codecs)
            .expect("resolve");

        let item = ctx.factories.instantiate(&descriptor).expect("item");
        item.update(
            "labels",
            ConfigValue::List(vec![
                ConfigValue::from(ScalarValue::from("red")),
                ConfigValue::from(ScalarValue::from("blue")),
            ]),
        )
        .expect("labels");
        let text = write_document(&item, &declared, "box").expect("write");
        assert_eq!(text, r#"<box labels="red, blue"/>"#);

        // An entry holding the join separator falls back to element form.
        let tricky = ctx.factories.instantiate(&descriptor).expect("item");
        tricky
            .update(
                "labels",
                ConfigValue::List(vec![ConfigValue::from(ScalarValue::from("a,b"))]),
            )
            .expect("labels");
        let text = write_document(&tricky, &declared, "box").expect("write");
        assert!(text.contains("<labels>a,b</labels>"));
    }
}
