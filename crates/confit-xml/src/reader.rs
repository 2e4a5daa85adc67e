//! Document reader: parse an element tree into configuration items.
//!
//! The reader is a pull parser over the [`Lexer`] token stream, one
//! frame per nested item. Recoverable defects (unknown names, malformed
//! scalar text, duplicate keys) are logged and the offending subtree is
//! skipped; the parse continues. Malformed markup and failures inside a
//! complex-binding subtree are terminal, because the cursor position
//! within the subtree is unknown and there is no element boundary to
//! resynchronize on.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use confit_codec::{BindingEvent, BindingSource, CodecRegistry};
use confit_core::{
    copy_item, entry_key_of, ConfigValue, Descriptor, DescriptorRegistry, FactoryTable, Item,
    Property, SchemaSource,
};
use confit_error::{ConfitError, ErrorLog, Result};
use confit_types::{EntryKey, PropertyId, PropertyKind, SchemaId};

use crate::control::{ControlAttrs, MergeOp, NamespaceScope, Position};
use crate::lexer::Lexer;
use crate::token::XmlToken;

/// Everything a document operation needs to resolve schemas and build
/// items.
pub struct DocumentContext<'a> {
    /// Descriptor store; documents may pull in schemas lazily.
    pub registry: &'a DescriptorRegistry,
    /// Schema definitions, also consulted for tag registrations.
    pub source: &'a dyn SchemaSource,
    /// Codec and binding lookup.
    pub codecs: &'a CodecRegistry,
    /// Item constructors.
    pub factories: &'a FactoryTable,
}

impl DocumentContext<'_> {
    fn descriptor(&self, id: &SchemaId) -> Result<Arc<Descriptor>> {
        self.registry.resolve(id, self.source, self.codecs)
    }
}

/// Parse a document, collecting recoverable defects.
///
/// Returns the root item (when one could be built) together with the
/// log of everything that went wrong along the way. Terminal failures
/// surface as an error record and no item.
pub fn read_document(
    text: &str,
    ctx: &DocumentContext<'_>,
    declared: &SchemaId,
    base: Option<&Item>,
) -> (Option<Item>, ErrorLog) {
    let mut reader = Reader::new(text, ctx);
    match reader.read_root(declared, base) {
        Ok(item) => (item, reader.log),
        Err(err) => {
            let mut log = reader.log;
            match err {
                ConfitError::ParseAborted { line, col, detail } => {
                    log.error_at(line, col, format!("parse aborted: {detail}"));
                }
                other => log.error_with_cause("parse aborted", &other),
            }
            (None, log)
        }
    }
}

/// Parse a document, failing on any defect.
///
/// Recoverable defects aggregate into [`ConfitError::ParseFailed`];
/// terminal failures propagate as-is.
pub fn parse(
    text: &str,
    ctx: &DocumentContext<'_>,
    declared: &SchemaId,
    base: Option<&Item>,
) -> Result<Item> {
    let mut reader = Reader::new(text, ctx);
    let item = reader.read_root(declared, base)?;
    reader.log.into_parse_result()?;
    item.ok_or_else(|| ConfitError::ParseFailed {
        count: 1,
        details: "  - document yielded no root item".to_owned(),
    })
}

/// [`parse`] over a byte stream.
pub fn parse_from(
    mut input: impl io::Read,
    ctx: &DocumentContext<'_>,
    declared: &SchemaId,
    base: Option<&Item>,
) -> Result<Item> {
    let mut text = String::new();
    input.read_to_string(&mut text)?;
    parse(&text, ctx, declared, base)
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Working entry list of one collection property within one element.
struct WorkingList {
    entries: Vec<(Option<EntryKey>, ConfigValue)>,
    /// Seeded from a base value; entry operations default to `update`.
    seeded: bool,
}

impl WorkingList {
    fn index_of(&self, key: &EntryKey) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.as_ref() == Some(key))
    }

    fn index_of_anchor(&self, anchor: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.as_ref().is_some_and(|k| k.to_string() == anchor))
    }
}

/// Per-element parse state.
struct Frame {
    /// Properties already assigned in this element; a second assignment
    /// is a duplicate error.
    processed: HashSet<PropertyId>,
    collections: IndexMap<PropertyId, WorkingList>,
}

impl Frame {
    fn new() -> Self {
        Self {
            processed: HashSet::new(),
            collections: IndexMap::new(),
        }
    }
}

struct Reader<'a, 'c> {
    lexer: Lexer<'a>,
    ctx: &'a DocumentContext<'c>,
    scope: NamespaceScope,
    log: ErrorLog,
}

impl<'a, 'c> Reader<'a, 'c> {
    fn new(text: &'a str, ctx: &'a DocumentContext<'c>) -> Self {
        Self {
            lexer: Lexer::new(text),
            ctx,
            scope: NamespaceScope::new(),
            log: ErrorLog::new(),
        }
    }

    fn next(&mut self) -> Result<XmlToken> {
        self.lexer.next_token()
    }

    fn abort(&self, line: u32, col: u32, detail: impl Into<String>) -> ConfitError {
        ConfitError::ParseAborted {
            line,
            col,
            detail: detail.into(),
        }
    }

    // -- root --

    fn read_root(&mut self, declared: &SchemaId, base: Option<&Item>) -> Result<Option<Item>> {
        let (name, attributes, self_closing, line, col) = loop {
            match self.next()? {
                XmlToken::Start {
                    name,
                    attributes,
                    self_closing,
                    line,
                    col,
                } => break (name, attributes, self_closing, line, col),
                XmlToken::Eof => {
                    self.log.error("document holds no root element");
                    return Ok(None);
                }
                XmlToken::Text { line, col, .. } => {
                    self.log.error_at(line, col, "text before the root element");
                }
                XmlToken::End { name, line, col } => {
                    return Err(self.abort(line, col, format!("stray closing tag </{name}>")));
                }
            }
        };

        self.scope.push(&attributes);
        let item = self.read_root_element(declared, base, &name, &attributes, self_closing, line, col)?;
        self.scope.pop();

        // Nothing but ignorable content may follow the root.
        loop {
            match self.next()? {
                XmlToken::Eof => break,
                XmlToken::Start {
                    self_closing,
                    line,
                    col,
                    ..
                } => {
                    self.log.error_at(line, col, "content after the root element");
                    self.skip_subtree(self_closing)?;
                }
                XmlToken::Text { line, col, .. } => {
                    self.log.error_at(line, col, "text after the root element");
                }
                XmlToken::End { name, line, col } => {
                    return Err(self.abort(line, col, format!("stray closing tag </{name}>")));
                }
            }
        }
        Ok(item)
    }

    #[allow(clippy::too_many_arguments)]
    fn read_root_element(
        &mut self,
        declared: &SchemaId,
        base: Option<&Item>,
        name: &str,
        attributes: &[(String, String)],
        self_closing: bool,
        line: u32,
        col: u32,
    ) -> Result<Option<Item>> {
        let (control, plain) = match ControlAttrs::extract(attributes, &self.scope) {
            Ok(split) => split,
            Err(err) => {
                self.log.error_at(line, col, err.to_string());
                self.skip_subtree(self_closing)?;
                return Ok(None);
            }
        };
        if control.is_abstract {
            self.log.error_at(line, col, "root element is marked abstract");
            self.skip_subtree(self_closing)?;
            return Ok(None);
        }

        let declared_desc = match self.ctx.descriptor(declared) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                self.log
                    .error_with_cause(format!("cannot resolve schema '{declared}'"), &err);
                self.skip_subtree(self_closing)?;
                return Ok(None);
            }
        };
        let concrete = match self.concrete_descriptor(
            &control,
            local_name(name),
            Some(declared_desc.schema()),
            &declared_desc,
            line,
            col,
        ) {
            Some(descriptor) => descriptor,
            None => {
                self.skip_subtree(self_closing)?;
                return Ok(None);
            }
        };
        if let Some(interface) = &control.interface {
            let interface = SchemaId::new(interface);
            if !concrete.is_assignable_to(&interface) {
                self.log.error_at(
                    line,
                    col,
                    format!(
                        "schema '{}' does not implement declared interface '{interface}'",
                        concrete.schema()
                    ),
                );
            }
        }

        let item = match base {
            Some(base)
                if !control.is_override
                    && base.descriptor().is_assignable_to(concrete.schema()) =>
            {
                copy_item(base)?
            }
            _ => match self.ctx.factories.instantiate(&concrete) {
                Ok(item) => item,
                Err(err) => {
                    self.log.error_at(line, col, err.to_string());
                    self.skip_subtree(self_closing)?;
                    return Ok(None);
                }
            },
        };
        item.set_location(line, col);
        let descriptor = item.descriptor();
        self.read_item_into(&item, &descriptor, &plain, self_closing)?;
        debug!(schema = %descriptor.schema(), errors = self.log.error_count(), "document root read");
        Ok(Some(item))
    }

    /// The concrete descriptor of one element: explicit `cfg:impl`, the
    /// schema registered for the tag, or the declared fallback. `None`
    /// after logging when nothing resolvable fits.
    fn concrete_descriptor(
        &mut self,
        control: &ControlAttrs,
        tag: &str,
        expected: Option<&SchemaId>,
        fallback: &Arc<Descriptor>,
        line: u32,
        col: u32,
    ) -> Option<Arc<Descriptor>> {
        let named = control
            .schema_impl
            .as_deref()
            .map(SchemaId::new)
            .or_else(|| {
                self.ctx
                    .source
                    .schema_for_tag(tag)
                    .filter(|id| *id != fallback.schema())
                    .cloned()
            });
        let Some(id) = named else {
            return Some(Arc::clone(fallback));
        };
        match self.ctx.descriptor(&id) {
            Ok(descriptor) => {
                if let Some(expected) = expected {
                    if !descriptor.is_assignable_to(expected) {
                        self.log.error_at(
                            line,
                            col,
                            format!("schema '{id}' is not assignable to '{expected}'"),
                        );
                        return None;
                    }
                }
                Some(descriptor)
            }
            Err(err) => {
                self.log
                    .error_at(line, col, format!("cannot resolve schema '{id}': {err}"));
                None
            }
        }
    }

    // -- item frames --

    fn read_item_into(
        &mut self,
        item: &Item,
        descriptor: &Arc<Descriptor>,
        attributes: &[(String, String)],
        self_closing: bool,
    ) -> Result<()> {
        let mut frame = Frame::new();
        for (name, value) in attributes {
            self.apply_attribute(item, descriptor, &mut frame, name, value);
        }
        if !self_closing {
            self.read_children(item, descriptor, &mut frame)?;
        }
        self.commit_collections(item, descriptor, frame);
        Ok(())
    }

    fn apply_attribute(
        &mut self,
        item: &Item,
        descriptor: &Arc<Descriptor>,
        frame: &mut Frame,
        name: &str,
        value: &str,
    ) {
        let (line, col) = self.lexer.position();
        let Some(property) = descriptor.property(name).cloned() else {
            self.log.error_at(
                line,
                col,
                format!(
                    "no property '{name}' on schema '{}'",
                    descriptor.schema()
                ),
            );
            return;
        };
        if !self.claim(frame, &property, line, col) {
            return;
        }

        // An empty attribute on a nullable property is null, whatever
        // the kind; the codec is never consulted.
        if value.is_empty() && property.is_nullable() {
            self.try_update(item, &property, ConfigValue::null(), line, col);
            return;
        }

        match property.kind() {
            PropertyKind::Plain => {
                let Some(codec) = property.codec().cloned() else {
                    self.log
                        .error_at(line, col, format!("property '{name}' has no codec"));
                    return;
                };
                match codec.parse(value) {
                    Ok(scalar) => {
                        self.try_update(item, &property, ConfigValue::Scalar(scalar), line, col);
                    }
                    Err(err) => self.log.error_at(
                        line,
                        col,
                        format!("cannot parse attribute '{name}': {err}"),
                    ),
                }
            }
            PropertyKind::Array => {
                let Some(codec) = property.codec().cloned() else {
                    self.log.error_at(
                        line,
                        col,
                        format!("array property '{name}' has no attribute encoding"),
                    );
                    return;
                };
                let mut entries = Vec::new();
                for part in codec.split_list(value) {
                    match codec.parse(&part) {
                        Ok(scalar) => entries.push(ConfigValue::Scalar(scalar)),
                        Err(err) => {
                            self.log.error_at(
                                line,
                                col,
                                format!("cannot parse entry '{part}' of '{name}': {err}"),
                            );
                            return;
                        }
                    }
                }
                self.try_update(item, &property, ConfigValue::List(entries), line, col);
            }
            PropertyKind::Complex => {
                let flat = property.binding().filter(|b| b.supports_flat()).cloned();
                let Some(binding) = flat else {
                    self.log.error_at(
                        line,
                        col,
                        format!("complex property '{name}' has no flat text form"),
                    );
                    return;
                };
                match binding.parse_flat(value) {
                    Ok(payload) => {
                        self.try_update(item, &property, ConfigValue::Complex(payload), line, col);
                    }
                    Err(err) => self.log.error_at(
                        line,
                        col,
                        format!("cannot parse attribute '{name}': {err}"),
                    ),
                }
            }
            PropertyKind::Item => self.item_from_attribute(item, &property, name, value, line, col),
            PropertyKind::List | PropertyKind::Map => self.log.error_at(
                line,
                col,
                format!("property '{name}' requires element form"),
            ),
            PropertyKind::Derived | PropertyKind::Ref => self.log.error_at(
                line,
                col,
                format!("property '{name}' cannot be assigned from a document"),
            ),
        }
    }

    /// Attribute form of an item property: the scalar is the identity of
    /// a fresh instance of the element schema.
    fn item_from_attribute(
        &mut self,
        item: &Item,
        property: &Arc<Property>,
        name: &str,
        value: &str,
        line: u32,
        col: u32,
    ) {
        let element = property
            .element_schema()
            .cloned()
            .and_then(|id| self.ctx.descriptor(&id).ok());
        let scalar = property.codec().map(|codec| codec.parse(value));
        let (Some(element), Some(scalar)) = (element, scalar) else {
            self.log.error_at(
                line,
                col,
                format!("item property '{name}' has no attribute form"),
            );
            return;
        };
        let Some(id_property) = element.id_property().cloned() else {
            self.log.error_at(
                line,
                col,
                format!("schema '{}' declares no identity property", element.schema()),
            );
            return;
        };
        let scalar = match scalar {
            Ok(scalar) => scalar,
            Err(err) => {
                self.log
                    .error_at(line, col, format!("cannot parse attribute '{name}': {err}"));
                return;
            }
        };
        match self.ctx.factories.instantiate(&element) {
            Ok(child) => {
                if let Err(err) = child.update_of(&id_property, ConfigValue::Scalar(scalar)) {
                    self.log.error_at(line, col, err.to_string());
                    return;
                }
                self.try_update(item, property, ConfigValue::Item(child), line, col);
            }
            Err(err) => self.log.error_at(line, col, err.to_string()),
        }
    }

    fn read_children(
        &mut self,
        item: &Item,
        descriptor: &Arc<Descriptor>,
        frame: &mut Frame,
    ) -> Result<()> {
        loop {
            match self.next()? {
                XmlToken::End { .. } => return Ok(()),
                XmlToken::Eof => {
                    let (line, col) = self.lexer.position();
                    return Err(self.abort(line, col, "unexpected end of input inside an element"));
                }
                XmlToken::Text { line, col, .. } => {
                    self.log
                        .error_at(line, col, "text content is not allowed inside an item element");
                }
                XmlToken::Start {
                    name,
                    attributes,
                    self_closing,
                    line,
                    col,
                } => {
                    self.scope.push(&attributes);
                    let result = self.handle_child(
                        item,
                        descriptor,
                        frame,
                        &name,
                        &attributes,
                        self_closing,
                        line,
                        col,
                    );
                    self.scope.pop();
                    result?;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_child(
        &mut self,
        item: &Item,
        descriptor: &Arc<Descriptor>,
        frame: &mut Frame,
        name: &str,
        attributes: &[(String, String)],
        self_closing: bool,
        line: u32,
        col: u32,
    ) -> Result<()> {
        let (control, plain) = match ControlAttrs::extract(attributes, &self.scope) {
            Ok(split) => split,
            Err(err) => {
                self.log.error_at(line, col, err.to_string());
                return self.skip_subtree(self_closing);
            }
        };
        if control.is_abstract {
            self.log.info(format!("{line}:{col}: skipping abstract element <{name}>"));
            return self.skip_subtree(self_closing);
        }
        let local = local_name(name);

        // A tag matching a declared property addresses it directly.
        if let Some(property) = descriptor.property(local).cloned() {
            return match property.kind() {
                PropertyKind::Plain => {
                    self.read_plain_element(item, &property, frame, &plain, self_closing, line, col)
                }
                PropertyKind::Complex => {
                    self.read_complex_element(item, &property, frame, &plain, self_closing, line, col)
                }
                PropertyKind::Item => self.read_nested_item(
                    item,
                    &property,
                    frame,
                    &control,
                    &plain,
                    self_closing,
                    line,
                    col,
                ),
                PropertyKind::Array | PropertyKind::List | PropertyKind::Map => self
                    .collection_entry(
                        item,
                        &property,
                        frame,
                        None,
                        &control,
                        &plain,
                        self_closing,
                        line,
                        col,
                    ),
                PropertyKind::Derived | PropertyKind::Ref => {
                    self.log.error_at(
                        line,
                        col,
                        format!("property '{local}' cannot be assigned from a document"),
                    );
                    self.skip_subtree(self_closing)
                }
            };
        }

        // A subtype tag declared on a collection property selects both
        // the property and the concrete entry schema.
        let by_subtype = descriptor
            .properties()
            .filter(|p| p.kind().is_collection())
            .find_map(|p| {
                p.subtype_tags()
                    .get(local)
                    .map(|schema| (Arc::clone(p), schema.clone()))
            });
        if let Some((property, schema)) = by_subtype {
            return self.collection_entry(
                item,
                &property,
                frame,
                Some(schema),
                &control,
                &plain,
                self_closing,
                line,
                col,
            );
        }

        // A schema registered under the tag routes by assignability:
        // first matching collection property, then the default container.
        if let Some(schema) = self.ctx.source.schema_for_tag(local).cloned() {
            let target = descriptor
                .properties()
                .filter(|p| p.kind().is_collection())
                .find(|p| self.accepts_schema(p, &schema))
                .or_else(|| descriptor.default_container().filter(|p| self.accepts_schema(p, &schema)))
                .cloned();
            if let Some(property) = target {
                return match property.kind() {
                    PropertyKind::Item => self.read_nested_item(
                        item,
                        &property,
                        frame,
                        &control,
                        &plain,
                        self_closing,
                        line,
                        col,
                    ),
                    _ => self.collection_entry(
                        item,
                        &property,
                        frame,
                        Some(schema),
                        &control,
                        &plain,
                        self_closing,
                        line,
                        col,
                    ),
                };
            }
        }

        self.log.error_at(
            line,
            col,
            format!(
                "element <{local}> matches no property of schema '{}'",
                descriptor.schema()
            ),
        );
        self.skip_subtree(self_closing)
    }

    fn accepts_schema(&self, property: &Arc<Property>, schema: &SchemaId) -> bool {
        property.element_schema().is_some_and(|element| {
            self.ctx
                .descriptor(schema)
                .is_ok_and(|d| d.is_assignable_to(element))
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn read_plain_element(
        &mut self,
        item: &Item,
        property: &Arc<Property>,
        frame: &mut Frame,
        attributes: &[(String, String)],
        self_closing: bool,
        line: u32,
        col: u32,
    ) -> Result<()> {
        if !self.claim(frame, property, line, col) {
            return self.skip_subtree(self_closing);
        }
        if !attributes.is_empty() {
            self.log.error_at(
                line,
                col,
                format!("scalar element <{}> cannot carry attributes", property.external_name()),
            );
            return self.skip_subtree(self_closing);
        }
        let text = self.collect_text(self_closing)?;
        if text.is_empty() && property.is_nullable() {
            self.try_update(item, property, ConfigValue::null(), line, col);
            return Ok(());
        }
        let Some(codec) = property.codec().cloned() else {
            self.log.error_at(line, col, "scalar property without codec");
            return Ok(());
        };
        match codec.parse(&text) {
            Ok(scalar) => self.try_update(item, property, ConfigValue::Scalar(scalar), line, col),
            Err(err) => self.log.error_at(
                line,
                col,
                format!("cannot parse <{}>: {err}", property.external_name()),
            ),
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn read_complex_element(
        &mut self,
        item: &Item,
        property: &Arc<Property>,
        frame: &mut Frame,
        attributes: &[(String, String)],
        self_closing: bool,
        line: u32,
        col: u32,
    ) -> Result<()> {
        if !self.claim(frame, property, line, col) {
            return self.skip_subtree(self_closing);
        }
        let Some(binding) = property.binding().cloned() else {
            self.log.error_at(line, col, "complex property without binding");
            return self.skip_subtree(self_closing);
        };
        if !attributes.is_empty() {
            self.log.error_at(
                line,
                col,
                format!(
                    "element <{}> cannot carry attributes; the flat form is an attribute on the parent",
                    property.external_name()
                ),
            );
            return self.skip_subtree(self_closing);
        }

        let mut source = SubtreeSource {
            reader: self,
            depth: 0,
            pending_end: false,
            done: self_closing,
        };
        // Binding failures are terminal: the cursor is somewhere inside
        // the subtree.
        let payload = binding.load(&mut source).map_err(|err| {
            let (l, c) = self.lexer.position();
            self.abort(l, c, format!("binding '{}' failed: {err}", binding.name()))
        })?;
        self.try_update(item, property, ConfigValue::Complex(payload), line, col);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn read_nested_item(
        &mut self,
        item: &Item,
        property: &Arc<Property>,
        frame: &mut Frame,
        control: &ControlAttrs,
        attributes: &[(String, String)],
        self_closing: bool,
        line: u32,
        col: u32,
    ) -> Result<()> {
        if !self.claim(frame, property, line, col) {
            return self.skip_subtree(self_closing);
        }
        let Some(declared) = property.element_schema().cloned() else {
            self.log
                .error_at(line, col, format!("property '{}' has no element schema", property.name()));
            return self.skip_subtree(self_closing);
        };
        let fallback = match self.ctx.descriptor(&declared) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                self.log.error_at(line, col, err.to_string());
                return self.skip_subtree(self_closing);
            }
        };
        let Some(concrete) =
            self.concrete_descriptor(control, property.external_name(), Some(&declared), &fallback, line, col)
        else {
            return self.skip_subtree(self_closing);
        };

        // A base-seeded slot is merged into in place unless the element
        // declares itself a fresh definition.
        let existing = (!control.is_override)
            .then(|| item.value_set(property.name()).ok())
            .flatten()
            .filter(|set| *set)
            .and_then(|_| item.value_of(property).ok())
            .and_then(|value| value.as_item().cloned())
            .filter(|child| child.descriptor().is_assignable_to(concrete.schema()));

        match existing {
            Some(child) => {
                child.set_location(line, col);
                let child_desc = child.descriptor();
                self.read_item_into(&child, &child_desc, attributes, self_closing)
            }
            None => match self.ctx.factories.instantiate(&concrete) {
                Ok(child) => {
                    child.set_location(line, col);
                    self.read_item_into(&child, &concrete, attributes, self_closing)?;
                    self.try_update(item, property, ConfigValue::Item(child), line, col);
                    Ok(())
                }
                Err(err) => {
                    self.log.error_at(line, col, err.to_string());
                    self.skip_subtree(self_closing)
                }
            },
        }
    }

    // -- collection entries --

    #[allow(clippy::too_many_arguments)]
    fn collection_entry(
        &mut self,
        item: &Item,
        property: &Arc<Property>,
        frame: &mut Frame,
        tag_schema: Option<SchemaId>,
        control: &ControlAttrs,
        attributes: &[(String, String)],
        self_closing: bool,
        line: u32,
        col: u32,
    ) -> Result<()> {
        if let Err(err) = self.ensure_working(frame, item, property) {
            self.log.error_at(line, col, err.to_string());
            return self.skip_subtree(self_closing);
        }
        let seeded = frame.collections[&property.id()].seeded;
        let op = control.op.unwrap_or(if seeded { MergeOp::Update } else { MergeOp::Add });

        if property.kind() == PropertyKind::Map && control.pos.is_some() {
            self.log
                .error_at(line, col, "map entries carry no position");
            return self.skip_subtree(self_closing);
        }
        if op == MergeOp::Remove && control.pos.is_some() {
            self.log
                .error_at(line, col, "'remove' cannot be combined with a position");
            return self.skip_subtree(self_closing);
        }

        if property.element_schema().is_none() {
            return self.scalar_entry(property, frame, op, control, self_closing, line, col);
        }
        self.item_entry(
            property,
            frame,
            tag_schema,
            op,
            control,
            attributes,
            self_closing,
            line,
            col,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn scalar_entry(
        &mut self,
        property: &Arc<Property>,
        frame: &mut Frame,
        op: MergeOp,
        control: &ControlAttrs,
        self_closing: bool,
        line: u32,
        col: u32,
    ) -> Result<()> {
        let text = self.collect_text(self_closing)?;
        let Some(codec) = property.codec().cloned() else {
            self.log.error_at(line, col, "collection property without codec");
            return Ok(());
        };
        let scalar = match codec.parse(&text) {
            Ok(scalar) => scalar,
            Err(err) => {
                self.log.error_at(line, col, format!("cannot parse entry: {err}"));
                return Ok(());
            }
        };
        // Scalar entries are keyed by their own value.
        let key = EntryKey::try_from(scalar.clone()).ok();
        let entry = ConfigValue::Scalar(scalar);
        self.merge_entry(property, frame, op, control, key, Some(entry), line, col);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn item_entry(
        &mut self,
        property: &Arc<Property>,
        frame: &mut Frame,
        tag_schema: Option<SchemaId>,
        op: MergeOp,
        control: &ControlAttrs,
        attributes: &[(String, String)],
        self_closing: bool,
        line: u32,
        col: u32,
    ) -> Result<()> {
        let Some(declared) = property.element_schema().cloned() else {
            self.log.error_at(line, col, "collection property without element schema");
            return self.skip_subtree(self_closing);
        };
        let fallback = match tag_schema {
            Some(id) => match self.ctx.descriptor(&id) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    self.log.error_at(line, col, err.to_string());
                    return self.skip_subtree(self_closing);
                }
            },
            None => match self.ctx.descriptor(&declared) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    self.log.error_at(line, col, err.to_string());
                    return self.skip_subtree(self_closing);
                }
            },
        };
        let Some(concrete) =
            self.concrete_descriptor(control, property.external_name(), Some(&declared), &fallback, line, col)
        else {
            return self.skip_subtree(self_closing);
        };

        // The key, read ahead from the attributes, addresses the working
        // list before the entry body is parsed.
        let key = property
            .key_property()
            .and_then(|name| self.attribute_key(&concrete, name, attributes));

        if op == MergeOp::Remove {
            self.skip_subtree(self_closing)?;
            self.merge_entry(property, frame, op, control, key, None, line, col);
            return Ok(());
        }

        // Update merges into a copy-seeded existing entry unless the
        // element declares itself a fresh definition.
        let base = match (op, &key) {
            (MergeOp::Update | MergeOp::AddOrUpdate, Some(key)) if !control.is_override => frame
                .collections[&property.id()]
                .index_of(key)
                .map(|at| frame.collections[&property.id()].entries[at].1.clone())
                .and_then(|value| value.as_item().cloned())
                .filter(|base| base.descriptor().is_assignable_to(concrete.schema())),
            _ => None,
        };
        let child = match base {
            Some(base) => match copy_item(&base) {
                Ok(copy) => copy,
                Err(err) => {
                    self.log.error_at(line, col, err.to_string());
                    return self.skip_subtree(self_closing);
                }
            },
            None => match self.ctx.factories.instantiate(&concrete) {
                Ok(child) => child,
                Err(err) => {
                    self.log.error_at(line, col, err.to_string());
                    return self.skip_subtree(self_closing);
                }
            },
        };
        child.set_location(line, col);
        let child_desc = child.descriptor();
        self.read_item_into(&child, &child_desc, attributes, self_closing)?;

        // The parsed body is authoritative for the key.
        let key = match property.key_property() {
            Some(name) => match entry_key_of(&child, name) {
                Ok(key) => Some(key),
                Err(err) => {
                    self.log
                        .error_at(line, col, format!("entry has no usable key: {err}"));
                    return Ok(());
                }
            },
            None => None,
        };
        self.merge_entry(
            property,
            frame,
            op,
            control,
            key,
            Some(ConfigValue::Item(child)),
            line,
            col,
        );
        Ok(())
    }

    /// Apply one merge operation to the working list.
    #[allow(clippy::too_many_arguments)]
    fn merge_entry(
        &mut self,
        property: &Arc<Property>,
        frame: &mut Frame,
        op: MergeOp,
        control: &ControlAttrs,
        key: Option<EntryKey>,
        entry: Option<ConfigValue>,
        line: u32,
        col: u32,
    ) {
        let working = frame
            .collections
            .get_mut(&property.id())
            .expect("working list initialized");
        match op {
            MergeOp::Remove => {
                let Some(key) = key else {
                    self.log.error_at(line, col, "'remove' requires an entry key");
                    return;
                };
                match working.index_of(&key) {
                    Some(at) => {
                        working.entries.remove(at);
                    }
                    None => self.log.error_at(
                        line,
                        col,
                        format!("cannot remove unknown entry '{key}'"),
                    ),
                }
            }
            MergeOp::Add => {
                let entry = entry.expect("add carries an entry");
                // Unkeyed lists may repeat values; keyed collections and
                // maps must not.
                let keyed = property.is_keyed() || property.kind() == PropertyKind::Map;
                if let Some(key) = &key {
                    if keyed && working.index_of(key).is_some() {
                        self.log
                            .error_at(line, col, format!("duplicate entry key '{key}'"));
                        return;
                    }
                }
                self.insert_entry(working, control, (key, entry), line, col);
            }
            MergeOp::Update => {
                let entry = entry.expect("update carries an entry");
                let Some(key) = key else {
                    self.log.error_at(line, col, "'update' requires an entry key");
                    return;
                };
                let Some(at) = working.index_of(&key) else {
                    self.log.error_at(
                        line,
                        col,
                        format!("cannot update unknown entry '{key}'"),
                    );
                    return;
                };
                if control.pos.is_some() {
                    working.entries.remove(at);
                    self.insert_entry(working, control, (Some(key), entry), line, col);
                } else {
                    working.entries[at] = (Some(key), entry);
                }
            }
            MergeOp::AddOrUpdate => {
                let entry = entry.expect("add-or-update carries an entry");
                match key.as_ref().and_then(|key| working.index_of(key)) {
                    Some(at) => {
                        if control.pos.is_some() {
                            working.entries.remove(at);
                            self.insert_entry(working, control, (key, entry), line, col);
                        } else {
                            working.entries[at] = (key, entry);
                        }
                    }
                    None => self.insert_entry(working, control, (key, entry), line, col),
                }
            }
        }
    }

    fn insert_entry(
        &mut self,
        working: &mut WorkingList,
        control: &ControlAttrs,
        entry: (Option<EntryKey>, ConfigValue),
        line: u32,
        col: u32,
    ) {
        let at = match control.pos.unwrap_or(Position::End) {
            Position::Begin => 0,
            Position::End => working.entries.len(),
            pos @ (Position::Before | Position::After) => {
                let anchor = control.anchor.as_deref().unwrap_or_default();
                let Some(anchor_at) = working.index_of_anchor(anchor) else {
                    self.log.error_at(
                        line,
                        col,
                        format!("anchor entry '{anchor}' not found"),
                    );
                    return;
                };
                if pos == Position::Before {
                    anchor_at
                } else {
                    anchor_at + 1
                }
            }
        };
        working.entries.insert(at, entry);
    }

    /// Read-ahead key extraction from an entry's attributes.
    fn attribute_key(
        &mut self,
        concrete: &Arc<Descriptor>,
        key_name: &str,
        attributes: &[(String, String)],
    ) -> Option<EntryKey> {
        let key_property = concrete.property(key_name)?;
        let codec = key_property.codec()?;
        let text = attributes
            .iter()
            .find(|(name, _)| {
                name == key_property.external_name() || name == key_property.name()
            })
            .map(|(_, value)| value)?;
        let scalar = codec.parse(text).ok()?;
        EntryKey::try_from(scalar).ok()
    }

    /// Lazily initialize the working list of one collection property,
    /// seeding from a base-provided value when the slot is set.
    fn ensure_working(&mut self, frame: &mut Frame, item: &Item, property: &Arc<Property>) -> Result<()> {
        if frame.collections.contains_key(&property.id()) {
            return Ok(());
        }
        let mut working = WorkingList {
            entries: Vec::new(),
            seeded: false,
        };
        if item.value_set(property.name())? {
            match item.value_of(property)? {
                ConfigValue::List(entries) => {
                    for entry in entries {
                        let key = self.entry_key(property, &entry);
                        working.entries.push((key, entry));
                    }
                }
                ConfigValue::Map(entries) => {
                    for (key, entry) in entries {
                        working.entries.push((Some(key), entry));
                    }
                }
                other => {
                    return Err(ConfitError::internal(format!(
                        "collection slot holds a {}",
                        other.shape_name()
                    )))
                }
            }
            working.seeded = true;
        }
        frame.collections.insert(property.id(), working);
        Ok(())
    }

    fn entry_key(&self, property: &Arc<Property>, entry: &ConfigValue) -> Option<EntryKey> {
        match entry {
            ConfigValue::Item(item) => property
                .key_property()
                .and_then(|name| entry_key_of(item, name).ok()),
            ConfigValue::Scalar(scalar) => EntryKey::try_from(scalar.clone()).ok(),
            _ => None,
        }
    }

    fn commit_collections(&mut self, item: &Item, descriptor: &Arc<Descriptor>, frame: Frame) {
        let (line, col) = self.lexer.position();
        for (id, working) in frame.collections {
            let Some(property) = descriptor.property_by_id(id).cloned() else {
                continue;
            };
            let value = match property.kind() {
                PropertyKind::Map => {
                    let mut entries = IndexMap::with_capacity(working.entries.len());
                    for (key, entry) in working.entries {
                        let Some(key) = key else {
                            self.log.error_at(line, col, "map entry without key");
                            continue;
                        };
                        entries.insert(key, entry);
                    }
                    ConfigValue::Map(entries)
                }
                _ => ConfigValue::List(
                    working.entries.into_iter().map(|(_, entry)| entry).collect(),
                ),
            };
            self.try_update(item, &property, value, line, col);
        }
    }

    // -- shared plumbing --

    /// Mark a property processed; a second claim within one element is a
    /// duplicate assignment.
    fn claim(&mut self, frame: &mut Frame, property: &Arc<Property>, line: u32, col: u32) -> bool {
        if frame.processed.insert(property.id()) {
            true
        } else {
            self.log.error_at(
                line,
                col,
                format!("property '{}' is assigned twice", property.external_name()),
            );
            false
        }
    }

    fn try_update(&mut self, item: &Item, property: &Arc<Property>, value: ConfigValue, line: u32, col: u32) {
        if let Err(err) = item.update_of(property, value) {
            self.log.error_at(line, col, err.to_string());
        }
    }

    /// The concatenated text content of the current element, consumed
    /// through its closing tag. Nested elements are defects.
    fn collect_text(&mut self, self_closing: bool) -> Result<String> {
        if self_closing {
            return Ok(String::new());
        }
        let mut out = String::new();
        loop {
            match self.next()? {
                XmlToken::End { .. } => return Ok(out),
                XmlToken::Text { text, .. } => out.push_str(&text),
                XmlToken::Start {
                    name,
                    self_closing,
                    line,
                    col,
                    ..
                } => {
                    self.log.error_at(
                        line,
                        col,
                        format!("unexpected element <{name}> inside scalar content"),
                    );
                    self.skip_subtree(self_closing)?;
                }
                XmlToken::Eof => {
                    let (line, col) = self.lexer.position();
                    return Err(self.abort(line, col, "unexpected end of input inside an element"));
                }
            }
        }
    }

    /// Consume the rest of the current element, including its closing
    /// tag.
    fn skip_subtree(&mut self, self_closing: bool) -> Result<()> {
        if self_closing {
            return Ok(());
        }
        let mut depth = 0_usize;
        loop {
            match self.next()? {
                XmlToken::Start { self_closing, .. } => {
                    if !self_closing {
                        depth += 1;
                    }
                }
                XmlToken::End { .. } => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
                XmlToken::Text { .. } => {}
                XmlToken::Eof => {
                    let (line, col) = self.lexer.position();
                    return Err(self.abort(line, col, "unexpected end of input inside an element"));
                }
            }
        }
    }
}

fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

// ---------------------------------------------------------------------------
// BindingSource over one property subtree
// ---------------------------------------------------------------------------

struct SubtreeSource<'r, 'a, 'c> {
    reader: &'r mut Reader<'a, 'c>,
    depth: usize,
    pending_end: bool,
    done: bool,
}

impl BindingSource for SubtreeSource<'_, '_, '_> {
    fn next_event(&mut self) -> Result<Option<BindingEvent>> {
        if self.pending_end {
            self.pending_end = false;
            return Ok(Some(BindingEvent::End));
        }
        if self.done {
            return Ok(None);
        }
        match self.reader.next()? {
            XmlToken::Start {
                name,
                attributes,
                self_closing,
                ..
            } => {
                if self_closing {
                    self.pending_end = true;
                } else {
                    self.depth += 1;
                }
                let attributes = attributes
                    .into_iter()
                    .filter(|(n, _)| n != "xmlns" && !n.starts_with("xmlns:"))
                    .collect();
                Ok(Some(BindingEvent::Start { name, attributes }))
            }
            XmlToken::End { .. } => {
                if self.depth == 0 {
                    self.done = true;
                    Ok(None)
                } else {
                    self.depth -= 1;
                    Ok(Some(BindingEvent::End))
                }
            }
            XmlToken::Text { text, .. } => Ok(Some(BindingEvent::Text(text))),
            XmlToken::Eof => {
                let (line, col) = self.reader.lexer.position();
                Err(self
                    .reader
                    .abort(line, col, "unexpected end of input inside a bound subtree"))
            }
        }
    }

    fn position(&self) -> (u32, u32) {
        self.reader.lexer.position()
    }
}
