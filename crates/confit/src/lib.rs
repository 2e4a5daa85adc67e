//! Public API facade for the confit configuration engine.
//!
//! The [`Engine`] bundles the four moving parts a host application needs:
//! a schema set, the codec registry, the descriptor registry and the
//! factory table. Hosts with special needs can assemble the parts
//! directly from the member crates; everything relevant is re-exported
//! here.
//!
//! ```
//! use confit::{DeclaredType, Engine, PropertyDef, SchemaDef};
//!
//! let mut engine = Engine::new();
//! engine
//!     .add_schema(
//!         SchemaDef::new("server")
//!             .property(PropertyDef::new("host").declared(DeclaredType::named("string")))
//!             .property(PropertyDef::new("port").declared(DeclaredType::named("int"))),
//!     )
//!     .unwrap();
//!
//! let item = engine.parse(r#"<server host="db1" port="5432"/>"#, "server").unwrap();
//! assert_eq!(
//!     engine.write(&item, "server", "server").unwrap(),
//!     r#"<server host="db1" port="5432"/>"#
//! );
//! ```

use std::sync::Arc;

use tracing::debug;

pub use confit_codec::{
    BindingEvent, BindingSink, BindingSource, CodecRegistry, ValueBinding, ValueCodec,
};
pub use confit_core::{
    check_item, config_eq, copy_item, effective_default, entry_key_of, ConfigValue, Descriptor,
    DescriptorRegistry, FactoryTable, GenericFactory, Item, ItemFactory, ListenerKey, Property,
    PropertyDef, SchemaDef, SchemaSet, SchemaSource, ValueChange,
};
pub use confit_error::{ConfitError, ErrorLog, Result};
pub use confit_types::{
    ComplexPayload, ComplexValue, DeclaredType, DefaultSpec, EntryKey, ItemTemplateSpec,
    PropertyId, PropertyKind, ScalarValue, SchemaId,
};
pub use confit_xml::{DocumentContext, MergeOp, Position, CONTROL_NS, CONTROL_PREFIX};

/// One assembled configuration engine.
///
/// Descriptors are resolved lazily and cached; schema definitions,
/// codecs and factories should therefore be registered before the first
/// resolve touches the schemas involved.
pub struct Engine {
    schemas: SchemaSet,
    codecs: CodecRegistry,
    registry: DescriptorRegistry,
    factories: FactoryTable,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with the built-in codecs and the generic item factory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schemas: SchemaSet::new(),
            codecs: CodecRegistry::with_builtins(),
            registry: DescriptorRegistry::new(),
            factories: FactoryTable::new(),
        }
    }

    /// Register a schema definition.
    pub fn add_schema(&mut self, def: SchemaDef) -> Result<()> {
        self.schemas.add(def)
    }

    /// The registered schema definitions.
    #[must_use]
    pub fn schemas(&self) -> &SchemaSet {
        &self.schemas
    }

    /// Codec and binding registration surface.
    pub fn codecs_mut(&mut self) -> &mut CodecRegistry {
        &mut self.codecs
    }

    /// Factory registration surface.
    pub fn factories_mut(&mut self) -> &mut FactoryTable {
        &mut self.factories
    }

    /// Resolve one schema to its frozen descriptor, building it and its
    /// dependencies on first use.
    pub fn resolve(&self, id: impl Into<SchemaId>) -> Result<Arc<Descriptor>> {
        self.registry.resolve(&id.into(), &self.schemas, &self.codecs)
    }

    /// Resolve every registered schema in one all-or-nothing session.
    pub fn resolve_all(&self) -> Result<Vec<Arc<Descriptor>>> {
        let resolved = self
            .registry
            .resolve_all(self.schemas.ids(), &self.schemas, &self.codecs)?;
        debug!(count = resolved.len(), "schema set resolved");
        Ok(resolved)
    }

    /// A fresh item of a schema, defaults unset.
    pub fn new_instance(&self, id: impl Into<SchemaId>) -> Result<Item> {
        let descriptor = self.resolve(id)?;
        self.factories.instantiate(&descriptor)
    }

    /// Parse a document against a declared root schema, failing on any
    /// defect.
    pub fn parse(&self, text: &str, declared: impl Into<SchemaId>) -> Result<Item> {
        confit_xml::parse(text, &self.context(), &declared.into(), None)
    }

    /// Parse a document as a refinement of `base`: the result starts as
    /// a deep copy of `base` and the document's assignments and entry
    /// operations are merged in.
    pub fn parse_over(
        &self,
        text: &str,
        declared: impl Into<SchemaId>,
        base: &Item,
    ) -> Result<Item> {
        confit_xml::parse(text, &self.context(), &declared.into(), Some(base))
    }

    /// Parse a document, collecting recoverable defects instead of
    /// failing on the first one.
    pub fn read_document(
        &self,
        text: &str,
        declared: impl Into<SchemaId>,
        base: Option<&Item>,
    ) -> (Option<Item>, ErrorLog) {
        confit_xml::read_document(text, &self.context(), &declared.into(), base)
    }

    /// Serialize an item as a document with the given root tag.
    pub fn write(
        &self,
        item: &Item,
        declared: impl Into<SchemaId>,
        root_tag: &str,
    ) -> Result<String> {
        confit_xml::write_document(item, &declared.into(), root_tag)
    }

    /// Run the mandatory-property check over an item tree.
    #[must_use]
    pub fn check(&self, item: &Item) -> ErrorLog {
        let mut log = ErrorLog::new();
        check_item(item, &mut log);
        log
    }

    /// The document context view over this engine, for direct use of the
    /// document layer.
    #[must_use]
    pub fn context(&self) -> DocumentContext<'_> {
        DocumentContext {
            registry: &self.registry,
            source: &self.schemas,
            codecs: &self.codecs,
            factories: &self.factories,
        }
    }
}
