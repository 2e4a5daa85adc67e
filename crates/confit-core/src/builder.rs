//! Descriptor building: schema definitions to frozen descriptors.
//!
//! A [`BuildSession`] resolves schemas recursively, supers first, against
//! one schema source and one codec registry. Structural defects never
//! abort the session; they are collected into the session's error log so
//! one run reports every problem of the schema set. Descriptors built by
//! a session stay pending until the registry commits them; a session
//! finishing with errors publishes nothing.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::map::Entry;
use indexmap::IndexMap;
use tracing::debug;

use confit_codec::{CodecRegistry, ValueBinding, ValueCodec};
use confit_error::ErrorLog;
use confit_types::{
    DeclaredType, DefaultSpec, PropertyId, PropertyKind, ScalarValue, SchemaId,
};

use crate::descriptor::Descriptor;
use crate::hints::{PropertyDef, SchemaDef, SchemaSource};
use crate::property::{
    DefaultInit, DerivedFn, PerInstanceInit, Property, ResolvedDefault, SharedValue,
};

/// One transactional build run.
///
/// Holds the pending descriptors of this session plus the error log; the
/// published map is the registry's, read-only here. Re-entrant resolve
/// calls see pending descriptors, so diamond-shaped super graphs build
/// each schema once.
pub(crate) struct BuildSession<'a> {
    source: &'a dyn SchemaSource,
    codecs: &'a CodecRegistry,
    published: &'a HashMap<SchemaId, Arc<Descriptor>>,
    pending: IndexMap<SchemaId, Arc<Descriptor>>,
    in_progress: Vec<SchemaId>,
    errors: ErrorLog,
}

impl<'a> BuildSession<'a> {
    pub(crate) fn new(
        source: &'a dyn SchemaSource,
        codecs: &'a CodecRegistry,
        published: &'a HashMap<SchemaId, Arc<Descriptor>>,
    ) -> Self {
        Self {
            source,
            codecs,
            published,
            pending: IndexMap::new(),
            in_progress: Vec::new(),
            errors: ErrorLog::new(),
        }
    }

    /// Resolve one schema, building it and its supers as needed.
    ///
    /// `None` means the schema could not be built; the reasons are in the
    /// session log.
    pub(crate) fn resolve(&mut self, id: &SchemaId) -> Option<Arc<Descriptor>> {
        if let Some(found) = self.published.get(id).or_else(|| self.pending.get(id)) {
            return Some(Arc::clone(found));
        }
        if id.is_base() {
            let base = base_descriptor();
            self.pending.insert(id.clone(), Arc::clone(&base));
            return Some(base);
        }
        if self.in_progress.contains(id) {
            let mut cycle: Vec<&str> = self.in_progress.iter().map(SchemaId::as_str).collect();
            cycle.push(id.as_str());
            self.errors
                .error(format!("inheritance cycle: {}", cycle.join(" -> ")));
            return None;
        }
        let source = self.source;
        let Some(def) = source.schema_def(id) else {
            self.errors.error(format!("unknown schema '{id}'"));
            return None;
        };

        self.in_progress.push(id.clone());
        let descriptor = self.build(def);
        self.in_progress.pop();

        if let Some(ref descriptor) = descriptor {
            debug!(schema = %id, properties = descriptor.property_count(), "descriptor built");
            self.pending.insert(id.clone(), Arc::clone(descriptor));
        }
        descriptor
    }

    /// Finish the session: the pending set on success, the aggregated
    /// build failure otherwise.
    pub(crate) fn finish(self) -> confit_error::Result<IndexMap<SchemaId, Arc<Descriptor>>> {
        let pending = self.pending;
        self.errors.into_build_result()?;
        Ok(pending)
    }

    pub(crate) fn error_count(&self) -> usize {
        self.errors.error_count()
    }

    // -- schema assembly --

    fn build(&mut self, def: &SchemaDef) -> Option<Arc<Descriptor>> {
        let mut supers = Vec::new();
        let mut missing_super = false;
        if def.supers.is_empty() {
            if let Some(base) = self.resolve(&SchemaId::base()) {
                supers.push(base);
            }
        } else {
            for parent in &def.supers {
                match self.resolve(parent) {
                    Some(descriptor) => supers.push(descriptor),
                    None => missing_super = true,
                }
            }
        }
        if missing_super {
            // The supers' own defects are already logged; without them the
            // merge would only produce follow-up noise.
            return None;
        }

        let mut merged = self.merge_inherited(&def.id, &supers);
        for own in &def.properties {
            self.apply_own(&def.id, &mut merged, own);
        }

        let mut properties: Vec<Arc<Property>> = Vec::with_capacity(merged.len());
        let mut by_internal = HashMap::new();
        let mut by_external: HashMap<String, PropertyId> = HashMap::new();
        let mut is_abstract = def.is_abstract;
        let mut default_container = None;

        for (index, (name, pending)) in merged.into_iter().enumerate() {
            let id = PropertyId::new(u32::try_from(index).unwrap_or(u32::MAX));
            if pending.is_abstract {
                is_abstract = true;
            }
            if pending.default_container {
                if default_container.is_some() {
                    self.errors.error(format!(
                        "schema '{}': more than one default container property",
                        def.id
                    ));
                } else {
                    default_container = Some(id);
                }
            }
            let property = self.freeze_property(&def.id, id, pending);
            if let Some(clash) = by_external.get(property.external_name()) {
                let other = properties[clash.index()].name();
                self.errors.error(format!(
                    "schema '{}': properties '{other}' and '{name}' share document name '{}'",
                    def.id,
                    property.external_name()
                ));
            }
            by_internal.insert(name, id);
            by_external.insert(property.external_name().to_owned(), id);
            properties.push(Arc::new(property));
        }

        let id_property = self.resolve_id_property(def, &by_internal, &properties);

        Some(Arc::new(Descriptor {
            schema: def.id.clone(),
            supers,
            properties,
            by_internal,
            by_external,
            is_abstract,
            tag_name: def.tag_name.clone(),
            id_property,
            id_scope: def.id_scope.clone(),
            default_container,
        }))
    }

    fn resolve_id_property(
        &mut self,
        def: &SchemaDef,
        by_internal: &HashMap<String, PropertyId>,
        properties: &[Arc<Property>],
    ) -> Option<PropertyId> {
        let name = def.id_property.as_deref()?;
        let Some(&id) = by_internal.get(name) else {
            self.errors.error(format!(
                "schema '{}': identity property '{name}' does not exist",
                def.id
            ));
            return None;
        };
        let property = &properties[id.index()];
        if property.kind() != PropertyKind::Plain {
            self.errors.error(format!(
                "schema '{}': identity property '{name}' must be plain, is {}",
                def.id,
                property.kind()
            ));
            return None;
        }
        if let Some(scope) = &def.id_scope {
            if !scope.is_base() && self.resolve(scope).is_none() {
                return None;
            }
        }
        Some(id)
    }

    // -- inheritance merge --

    fn merge_inherited(
        &mut self,
        schema: &SchemaId,
        supers: &[Arc<Descriptor>],
    ) -> IndexMap<String, PendingProperty> {
        let mut merged: IndexMap<String, PendingProperty> = IndexMap::new();
        for parent in supers {
            for inherited in parent.properties() {
                match merged.entry(inherited.name().to_owned()) {
                    Entry::Vacant(slot) => {
                        slot.insert(PendingProperty::from_inherited(inherited));
                    }
                    Entry::Occupied(mut slot) => {
                        self.merge_one(schema, slot.get_mut(), inherited);
                    }
                }
            }
        }
        merged
    }

    /// Fold one more inherited declaration into an existing pending
    /// property, reporting every disagreement.
    fn merge_one(&mut self, schema: &SchemaId, pending: &mut PendingProperty, other: &Property) {
        let name = other.name();
        if pending.kind != other.kind() {
            self.errors.error(format!(
                "schema '{schema}': property '{name}' inherited as {} from '{}' and as {} from '{}'",
                pending.kind, pending.declared_by, other.kind(), other.declared_by()
            ));
            return;
        }
        if pending.key_property.as_deref() != other.key_property() {
            self.errors.error(format!(
                "schema '{schema}': property '{name}' inherits conflicting key properties"
            ));
        }
        if pending.external_name != other.external_name() {
            self.errors.error(format!(
                "schema '{schema}': property '{name}' inherits conflicting document names \
                 '{}' and '{}'",
                pending.external_name,
                other.external_name()
            ));
        }
        match (pending.codec.as_ref(), other.codec()) {
            (Some(a), Some(b)) if a.name() != b.name() => {
                self.errors.error(format!(
                    "schema '{schema}': property '{name}' inherits conflicting codecs \
                     '{}' and '{}'",
                    a.name(),
                    b.name()
                ));
            }
            (None, Some(b)) => pending.codec = Some(Arc::clone(b)),
            _ => {}
        }
        match (pending.binding.as_ref(), other.binding()) {
            (Some(a), Some(b)) if a.name() != b.name() => {
                self.errors.error(format!(
                    "schema '{schema}': property '{name}' inherits conflicting bindings \
                     '{}' and '{}'",
                    a.name(),
                    b.name()
                ));
            }
            (None, Some(b)) => pending.binding = Some(Arc::clone(b)),
            _ => {}
        }

        // Element types merge to the most specific one.
        if let (Some(current), Some(incoming)) =
            (pending.element_schema.clone(), other.element_schema())
        {
            if &current != incoming {
                match self.more_specific(&current, incoming) {
                    Some(specific) => pending.element_schema = Some(specific),
                    None => self.errors.error(format!(
                        "schema '{schema}': property '{name}' inherits incomparable element \
                         types '{current}' and '{incoming}'"
                    )),
                }
            }
        } else if pending.element_schema.is_none() {
            pending.element_schema = other.element_schema().cloned();
        }

        pending.mandatory |= other.is_mandatory();
        pending.nullable |= other.is_nullable();
        pending.is_abstract |= other.is_abstract();
        for (tag, target) in other.subtype_tags() {
            pending
                .subtype_tags
                .entry(tag.clone())
                .or_insert_with(|| target.clone());
        }
        if pending.derived.is_none() {
            pending.derived = other.derived().cloned();
        }

        // First-declared explicit default wins; implicit ones never
        // shadow an explicit one.
        if !pending.default_explicit && other.default_explicit {
            pending.default = PendingDefault::Inherited(other.default.clone());
            pending.default_explicit = true;
        }

        if pending.mandatory && pending.default_explicit {
            self.errors.error(format!(
                "schema '{schema}': property '{name}' inherits both a default and the \
                 mandatory marker"
            ));
        }
    }

    /// The more specific of two schemas, when one is assignable to the
    /// other.
    fn more_specific(&mut self, a: &SchemaId, b: &SchemaId) -> Option<SchemaId> {
        let da = self.resolve(a)?;
        let db = self.resolve(b)?;
        if da.is_assignable_to(b) {
            Some(a.clone())
        } else if db.is_assignable_to(a) {
            Some(b.clone())
        } else {
            None
        }
    }

    // -- own declarations --

    fn apply_own(
        &mut self,
        schema: &SchemaId,
        merged: &mut IndexMap<String, PendingProperty>,
        def: &PropertyDef,
    ) {
        self.check_exclusivity(schema, def);
        if merged.contains_key(&def.name) {
            self.refine(schema, merged, def);
        } else if let Some(fresh) = self.infer_fresh(schema, def) {
            merged.insert(def.name.clone(), fresh);
        }
    }

    fn check_exclusivity(&mut self, schema: &SchemaId, def: &PropertyDef) {
        let mut annotations = Vec::new();
        if def.default.is_some() {
            annotations.push("default");
        }
        if def.mandatory {
            annotations.push("mandatory");
        }
        if def.derived.is_some() {
            annotations.push("derived");
        }
        if def.container {
            annotations.push("container");
        }
        if annotations.len() > 1 {
            self.errors.error(format!(
                "schema '{schema}': property '{}' carries conflicting value annotations: {}",
                def.name,
                annotations.join(", ")
            ));
        }
    }

    /// Refine an inherited property with an own redeclaration.
    fn refine(
        &mut self,
        schema: &SchemaId,
        merged: &mut IndexMap<String, PendingProperty>,
        def: &PropertyDef,
    ) {
        // Kind re-inference on conflicting redeclarations.
        if let Some(declared) = &def.declared_type {
            let inherited_kind = merged[&def.name].kind;
            if let Some(declared_kind) = self.kind_of_declared(declared) {
                if declared_kind != inherited_kind {
                    self.errors.error(format!(
                        "schema '{schema}': property '{}' redeclared as {declared_kind}, \
                         inherited as {inherited_kind}",
                        def.name
                    ));
                    return;
                }
            }
            // Element narrowing.
            if let Some(narrowed) = element_schema_of(declared) {
                let pending = &merged[&def.name];
                if let Some(current) = pending.element_schema.clone() {
                    if current != narrowed {
                        let assignable = self
                            .resolve(&narrowed)
                            .is_some_and(|d| d.is_assignable_to(&current));
                        if assignable {
                            merged[&def.name].element_schema = Some(narrowed.clone());
                        } else {
                            self.errors.error(format!(
                                "schema '{schema}': property '{}' narrows element type to \
                                 '{narrowed}', which is not assignable to '{current}'",
                                def.name
                            ));
                        }
                    }
                } else {
                    merged[&def.name].element_schema = Some(narrowed);
                }
            }
        }

        let pending = &mut merged[&def.name];
        if def.derived.is_some() || def.container {
            self.errors.error(format!(
                "schema '{schema}': property '{}' cannot be redeclared derived or container",
                def.name
            ));
            return;
        }
        if let Some(key) = &def.key_property {
            match &pending.key_property {
                Some(existing) if existing != key => self.errors.error(format!(
                    "schema '{schema}': property '{}' redeclares key property '{key}', \
                     inherited '{existing}'",
                    def.name
                )),
                _ => pending.key_property = Some(key.clone()),
            }
        }
        if let Some(external) = &def.external_name {
            pending.external_name.clone_from(external);
        }
        if let Some(codec) = &def.codec {
            match self.codecs.find_codec(codec) {
                Some(found) => pending.codec = Some(found),
                None => self
                    .errors
                    .error(format!("schema '{schema}': unknown codec '{codec}'")),
            }
        }
        pending.mandatory |= def.mandatory;
        pending.nullable |= def.nullable;
        if def.is_abstract {
            pending.is_abstract = true;
        } else if def.default.is_some() || def.declared_type.is_some() {
            // A concrete redeclaration implements an abstract inherited
            // property.
            pending.is_abstract = false;
        }
        for (tag, target) in &def.subtype_tags {
            pending.subtype_tags.insert(tag.clone(), target.clone());
        }
        if def.default_container {
            pending.default_container = true;
        }
        if let Some(spec) = &def.default {
            if pending.mandatory && !def.mandatory {
                self.errors.error(format!(
                    "schema '{schema}': property '{}' adds a default to an inherited \
                     mandatory property",
                    def.name
                ));
            }
            pending.default = PendingDefault::Own(spec.clone());
            pending.default_explicit = true;
        } else if def.mandatory && pending.default_explicit {
            self.errors.error(format!(
                "schema '{schema}': property '{}' adds the mandatory marker to an \
                 inherited default",
                def.name
            ));
        }
    }

    /// The kind a declared type maps to, ignoring hints. `None` when the
    /// type name resolves to nothing (reported elsewhere).
    fn kind_of_declared(&mut self, declared: &DeclaredType) -> Option<PropertyKind> {
        match declared {
            DeclaredType::List(_) => Some(PropertyKind::List),
            DeclaredType::Array(_) => Some(PropertyKind::Array),
            DeclaredType::Map(_) => Some(PropertyKind::Map),
            DeclaredType::Schema(_) => Some(PropertyKind::Item),
            DeclaredType::Named(name) => {
                if self.codecs.contains_codec(name) {
                    Some(PropertyKind::Plain)
                } else if self.codecs.contains_binding(name) {
                    Some(PropertyKind::Complex)
                } else if self.schema_exists(&SchemaId::new(name.as_str())) {
                    Some(PropertyKind::Item)
                } else {
                    None
                }
            }
        }
    }

    // -- fresh property inference --

    fn infer_fresh(&mut self, schema: &SchemaId, def: &PropertyDef) -> Option<PendingProperty> {
        let context = format!("schema '{schema}': property '{}'", def.name);
        let mut pending = PendingProperty::fresh(schema, def);

        if def.container {
            pending.kind = PropertyKind::Ref;
            pending.element_schema = def.declared_type.as_ref().and_then(element_schema_of);
            return self.finish_fresh(&context, def, pending);
        }
        if let Some(derived) = &def.derived {
            pending.kind = PropertyKind::Derived;
            pending.derived = Some(Arc::clone(derived));
            return self.finish_fresh(&context, def, pending);
        }
        if let Some(binding) = &def.binding {
            let Some(found) = self.codecs.find_binding(binding) else {
                self.errors
                    .error(format!("{context}: unknown binding '{binding}'"));
                return None;
            };
            pending.kind = PropertyKind::Complex;
            pending.binding = Some(found);
            self.finish_fresh(&context, def, pending)
        } else if let Some(declared) = def.declared_type.clone() {
            match declared {
                DeclaredType::List(element) => {
                    self.infer_collection(&context, def, pending, PropertyKind::List, &element)
                }
                DeclaredType::Array(element) => {
                    self.infer_collection(&context, def, pending, PropertyKind::Array, &element)
                }
                DeclaredType::Map(element) => {
                    self.infer_collection(&context, def, pending, PropertyKind::Map, &element)
                }
                DeclaredType::Schema(element) => {
                    self.infer_item(&context, def, pending, &element)
                }
                DeclaredType::Named(name) => {
                    if let Some(codec) = &def.codec {
                        // Explicit codec wins over the declared name.
                        let Some(found) = self.codecs.find_codec(codec) else {
                            self.errors
                                .error(format!("{context}: unknown codec '{codec}'"));
                            return None;
                        };
                        pending.kind = PropertyKind::Plain;
                        pending.codec = Some(found);
                        return self.finish_fresh(&context, def, pending);
                    }
                    if let Some(codec) = self.codecs.find_codec(&name) {
                        pending.kind = PropertyKind::Plain;
                        pending.codec = Some(codec);
                        self.finish_fresh(&context, def, pending)
                    } else if let Some(binding) = self.codecs.find_binding(&name) {
                        pending.kind = PropertyKind::Complex;
                        pending.binding = Some(binding);
                        self.finish_fresh(&context, def, pending)
                    } else {
                        let as_schema = SchemaId::new(name.as_str());
                        if self.schema_exists(&as_schema) {
                            self.infer_item(&context, def, pending, &as_schema)
                        } else {
                            self.errors.error(format!(
                                "{context}: '{name}' names neither a codec, a binding nor \
                                 a schema"
                            ));
                            None
                        }
                    }
                }
            }
        } else if let Some(codec) = &def.codec {
            let Some(found) = self.codecs.find_codec(codec) else {
                self.errors
                    .error(format!("{context}: unknown codec '{codec}'"));
                return None;
            };
            pending.kind = PropertyKind::Plain;
            pending.codec = Some(found);
            self.finish_fresh(&context, def, pending)
        } else {
            self.errors.error(format!("{context}: no type declared"));
            None
        }
    }

    fn infer_item(
        &mut self,
        context: &str,
        def: &PropertyDef,
        mut pending: PendingProperty,
        element: &SchemaId,
    ) -> Option<PendingProperty> {
        let resolved = self.resolve(element);
        if resolved.is_none() {
            return None;
        }
        pending.kind = PropertyKind::Item;
        pending.element_schema = Some(element.clone());

        // An item property may carry a scalar codec for an attribute
        // form; the parsed scalar lands in the key property of a fresh
        // element instance.
        if let Some(codec) = &def.codec {
            let Some(found) = self.codecs.find_codec(codec) else {
                self.errors
                    .error(format!("{context}: unknown codec '{codec}'"));
                return None;
            };
            if def.key_property.is_none() {
                self.errors.error(format!(
                    "{context}: a codec on an item property needs a key property to \
                     receive the parsed value"
                ));
                return None;
            }
            pending.codec = Some(found);
        }
        self.validate_key_property(context, &pending, element);
        self.validate_subtype_tags(context, &pending, element);
        self.finish_fresh(context, def, pending)
    }

    fn infer_collection(
        &mut self,
        context: &str,
        def: &PropertyDef,
        mut pending: PendingProperty,
        kind: PropertyKind,
        element: &DeclaredType,
    ) -> Option<PendingProperty> {
        pending.kind = kind;
        if def.nullable {
            self.errors
                .error(format!("{context}: collections cannot be nullable"));
        }
        if def.codec.is_some() && kind != PropertyKind::Array {
            self.errors.error(format!(
                "{context}: an attribute-encoding codec only applies to array properties"
            ));
        }
        match element {
            DeclaredType::Named(name) => {
                // The same resolution order as top-level named types,
                // minus bindings: codec first, then schema.
                let is_scalar = def.codec.is_some() || self.codecs.contains_codec(name);
                let as_schema = SchemaId::new(name.as_str());
                if !is_scalar && self.schema_exists(&as_schema) {
                    return self.collection_of_items(context, def, pending, kind, &as_schema);
                }
                let lookup = def.codec.as_deref().unwrap_or(name.as_str());
                let Some(codec) = self.codecs.find_codec(lookup) else {
                    self.errors.error(format!(
                        "{context}: element type '{lookup}' names neither a codec nor a schema"
                    ));
                    return None;
                };
                if kind == PropertyKind::Map {
                    self.errors
                        .error(format!("{context}: map element type must be a schema"));
                    return None;
                }
                if def.key_property.is_some() {
                    self.errors.error(format!(
                        "{context}: scalar collections cannot be keyed"
                    ));
                }
                pending.codec = Some(codec);
                self.finish_fresh(context, def, pending)
            }
            DeclaredType::Schema(element_schema) => {
                let element_schema = element_schema.clone();
                self.collection_of_items(context, def, pending, kind, &element_schema)
            }
            nested => {
                self.errors.error(format!(
                    "{context}: nested collection element type '{nested}' is not supported"
                ));
                None
            }
        }
    }

    fn collection_of_items(
        &mut self,
        context: &str,
        def: &PropertyDef,
        mut pending: PendingProperty,
        kind: PropertyKind,
        element: &SchemaId,
    ) -> Option<PendingProperty> {
        if self.resolve(element).is_none() {
            return None;
        }
        if def.codec.is_some() && kind == PropertyKind::Array {
            self.errors.error(format!(
                "{context}: an attribute-encoding codec requires scalar elements"
            ));
        }
        pending.element_schema = Some(element.clone());
        if kind == PropertyKind::Map && pending.key_property.is_none() {
            self.errors
                .error(format!("{context}: map properties need a key property"));
            return None;
        }
        self.validate_key_property(context, &pending, element);
        self.validate_subtype_tags(context, &pending, element);
        self.finish_fresh(context, def, pending)
    }

    /// Whether `id` is resolvable at all: already published, pending in
    /// this session, or defined in the source.
    fn schema_exists(&self, id: &SchemaId) -> bool {
        id.is_base()
            || self.published.contains_key(id)
            || self.pending.contains_key(id)
            || self.source.schema_def(id).is_some()
    }

    fn validate_key_property(
        &mut self,
        context: &str,
        pending: &PendingProperty,
        element: &SchemaId,
    ) {
        let Some(key) = &pending.key_property else {
            return;
        };
        let Some(descriptor) = self.resolve(element) else {
            return;
        };
        match descriptor.property(key) {
            None => self.errors.error(format!(
                "{context}: key property '{key}' does not exist on schema '{element}'"
            )),
            Some(found) if found.kind() != PropertyKind::Plain => self.errors.error(format!(
                "{context}: key property '{key}' must be plain, is {}",
                found.kind()
            )),
            Some(_) => {}
        }
    }

    fn validate_subtype_tags(
        &mut self,
        context: &str,
        pending: &PendingProperty,
        element: &SchemaId,
    ) {
        let tags: Vec<(String, SchemaId)> = pending
            .subtype_tags
            .iter()
            .map(|(tag, target)| (tag.clone(), target.clone()))
            .collect();
        for (tag, target) in tags {
            let Some(descriptor) = self.resolve(&target) else {
                continue;
            };
            if !descriptor.is_assignable_to(element) {
                self.errors.error(format!(
                    "{context}: tag '{tag}' maps to '{target}', which is not assignable \
                     to '{element}'"
                ));
            }
        }
    }

    /// Common tail of fresh-property inference: hint placement rules
    /// that depend on the inferred kind.
    fn finish_fresh(
        &mut self,
        context: &str,
        def: &PropertyDef,
        pending: PendingProperty,
    ) -> Option<PendingProperty> {
        if pending.key_property.is_some()
            && !matches!(
                pending.kind,
                PropertyKind::Item | PropertyKind::Array | PropertyKind::List | PropertyKind::Map
            )
        {
            self.errors.error(format!(
                "{context}: key properties only apply to item and collection properties"
            ));
        }
        if def.default_container
            && !matches!(
                pending.kind,
                PropertyKind::Item | PropertyKind::List | PropertyKind::Array | PropertyKind::Map
            )
        {
            self.errors.error(format!(
                "{context}: only item and collection properties can be the default container"
            ));
        }
        if def.codec.is_some()
            && matches!(
                pending.kind,
                PropertyKind::Complex | PropertyKind::Derived | PropertyKind::Ref
            )
        {
            self.errors.error(format!(
                "{context}: a scalar codec does not apply to {} properties",
                pending.kind
            ));
        }
        if def.binding.is_some() && pending.kind != PropertyKind::Complex {
            self.errors.error(format!(
                "{context}: a value binding does not apply to {} properties",
                pending.kind
            ));
        }
        Some(pending)
    }

    // -- default resolution --

    fn freeze_property(
        &mut self,
        schema: &SchemaId,
        id: PropertyId,
        pending: PendingProperty,
    ) -> Property {
        let context = format!("schema '{schema}': property '{}'", pending.name);
        // Conflicting annotations are already reported; mandatory wins
        // over any default here so the read path stays consistent.
        let (default, default_explicit) = if pending.mandatory {
            (DefaultInit::None, false)
        } else {
            match &pending.default {
                PendingDefault::Inherited(init) => (init.clone(), true),
                PendingDefault::Own(spec) => (
                    self.resolve_top_default(&context, &pending, spec)
                        .unwrap_or(DefaultInit::None),
                    true,
                ),
                PendingDefault::Unspecified => (self.implicit_default(&pending), false),
            }
        };
        Property {
            id,
            name: pending.name,
            external_name: pending.external_name,
            kind: pending.kind,
            declared_type: pending.declared_type,
            element_schema: pending.element_schema,
            codec: pending.codec,
            binding: pending.binding,
            mandatory: pending.mandatory,
            nullable: pending.nullable,
            is_abstract: pending.is_abstract,
            key_property: pending.key_property,
            subtype_tags: pending.subtype_tags,
            default,
            default_explicit,
            derived: pending.derived,
            declared_by: pending.declared_by,
        }
    }

    /// The implicit default of a property without an explicit one: the
    /// codec zero for non-nullable plain properties, null when nullable,
    /// the kind default otherwise.
    fn implicit_default(&self, pending: &PendingProperty) -> DefaultInit {
        match pending.kind {
            PropertyKind::Plain => {
                let value = if pending.nullable {
                    ScalarValue::Null
                } else {
                    pending
                        .codec
                        .as_ref()
                        .map_or(ScalarValue::Null, |codec| codec.default_value())
                };
                DefaultInit::Shared(SharedValue::Scalar(value))
            }
            PropertyKind::Complex => {
                if pending.nullable {
                    DefaultInit::Shared(SharedValue::Scalar(ScalarValue::Null))
                } else {
                    pending
                        .binding
                        .as_ref()
                        .and_then(|binding| binding.default_value())
                        .map_or(DefaultInit::None, |value| {
                            DefaultInit::Shared(SharedValue::Complex(value))
                        })
                }
            }
            _ => DefaultInit::None,
        }
    }

    fn resolve_top_default(
        &mut self,
        context: &str,
        pending: &PendingProperty,
        spec: &DefaultSpec,
    ) -> Option<DefaultInit> {
        match pending.kind {
            PropertyKind::Plain => {
                let codec = pending.codec.clone()?;
                self.resolve_scalar_default(context, &codec, spec, pending.nullable)
                    .map(DefaultInit::Shared)
            }
            PropertyKind::Complex => {
                let binding = pending.binding.clone()?;
                self.resolve_complex_default(context, &binding, spec, pending.nullable)
                    .map(DefaultInit::Shared)
            }
            PropertyKind::Item => {
                let element = pending.element_schema.clone()?;
                self.resolve_item_default(context, &element, spec)
                    .map(DefaultInit::PerInstance)
            }
            PropertyKind::Array | PropertyKind::List => {
                let DefaultSpec::ListLiteral(elements) = spec else {
                    self.errors.error(format!(
                        "{context}: collection defaults must be list literals"
                    ));
                    return None;
                };
                let mut resolved = Vec::with_capacity(elements.len());
                for element_spec in elements {
                    let element = match (&pending.codec, &pending.element_schema) {
                        (Some(codec), _) => {
                            let codec = Arc::clone(codec);
                            // Collection entries are never null.
                            self.resolve_scalar_default(context, &codec, element_spec, false)
                                .map(ResolvedDefault::Shared)
                        }
                        (None, Some(schema)) => {
                            let schema = schema.clone();
                            self.resolve_item_default(context, &schema, element_spec)
                                .map(ResolvedDefault::Per)
                        }
                        (None, None) => None,
                    };
                    resolved.push(element?);
                }
                Some(DefaultInit::PerInstance(PerInstanceInit::List(resolved)))
            }
            PropertyKind::Map => {
                self.errors.error(format!(
                    "{context}: defaults on map properties are not supported"
                ));
                None
            }
            PropertyKind::Derived | PropertyKind::Ref => {
                self.errors.error(format!(
                    "{context}: {} properties cannot carry defaults",
                    pending.kind
                ));
                None
            }
        }
    }

    fn resolve_scalar_default(
        &mut self,
        context: &str,
        codec: &Arc<dyn ValueCodec>,
        spec: &DefaultSpec,
        nullable: bool,
    ) -> Option<SharedValue> {
        match spec {
            DefaultSpec::Literal(value) if value.is_null() => {
                if nullable {
                    Some(SharedValue::Scalar(ScalarValue::Null))
                } else {
                    self.errors.error(format!(
                        "{context}: null default on a non-nullable property"
                    ));
                    None
                }
            }
            DefaultSpec::Literal(value) => {
                if codec.accepts(value) {
                    Some(SharedValue::Scalar(value.clone()))
                } else {
                    self.errors.error(format!(
                        "{context}: default {value} is not a {} value",
                        codec.name()
                    ));
                    None
                }
            }
            DefaultSpec::FormattedText { codec: name, text } => {
                let chosen = if name.is_empty() {
                    Arc::clone(codec)
                } else {
                    match self.codecs.find_codec(name) {
                        Some(found) => found,
                        None => {
                            self.errors
                                .error(format!("{context}: unknown default codec '{name}'"));
                            return None;
                        }
                    }
                };
                match chosen.parse(text) {
                    Ok(value) => Some(SharedValue::Scalar(value)),
                    Err(err) => {
                        self.errors
                            .error_with_cause(format!("{context}: malformed default"), &err);
                        None
                    }
                }
            }
            DefaultSpec::FromCodec => Some(SharedValue::Scalar(codec.default_value())),
            other => {
                self.errors.error(format!(
                    "{context}: default spec does not fit a scalar property: {other:?}"
                ));
                None
            }
        }
    }

    fn resolve_complex_default(
        &mut self,
        context: &str,
        binding: &Arc<dyn ValueBinding>,
        spec: &DefaultSpec,
        nullable: bool,
    ) -> Option<SharedValue> {
        match spec {
            DefaultSpec::Literal(value) if value.is_null() => {
                if nullable {
                    Some(SharedValue::Scalar(ScalarValue::Null))
                } else {
                    self.errors.error(format!(
                        "{context}: null default on a non-nullable property"
                    ));
                    None
                }
            }
            DefaultSpec::ComplexLiteral { binding: name, text } => {
                let chosen = if name.is_empty() {
                    Arc::clone(binding)
                } else {
                    match self.codecs.find_binding(name) {
                        Some(found) => found,
                        None => {
                            self.errors
                                .error(format!("{context}: unknown default binding '{name}'"));
                            return None;
                        }
                    }
                };
                match chosen.parse_flat(text) {
                    Ok(value) => Some(SharedValue::Complex(value)),
                    Err(err) => {
                        self.errors
                            .error_with_cause(format!("{context}: malformed default"), &err);
                        None
                    }
                }
            }
            DefaultSpec::FromCodec => match binding.default_value() {
                Some(value) => Some(SharedValue::Complex(value)),
                None => {
                    self.errors.error(format!(
                        "{context}: binding '{}' has no type default",
                        binding.name()
                    ));
                    None
                }
            },
            other => {
                self.errors.error(format!(
                    "{context}: default spec does not fit a complex property: {other:?}"
                ));
                None
            }
        }
    }

    fn resolve_item_default(
        &mut self,
        context: &str,
        element: &SchemaId,
        spec: &DefaultSpec,
    ) -> Option<PerInstanceInit> {
        match spec {
            DefaultSpec::InstanceOf(schema) => {
                let descriptor = self.check_default_target(context, element, schema)?;
                Some(PerInstanceInit::Instance(descriptor))
            }
            DefaultSpec::ItemTemplate(template) => {
                let descriptor = self.check_default_target(context, element, &template.schema)?;
                let mut assignments = Vec::with_capacity(template.values.len());
                for (name, value_spec) in &template.values {
                    let Some(target) = descriptor.property(name).cloned() else {
                        self.errors.error(format!(
                            "{context}: template assigns unknown property '{name}' of \
                             schema '{}'",
                            template.schema
                        ));
                        return None;
                    };
                    let resolved = self.resolve_frozen_default(context, &target, value_spec)?;
                    assignments.push((target.name().to_owned(), resolved));
                }
                Some(PerInstanceInit::Template(descriptor, assignments))
            }
            other => {
                self.errors.error(format!(
                    "{context}: default spec does not fit an item property: {other:?}"
                ));
                None
            }
        }
    }

    /// Resolve a nested default against a frozen property of the target
    /// schema (template assignments).
    fn resolve_frozen_default(
        &mut self,
        context: &str,
        target: &Arc<Property>,
        spec: &DefaultSpec,
    ) -> Option<ResolvedDefault> {
        match target.kind() {
            PropertyKind::Plain => {
                let codec = Arc::clone(target.codec()?);
                self.resolve_scalar_default(context, &codec, spec, target.is_nullable())
                    .map(ResolvedDefault::Shared)
            }
            PropertyKind::Complex => {
                let binding = Arc::clone(target.binding()?);
                self.resolve_complex_default(context, &binding, spec, target.is_nullable())
                    .map(ResolvedDefault::Shared)
            }
            PropertyKind::Item => {
                let element = target.element_schema()?.clone();
                self.resolve_item_default(context, &element, spec)
                    .map(ResolvedDefault::Per)
            }
            other => {
                self.errors.error(format!(
                    "{context}: template assignments to {other} properties are not supported"
                ));
                None
            }
        }
    }

    fn check_default_target(
        &mut self,
        context: &str,
        element: &SchemaId,
        schema: &SchemaId,
    ) -> Option<Arc<Descriptor>> {
        let descriptor = self.resolve(schema)?;
        if !descriptor.is_assignable_to(element) {
            self.errors.error(format!(
                "{context}: default schema '{schema}' is not assignable to '{element}'"
            ));
            return None;
        }
        if descriptor.is_abstract() {
            self.errors.error(format!(
                "{context}: default schema '{schema}' is abstract"
            ));
            return None;
        }
        Some(descriptor)
    }
}

/// The synthetic root of the inheritance graph: zero properties, never
/// abstract.
fn base_descriptor() -> Arc<Descriptor> {
    Arc::new(Descriptor {
        schema: SchemaId::base(),
        supers: Vec::new(),
        properties: Vec::new(),
        by_internal: HashMap::new(),
        by_external: HashMap::new(),
        is_abstract: false,
        tag_name: None,
        id_property: None,
        id_scope: None,
        default_container: None,
    })
}

fn element_schema_of(declared: &DeclaredType) -> Option<SchemaId> {
    match declared {
        DeclaredType::Schema(id) => Some(id.clone()),
        DeclaredType::List(el) | DeclaredType::Array(el) | DeclaredType::Map(el) => {
            match el.as_ref() {
                DeclaredType::Schema(id) => Some(id.clone()),
                _ => None,
            }
        }
        DeclaredType::Named(_) => None,
    }
}

/// Mutable intermediate form of a property during the merge.
struct PendingProperty {
    name: String,
    external_name: String,
    kind: PropertyKind,
    declared_type: Option<DeclaredType>,
    element_schema: Option<SchemaId>,
    codec: Option<Arc<dyn ValueCodec>>,
    binding: Option<Arc<dyn ValueBinding>>,
    mandatory: bool,
    nullable: bool,
    is_abstract: bool,
    key_property: Option<String>,
    subtype_tags: IndexMap<String, SchemaId>,
    default: PendingDefault,
    default_explicit: bool,
    default_container: bool,
    derived: Option<DerivedFn>,
    declared_by: SchemaId,
}

enum PendingDefault {
    /// Resolved initializer taken over from a super.
    Inherited(DefaultInit),
    /// Own unresolved spec, resolved at freeze.
    Own(DefaultSpec),
    /// No explicit default anywhere; the implicit one applies.
    Unspecified,
}

impl PendingProperty {
    fn from_inherited(property: &Arc<Property>) -> Self {
        Self {
            name: property.name().to_owned(),
            external_name: property.external_name().to_owned(),
            kind: property.kind(),
            declared_type: property.declared_type().cloned(),
            element_schema: property.element_schema().cloned(),
            codec: property.codec().cloned(),
            binding: property.binding().cloned(),
            mandatory: property.is_mandatory(),
            nullable: property.is_nullable(),
            is_abstract: property.is_abstract(),
            key_property: property.key_property().map(str::to_owned),
            subtype_tags: property.subtype_tags().clone(),
            default: if property.default_explicit {
                PendingDefault::Inherited(property.default.clone())
            } else {
                PendingDefault::Unspecified
            },
            default_explicit: property.default_explicit,
            default_container: false,
            derived: property.derived().cloned(),
            declared_by: property.declared_by().clone(),
        }
    }

    fn fresh(schema: &SchemaId, def: &PropertyDef) -> Self {
        Self {
            name: def.name.clone(),
            external_name: def
                .external_name
                .clone()
                .unwrap_or_else(|| confit_types::external_name_of(&def.name)),
            kind: PropertyKind::Plain,
            declared_type: def.declared_type.clone(),
            element_schema: None,
            codec: None,
            binding: None,
            mandatory: def.mandatory,
            nullable: def.nullable,
            is_abstract: def.is_abstract,
            key_property: def.key_property.clone(),
            subtype_tags: def.subtype_tags.clone(),
            default: match &def.default {
                Some(spec) => PendingDefault::Own(spec.clone()),
                None => PendingDefault::Unspecified,
            },
            default_explicit: def.default.is_some(),
            default_container: def.default_container,
            derived: None,
            declared_by: schema.clone(),
        }
    }
}
