//! Descriptor publication.
//!
//! The [`DescriptorRegistry`] owns every frozen descriptor of the
//! process. Resolution is transactional: one `resolve` call opens one
//! build session, and either all descriptors that session built are
//! published together or none are. The registry lock is held for the
//! whole session, so concurrent resolvers serialize and never observe a
//! half-committed schema graph.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use confit_codec::CodecRegistry;
use confit_error::{ConfitError, Result};
use confit_types::SchemaId;

use crate::builder::BuildSession;
use crate::descriptor::Descriptor;
use crate::hints::SchemaSource;

/// Thread-safe store of published descriptors.
#[derive(Default)]
pub struct DescriptorRegistry {
    published: Mutex<HashMap<SchemaId, Arc<Descriptor>>>,
}

impl DescriptorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve one schema, building and publishing it (and every super
    /// and referenced schema) on first use.
    ///
    /// # Errors
    ///
    /// [`ConfitError::BuildFailed`] carrying every defect of the schema
    /// graph; nothing is published in that case.
    pub fn resolve(
        &self,
        id: &SchemaId,
        source: &dyn SchemaSource,
        codecs: &CodecRegistry,
    ) -> Result<Arc<Descriptor>> {
        let mut published = self.published.lock();
        if let Some(descriptor) = published.get(id) {
            return Ok(Arc::clone(descriptor));
        }

        let mut session = BuildSession::new(source, codecs, &published);
        let descriptor = session.resolve(id);
        let errors = session.error_count();
        match session.finish() {
            Ok(pending) => {
                debug!(schema = %id, committed = pending.len(), "descriptor session committed");
                published.extend(pending);
                descriptor.ok_or_else(|| {
                    ConfitError::internal(format!("schema '{id}' resolved without a descriptor"))
                })
            }
            Err(failure) => {
                debug!(schema = %id, errors, "descriptor session discarded");
                Err(failure)
            }
        }
    }

    /// Resolve several schemas in one session: all published together or
    /// none at all.
    ///
    /// # Errors
    ///
    /// [`ConfitError::BuildFailed`] as for [`Self::resolve`].
    pub fn resolve_all<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a SchemaId>,
        source: &dyn SchemaSource,
        codecs: &CodecRegistry,
    ) -> Result<Vec<Arc<Descriptor>>> {
        let mut published = self.published.lock();
        let mut session = BuildSession::new(source, codecs, &published);
        let mut resolved = Vec::new();
        for id in ids {
            if let Some(descriptor) = published.get(id) {
                resolved.push(Arc::clone(descriptor));
                continue;
            }
            if let Some(descriptor) = session.resolve(id) {
                resolved.push(descriptor);
            }
        }
        let pending = session.finish()?;
        debug!(committed = pending.len(), "descriptor session committed");
        published.extend(pending);
        Ok(resolved)
    }

    /// An already published descriptor, without building anything.
    #[must_use]
    pub fn lookup(&self, id: &SchemaId) -> Option<Arc<Descriptor>> {
        self.published.lock().get(id).map(Arc::clone)
    }

    /// Number of published descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    /// Whether nothing has been published yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.published.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use confit_types::{DeclaredType, PropertyKind};

    use crate::hints::{PropertyDef, SchemaDef, SchemaSet};

    use super::*;

    fn pair_set() -> SchemaSet {
        let mut set = SchemaSet::new();
        set.add(
            SchemaDef::new("pair")
                .property(PropertyDef::new("left").declared(DeclaredType::named("int")))
                .property(PropertyDef::new("right").declared(DeclaredType::named("int"))),
        )
        .expect("add pair");
        set
    }

    #[test]
    fn test_resolve_builds_and_publishes() {
        let registry = DescriptorRegistry::new();
        let codecs = CodecRegistry::with_builtins();
        let set = pair_set();

        let pair = registry
            .resolve(&SchemaId::new("pair"), &set, &codecs)
            .expect("resolve");
        assert_eq!(pair.property_count(), 2);
        assert_eq!(pair.property("left").expect("left").kind(), PropertyKind::Plain);

        // Published: the schema itself plus the synthetic base.
        assert_eq!(registry.len(), 2);
        let cached = registry.lookup(&SchemaId::new("pair")).expect("cached");
        assert!(Arc::ptr_eq(&pair, &cached));

        let again = registry
            .resolve(&SchemaId::new("pair"), &set, &codecs)
            .expect("resolve again");
        assert!(Arc::ptr_eq(&pair, &again));
    }

    #[test]
    fn test_failed_session_publishes_nothing() {
        let registry = DescriptorRegistry::new();
        let codecs = CodecRegistry::with_builtins();

        let mut set = SchemaSet::new();
        set.add(SchemaDef::new("good").property(PropertyDef::new("name").declared(
            DeclaredType::named("string"),
        )))
        .expect("add good");
        set.add(
            SchemaDef::new("bad")
                .extends("good")
                .property(PropertyDef::new("broken").declared(DeclaredType::named("no-such"))),
        )
        .expect("add bad");

        let err = registry
            .resolve(&SchemaId::new("bad"), &set, &codecs)
            .expect_err("must fail");
        assert!(matches!(err, ConfitError::BuildFailed { count, .. } if count >= 1));

        // The valid super built in the same session is discarded too.
        assert!(registry.lookup(&SchemaId::new("good")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_base_schema_resolves_from_empty_source() {
        let registry = DescriptorRegistry::new();
        let codecs = CodecRegistry::with_builtins();
        let set = SchemaSet::new();

        let base = registry
            .resolve(&SchemaId::base(), &set, &codecs)
            .expect("base");
        assert_eq!(base.property_count(), 0);
        assert!(!base.is_abstract());
    }

    #[test]
    fn test_resolve_all_is_one_session() {
        let registry = DescriptorRegistry::new();
        let codecs = CodecRegistry::with_builtins();

        let mut set = pair_set();
        set.add(
            SchemaDef::new("broken")
                .property(PropertyDef::new("x").declared(DeclaredType::named("no-such"))),
        )
        .expect("add broken");

        let ids = [SchemaId::new("pair"), SchemaId::new("broken")];
        let err = registry
            .resolve_all(ids.iter(), &set, &codecs)
            .expect_err("must fail");
        assert!(matches!(err, ConfitError::BuildFailed { .. }));
        // The valid member of the failed session is not published.
        assert!(registry.lookup(&SchemaId::new("pair")).is_none());

        let good = [SchemaId::new("pair")];
        let resolved = registry
            .resolve_all(good.iter(), &set, &codecs)
            .expect("second session");
        assert_eq!(resolved.len(), 1);
        assert!(registry.lookup(&SchemaId::new("pair")).is_some());
    }
}
