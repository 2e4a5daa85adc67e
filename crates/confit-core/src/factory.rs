//! Item instantiation through an injectable constructor table.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use confit_error::{ConfitError, Result};
use confit_types::SchemaId;

use crate::descriptor::Descriptor;
use crate::item::Item;

/// Constructor for items of one schema.
///
/// Custom factories pre-populate technical values or wire host objects
/// into fresh items. Like items, factories live on one thread.
pub trait ItemFactory {
    /// Build a fresh item for the descriptor.
    fn instantiate(&self, descriptor: &Arc<Descriptor>) -> Result<Item>;
}

/// The default factory: a bare generic item container.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericFactory;

impl ItemFactory for GenericFactory {
    fn instantiate(&self, descriptor: &Arc<Descriptor>) -> Result<Item> {
        Ok(Item::new(Arc::clone(descriptor)))
    }
}

/// Constructor table keyed by schema id, with the generic container as
/// fallback.
///
/// Register custom factories before build sessions run so every
/// instantiation path sees them.
#[derive(Default)]
pub struct FactoryTable {
    factories: HashMap<SchemaId, Rc<dyn ItemFactory>>,
}

impl FactoryTable {
    /// A table with only the generic fallback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for one schema.
    ///
    /// Overwrites any existing registration; returns the previous factory
    /// if one existed.
    pub fn register<F>(&mut self, schema: impl Into<SchemaId>, factory: F) -> Option<Rc<dyn ItemFactory>>
    where
        F: ItemFactory + 'static,
    {
        self.factories.insert(schema.into(), Rc::new(factory))
    }

    /// Instantiate an item of the descriptor's schema.
    ///
    /// # Errors
    ///
    /// [`ConfitError::AbstractInstantiation`] when the descriptor is
    /// abstract; whatever the registered factory reports otherwise.
    pub fn instantiate(&self, descriptor: &Arc<Descriptor>) -> Result<Item> {
        if descriptor.is_abstract() {
            return Err(ConfitError::AbstractInstantiation {
                id: descriptor.schema().to_string(),
            });
        }
        match self.factories.get(descriptor.schema()) {
            Some(factory) => factory.instantiate(descriptor),
            None => GenericFactory.instantiate(descriptor),
        }
    }

    /// Whether a custom factory is registered for the schema.
    #[must_use]
    pub fn contains(&self, schema: &SchemaId) -> bool {
        self.factories.contains_key(schema)
    }
}
