//! Configuration items: the mutable runtime instances of a schema.
//!
//! An [`Item`] is a cheap handle (`Rc<RefCell<..>>`) over a sparse value
//! store indexed by property slot. Unset slots read as the property
//! default; explicitly assigning a value, even one equal to the default,
//! marks the slot set. Items are single-threaded by construction; the
//! frozen descriptors they point at are shared freely.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use confit_error::{ConfitError, ErrorLog, Result};
use confit_types::{EntryKey, PropertyKind, ScalarValue};

use crate::descriptor::Descriptor;
use crate::listener::{ListenerFn, ListenerKey, ListenerTable, ValueChange};
use crate::property::{DefaultInit, PerInstanceInit, Property, ResolvedDefault};
use crate::value::{config_eq, ConfigValue};

pub(crate) struct ItemState {
    descriptor: Arc<Descriptor>,
    values: Vec<Option<ConfigValue>>,
    container: Weak<RefCell<ItemState>>,
    listeners: ListenerTable,
    /// Document position the item was read from, for diagnostics.
    location: Option<(u32, u32)>,
}

/// Handle to one configuration item.
///
/// Cloning the handle shares the underlying state; use
/// [`copy_item`](crate::copy::copy_item) for a structural copy.
#[derive(Clone)]
pub struct Item {
    state: Rc<RefCell<ItemState>>,
}

impl Item {
    /// Create an unset instance of the descriptor.
    ///
    /// This is the generic container constructor; it does not enforce the
    /// abstract marker. Instantiation through the
    /// [`FactoryTable`](crate::factory::FactoryTable) does.
    #[must_use]
    pub fn new(descriptor: Arc<Descriptor>) -> Self {
        let slots = descriptor.property_count();
        Self {
            state: Rc::new(RefCell::new(ItemState {
                descriptor,
                values: vec![None; slots],
                container: Weak::new(),
                listeners: ListenerTable::default(),
                location: None,
            })),
        }
    }

    /// The frozen descriptor of this item.
    #[must_use]
    pub fn descriptor(&self) -> Arc<Descriptor> {
        Arc::clone(&self.state.borrow().descriptor)
    }

    /// Whether two handles point at the same item.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Handle identity; clones of one handle share it. Used for cycle
    /// detection during tree walks.
    #[must_use]
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.state) as usize
    }

    /// The enclosing item, when this item sits inside one.
    #[must_use]
    pub fn container(&self) -> Option<Self> {
        self.state
            .borrow()
            .container
            .upgrade()
            .map(|state| Self { state })
    }

    /// Document position the item was read from.
    #[must_use]
    pub fn location(&self) -> Option<(u32, u32)> {
        self.state.borrow().location
    }

    /// Record the document position for diagnostics.
    pub fn set_location(&self, line: u32, col: u32) {
        self.state.borrow_mut().location = Some((line, col));
    }

    /// The effective value of a property.
    ///
    /// Set slots return a clone of the stored value; unset slots compute
    /// the default (shared defaults are cloned, per-instance defaults
    /// re-evaluated). Collection values are owned copies.
    ///
    /// # Errors
    ///
    /// [`ConfitError::UnknownProperty`] for names the descriptor does not
    /// know, [`ConfitError::MandatoryUnset`] for unset mandatory
    /// properties.
    pub fn value(&self, name: &str) -> Result<ConfigValue> {
        let property = self.resolve(name)?;
        self.value_of(&property)
    }

    /// The effective value of an already-resolved property.
    pub fn value_of(&self, property: &Arc<Property>) -> Result<ConfigValue> {
        match property.kind() {
            PropertyKind::Derived => {
                let f = property
                    .derived()
                    .cloned()
                    .ok_or_else(|| ConfitError::internal("derived property without algorithm"))?;
                f(self)
            }
            PropertyKind::Ref => Ok(self
                .container()
                .map_or(ConfigValue::null(), ConfigValue::Item)),
            _ => {
                let stored = self.state.borrow().values[property.id().index()].clone();
                match stored {
                    Some(value) => Ok(value),
                    None => self.default_of(property),
                }
            }
        }
    }

    /// Whether the property was explicitly assigned.
    pub fn value_set(&self, name: &str) -> Result<bool> {
        let property = self.resolve(name)?;
        if !property.kind().has_storage() {
            return Ok(false);
        }
        Ok(self.state.borrow().values[property.id().index()].is_some())
    }

    /// Assign a value, returning the previously stored one.
    ///
    /// Validates kind, codec acceptance, nullability and element schema
    /// assignability before storing; maintains container back-references
    /// of item-valued content; then notifies property listeners followed
    /// by item listeners when the effective value actually changed.
    pub fn update(&self, name: &str, value: ConfigValue) -> Result<Option<ConfigValue>> {
        let property = self.resolve(name)?;
        self.update_of(&property, value)
    }

    /// [`update`](Self::update) with an already-resolved property.
    pub fn update_of(
        &self,
        property: &Arc<Property>,
        value: ConfigValue,
    ) -> Result<Option<ConfigValue>> {
        self.settable_gate(property)?;
        self.validate_assignment(property, &value)?;

        let old = self.effective_or_null(property);
        let previous = {
            let mut state = self.state.borrow_mut();
            state.values[property.id().index()].replace(value.clone())
        };
        if let Some(ref prev) = previous {
            set_containers(prev, None);
        }
        set_containers(&value, Some(self));

        if !config_eq(&old, &value) {
            self.dispatch(property, old, value);
        }
        Ok(previous)
    }

    /// Drop the stored value, reverting the property to its default.
    pub fn reset(&self, name: &str) -> Result<()> {
        let property = self.resolve(name)?;
        self.settable_gate(&property)?;

        let old = self.effective_or_null(&property);
        let previous = {
            let mut state = self.state.borrow_mut();
            state.values[property.id().index()].take()
        };
        if let Some(ref prev) = previous {
            set_containers(prev, None);
        }

        let new = self.effective_or_null(&property);
        if !config_eq(&old, &new) {
            self.dispatch(&property, old, new);
        }
        Ok(())
    }

    /// Register a listener for one property.
    pub fn add_listener(
        &self,
        name: &str,
        f: impl Fn(&ValueChange) + 'static,
    ) -> Result<ListenerKey> {
        let property = self.resolve(name)?;
        let key = self
            .state
            .borrow_mut()
            .listeners
            .add_property(property.id(), Rc::new(f));
        Ok(key)
    }

    /// Register a listener for every property of this item.
    pub fn add_item_listener(&self, f: impl Fn(&ValueChange) + 'static) -> ListenerKey {
        self.state.borrow_mut().listeners.add_item(Rc::new(f))
    }

    /// Remove a previously registered listener.
    pub fn remove_listener(&self, key: ListenerKey) -> bool {
        self.state.borrow_mut().listeners.remove(key)
    }

    /// Report every unset mandatory property of this item tree.
    pub fn check(&self, log: &mut ErrorLog) {
        crate::check::check_item(self, log);
    }

    // -- crate internals --

    pub(crate) fn resolve(&self, name: &str) -> Result<Arc<Property>> {
        let state = self.state.borrow();
        state.descriptor.property(name).cloned().ok_or_else(|| {
            ConfitError::unknown_property(state.descriptor.schema().as_str(), name)
        })
    }

    /// The stored value of a slot, `None` when unset. Defaults are not
    /// applied.
    pub(crate) fn stored(&self, id: confit_types::PropertyId) -> Option<ConfigValue> {
        self.state.borrow().values[id.index()].clone()
    }

    pub(crate) fn store_raw(&self, id: confit_types::PropertyId, value: ConfigValue) {
        set_containers(&value, Some(self));
        self.state.borrow_mut().values[id.index()] = Some(value);
    }

    pub(crate) fn set_container(&self, container: Option<&Item>) {
        self.state.borrow_mut().container = match container {
            Some(item) => Rc::downgrade(&item.state),
            None => Weak::new(),
        };
    }

    fn settable_gate(&self, property: &Arc<Property>) -> Result<()> {
        if property.is_settable() {
            Ok(())
        } else {
            Err(ConfitError::NotSettable {
                schema: self.descriptor().schema().to_string(),
                property: property.name().to_owned(),
                kind: property.kind().to_string(),
            })
        }
    }

    fn default_of(&self, property: &Arc<Property>) -> Result<ConfigValue> {
        default_value_of(property, self.descriptor().schema())
    }

    fn effective_or_null(&self, property: &Arc<Property>) -> ConfigValue {
        self.value_of(property).unwrap_or_else(|_| ConfigValue::null())
    }

    fn dispatch(&self, property: &Arc<Property>, old: ConfigValue, new: ConfigValue) {
        let listeners: Vec<ListenerFn> = {
            let state = self.state.borrow();
            if state.listeners.is_empty() {
                return;
            }
            state.listeners.snapshot_for(property.id())
        };
        trace!(
            property = property.name(),
            listeners = listeners.len(),
            "value change dispatch"
        );
        let change = ValueChange {
            item: self.clone(),
            property: Arc::clone(property),
            old,
            new,
        };
        for listener in listeners {
            listener(&change);
        }
    }

    fn validate_assignment(&self, property: &Arc<Property>, value: &ConfigValue) -> Result<()> {
        let schema = self.descriptor().schema().to_string();
        let reject = |detail: String| -> ConfitError {
            ConfitError::illegal_value(schema.clone(), property.name(), detail)
        };

        match property.kind() {
            PropertyKind::Plain => match value {
                ConfigValue::Scalar(ScalarValue::Null) => self.null_gate(property),
                ConfigValue::Scalar(scalar) => {
                    let codec = property
                        .codec()
                        .ok_or_else(|| ConfitError::internal("plain property without codec"))?;
                    if codec.accepts(scalar) {
                        Ok(())
                    } else {
                        Err(reject(format!(
                            "codec '{}' does not accept a {} value",
                            codec.name(),
                            scalar.type_name()
                        )))
                    }
                }
                other => Err(reject(format!("expected a scalar, got {}", other.shape_name()))),
            },
            PropertyKind::Complex => match value {
                ConfigValue::Scalar(ScalarValue::Null) => self.null_gate(property),
                ConfigValue::Complex(_) => Ok(()),
                other => Err(reject(format!(
                    "expected a complex value, got {}",
                    other.shape_name()
                ))),
            },
            PropertyKind::Item => match value {
                ConfigValue::Scalar(ScalarValue::Null) => self.null_gate(property),
                ConfigValue::Item(item) => self.element_gate(property, item, &reject),
                other => Err(reject(format!("expected an item, got {}", other.shape_name()))),
            },
            PropertyKind::Array | PropertyKind::List => match value {
                ConfigValue::List(entries) => {
                    for entry in entries {
                        self.entry_gate(property, entry, &reject)?;
                    }
                    if property.is_keyed() {
                        self.unique_keys_gate(property, entries, &reject)?;
                    }
                    Ok(())
                }
                other => Err(reject(format!("expected a list, got {}", other.shape_name()))),
            },
            PropertyKind::Map => match value {
                ConfigValue::Map(entries) => {
                    let key_name = property.key_property().ok_or_else(|| {
                        ConfitError::internal("map property without key property")
                    })?;
                    for (key, entry) in entries {
                        self.entry_gate(property, entry, &reject)?;
                        let entry_item = entry
                            .as_item()
                            .ok_or_else(|| reject("map entries must be items".to_owned()))?;
                        let actual = entry_item.value(key_name)?;
                        if !config_eq(&actual, &ConfigValue::Scalar(key.to_scalar())) {
                            return Err(reject(format!(
                                "entry key '{key}' does not match its '{key_name}' value"
                            )));
                        }
                    }
                    Ok(())
                }
                other => Err(reject(format!("expected a map, got {}", other.shape_name()))),
            },
            PropertyKind::Derived | PropertyKind::Ref => {
                Err(ConfitError::internal("unsettable kind passed the gate"))
            }
        }
    }

    fn null_gate(&self, property: &Arc<Property>) -> Result<()> {
        if property.is_nullable() {
            Ok(())
        } else {
            Err(ConfitError::NullNotAllowed {
                schema: self.descriptor().schema().to_string(),
                property: property.name().to_owned(),
            })
        }
    }

    fn element_gate(
        &self,
        property: &Arc<Property>,
        item: &Item,
        reject: &dyn Fn(String) -> ConfitError,
    ) -> Result<()> {
        let Some(element) = property.element_schema() else {
            return Ok(());
        };
        let descriptor = item.descriptor();
        if descriptor.is_assignable_to(element) {
            Ok(())
        } else {
            Err(reject(format!(
                "schema '{}' is not assignable to '{element}'",
                descriptor.schema()
            )))
        }
    }

    fn entry_gate(
        &self,
        property: &Arc<Property>,
        entry: &ConfigValue,
        reject: &dyn Fn(String) -> ConfitError,
    ) -> Result<()> {
        match entry {
            ConfigValue::Item(item) => self.element_gate(property, item, reject),
            ConfigValue::Scalar(ScalarValue::Null) => {
                Err(reject("collection entries cannot be null".to_owned()))
            }
            ConfigValue::Scalar(scalar) => match property.codec() {
                Some(codec) if codec.accepts(scalar) => Ok(()),
                Some(codec) => Err(reject(format!(
                    "codec '{}' does not accept a {} entry",
                    codec.name(),
                    scalar.type_name()
                ))),
                None => Err(reject("scalar entry in an item collection".to_owned())),
            },
            other => Err(reject(format!(
                "unsupported collection entry shape: {}",
                other.shape_name()
            ))),
        }
    }

    fn unique_keys_gate(
        &self,
        property: &Arc<Property>,
        entries: &[ConfigValue],
        reject: &dyn Fn(String) -> ConfitError,
    ) -> Result<()> {
        let key_name = property
            .key_property()
            .ok_or_else(|| ConfitError::internal("keyed property without key name"))?;
        let mut seen = std::collections::HashSet::new();
        for entry in entries {
            let Some(item) = entry.as_item() else { continue };
            let key = entry_key_of(item, key_name)?;
            if !seen.insert(key.clone()) {
                return Err(reject(format!("duplicate entry key '{key}'")));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_borrow() {
            Ok(state) => {
                let set = state.values.iter().filter(|slot| slot.is_some()).count();
                write!(f, "Item({}, {set} set)", state.descriptor.schema())
            }
            Err(_) => f.write_str("Item(<borrowed>)"),
        }
    }
}

/// The entry key of a collection element: its key property value as a
/// hashable key.
pub fn entry_key_of(item: &Item, key_property: &str) -> Result<EntryKey> {
    let value = item.value(key_property)?;
    let scalar = value.as_scalar().ok_or_else(|| {
        ConfitError::internal(format!("key property '{key_property}' is not scalar"))
    })?;
    EntryKey::try_from(scalar.clone()).map_err(|e| {
        ConfitError::illegal_value(
            item.descriptor().schema().as_str(),
            key_property,
            e.to_string(),
        )
    })
}

/// The default a property reads as while unset, or `None` for mandatory
/// properties (which have none).
///
/// Per-instance defaults are freshly evaluated on every call; two calls
/// return structurally equal but distinct values.
pub fn effective_default(property: &Arc<Property>) -> Result<Option<ConfigValue>> {
    if property.is_mandatory() {
        return Ok(None);
    }
    match &property.default {
        DefaultInit::Shared(shared) => Ok(Some(shared.to_value())),
        DefaultInit::PerInstance(init) => Ok(Some(materialize(init)?)),
        DefaultInit::None => Ok(Some(kind_default(property.kind())?)),
    }
}

fn default_value_of(
    property: &Arc<Property>,
    schema: &confit_types::SchemaId,
) -> Result<ConfigValue> {
    if property.is_mandatory() {
        return Err(ConfitError::MandatoryUnset {
            schema: schema.to_string(),
            property: property.name().to_owned(),
        });
    }
    match &property.default {
        DefaultInit::Shared(shared) => Ok(shared.to_value()),
        DefaultInit::PerInstance(init) => materialize(init),
        DefaultInit::None => kind_default(property.kind()),
    }
}

fn kind_default(kind: PropertyKind) -> Result<ConfigValue> {
    match kind {
        PropertyKind::Item | PropertyKind::Complex => Ok(ConfigValue::null()),
        PropertyKind::Array | PropertyKind::List => Ok(ConfigValue::List(Vec::new())),
        PropertyKind::Map => Ok(ConfigValue::Map(IndexMap::new())),
        // Plain defaults are always resolved at build time.
        PropertyKind::Plain | PropertyKind::Derived | PropertyKind::Ref => Err(
            ConfitError::internal(format!("no kind default for {kind} properties")),
        ),
    }
}

fn materialize(init: &PerInstanceInit) -> Result<ConfigValue> {
    match init {
        PerInstanceInit::Instance(descriptor) => {
            Ok(ConfigValue::Item(Item::new(Arc::clone(descriptor))))
        }
        PerInstanceInit::Template(descriptor, assignments) => {
            let item = Item::new(Arc::clone(descriptor));
            for (name, resolved) in assignments {
                item.update(name, materialize_resolved(resolved)?)?;
            }
            Ok(ConfigValue::Item(item))
        }
        PerInstanceInit::List(elements) => {
            let entries = elements
                .iter()
                .map(materialize_resolved)
                .collect::<Result<Vec<_>>>()?;
            Ok(ConfigValue::List(entries))
        }
    }
}

fn materialize_resolved(resolved: &ResolvedDefault) -> Result<ConfigValue> {
    match resolved {
        ResolvedDefault::Shared(shared) => Ok(shared.to_value()),
        ResolvedDefault::Per(init) => materialize(init),
    }
}

fn set_containers(value: &ConfigValue, container: Option<&Item>) {
    match value {
        ConfigValue::Item(item) => item.set_container(container),
        ConfigValue::List(entries) => {
            for entry in entries {
                set_containers(entry, container);
            }
        }
        ConfigValue::Map(entries) => {
            for entry in entries.values() {
                set_containers(entry, container);
            }
        }
        ConfigValue::Scalar(_) | ConfigValue::Complex(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use confit_types::SchemaId;

    use crate::descriptor::test_support::plain_descriptor;

    use super::*;

    fn point() -> Item {
        Item::new(plain_descriptor(SchemaId::new("point"), &["x", "y"]))
    }

    #[test]
    fn test_unset_reads_default_and_set_marks() {
        let item = point();
        assert!(!item.value_set("x").expect("known"));
        assert!(config_eq(
            &item.value("x").expect("default"),
            &ConfigValue::Scalar(ScalarValue::Int(0))
        ));

        // Assigning the default still marks the slot set.
        item.update("x", ConfigValue::Scalar(ScalarValue::Int(0)))
            .expect("update");
        assert!(item.value_set("x").expect("known"));
    }

    #[test]
    fn test_update_returns_previous_and_validates() {
        let item = point();
        let previous = item
            .update("x", ConfigValue::Scalar(ScalarValue::Int(4)))
            .expect("first");
        assert!(previous.is_none());

        let previous = item
            .update("x", ConfigValue::Scalar(ScalarValue::Int(9)))
            .expect("second");
        assert!(matches!(
            previous,
            Some(ConfigValue::Scalar(ScalarValue::Int(4)))
        ));

        let err = item
            .update("x", ConfigValue::Scalar(ScalarValue::from("four")))
            .expect_err("wrong type");
        assert!(matches!(err, ConfitError::IllegalValue { .. }));

        let err = item
            .update("x", ConfigValue::null())
            .expect_err("not nullable");
        assert!(matches!(err, ConfitError::NullNotAllowed { .. }));

        let err = item
            .update("z", ConfigValue::Scalar(ScalarValue::Int(0)))
            .expect_err("unknown");
        assert!(matches!(err, ConfitError::UnknownProperty { .. }));
    }

    #[test]
    fn test_reset_reverts_to_default() {
        let item = point();
        item.update("y", ConfigValue::Scalar(ScalarValue::Int(7)))
            .expect("set");
        item.reset("y").expect("reset");
        assert!(!item.value_set("y").expect("known"));
        assert!(config_eq(
            &item.value("y").expect("default"),
            &ConfigValue::Scalar(ScalarValue::Int(0))
        ));
    }

    #[test]
    fn test_listeners_observe_changes_not_noops() {
        let item = point();
        let seen: Rc<RefCell<Vec<(i64, i64)>>> = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&seen);
        item.add_listener("x", move |change| {
            let old = change.old.as_scalar().and_then(ScalarValue::as_int);
            let new = change.new.as_scalar().and_then(ScalarValue::as_int);
            sink.borrow_mut()
                .push((old.unwrap_or(-1), new.unwrap_or(-1)));
        })
        .expect("register");

        item.update("x", ConfigValue::Scalar(ScalarValue::Int(1)))
            .expect("1");
        // Same effective value: no notification.
        item.update("x", ConfigValue::Scalar(ScalarValue::Int(1)))
            .expect("1 again");
        item.update("x", ConfigValue::Scalar(ScalarValue::Int(2)))
            .expect("2");
        item.reset("x").expect("reset");

        assert_eq!(*seen.borrow(), vec![(0, 1), (1, 2), (2, 0)]);
    }

    #[test]
    fn test_item_listener_and_removal() {
        let item = point();
        let count = Rc::new(RefCell::new(0));

        let sink = Rc::clone(&count);
        let key = item.add_item_listener(move |_| *sink.borrow_mut() += 1);

        item.update("x", ConfigValue::Scalar(ScalarValue::Int(1)))
            .expect("x");
        item.update("y", ConfigValue::Scalar(ScalarValue::Int(1)))
            .expect("y");
        assert_eq!(*count.borrow(), 2);

        assert!(item.remove_listener(key));
        item.update("x", ConfigValue::Scalar(ScalarValue::Int(5)))
            .expect("x again");
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn test_listener_may_mutate_the_item() {
        // A listener writing back into the item must not deadlock on the
        // interior RefCell.
        let item = point();
        let handle = item.clone();
        item.add_listener("x", move |change| {
            if change.new.as_scalar().and_then(ScalarValue::as_int) == Some(1) {
                handle
                    .update("y", ConfigValue::Scalar(ScalarValue::Int(99)))
                    .expect("nested update");
            }
        })
        .expect("register");

        item.update("x", ConfigValue::Scalar(ScalarValue::Int(1)))
            .expect("outer update");
        assert!(config_eq(
            &item.value("y").expect("y"),
            &ConfigValue::Scalar(ScalarValue::Int(99))
        ));
    }
}
