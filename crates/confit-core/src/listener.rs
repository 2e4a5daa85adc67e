//! Change notification for item values.
//!
//! Listeners are plain closures registered per property or for the whole
//! item; registration hands back a [`ListenerKey`] for removal. Dispatch
//! is synchronous on the mutating thread, property listeners first, then
//! item-wide ones, with no borrow of the item state held, so a listener
//! may freely read or even mutate the item it observes.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use confit_types::PropertyId;

use crate::item::Item;
use crate::property::Property;
use crate::value::ConfigValue;

/// One observed value change.
pub struct ValueChange {
    /// The item that changed.
    pub item: Item,
    /// The property that changed.
    pub property: Arc<Property>,
    /// Effective value before the change.
    pub old: ConfigValue,
    /// Effective value after the change.
    pub new: ConfigValue,
}

impl fmt::Debug for ValueChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueChange")
            .field("property", &self.property.name())
            .field("old", &self.old)
            .field("new", &self.new)
            .finish_non_exhaustive()
    }
}

/// Listener callback. Single-threaded like the items it observes.
pub type ListenerFn = Rc<dyn Fn(&ValueChange)>;

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(u64);

/// Listener storage of one item.
#[derive(Default)]
pub(crate) struct ListenerTable {
    next: u64,
    per_property: HashMap<PropertyId, Vec<(ListenerKey, ListenerFn)>>,
    item_wide: Vec<(ListenerKey, ListenerFn)>,
}

impl ListenerTable {
    fn next_key(&mut self) -> ListenerKey {
        self.next += 1;
        ListenerKey(self.next)
    }

    pub(crate) fn add_property(&mut self, property: PropertyId, f: ListenerFn) -> ListenerKey {
        let key = self.next_key();
        self.per_property.entry(property).or_default().push((key, f));
        key
    }

    pub(crate) fn add_item(&mut self, f: ListenerFn) -> ListenerKey {
        let key = self.next_key();
        self.item_wide.push((key, f));
        key
    }

    pub(crate) fn remove(&mut self, key: ListenerKey) -> bool {
        for listeners in self.per_property.values_mut() {
            if let Some(pos) = listeners.iter().position(|(k, _)| *k == key) {
                listeners.remove(pos);
                return true;
            }
        }
        if let Some(pos) = self.item_wide.iter().position(|(k, _)| *k == key) {
            self.item_wide.remove(pos);
            return true;
        }
        false
    }

    /// Callbacks to run for a change of `property`, in dispatch order.
    pub(crate) fn snapshot_for(&self, property: PropertyId) -> Vec<ListenerFn> {
        let mut out = Vec::new();
        if let Some(listeners) = self.per_property.get(&property) {
            out.extend(listeners.iter().map(|(_, f)| Rc::clone(f)));
        }
        out.extend(self.item_wide.iter().map(|(_, f)| Rc::clone(f)));
        out
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.item_wide.is_empty() && self.per_property.values().all(Vec::is_empty)
    }
}
