//! Configuration values: the universe a property slot can hold.

use indexmap::IndexMap;

use confit_types::{ComplexValue, EntryKey, ScalarValue};

use crate::item::Item;

/// A value stored in (or produced for) one property of an item.
///
/// Collection variants hold their entries by value; reading a collection
/// property hands out an owned copy of the collection, never a live view.
/// Item entries inside a copied collection are still the same shared
/// handles, so mutating an entry is visible through both copies while
/// adding or removing entries is not.
#[derive(Debug, Clone)]
pub enum ConfigValue {
    /// Scalar, including explicit null.
    Scalar(ScalarValue),
    /// Opaque payload of a complex property.
    Complex(ComplexValue),
    /// A nested configuration item.
    Item(Item),
    /// Entries of an array or list property, in order.
    List(Vec<ConfigValue>),
    /// Entries of a map property. Insertion-ordered for deterministic
    /// serialization; the order carries no meaning.
    Map(IndexMap<EntryKey, ConfigValue>),
}

impl ConfigValue {
    /// The null scalar.
    #[must_use]
    pub const fn null() -> Self {
        Self::Scalar(ScalarValue::Null)
    }

    /// Whether this is the null scalar.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(ScalarValue::Null))
    }

    /// Shape name for diagnostics.
    #[must_use]
    pub const fn shape_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Complex(_) => "complex",
            Self::Item(_) => "item",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// The scalar payload, if this is a scalar.
    #[must_use]
    pub const fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// The item handle, if this is an item.
    #[must_use]
    pub const fn as_item(&self) -> Option<&Item> {
        match self {
            Self::Item(item) => Some(item),
            _ => None,
        }
    }

    /// The list entries, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[ConfigValue]> {
        match self {
            Self::List(entries) => Some(entries),
            _ => None,
        }
    }

    /// The map entries, if this is a map.
    #[must_use]
    pub const fn as_map(&self) -> Option<&IndexMap<EntryKey, ConfigValue>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }
}

impl From<ScalarValue> for ConfigValue {
    fn from(value: ScalarValue) -> Self {
        Self::Scalar(value)
    }
}

impl From<Item> for ConfigValue {
    fn from(item: Item) -> Self {
        Self::Item(item)
    }
}

/// Structural equality over configuration values.
///
/// Scalars and complex payloads compare by value. Items compare by schema
/// identity plus their explicitly set properties, recursively; default
/// values do not participate, so an item that merely had its default
/// spelled out explicitly is *not* equal to one that left it unset.
/// Lists compare entries in order; maps compare per key, ignoring entry
/// order.
#[must_use]
pub fn config_eq(left: &ConfigValue, right: &ConfigValue) -> bool {
    match (left, right) {
        (ConfigValue::Scalar(a), ConfigValue::Scalar(b)) => a == b,
        (ConfigValue::Complex(a), ConfigValue::Complex(b)) => a == b,
        (ConfigValue::Item(a), ConfigValue::Item(b)) => item_eq(a, b),
        (ConfigValue::List(a), ConfigValue::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| config_eq(x, y))
        }
        (ConfigValue::Map(a), ConfigValue::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| config_eq(x, y)))
        }
        _ => false,
    }
}

fn item_eq(left: &Item, right: &Item) -> bool {
    if left.ptr_eq(right) {
        return true;
    }
    if left.descriptor().schema() != right.descriptor().schema() {
        return false;
    }
    for property in left.descriptor().properties() {
        if !property.kind().has_storage() {
            continue;
        }
        let l = left.stored(property.id());
        let r = right.stored(property.id());
        match (l, r) {
            (None, None) => {}
            (Some(x), Some(y)) => {
                if !config_eq(&x, &y) {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}
