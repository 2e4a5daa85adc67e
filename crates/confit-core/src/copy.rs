//! Structural deep copy of items.

use indexmap::IndexMap;

use confit_error::Result;

use crate::item::Item;
use crate::value::ConfigValue;

/// A structural copy of `item`: same schema, same explicitly set values,
/// with nested items copied recursively.
///
/// Listeners and the container back-reference are not copied; the copy
/// starts detached. Shared sub-items referenced from several slots of
/// the source stay shared between the corresponding slots of the copy.
/// Used for base-document seeding and template defaults, where mutating
/// the copy must not touch the original.
pub fn copy_item(item: &Item) -> Result<Item> {
    let mut copies = IndexMap::new();
    copy_with(item, &mut copies)
}

fn copy_with(item: &Item, copies: &mut IndexMap<usize, Item>) -> Result<Item> {
    if let Some(copy) = copies.get(&item.identity()) {
        return Ok(copy.clone());
    }
    let descriptor = item.descriptor();
    let copy = Item::new(descriptor.clone());
    copies.insert(item.identity(), copy.clone());

    for property in descriptor.properties() {
        if !property.kind().has_storage() {
            continue;
        }
        if let Some(stored) = item.stored(property.id()) {
            let copied = copy_value(&stored, copies)?;
            copy.store_raw(property.id(), copied);
        }
    }
    Ok(copy)
}

fn copy_value(value: &ConfigValue, copies: &mut IndexMap<usize, Item>) -> Result<ConfigValue> {
    match value {
        ConfigValue::Item(item) => Ok(ConfigValue::Item(copy_with(item, copies)?)),
        ConfigValue::List(entries) => {
            let copied = entries
                .iter()
                .map(|entry| copy_value(entry, copies))
                .collect::<Result<Vec<_>>>()?;
            Ok(ConfigValue::List(copied))
        }
        ConfigValue::Map(entries) => {
            let mut copied = IndexMap::with_capacity(entries.len());
            for (key, entry) in entries {
                copied.insert(key.clone(), copy_value(entry, copies)?);
            }
            Ok(ConfigValue::Map(copied))
        }
        ConfigValue::Scalar(_) | ConfigValue::Complex(_) => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use confit_types::{ScalarValue, SchemaId};

    use crate::descriptor::test_support::plain_descriptor;
    use crate::value::config_eq;

    use super::*;

    #[test]
    fn test_copy_is_structurally_equal_but_independent() {
        let item = Item::new(plain_descriptor(SchemaId::new("point"), &["x", "y"]));
        item.update("x", ConfigValue::Scalar(ScalarValue::Int(3)))
            .expect("set x");

        let copy = copy_item(&item).expect("copy");
        assert!(!copy.ptr_eq(&item));
        assert!(config_eq(&copy.clone().into(), &item.clone().into()));

        copy.update("x", ConfigValue::Scalar(ScalarValue::Int(9)))
            .expect("mutate copy");
        assert!(config_eq(
            &item.value("x").expect("x"),
            &ConfigValue::Scalar(ScalarValue::Int(3))
        ));
        assert!(!config_eq(&copy.into(), &item.into()));
    }

    #[test]
    fn test_copy_preserves_unset_slots() {
        let item = Item::new(plain_descriptor(SchemaId::new("point"), &["x", "y"]));
        item.update("y", ConfigValue::Scalar(ScalarValue::Int(1)))
            .expect("set y");
        let copy = copy_item(&item).expect("copy");
        assert!(!copy.value_set("x").expect("x"));
        assert!(copy.value_set("y").expect("y"));
    }
}
