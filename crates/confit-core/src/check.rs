//! Mandatory-property validation over an item tree.

use std::collections::HashSet;

use confit_error::ErrorLog;
use confit_types::PropertyKind;

use crate::item::Item;
use crate::value::ConfigValue;

/// Report every unset mandatory property of `item` and its stored
/// descendants into `log`.
///
/// The per-kind set rule preserves the source system's asymmetry: an
/// array property counts as set by presence of an assignment, even an
/// empty one, while list and map properties count as set only when they
/// hold at least one entry. Only explicitly stored values are descended
/// into; defaults materialized on read are not part of the tree.
pub fn check_item(item: &Item, log: &mut ErrorLog) {
    let mut visited = HashSet::new();
    walk(item, log, &mut visited);
}

fn walk(item: &Item, log: &mut ErrorLog, visited: &mut HashSet<usize>) {
    if !visited.insert(item.identity()) {
        return;
    }

    let descriptor = item.descriptor();
    for property in descriptor.properties() {
        if !property.kind().has_storage() {
            continue;
        }
        let stored = item.stored(property.id());
        if property.is_mandatory() && !counts_as_set(property.kind(), stored.as_ref()) {
            let message = format!(
                "mandatory property '{}' of schema '{}' is not set",
                property.name(),
                descriptor.schema()
            );
            match item.location() {
                Some((line, col)) => log.error_at(line, col, message),
                None => log.error(message),
            }
        }
        if let Some(value) = stored {
            descend(&value, log, visited);
        }
    }
}

fn counts_as_set(kind: PropertyKind, stored: Option<&ConfigValue>) -> bool {
    match kind {
        PropertyKind::List => matches!(stored, Some(ConfigValue::List(entries)) if !entries.is_empty()),
        PropertyKind::Map => matches!(stored, Some(ConfigValue::Map(entries)) if !entries.is_empty()),
        _ => stored.is_some(),
    }
}

fn descend(value: &ConfigValue, log: &mut ErrorLog, visited: &mut HashSet<usize>) {
    match value {
        ConfigValue::Item(item) => walk(item, log, visited),
        ConfigValue::List(entries) => {
            for entry in entries {
                descend(entry, log, visited);
            }
        }
        ConfigValue::Map(entries) => {
            for entry in entries.values() {
                descend(entry, log, visited);
            }
        }
        ConfigValue::Scalar(_) | ConfigValue::Complex(_) => {}
    }
}
