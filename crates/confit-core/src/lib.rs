//! Typed configuration runtime: descriptors, items and defaults.
//!
//! This crate turns schema definitions ([`SchemaDef`]) into frozen
//! [`Descriptor`]s via a transactional [`DescriptorRegistry`], and runs
//! live [`Item`] instances against them: typed reads with resolved
//! defaults, validated writes, change listeners, mandatory checking and
//! deep copies. Serialization to and from documents lives in the
//! document crate; this crate only exposes the value surface it needs.
//!
//! Descriptors are immutable and shared across threads. Items are
//! single-threaded by design: they hand out interior-mutable handles and
//! parent backreferences that only make sense on the owning thread.

mod builder;

pub mod check;
pub mod copy;
pub mod descriptor;
pub mod factory;
pub mod hints;
pub mod item;
pub mod listener;
pub mod property;
pub mod registry;
pub mod value;

pub use check::check_item;
pub use copy::copy_item;
pub use descriptor::Descriptor;
pub use factory::{FactoryTable, GenericFactory, ItemFactory};
pub use hints::{PropertyDef, SchemaDef, SchemaSet, SchemaSource};
pub use item::{effective_default, entry_key_of, Item};
pub use listener::{ListenerKey, ValueChange};
pub use property::{DerivedFn, Property};
pub use registry::DescriptorRegistry;
pub use value::{config_eq, ConfigValue};
