//! Value translation surfaces for the typed configuration engine.
//!
//! This crate defines the open, user-implementable traits for:
//! - scalar value codecs (attribute text to scalar and back)
//! - value bindings (element subtrees to complex payloads and back)
//!
//! It also provides the in-memory [`CodecRegistry`] that resolves declared
//! type names to codecs or bindings, and the built-in entries every schema
//! can rely on ([`register_builtins`]).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

pub mod binding;
pub mod builtins;
pub mod codec;

pub use binding::{BindingEvent, BindingSink, BindingSource, ValueBinding};
pub use builtins::{register_builtins, StringList};
pub use codec::ValueCodec;

/// Registry resolving declared type names to codecs and bindings.
///
/// Names are matched case-insensitively; the two namespaces are separate,
/// so a codec and a binding may share a name (lookup order at the call
/// site decides which wins, codecs first during kind inference).
#[derive(Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn ValueCodec>>,
    bindings: HashMap<String, Arc<dyn ValueBinding>>,
}

impl CodecRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-loaded with the built-in codecs and bindings.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    /// Register a codec under its own name.
    ///
    /// Overwrites any existing codec with the same name. Returns the
    /// previous codec if one existed.
    pub fn register_codec<C>(&mut self, codec: C) -> Option<Arc<dyn ValueCodec>>
    where
        C: ValueCodec + 'static,
    {
        let key = canonical_name(codec.name());
        self.codecs.insert(key, Arc::new(codec))
    }

    /// Register a binding under its own name.
    ///
    /// Overwrites any existing binding with the same name. Returns the
    /// previous binding if one existed.
    pub fn register_binding<B>(&mut self, binding: B) -> Option<Arc<dyn ValueBinding>>
    where
        B: ValueBinding + 'static,
    {
        let key = canonical_name(binding.name());
        self.bindings.insert(key, Arc::new(binding))
    }

    /// Look up a codec by declared type name.
    #[must_use]
    pub fn find_codec(&self, name: &str) -> Option<Arc<dyn ValueCodec>> {
        let canon = canonical_name(name);
        let result = self.codecs.get(&canon).map(Arc::clone);
        debug!(
            name = %canon,
            kind = "codec",
            hit = result.is_some(),
            "registry lookup"
        );
        result
    }

    /// Look up a binding by declared type name.
    #[must_use]
    pub fn find_binding(&self, name: &str) -> Option<Arc<dyn ValueBinding>> {
        let canon = canonical_name(name);
        let result = self.bindings.get(&canon).map(Arc::clone);
        debug!(
            name = %canon,
            kind = "binding",
            hit = result.is_some(),
            "registry lookup"
        );
        result
    }

    /// Whether a codec is registered under this name.
    #[must_use]
    pub fn contains_codec(&self, name: &str) -> bool {
        self.codecs.contains_key(&canonical_name(name))
    }

    /// Whether a binding is registered under this name.
    #[must_use]
    pub fn contains_binding(&self, name: &str) -> bool {
        self.bindings.contains_key(&canonical_name(name))
    }
}

fn canonical_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use confit_error::Result;
    use confit_types::{ComplexValue, ScalarValue};

    use super::*;

    // -- Mock: a codec for uppercase identifiers --

    struct UpperCodec;

    impl ValueCodec for UpperCodec {
        fn name(&self) -> &str {
            "Upper"
        }

        fn parse(&self, text: &str) -> Result<ScalarValue> {
            Ok(ScalarValue::Str(text.to_ascii_uppercase()))
        }

        fn format(&self, value: &ScalarValue) -> Result<String> {
            Ok(value.to_string())
        }

        fn accepts(&self, value: &ScalarValue) -> bool {
            matches!(value, ScalarValue::Str(_))
        }

        fn default_value(&self) -> ScalarValue {
            ScalarValue::Str(String::new())
        }
    }

    struct NullBinding;

    impl ValueBinding for NullBinding {
        fn name(&self) -> &str {
            "upper"
        }

        fn load(&self, _source: &mut dyn BindingSource) -> Result<ComplexValue> {
            Ok(ComplexValue::new(StringList(Vec::new())))
        }

        fn store(&self, _value: &ComplexValue, _sink: &mut dyn BindingSink) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = CodecRegistry::new();
        registry.register_codec(UpperCodec);

        assert!(registry.find_codec("upper").is_some());
        assert!(registry.find_codec("UPPER").is_some());
        assert!(registry.find_codec(" upper ").is_some());
        assert!(registry.find_codec("other").is_none());
    }

    #[test]
    fn test_register_returns_previous() {
        let mut registry = CodecRegistry::new();
        assert!(registry.register_codec(UpperCodec).is_none());
        let previous = registry.register_codec(UpperCodec);
        assert!(previous.is_some());
    }

    #[test]
    fn test_codec_and_binding_namespaces_are_separate() {
        let mut registry = CodecRegistry::new();
        registry.register_codec(UpperCodec);
        registry.register_binding(NullBinding);

        assert!(registry.contains_codec("upper"));
        assert!(registry.contains_binding("upper"));
        assert!(!registry.contains_binding("string"));
    }

    #[test]
    fn test_builtins_present() {
        let registry = CodecRegistry::with_builtins();
        for name in ["string", "boolean", "int", "long", "double"] {
            assert!(registry.contains_codec(name), "missing codec {name}");
        }
        assert!(registry.contains_binding("strings"));
        assert!(!registry.contains_codec("strings"));
    }
}
