//! Value binding trait: structured subtrees to complex payloads and back.
//!
//! A value binding owns the document shape of one complex type. Where a
//! [`ValueCodec`](crate::ValueCodec) handles a single attribute string, a
//! binding consumes and produces a whole element subtree through the
//! neutral event surface defined here. The document layer implements
//! [`BindingSource`] over its token stream and [`BindingSink`] over its
//! output buffer; bindings stay independent of any concrete syntax.
//!
//! # Failure semantics
//!
//! A binding failure mid-subtree is terminal for the surrounding parse:
//! the source's cursor is somewhere inside the subtree and the caller
//! cannot resynchronize on an element boundary. Load errors therefore
//! abort the document parse instead of being collected and skipped.

use confit_error::{ConfitError, Result};
use confit_types::ComplexValue;

// ---------------------------------------------------------------------------
// Event surface — how bindings talk to the document layer
// ---------------------------------------------------------------------------

/// One structural event inside a bound subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingEvent {
    /// An opening tag with its attributes in document order.
    Start {
        /// Local element name.
        name: String,
        /// Attribute name/value pairs, entity references already decoded.
        attributes: Vec<(String, String)>,
    },
    /// Character data; whitespace-only runs are not delivered.
    Text(String),
    /// The closing tag matching the most recent unclosed [`Start`].
    ///
    /// [`Start`]: BindingEvent::Start
    End,
}

/// Pull side of the event surface, implemented by document readers.
///
/// The source is scoped to one property subtree: the first event is the
/// first child of the property element, and `next_event` returns `None`
/// once the property element itself closes. `Start` and `End` events are
/// balanced within the stream.
pub trait BindingSource {
    /// The next event, or `None` at the end of the subtree.
    fn next_event(&mut self) -> Result<Option<BindingEvent>>;

    /// Current line and column, for diagnostics.
    fn position(&self) -> (u32, u32);
}

/// Push side of the event surface, implemented by document writers.
///
/// Calls must nest properly; the property element itself is already open
/// when the binding runs and is closed by the caller afterwards.
pub trait BindingSink {
    /// Open a child element with its attributes.
    fn start_element(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()>;

    /// Write character data into the current element.
    fn text(&mut self, text: &str) -> Result<()>;

    /// Close the most recently opened element.
    fn end_element(&mut self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// ValueBinding — the open trait
// ---------------------------------------------------------------------------

/// Translates between element subtrees and one complex payload type.
///
/// Implementations are shared behind `Arc` in the
/// [`CodecRegistry`](crate::CodecRegistry) and must be thread-safe.
///
/// The flat methods are optional: a binding whose payload round-trips
/// through a single string may additionally offer an attribute form, used
/// for textual defaults and compact rendering. The defaults report the
/// binding as subtree-only.
pub trait ValueBinding: Send + Sync {
    /// The declared type name this binding serves. Matched
    /// case-insensitively.
    fn name(&self) -> &str;

    /// Parse the subtree below the property element into a payload.
    ///
    /// Must consume the source to exhaustion; leftover events indicate a
    /// shape the binding does not understand and should be an error, not
    /// silently dropped.
    fn load(&self, source: &mut dyn BindingSource) -> Result<ComplexValue>;

    /// Write the payload as children of the already-open property element.
    fn store(&self, value: &ComplexValue, sink: &mut dyn BindingSink) -> Result<()>;

    /// Whether [`parse_flat`](Self::parse_flat) and
    /// [`format_flat`](Self::format_flat) are available.
    fn supports_flat(&self) -> bool {
        false
    }

    /// Parse the payload from a single attribute string.
    fn parse_flat(&self, text: &str) -> Result<ComplexValue> {
        let _ = text;
        Err(ConfitError::codec(self.name(), "no flat text form"))
    }

    /// Format the payload as a single attribute string.
    fn format_flat(&self, value: &ComplexValue) -> Result<String> {
        let _ = value;
        Err(ConfitError::codec(self.name(), "no flat text form"))
    }

    /// The type default for non-nullable properties without an explicit
    /// one, if the payload type has a natural empty value.
    fn default_value(&self) -> Option<ComplexValue> {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use confit_types::ComplexPayload;

    use super::*;

    // -- Mock: a source replaying a fixed event list --

    struct Replay {
        events: Vec<BindingEvent>,
        next: usize,
    }

    impl Replay {
        fn new(events: Vec<BindingEvent>) -> Self {
            Self { events, next: 0 }
        }
    }

    impl BindingSource for Replay {
        fn next_event(&mut self) -> Result<Option<BindingEvent>> {
            let event = self.events.get(self.next).cloned();
            self.next += 1;
            Ok(event)
        }

        fn position(&self) -> (u32, u32) {
            (1, 1)
        }
    }

    // -- Mock: payload counting elements --

    #[derive(Debug, PartialEq)]
    struct ElementCount(usize);

    impl ComplexPayload for ElementCount {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn payload_eq(&self, other: &dyn ComplexPayload) -> bool {
            other.as_any().downcast_ref::<Self>() == Some(self)
        }
    }

    struct CountBinding;

    impl ValueBinding for CountBinding {
        fn name(&self) -> &str {
            "count"
        }

        fn load(&self, source: &mut dyn BindingSource) -> Result<ComplexValue> {
            let mut count = 0;
            while let Some(event) = source.next_event()? {
                if matches!(event, BindingEvent::Start { .. }) {
                    count += 1;
                }
            }
            Ok(ComplexValue::new(ElementCount(count)))
        }

        fn store(&self, _value: &ComplexValue, _sink: &mut dyn BindingSink) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_binding_load_consumes_source() {
        let mut source = Replay::new(vec![
            BindingEvent::Start {
                name: "a".to_owned(),
                attributes: vec![],
            },
            BindingEvent::End,
            BindingEvent::Start {
                name: "b".to_owned(),
                attributes: vec![("id".to_owned(), "1".to_owned())],
            },
            BindingEvent::End,
        ]);
        let value = CountBinding.load(&mut source).unwrap();
        assert_eq!(value.downcast_ref::<ElementCount>(), Some(&ElementCount(2)));
    }

    #[test]
    fn test_flat_defaults_are_unsupported() {
        let binding = CountBinding;
        assert!(!binding.supports_flat());
        assert!(binding.parse_flat("3").is_err());
        assert!(binding.default_value().is_none());
    }
}
