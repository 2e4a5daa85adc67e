//! Built-in scalar codecs and the string-list binding.
//!
//! These cover the declared type names every schema can rely on without
//! registering anything: `string`, `boolean`, `int`, `long`, `double`,
//! and the complex type `strings`.

use std::any::Any;

use confit_error::{ConfitError, Result};
use confit_types::{ComplexPayload, ComplexValue, ScalarValue};
use tracing::debug;

use crate::binding::{BindingEvent, BindingSink, BindingSource, ValueBinding};
use crate::codec::ValueCodec;
use crate::CodecRegistry;

/// Register every built-in codec and binding.
///
/// Overwrites any previously registered entry with the same name, so
/// callers that want to shadow a built-in must register after this call.
pub fn register_builtins(registry: &mut CodecRegistry) {
    registry.register_codec(StringCodec);
    registry.register_codec(BooleanCodec);
    registry.register_codec(IntCodec);
    registry.register_codec(LongCodec);
    registry.register_codec(DoubleCodec);
    registry.register_binding(StringListBinding);
    debug!(codecs = 5, bindings = 1, "registered built-in codecs");
}

// ---------------------------------------------------------------------------
// string
// ---------------------------------------------------------------------------

/// `string`: text passes through unchanged, whitespace preserved.
pub struct StringCodec;

impl ValueCodec for StringCodec {
    fn name(&self) -> &str {
        "string"
    }

    fn parse(&self, text: &str) -> Result<ScalarValue> {
        Ok(ScalarValue::Str(text.to_owned()))
    }

    fn format(&self, value: &ScalarValue) -> Result<String> {
        match value {
            ScalarValue::Str(s) => Ok(s.clone()),
            other => Err(not_my_type("string", other)),
        }
    }

    fn accepts(&self, value: &ScalarValue) -> bool {
        matches!(value, ScalarValue::Str(_))
    }

    fn default_value(&self) -> ScalarValue {
        ScalarValue::Str(String::new())
    }
}

// ---------------------------------------------------------------------------
// boolean
// ---------------------------------------------------------------------------

/// `boolean`: exactly `true` or `false`, surrounding whitespace ignored.
pub struct BooleanCodec;

impl ValueCodec for BooleanCodec {
    fn name(&self) -> &str {
        "boolean"
    }

    fn parse(&self, text: &str) -> Result<ScalarValue> {
        match text.trim() {
            "true" => Ok(ScalarValue::Bool(true)),
            "false" => Ok(ScalarValue::Bool(false)),
            other => Err(ConfitError::codec(
                "boolean",
                format!("expected true or false, got {other:?}"),
            )),
        }
    }

    fn format(&self, value: &ScalarValue) -> Result<String> {
        match value {
            ScalarValue::Bool(b) => Ok(b.to_string()),
            other => Err(not_my_type("boolean", other)),
        }
    }

    fn accepts(&self, value: &ScalarValue) -> bool {
        matches!(value, ScalarValue::Bool(_))
    }

    fn default_value(&self) -> ScalarValue {
        ScalarValue::Bool(false)
    }
}

// ---------------------------------------------------------------------------
// int / long
// ---------------------------------------------------------------------------

/// `int`: 32-bit signed range, stored widened to `i64`.
pub struct IntCodec;

impl ValueCodec for IntCodec {
    fn name(&self) -> &str {
        "int"
    }

    fn parse(&self, text: &str) -> Result<ScalarValue> {
        let value: i64 = text
            .trim()
            .parse()
            .map_err(|_| ConfitError::codec("int", format!("not an integer: {text:?}")))?;
        if i32::try_from(value).is_err() {
            return Err(ConfitError::codec(
                "int",
                format!("out of 32-bit range: {value}"),
            ));
        }
        Ok(ScalarValue::Int(value))
    }

    fn format(&self, value: &ScalarValue) -> Result<String> {
        match value {
            ScalarValue::Int(i) => Ok(i.to_string()),
            other => Err(not_my_type("int", other)),
        }
    }

    fn accepts(&self, value: &ScalarValue) -> bool {
        matches!(value, ScalarValue::Int(i) if i32::try_from(*i).is_ok())
    }

    fn default_value(&self) -> ScalarValue {
        ScalarValue::Int(0)
    }
}

/// `long`: full 64-bit signed range.
pub struct LongCodec;

impl ValueCodec for LongCodec {
    fn name(&self) -> &str {
        "long"
    }

    fn parse(&self, text: &str) -> Result<ScalarValue> {
        let value: i64 = text
            .trim()
            .parse()
            .map_err(|_| ConfitError::codec("long", format!("not an integer: {text:?}")))?;
        Ok(ScalarValue::Int(value))
    }

    fn format(&self, value: &ScalarValue) -> Result<String> {
        match value {
            ScalarValue::Int(i) => Ok(i.to_string()),
            other => Err(not_my_type("long", other)),
        }
    }

    fn accepts(&self, value: &ScalarValue) -> bool {
        matches!(value, ScalarValue::Int(_))
    }

    fn default_value(&self) -> ScalarValue {
        ScalarValue::Int(0)
    }
}

// ---------------------------------------------------------------------------
// double
// ---------------------------------------------------------------------------

/// `double`: 64-bit float via the standard textual form.
pub struct DoubleCodec;

impl ValueCodec for DoubleCodec {
    fn name(&self) -> &str {
        "double"
    }

    fn parse(&self, text: &str) -> Result<ScalarValue> {
        let value: f64 = text
            .trim()
            .parse()
            .map_err(|_| ConfitError::codec("double", format!("not a number: {text:?}")))?;
        Ok(ScalarValue::Float(value))
    }

    fn format(&self, value: &ScalarValue) -> Result<String> {
        match value {
            ScalarValue::Float(_) => Ok(value.to_string()),
            other => Err(not_my_type("double", other)),
        }
    }

    fn accepts(&self, value: &ScalarValue) -> bool {
        matches!(value, ScalarValue::Float(_))
    }

    fn default_value(&self) -> ScalarValue {
        ScalarValue::Float(0.0)
    }
}

fn not_my_type(codec: &str, value: &ScalarValue) -> ConfitError {
    ConfitError::codec(codec, format!("cannot format a {} value", value.type_name()))
}

// ---------------------------------------------------------------------------
// enum helper
// ---------------------------------------------------------------------------

/// Codec over a closed set of string literals.
///
/// Not registered by [`register_builtins`]; schemas construct and register
/// one per enumeration, named after the declared type:
///
/// ```rust
/// use confit_codec::{builtins::EnumCodec, CodecRegistry};
///
/// let mut registry = CodecRegistry::with_builtins();
/// registry.register_codec(EnumCodec::new("log-level", ["debug", "info", "warn"]));
/// assert!(registry.contains_codec("log-level"));
/// ```
///
/// The first literal is the type default.
pub struct EnumCodec {
    name: String,
    literals: Vec<String>,
}

impl EnumCodec {
    /// Build an enum codec from its declared type name and literals.
    ///
    /// # Panics
    ///
    /// Panics when the literal set is empty; an enum without literals has
    /// no default and can never parse.
    pub fn new<I, S>(name: impl Into<String>, literals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let literals: Vec<String> = literals.into_iter().map(Into::into).collect();
        assert!(!literals.is_empty(), "enum codec needs at least one literal");
        Self {
            name: name.into(),
            literals,
        }
    }
}

impl ValueCodec for EnumCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn parse(&self, text: &str) -> Result<ScalarValue> {
        let trimmed = text.trim();
        if self.literals.iter().any(|l| l == trimmed) {
            Ok(ScalarValue::Str(trimmed.to_owned()))
        } else {
            Err(ConfitError::codec(
                &self.name,
                format!(
                    "expected one of {}, got {trimmed:?}",
                    self.literals.join(", ")
                ),
            ))
        }
    }

    fn format(&self, value: &ScalarValue) -> Result<String> {
        match value {
            ScalarValue::Str(s) if self.literals.iter().any(|l| l == s) => Ok(s.clone()),
            other => Err(not_my_type(&self.name, other)),
        }
    }

    fn accepts(&self, value: &ScalarValue) -> bool {
        matches!(value, ScalarValue::Str(s) if self.literals.iter().any(|l| l == s))
    }

    fn default_value(&self) -> ScalarValue {
        ScalarValue::Str(self.literals[0].clone())
    }
}

// ---------------------------------------------------------------------------
// strings — the built-in string-list binding
// ---------------------------------------------------------------------------

/// Payload of the built-in `strings` type: an ordered list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StringList(pub Vec<String>);

impl ComplexPayload for StringList {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn payload_eq(&self, other: &dyn ComplexPayload) -> bool {
        other.as_any().downcast_ref::<Self>() == Some(self)
    }
}

/// `strings`: a list of strings as repeated `<entry value="..."/>`
/// children, with a comma-separated flat form for defaults.
pub struct StringListBinding;

impl ValueBinding for StringListBinding {
    fn name(&self) -> &str {
        "strings"
    }

    fn load(&self, source: &mut dyn BindingSource) -> Result<ComplexValue> {
        let mut entries = Vec::new();
        while let Some(event) = source.next_event()? {
            match event {
                BindingEvent::Start { name, attributes } => {
                    if name != "entry" {
                        return Err(ConfitError::codec(
                            "strings",
                            format!("expected <entry>, got <{name}>"),
                        ));
                    }
                    let value = attributes
                        .into_iter()
                        .find(|(attr, _)| attr == "value")
                        .map(|(_, v)| v)
                        .ok_or_else(|| {
                            ConfitError::codec("strings", "<entry> without value attribute")
                        })?;
                    entries.push(value);
                    match source.next_event()? {
                        Some(BindingEvent::End) => {}
                        _ => {
                            return Err(ConfitError::codec(
                                "strings",
                                "<entry> must be empty",
                            ));
                        }
                    }
                }
                BindingEvent::Text(text) => {
                    return Err(ConfitError::codec(
                        "strings",
                        format!("unexpected text content: {text:?}"),
                    ));
                }
                BindingEvent::End => {
                    return Err(ConfitError::codec("strings", "unbalanced end of element"));
                }
            }
        }
        Ok(ComplexValue::new(StringList(entries)))
    }

    fn store(&self, value: &ComplexValue, sink: &mut dyn BindingSink) -> Result<()> {
        let list = expect_string_list(value)?;
        for entry in &list.0 {
            sink.start_element("entry", &[("value", entry)])?;
            sink.end_element()?;
        }
        Ok(())
    }

    fn supports_flat(&self) -> bool {
        true
    }

    fn parse_flat(&self, text: &str) -> Result<ComplexValue> {
        let entries = if text.trim().is_empty() {
            Vec::new()
        } else {
            text.split(',').map(|part| part.trim().to_owned()).collect()
        };
        Ok(ComplexValue::new(StringList(entries)))
    }

    fn format_flat(&self, value: &ComplexValue) -> Result<String> {
        let list = expect_string_list(value)?;
        if list.0.iter().any(|entry| entry.contains(',')) {
            return Err(ConfitError::codec(
                "strings",
                "flat form cannot hold entries containing commas",
            ));
        }
        Ok(list.0.join(", "))
    }

    fn default_value(&self) -> Option<ComplexValue> {
        Some(ComplexValue::new(StringList::default()))
    }
}

fn expect_string_list(value: &ComplexValue) -> Result<&StringList> {
    value
        .downcast_ref::<StringList>()
        .ok_or_else(|| ConfitError::codec("strings", "payload is not a string list"))
}
