//! Scalar values, map entry keys, and opaque complex payloads.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// ScalarValue — the plain-property value universe
// ---------------------------------------------------------------------------

/// A scalar configuration value, as held by plain properties and map keys.
///
/// `Null` is a first-class member: nullable plain properties distinguish
/// "set to null" from "unset" via the item's per-property set flag, not
/// via a sentinel.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum ScalarValue {
    /// Absent value for nullable properties.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer; also carries `int` and `long` declared types.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Text.
    Str(String),
}

impl ScalarValue {
    /// Lowercase type name for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
        }
    }

    /// Whether this is the null value.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The boolean payload, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer payload, if this is an integer.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float payload; integers widen losslessly where possible.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// The string payload, if this is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => {
                // Keep a trailing `.0` so the text stays recognizably a float.
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ScalarValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for ScalarValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for ScalarValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for ScalarValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

// ---------------------------------------------------------------------------
// EntryKey — hashable identity of map entries
// ---------------------------------------------------------------------------

/// Error produced when a scalar cannot serve as a map entry key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEntryKey {
    type_name: &'static str,
}

impl fmt::Display for InvalidEntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} values cannot key map entries", self.type_name)
    }
}

impl std::error::Error for InvalidEntryKey {}

/// The key of a map entry, restricted to hashable scalar shapes.
///
/// Floats and null are excluded: floats have no total equality and a
/// null key would make the entry unaddressable during merges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub enum EntryKey {
    /// Boolean key.
    Bool(bool),
    /// Integer key.
    Int(i64),
    /// String key.
    Str(String),
}

impl EntryKey {
    /// The key as a scalar value, for codec round trips.
    #[must_use]
    pub fn to_scalar(&self) -> ScalarValue {
        match self {
            Self::Bool(b) => ScalarValue::Bool(*b),
            Self::Int(i) => ScalarValue::Int(*i),
            Self::Str(s) => ScalarValue::Str(s.clone()),
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl TryFrom<ScalarValue> for EntryKey {
    type Error = InvalidEntryKey;

    fn try_from(value: ScalarValue) -> Result<Self, Self::Error> {
        match value {
            ScalarValue::Bool(b) => Ok(Self::Bool(b)),
            ScalarValue::Int(i) => Ok(Self::Int(i)),
            ScalarValue::Str(s) => Ok(Self::Str(s)),
            other => Err(InvalidEntryKey {
                type_name: other.type_name(),
            }),
        }
    }
}

impl From<&str> for EntryKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for EntryKey {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for EntryKey {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

// ---------------------------------------------------------------------------
// ComplexValue — opaque payloads carried by complex properties
// ---------------------------------------------------------------------------

/// Payload stored behind a complex property.
///
/// Implementations are produced and consumed by a value binding; the
/// engine treats them as opaque and only needs equality for set-checks
/// and change notifications.
pub trait ComplexPayload: fmt::Debug + Send + Sync {
    /// Downcasting hook.
    fn as_any(&self) -> &dyn Any;

    /// Structural equality against another payload of any concrete type.
    fn payload_eq(&self, other: &dyn ComplexPayload) -> bool;
}

/// Shared handle to a complex payload.
#[derive(Debug, Clone)]
pub struct ComplexValue(Arc<dyn ComplexPayload>);

impl ComplexValue {
    /// Wraps a payload.
    pub fn new<P: ComplexPayload + 'static>(payload: P) -> Self {
        Self(Arc::new(payload))
    }

    /// Borrows the payload as its concrete type, if it is one.
    #[must_use]
    pub fn downcast_ref<P: ComplexPayload + 'static>(&self) -> Option<&P> {
        self.0.as_any().downcast_ref::<P>()
    }

    /// Borrows the payload as the trait object.
    #[must_use]
    pub fn payload(&self) -> &dyn ComplexPayload {
        self.0.as_ref()
    }
}

impl PartialEq for ComplexValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.payload_eq(other.0.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_type_names() {
        assert_eq!(ScalarValue::Null.type_name(), "null");
        assert_eq!(ScalarValue::Bool(true).type_name(), "boolean");
        assert_eq!(ScalarValue::Int(1).type_name(), "integer");
        assert_eq!(ScalarValue::Float(1.5).type_name(), "float");
        assert_eq!(ScalarValue::from("x").type_name(), "string");
    }

    #[test]
    fn test_scalar_accessors() {
        assert!(ScalarValue::Null.is_null());
        assert_eq!(ScalarValue::Bool(true).as_bool(), Some(true));
        assert_eq!(ScalarValue::Int(42).as_int(), Some(42));
        assert_eq!(ScalarValue::Int(2).as_float(), Some(2.0));
        assert_eq!(ScalarValue::from("hi").as_str(), Some("hi"));
        assert_eq!(ScalarValue::Bool(true).as_int(), None);
    }

    #[test]
    fn test_scalar_display() {
        assert_eq!(ScalarValue::Null.to_string(), "null");
        assert_eq!(ScalarValue::Int(-7).to_string(), "-7");
        assert_eq!(ScalarValue::Float(2.0).to_string(), "2.0");
        assert_eq!(ScalarValue::Float(2.5).to_string(), "2.5");
        assert_eq!(ScalarValue::from("plain").to_string(), "plain");
    }

    #[test]
    fn test_entry_key_from_scalar() {
        let key = EntryKey::try_from(ScalarValue::from("name")).expect("string key");
        assert_eq!(key, EntryKey::Str("name".to_owned()));
        assert_eq!(key.to_scalar(), ScalarValue::from("name"));

        let err = EntryKey::try_from(ScalarValue::Float(1.0)).expect_err("float key");
        assert_eq!(err.to_string(), "float values cannot key map entries");
        let err = EntryKey::try_from(ScalarValue::Null).expect_err("null key");
        assert_eq!(err.to_string(), "null values cannot key map entries");
    }

    #[derive(Debug, PartialEq)]
    struct Dims {
        width: u32,
        height: u32,
    }

    impl ComplexPayload for Dims {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn payload_eq(&self, other: &dyn ComplexPayload) -> bool {
            other.as_any().downcast_ref::<Self>() == Some(self)
        }
    }

    #[test]
    fn test_complex_value_downcast_and_eq() {
        let a = ComplexValue::new(Dims {
            width: 4,
            height: 3,
        });
        let b = ComplexValue::new(Dims {
            width: 4,
            height: 3,
        });
        let c = ComplexValue::new(Dims {
            width: 9,
            height: 9,
        });

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            a.downcast_ref::<Dims>(),
            Some(&Dims {
                width: 4,
                height: 3
            })
        );
    }
}
