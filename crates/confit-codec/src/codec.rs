//! Value codec trait: text to scalar and back.
//!
//! A value codec owns one scalar type's textual form. Codecs are looked up
//! by the declared type name of a property ("int", "string", …) and are
//! consulted three times in a property's life:
//!
//! - at descriptor build time, to parse textual defaults and to supply the
//!   type default for non-nullable properties without one,
//! - at document load time, to parse attribute text,
//! - at document store time, to format values back to attribute text.
//!
//! Codecs never see null. Nullability is a property attribute handled
//! above the codec: an empty attribute on a nullable property becomes
//! null without the codec being asked.

use confit_error::Result;
use confit_types::ScalarValue;

/// Translates between attribute text and one scalar type.
///
/// Implementations are shared across threads behind `Arc` in the
/// [`CodecRegistry`](crate::CodecRegistry), so they must be stateless or
/// internally synchronized.
pub trait ValueCodec: Send + Sync {
    /// The declared type name this codec serves, as written in schema
    /// definitions. Matched case-insensitively.
    fn name(&self) -> &str;

    /// Parse attribute text into a scalar.
    ///
    /// Errors use [`ConfitError::Codec`](confit_error::ConfitError::Codec)
    /// so the caller can attach document position.
    fn parse(&self, text: &str) -> Result<ScalarValue>;

    /// Format a scalar back to attribute text.
    ///
    /// The input is always a value this codec [`accepts`](Self::accepts);
    /// the output must parse back to an equal value.
    fn format(&self, value: &ScalarValue) -> Result<String>;

    /// Whether a programmatically supplied scalar belongs to this codec's
    /// type. Used to reject mistyped `update` calls before storage.
    fn accepts(&self, value: &ScalarValue) -> bool;

    /// The type default, used for non-nullable properties that declare no
    /// explicit default.
    fn default_value(&self) -> ScalarValue;

    /// Split a joined collection rendering into element texts.
    ///
    /// Serves array properties in attribute form. The default splits on
    /// commas and trims; a whitespace-only input yields no elements.
    fn split_list(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        text.split(',').map(|part| part.trim().to_owned()).collect()
    }

    /// Join element texts into the collection rendering that
    /// [`split_list`](Self::split_list) splits.
    fn join_list(&self, parts: &[String]) -> String {
        parts.join(", ")
    }
}
