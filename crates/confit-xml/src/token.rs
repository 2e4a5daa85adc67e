//! Token stream of the XML subset.

/// One markup token, with its 1-based source position.
///
/// Attribute values and character data arrive entity-decoded; CDATA
/// sections surface as ordinary [`XmlToken::Text`]. Comments, the XML
/// declaration and whitespace-only character runs are dropped by the
/// lexer and never reach the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlToken {
    /// An opening tag.
    Start {
        /// Element name, prefix included when one was written.
        name: String,
        /// Attributes in document order, values decoded.
        attributes: Vec<(String, String)>,
        /// Whether the tag closed itself (`<a/>`); no matching
        /// [`XmlToken::End`] follows.
        self_closing: bool,
        /// Line of the `<`.
        line: u32,
        /// Column of the `<`.
        col: u32,
    },
    /// A closing tag.
    End {
        /// Element name as written.
        name: String,
        /// Line of the `<`.
        line: u32,
        /// Column of the `<`.
        col: u32,
    },
    /// Character data between tags, decoded. Whitespace-only runs are
    /// dropped unless they came from a CDATA section.
    Text {
        /// Decoded content.
        text: String,
        /// Line the run starts on.
        line: u32,
        /// Column the run starts at.
        col: u32,
    },
    /// End of input.
    Eof,
}

impl XmlToken {
    /// Source position of the token, when it carries one.
    #[must_use]
    pub fn position(&self) -> Option<(u32, u32)> {
        match self {
            Self::Start { line, col, .. }
            | Self::End { line, col, .. }
            | Self::Text { line, col, .. } => Some((*line, *col)),
            Self::Eof => None,
        }
    }
}
