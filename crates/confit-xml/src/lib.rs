//! Document layer of the typed configuration engine.
//!
//! Reads and writes configuration documents in a pragmatic XML subset:
//! elements, attributes, text content, CDATA sections, comments and
//! entity references. Namespaces exist only as far as the reserved
//! control namespace needs them; everything else in a document is plain
//! names.
//!
//! Reading is schema-driven: the caller names the declared root schema,
//! the document selects concrete subtypes through registered tags or
//! the `cfg:impl` marker, and an optional base item turns the parse into
//! a merge with per-entry operations ([`MergeOp`]) and list placement
//! ([`Position`]). Writing is the inverse: only explicitly set values
//! appear, declared-type defaults are elided, and control attributes are
//! emitted only where a plain rendering would not read back to the same
//! item.

pub mod control;
pub mod escape;
pub mod lexer;
pub mod reader;
pub mod token;
pub mod writer;

pub use control::{ControlAttrs, MergeOp, NamespaceScope, Position, CONTROL_NS, CONTROL_PREFIX};
pub use lexer::Lexer;
pub use reader::{parse, parse_from, read_document, DocumentContext};
pub use token::XmlToken;
pub use writer::{write_document, write_to};
