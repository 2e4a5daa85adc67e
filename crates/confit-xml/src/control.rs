//! The reserved control namespace.
//!
//! Structural directives travel as attributes in the `urn:confit:config`
//! namespace (conventional prefix `cfg`): concrete-type and interface
//! markers, the abstract flag, collection merge operations, position
//! directives with their anchor key, and the fresh-definition override
//! flag. This module resolves namespace prefixes and splits an element's
//! attribute list into control directives and plain content attributes.

use std::collections::HashMap;
use std::fmt;

use confit_error::{ConfitError, Result};

/// Namespace URI reserved for control attributes.
pub const CONTROL_NS: &str = "urn:confit:config";

/// Conventional prefix for [`CONTROL_NS`]; pre-bound so documents may
/// omit the declaration.
pub const CONTROL_PREFIX: &str = "cfg";

/// How one parsed collection entry combines with the working entry list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOp {
    /// Insert a new entry; a same-keyed existing entry is an error.
    Add,
    /// Replace the same-keyed existing entry; its absence is an error.
    Update,
    /// Update when the key exists, add otherwise.
    AddOrUpdate,
    /// Delete the same-keyed entry; combining with a position directive
    /// is an error.
    Remove,
}

impl MergeOp {
    /// Parse the attribute form.
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "add" => Ok(Self::Add),
            "update" => Ok(Self::Update),
            "add-or-update" => Ok(Self::AddOrUpdate),
            "remove" => Ok(Self::Remove),
            other => Err(ConfitError::internal(format!(
                "unknown merge operation '{other}'"
            ))),
        }
    }

    /// The attribute form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::AddOrUpdate => "add-or-update",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for MergeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placement of a list entry relative to its keyed siblings.
///
/// `Before` and `After` require the companion anchor attribute naming the
/// reference key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Front of the list.
    Begin,
    /// Back of the list (the default).
    End,
    /// Directly before the anchor entry.
    Before,
    /// Directly after the anchor entry.
    After,
}

impl Position {
    /// Parse the attribute form.
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "begin" => Ok(Self::Begin),
            "end" => Ok(Self::End),
            "before" => Ok(Self::Before),
            "after" => Ok(Self::After),
            other => Err(ConfitError::internal(format!(
                "unknown position '{other}'"
            ))),
        }
    }

    /// The attribute form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::End => "end",
            Self::Before => "before",
            Self::After => "after",
        }
    }

    /// Whether this position needs the anchor attribute.
    #[must_use]
    pub const fn needs_anchor(self) -> bool {
        matches!(self, Self::Before | Self::After)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prefix-to-URI bindings, one map pushed per element.
///
/// The root scope pre-binds the conventional `cfg` prefix to the control
/// namespace; an explicit declaration on any element may rebind it.
pub struct NamespaceScope {
    stack: Vec<HashMap<String, String>>,
}

impl Default for NamespaceScope {
    fn default() -> Self {
        let mut root = HashMap::new();
        root.insert(CONTROL_PREFIX.to_owned(), CONTROL_NS.to_owned());
        Self { stack: vec![root] }
    }
}

impl NamespaceScope {
    /// A scope with only the conventional binding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter an element, recording its `xmlns:` declarations.
    pub fn push(&mut self, attributes: &[(String, String)]) {
        let mut bindings = HashMap::new();
        for (name, value) in attributes {
            if let Some(prefix) = name.strip_prefix("xmlns:") {
                bindings.insert(prefix.to_owned(), value.clone());
            }
        }
        self.stack.push(bindings);
    }

    /// Leave the innermost element.
    pub fn pop(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    /// The URI bound to a prefix, innermost binding first.
    #[must_use]
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.stack
            .iter()
            .rev()
            .find_map(|bindings| bindings.get(prefix))
            .map(String::as_str)
    }

    /// The local part of a control-namespace name, when the prefix of
    /// `name` is bound to [`CONTROL_NS`].
    #[must_use]
    pub fn control_local<'n>(&self, name: &'n str) -> Option<&'n str> {
        let (prefix, local) = name.split_once(':')?;
        (self.resolve(prefix) == Some(CONTROL_NS)).then_some(local)
    }
}

/// The control directives carried by one element.
#[derive(Debug, Default)]
pub struct ControlAttrs {
    /// `cfg:impl`: concrete schema of the element.
    pub schema_impl: Option<String>,
    /// `cfg:interface`: declared interface of the element.
    pub interface: Option<String>,
    /// `cfg:abstract`: the element is a template, not an instance.
    pub is_abstract: bool,
    /// `cfg:op`: collection merge operation.
    pub op: Option<MergeOp>,
    /// `cfg:pos`: list placement.
    pub pos: Option<Position>,
    /// `cfg:anchor`: reference key for `before`/`after`.
    pub anchor: Option<String>,
    /// `cfg:override`: treat as a fresh definition, ignore any base.
    pub is_override: bool,
}

impl ControlAttrs {
    /// Split an attribute list into control directives and plain content
    /// attributes. Namespace declarations are dropped. Unknown control
    /// attributes and malformed directive values are errors.
    pub fn extract(
        attributes: &[(String, String)],
        scope: &NamespaceScope,
    ) -> Result<(Self, Vec<(String, String)>)> {
        let mut control = Self::default();
        let mut plain = Vec::new();
        for (name, value) in attributes {
            if name == "xmlns" || name.starts_with("xmlns:") {
                continue;
            }
            let Some(local) = scope.control_local(name) else {
                plain.push((name.clone(), value.clone()));
                continue;
            };
            match local {
                "impl" => control.schema_impl = Some(value.clone()),
                "interface" => control.interface = Some(value.clone()),
                "abstract" => control.is_abstract = parse_flag(local, value)?,
                "op" => control.op = Some(MergeOp::parse(value)?),
                "pos" => control.pos = Some(Position::parse(value)?),
                "anchor" => control.anchor = Some(value.clone()),
                "override" => control.is_override = parse_flag(local, value)?,
                other => {
                    return Err(ConfitError::internal(format!(
                        "unknown control attribute '{other}'"
                    )))
                }
            }
        }
        if let Some(pos) = control.pos {
            if pos.needs_anchor() && control.anchor.is_none() {
                return Err(ConfitError::internal(format!(
                    "position '{pos}' requires an anchor key"
                )));
            }
        }
        Ok((control, plain))
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ConfitError::internal(format!(
            "control attribute '{name}' expects true or false, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(n, v)| ((*n).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_merge_op_round_trip() {
        for op in [
            MergeOp::Add,
            MergeOp::Update,
            MergeOp::AddOrUpdate,
            MergeOp::Remove,
        ] {
            assert_eq!(MergeOp::parse(op.as_str()).unwrap(), op);
        }
        assert!(MergeOp::parse("merge").is_err());
    }

    #[test]
    fn test_position_round_trip() {
        for pos in [Position::Begin, Position::End, Position::Before, Position::After] {
            assert_eq!(Position::parse(pos.as_str()).unwrap(), pos);
        }
        assert!(Position::Begin.needs_anchor() == false);
        assert!(Position::Before.needs_anchor());
        assert!(Position::parse("middle").is_err());
    }

    #[test]
    fn test_conventional_prefix_is_prebound() {
        let scope = NamespaceScope::new();
        assert_eq!(scope.resolve("cfg"), Some(CONTROL_NS));
        assert_eq!(scope.control_local("cfg:op"), Some("op"));
        assert_eq!(scope.control_local("op"), None);
        assert_eq!(scope.control_local("other:op"), None);
    }

    #[test]
    fn test_scope_rebinding_and_pop() {
        let mut scope = NamespaceScope::new();
        scope.push(&attrs(&[("xmlns:c", CONTROL_NS), ("xmlns:cfg", "urn:other")]));
        assert_eq!(scope.control_local("c:impl"), Some("impl"));
        assert_eq!(scope.control_local("cfg:impl"), None);
        scope.pop();
        assert_eq!(scope.control_local("cfg:impl"), Some("impl"));
    }

    #[test]
    fn test_extract_splits_control_and_plain() {
        let scope = NamespaceScope::new();
        let (control, plain) = ControlAttrs::extract(
            &attrs(&[
                ("name", "db1"),
                ("cfg:op", "add-or-update"),
                ("cfg:pos", "after"),
                ("cfg:anchor", "db0"),
                ("xmlns:x", "urn:whatever"),
                ("port", "5432"),
            ]),
            &scope,
        )
        .expect("extract");

        assert_eq!(control.op, Some(MergeOp::AddOrUpdate));
        assert_eq!(control.pos, Some(Position::After));
        assert_eq!(control.anchor.as_deref(), Some("db0"));
        assert!(!control.is_override);
        assert_eq!(plain, attrs(&[("name", "db1"), ("port", "5432")]));
    }

    #[test]
    fn test_extract_rejects_bad_directives() {
        let scope = NamespaceScope::new();
        assert!(ControlAttrs::extract(&attrs(&[("cfg:op", "explode")]), &scope).is_err());
        assert!(ControlAttrs::extract(&attrs(&[("cfg:wat", "x")]), &scope).is_err());
        assert!(ControlAttrs::extract(&attrs(&[("cfg:override", "yes")]), &scope).is_err());
        // before/after without an anchor
        assert!(ControlAttrs::extract(&attrs(&[("cfg:pos", "before")]), &scope).is_err());
    }
}
