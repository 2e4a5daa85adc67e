//! Entity encoding and the CDATA convention.
//!
//! The document format protects markup-special characters with the five
//! predefined entities plus numeric character references. Text content
//! holding line breaks is written as a CDATA block instead, so the
//! breaks survive attribute-style whitespace handling in foreign tools.

use std::fmt::Write as _;

use confit_error::{ConfitError, Result};

/// Decode entity references in attribute or text content.
///
/// Supports the five predefined entities (`amp`, `lt`, `gt`, `quot`,
/// `apos`) and decimal/hex character references.
pub fn decode_entities(raw: &str) -> Result<String> {
    if !raw.contains('&') {
        return Ok(raw.to_owned());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        rest = &rest[at..];
        let Some(end) = rest.find(';') else {
            return Err(malformed(rest));
        };
        let name = &rest[1..end];
        match name {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let code = name
                    .strip_prefix("#x")
                    .or_else(|| name.strip_prefix("#X"))
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| name.strip_prefix('#').map(str::parse))
                    .ok_or_else(|| malformed(rest))?
                    .map_err(|_| malformed(rest))?;
                out.push(char::from_u32(code).ok_or_else(|| malformed(rest))?);
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn malformed(context: &str) -> ConfitError {
    let snippet: String = context.chars().take(12).collect();
    ConfitError::internal(format!("malformed entity reference at {snippet:?}"))
}

/// Encode a string for use inside a double-quoted attribute value.
#[must_use]
pub fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\t' => out.push_str("&#9;"),
            '\r' => out.push_str("&#13;"),
            other => out.push(other),
        }
    }
    out
}

/// Encode a string for use as element text content.
#[must_use]
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// Whether text content must be wrapped in a CDATA block to round-trip.
#[must_use]
pub fn needs_cdata(value: &str) -> bool {
    value.contains('\n') || value.contains('\r')
}

/// Whether a scalar rendering cannot live in an attribute and must use
/// element form.
#[must_use]
pub fn needs_element_form(value: &str) -> bool {
    needs_cdata(value)
}

/// Write `value` as a CDATA block, splitting any embedded `]]>`
/// terminator across two sections.
pub fn write_cdata(out: &mut String, value: &str) -> Result<()> {
    write!(out, "<![CDATA[")?;
    let mut rest = value;
    while let Some(at) = rest.find("]]>") {
        write!(out, "{}]]]]><![CDATA[>", &rest[..at])?;
        rest = &rest[at + 3..];
    }
    write!(out, "{rest}]]>")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_predefined_entities() {
        assert_eq!(decode_entities("a &amp; b").unwrap(), "a & b");
        assert_eq!(decode_entities("&lt;tag&gt;").unwrap(), "<tag>");
        assert_eq!(decode_entities("&quot;x&apos;").unwrap(), "\"x'");
        assert_eq!(decode_entities("no entities").unwrap(), "no entities");
    }

    #[test]
    fn test_decode_character_references() {
        assert_eq!(decode_entities("&#10;").unwrap(), "\n");
        assert_eq!(decode_entities("&#x41;&#X42;").unwrap(), "AB");
        assert!(decode_entities("&bogus;").is_err());
        assert!(decode_entities("&#xZZ;").is_err());
        assert!(decode_entities("dangling &amp").is_err());
    }

    #[test]
    fn test_escape_round_trips() {
        let hairy = "a<b&c>\"d\"\ne";
        assert_eq!(decode_entities(&escape_attribute(hairy)).unwrap(), hairy);
        // Text escaping leaves the newline alone; CDATA covers it.
        assert_eq!(
            decode_entities(&escape_text("x & <y>")).unwrap(),
            "x & <y>"
        );
    }

    #[test]
    fn test_needs_cdata() {
        assert!(needs_cdata("two\nlines"));
        assert!(needs_cdata("cr\rhere"));
        assert!(!needs_cdata("flat & spiky <"));
    }

    #[test]
    fn test_cdata_splits_terminator() {
        let mut out = String::new();
        write_cdata(&mut out, "a]]>b").unwrap();
        assert_eq!(out, "<![CDATA[a]]]]><![CDATA[>b]]>");

        let mut plain = String::new();
        write_cdata(&mut plain, "line1\nline2").unwrap();
        assert_eq!(plain, "<![CDATA[line1\nline2]]>");
    }
}
