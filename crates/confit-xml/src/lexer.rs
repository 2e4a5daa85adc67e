//! Byte-level lexer for the XML subset.
//!
//! Produces the [`XmlToken`] stream the document reader walks. Uses
//! memchr to find markup boundaries and tracks line/column for error
//! reporting. Malformed markup is unrecoverable: the lexer cannot tell
//! where the next element boundary is, so every error here aborts the
//! enclosing parse.

use memchr::memchr;

use confit_error::{ConfitError, Result};

use crate::escape::decode_entities;
use crate::token::XmlToken;

/// Streaming tokenizer over one document source.
pub struct Lexer<'a> {
    /// The source bytes (UTF-8).
    src: &'a [u8],
    /// Current byte offset into src.
    pos: usize,
    /// Current line number (1-based).
    line: u32,
    /// Current column number (1-based).
    col: u32,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over the document text.
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Current position, 1-based.
    #[must_use]
    pub fn position(&self) -> (u32, u32) {
        (self.line, self.col)
    }

    /// Produce the next token.
    pub fn next_token(&mut self) -> Result<XmlToken> {
        loop {
            if self.pos >= self.src.len() {
                return Ok(XmlToken::Eof);
            }
            if self.peek() == Some(b'<') {
                match self.peek_at(1) {
                    Some(b'/') => return self.lex_end_tag(),
                    Some(b'!') => {
                        if self.starts_with(b"<!--") {
                            self.skip_comment()?;
                            continue;
                        }
                        if self.starts_with(b"<![CDATA[") {
                            return self.lex_cdata();
                        }
                        self.skip_declaration()?;
                        continue;
                    }
                    Some(b'?') => {
                        self.skip_processing_instruction()?;
                        continue;
                    }
                    Some(_) => return self.lex_start_tag(),
                    None => return Err(self.abort("dangling '<' at end of input")),
                }
            }
            match self.lex_text()? {
                Some(token) => return Ok(token),
                None => continue,
            }
        }
    }

    // -- character data --

    fn lex_text(&mut self) -> Result<Option<XmlToken>> {
        let (line, col) = self.position();
        let start = self.pos;
        let end = memchr(b'<', &self.src[self.pos..]).map_or(self.src.len(), |at| self.pos + at);
        while self.pos < end {
            self.advance();
        }
        let raw = std::str::from_utf8(&self.src[start..end])
            .map_err(|_| self.abort("document is not valid UTF-8"))?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let text = decode_entities(raw).map_err(|err| self.abort(err.to_string()))?;
        Ok(Some(XmlToken::Text { text, line, col }))
    }

    fn lex_cdata(&mut self) -> Result<XmlToken> {
        let (line, col) = self.position();
        self.skip_bytes(b"<![CDATA[".len());
        let start = self.pos;
        loop {
            let Some(at) = memchr(b']', &self.src[self.pos..]) else {
                return Err(self.abort("unterminated CDATA section"));
            };
            for _ in 0..at {
                self.advance();
            }
            if self.starts_with(b"]]>") {
                break;
            }
            self.advance();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| self.abort("document is not valid UTF-8"))?
            .to_owned();
        self.skip_bytes(3);
        // CDATA is verbatim: no entity decoding, whitespace preserved.
        Ok(XmlToken::Text { text, line, col })
    }

    // -- tags --

    fn lex_start_tag(&mut self) -> Result<XmlToken> {
        let (line, col) = self.position();
        self.advance(); // '<'
        let name = self.lex_name()?;
        let mut attributes = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'>') => {
                    self.advance();
                    return Ok(XmlToken::Start {
                        name,
                        attributes,
                        self_closing: false,
                        line,
                        col,
                    });
                }
                Some(b'/') if self.peek_at(1) == Some(b'>') => {
                    self.skip_bytes(2);
                    return Ok(XmlToken::Start {
                        name,
                        attributes,
                        self_closing: true,
                        line,
                        col,
                    });
                }
                Some(_) => {
                    let attr = self.lex_attribute()?;
                    attributes.push(attr);
                }
                None => return Err(self.abort(format!("unterminated tag <{name}>"))),
            }
        }
    }

    fn lex_end_tag(&mut self) -> Result<XmlToken> {
        let (line, col) = self.position();
        self.skip_bytes(2); // '</'
        let name = self.lex_name()?;
        self.skip_whitespace();
        if self.peek() != Some(b'>') {
            return Err(self.abort(format!("malformed closing tag </{name}>")));
        }
        self.advance();
        Ok(XmlToken::End { name, line, col })
    }

    fn lex_attribute(&mut self) -> Result<(String, String)> {
        let name = self.lex_name()?;
        self.skip_whitespace();
        if self.peek() != Some(b'=') {
            return Err(self.abort(format!("attribute '{name}' without value")));
        }
        self.advance();
        self.skip_whitespace();
        let quote = match self.peek() {
            Some(q @ (b'"' | b'\'')) => q,
            _ => return Err(self.abort(format!("attribute '{name}' value is not quoted"))),
        };
        self.advance();
        let start = self.pos;
        let Some(at) = memchr(quote, &self.src[self.pos..]) else {
            return Err(self.abort(format!("unterminated value of attribute '{name}'")));
        };
        for _ in 0..at {
            self.advance();
        }
        let raw = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| self.abort("document is not valid UTF-8"))?;
        let value = decode_entities(raw).map_err(|err| self.abort(err.to_string()))?;
        self.advance(); // closing quote
        Ok((name, value))
    }

    fn lex_name(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || matches!(ch, b'-' | b'_' | b'.' | b':') {
                self.advance();
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.abort("expected a name"));
        }
        Ok(std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| self.abort("document is not valid UTF-8"))?
            .to_owned())
    }

    // -- skipped constructs --

    fn skip_comment(&mut self) -> Result<()> {
        self.skip_bytes(4); // '<!--'
        loop {
            let Some(at) = memchr(b'-', &self.src[self.pos..]) else {
                return Err(self.abort("unterminated comment"));
            };
            for _ in 0..at {
                self.advance();
            }
            if self.starts_with(b"-->") {
                self.skip_bytes(3);
                return Ok(());
            }
            self.advance();
        }
    }

    /// Skip `<!DOCTYPE ...>` and similar declarations. Internal subsets
    /// (nested brackets) are not part of the subset and are rejected by
    /// the unbalanced `>` they produce.
    fn skip_declaration(&mut self) -> Result<()> {
        let Some(at) = memchr(b'>', &self.src[self.pos..]) else {
            return Err(self.abort("unterminated markup declaration"));
        };
        for _ in 0..=at {
            self.advance();
        }
        Ok(())
    }

    fn skip_processing_instruction(&mut self) -> Result<()> {
        loop {
            let Some(at) = memchr(b'?', &self.src[self.pos..]) else {
                return Err(self.abort("unterminated processing instruction"));
            };
            for _ in 0..at {
                self.advance();
            }
            if self.peek_at(1) == Some(b'>') {
                self.skip_bytes(2);
                return Ok(());
            }
            self.advance();
        }
    }

    // -- cursor --

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn starts_with(&self, prefix: &[u8]) -> bool {
        self.src[self.pos..].starts_with(prefix)
    }

    fn advance(&mut self) {
        if let Some(ch) = self.peek() {
            self.pos += 1;
            if ch == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn skip_bytes(&mut self, count: usize) {
        for _ in 0..count {
            self.advance();
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.advance();
        }
    }

    fn abort(&self, detail: impl Into<String>) -> ConfitError {
        ConfitError::ParseAborted {
            line: self.line,
            col: self.col,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_tokens(src: &str) -> Vec<XmlToken> {
        let mut lexer = Lexer::new(src);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token().expect("token");
            let done = token == XmlToken::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    #[test]
    fn test_lex_element_with_attributes() {
        let tokens = all_tokens(r#"<pair left="1" right='2'/>"#);
        assert_eq!(
            tokens[0],
            XmlToken::Start {
                name: "pair".to_owned(),
                attributes: vec![
                    ("left".to_owned(), "1".to_owned()),
                    ("right".to_owned(), "2".to_owned()),
                ],
                self_closing: true,
                line: 1,
                col: 1,
            }
        );
        assert_eq!(tokens[1], XmlToken::Eof);
    }

    #[test]
    fn test_lex_nested_elements_and_text() {
        let tokens = all_tokens("<server>\n  <host>db1</host>\n</server>");
        assert!(matches!(&tokens[0], XmlToken::Start { name, .. } if name == "server"));
        assert!(matches!(&tokens[1], XmlToken::Start { name, line: 2, .. } if name == "host"));
        assert!(matches!(&tokens[2], XmlToken::Text { text, .. } if text == "db1"));
        assert!(matches!(&tokens[3], XmlToken::End { name, .. } if name == "host"));
        assert!(matches!(&tokens[4], XmlToken::End { name, line: 3, .. } if name == "server"));
    }

    #[test]
    fn test_whitespace_only_text_is_dropped() {
        let tokens = all_tokens("<a>\n   \n</a>");
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn test_entities_decoded_in_text_and_attributes() {
        let tokens = all_tokens(r#"<a note="x &amp; y">1 &lt; 2</a>"#);
        match &tokens[0] {
            XmlToken::Start { attributes, .. } => {
                assert_eq!(attributes[0].1, "x & y");
            }
            other => panic!("unexpected token {other:?}"),
        }
        assert!(matches!(&tokens[1], XmlToken::Text { text, .. } if text == "1 < 2"));
    }

    #[test]
    fn test_cdata_is_verbatim() {
        let tokens = all_tokens("<a><![CDATA[two\nlines & <raw>]]></a>");
        assert!(
            matches!(&tokens[1], XmlToken::Text { text, .. } if text == "two\nlines & <raw>")
        );
    }

    #[test]
    fn test_comments_and_declarations_skipped() {
        let tokens = all_tokens("<?xml version=\"1.0\"?><!-- note --><a/><!-- tail -->");
        assert!(matches!(&tokens[0], XmlToken::Start { name, .. } if name == "a"));
        assert_eq!(tokens[1], XmlToken::Eof);
    }

    #[test]
    fn test_malformed_markup_aborts() {
        let mut lexer = Lexer::new("<a foo></a>");
        let err = lexer.next_token().expect_err("attribute without value");
        assert!(matches!(err, ConfitError::ParseAborted { .. }));

        let mut lexer = Lexer::new("<a><![CDATA[never closed");
        lexer.next_token().expect("start");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn test_position_tracking() {
        let tokens = all_tokens("<a>\n<b/>\n</a>");
        assert!(matches!(&tokens[1], XmlToken::Start { line: 2, col: 1, .. }));
        assert!(matches!(&tokens[2], XmlToken::End { line: 3, col: 1, .. }));
    }
}
