//! Search expression parser
//!
//! Grammar:
//!
//! ```text
//! query   := or_expr
//! or_expr := and_expr ("or" and_expr)*
//! and_expr:= unary*
//! unary   := "-" primary | primary
//! primary := "(" or_expr ")" | quoted | field ":" value | word
//! ```
//!
//! Terms side by side are ANDed; `or` binds looser than juxtaposition.
//! `case:` and `type:` are settings for the whole query, not terms: they
//! cannot be negated or stand alone as an `or` operand.
//! A bare word containing regex metacharacters is parsed as a regex and
//! lowered back to substrings when that is exact.

use crate::query::algebra::{simplify, try_map};
use crate::query::ast::{Q, Regexp, Substring, TypeKind};
use crate::query::regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed query text
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("query syntax error at byte {position}: {message}")]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the input
    pub position: usize,
}

/// Case handling selected with `case:`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseMode {
    Yes,
    No,
    /// Case sensitive iff the pattern has an uppercase letter
    Auto,
}

/// Parse a search expression into a simplified query tree
pub fn parse(input: &str) -> Result<Q, ParseError> {
    let mut parser = QueryParser::new(input);
    parser.parse()
}

/// Characters that make a bare word a regex
const REGEX_META: &[char] = &['.', '*', '+', '?', '[', ']', '(', ')', '{', '}', '|', '^', '$', '\\'];

struct QueryParser<'a> {
    input: &'a str,
    pos: usize,
    case: CaseMode,
    type_kind: Option<TypeKind>,
}

impl<'a> QueryParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            case: CaseMode::Auto,
            type_kind: None,
        }
    }

    fn parse(&mut self) -> Result<Q, ParseError> {
        let q = self.parse_or()?.unwrap_or(Q::Const(true));

        self.skip_whitespace();
        if !self.is_eof() {
            return Err(self.error("unexpected closing parenthesis"));
        }

        let q = simplify(apply_case(q, self.case, self.pos)?);
        Ok(match self.type_kind {
            Some(kind) => simplify(Q::typed(kind, q)),
            None => q,
        })
    }

    /// `None` when the expression holds no terms, e.g. `()` or `case:yes`
    fn parse_or(&mut self) -> Result<Option<Q>, ParseError> {
        let first = self.parse_and()?;
        let mut branches = vec![first];

        while self.consume_or() {
            let at = self.pos;
            let branch = self.parse_and()?;
            if branch.is_empty() {
                return Err(ParseError {
                    message: "missing operand after 'or'".to_string(),
                    position: at,
                });
            }
            branches.push(branch);
        }

        if branches.len() == 1 {
            let terms = branches.pop().unwrap_or_default();
            return Ok((!terms.is_empty()).then(|| Q::and(terms)));
        }
        if branches[0].is_empty() {
            return Err(self.error("missing operand before 'or'"));
        }
        Ok(Some(Q::or(branches.into_iter().map(Q::and).collect())))
    }

    fn parse_and(&mut self) -> Result<Vec<Q>, ParseError> {
        let mut terms = Vec::new();

        loop {
            self.skip_whitespace();

            if self.is_eof() || self.peek_char() == Some(')') || self.at_or_keyword() {
                break;
            }

            if let Some(term) = self.parse_unary()? {
                terms.push(term);
            }
        }

        Ok(terms)
    }

    fn parse_unary(&mut self) -> Result<Option<Q>, ParseError> {
        if self.peek_char() == Some('-') {
            let next = self.input[self.pos + 1..].chars().next();
            if next.is_some_and(|c| !c.is_whitespace() && c != ')') {
                let start = self.pos;
                self.advance();
                return match self.parse_primary()? {
                    Some(inner) => Ok(Some(Q::not(inner))),
                    None => Err(ParseError {
                        message: "nothing to negate".to_string(),
                        position: start,
                    }),
                };
            }
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Option<Q>, ParseError> {
        let start = self.pos;

        // Parenthesized expression
        if self.consume_char('(') {
            let node = self.parse_or()?;
            self.skip_whitespace();
            if !self.consume_char(')') {
                return Err(ParseError {
                    message: "unclosed parenthesis".to_string(),
                    position: start,
                });
            }
            return Ok(node);
        }

        // Quoted string is always a literal
        if self.peek_char() == Some('"') {
            let text = self.parse_quoted()?;
            return Ok(Some(Q::Substring(Substring::new(text))));
        }

        if let Some(field) = self.peek_field() {
            self.pos += field.len() + 1;
            return self.parse_field(field, start);
        }

        let word = self.read_word();
        self.bare_term(word, start, Scope::Any).map(Some)
    }

    fn parse_quoted(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        self.consume_char('"');
        let mut text = String::new();

        loop {
            match self.peek_char() {
                None => {
                    return Err(ParseError {
                        message: "unterminated quoted string".to_string(),
                        position: start,
                    });
                }
                Some('"') => {
                    self.advance();
                    return Ok(text);
                }
                Some('\\') => {
                    self.advance();
                    match self.peek_char() {
                        Some(escaped @ ('"' | '\\')) => text.push(escaped),
                        Some(other) => {
                            text.push('\\');
                            text.push(other);
                        }
                        None => continue,
                    }
                    self.advance();
                }
                Some(ch) => {
                    text.push(ch);
                    self.advance();
                }
            }
        }
    }

    /// Read a bare word. Parentheses inside the word are balanced so that
    /// `foo(bar)` stays one term while `(foo)` closes at the right place.
    fn read_word(&mut self) -> &'a str {
        let start = self.pos;
        let mut depth = 0usize;

        while let Some(ch) = self.peek_char() {
            match ch {
                c if c.is_whitespace() && depth == 0 => break,
                ')' if depth == 0 => break,
                ')' => depth -= 1,
                '(' => depth += 1,
                '\\' => {
                    self.advance();
                }
                _ => {}
            }
            self.advance();
        }

        let input = self.input;
        &input[start..self.pos]
    }

    /// Field name at the cursor, if the next token is `name:value`
    fn peek_field(&self) -> Option<&'a str> {
        let input = self.input;
        let rest = &input[self.pos..];
        let name_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        if name_len == 0 {
            return None;
        }
        let after = &rest[name_len..];
        if !after.starts_with(':') || after[1..].starts_with(':') || after[1..].starts_with("//") {
            return None;
        }
        Some(&rest[..name_len])
    }

    /// Settings update the parser and yield no term
    fn parse_field(&mut self, field: &str, start: usize) -> Result<Option<Q>, ParseError> {
        let quoted = self.peek_char() == Some('"');
        let value = if quoted {
            self.parse_quoted()?
        } else {
            self.read_word().to_string()
        };

        if value.is_empty() {
            return Err(ParseError {
                message: format!("missing value for field '{}'", field),
                position: start,
            });
        }

        let term = match field.to_ascii_lowercase().as_str() {
            "file" | "f" => self.term(value, quoted, start, Scope::FileName)?,
            "content" | "c" => self.term(value, quoted, start, Scope::Content)?,
            "repo" | "r" => Q::repo(value),
            "branch" | "b" | "ref" => Q::branch(value),
            "lang" => Q::language(value),
            "sym" => Q::Symbol(Substring::new(value)),
            "regex" => {
                let re = Regexp::new(value, false).map_err(|e| ParseError {
                    message: format!("invalid regex: {}", e),
                    position: start,
                })?;
                Scope::Any.apply(Q::Regexp(re))
            }
            "case" => {
                self.case = match value.as_str() {
                    "yes" => CaseMode::Yes,
                    "no" => CaseMode::No,
                    "auto" => CaseMode::Auto,
                    other => {
                        return Err(ParseError {
                            message: format!("invalid case value '{}', expected yes, no or auto", other),
                            position: start,
                        });
                    }
                };
                return Ok(None);
            }
            "type" => {
                self.type_kind = Some(match value.as_str() {
                    "repo" => TypeKind::Repo,
                    "file" | "filematch" => TypeKind::FileMatch,
                    "filename" => TypeKind::FileName,
                    other => {
                        return Err(ParseError {
                            message: format!("invalid type value '{}', expected repo or file", other),
                            position: start,
                        });
                    }
                });
                return Ok(None);
            }
            other => {
                return Err(ParseError {
                    message: format!("unknown field '{}'", other),
                    position: start,
                });
            }
        };
        Ok(Some(term))
    }

    fn term(&self, value: String, quoted: bool, start: usize, scope: Scope) -> Result<Q, ParseError> {
        if quoted {
            Ok(scope.apply(Q::Substring(Substring::new(value))))
        } else {
            self.bare_term(&value, start, scope)
        }
    }

    fn bare_term(&self, word: &str, start: usize, scope: Scope) -> Result<Q, ParseError> {
        if !word.contains(REGEX_META) {
            return Ok(scope.apply(Q::substring(word)));
        }

        let invalid = |message: String| ParseError {
            message,
            position: start,
        };
        let lowered = regex::lower(word).map_err(|e| invalid(format!("invalid regex: {}", e)))?;
        let q = match lowered {
            Some(q) => q,
            None => Q::Regexp(Regexp::new(word, false).map_err(|e| invalid(format!("invalid regex: {}", e)))?),
        };
        Ok(scope.apply(q))
    }

    fn at_or_keyword(&self) -> bool {
        let rest = &self.input[self.pos..];
        let Some(prefix) = rest.get(..2) else {
            return false;
        };
        prefix.eq_ignore_ascii_case("or")
            && rest[2..]
                .chars()
                .next()
                .is_none_or(|c| c.is_whitespace() || c == '(')
    }

    fn consume_or(&mut self) -> bool {
        self.skip_whitespace();
        if self.at_or_keyword() {
            self.pos += 2;
            true
        } else {
            false
        }
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            position: self.pos,
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn consume_char(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) {
        if let Some(ch) = self.peek_char() {
            self.pos += ch.len_utf8();
        }
    }
}

/// Where a pattern term applies
#[derive(Debug, Clone, Copy)]
enum Scope {
    Any,
    FileName,
    Content,
}

impl Scope {
    /// Mark every pattern atom produced for one term
    fn apply(self, q: Q) -> Q {
        let (file_name, content) = match self {
            Scope::Any => return q,
            Scope::FileName => (true, false),
            Scope::Content => (false, true),
        };
        crate::query::map(q, std::convert::identity, |node| match node {
            Q::Substring(mut s) => {
                s.file_name = file_name;
                s.content = content;
                Q::Substring(s)
            }
            Q::Regexp(mut re) => {
                re.file_name = file_name;
                re.content = content;
                Q::Regexp(re)
            }
            other => other,
        })
    }
}

fn apply_case(q: Q, mode: CaseMode, position: usize) -> Result<Q, ParseError> {
    let sensitive = |pattern: &str| match mode {
        CaseMode::Yes => true,
        CaseMode::No => false,
        CaseMode::Auto => pattern.chars().any(char::is_uppercase),
    };

    try_map(q, Ok, |node| match node {
        Q::Substring(mut s) => {
            s.case_sensitive = sensitive(&s.pattern);
            Ok(Q::Substring(s))
        }
        Q::Symbol(mut s) => {
            s.case_sensitive = sensitive(&s.pattern);
            Ok(Q::Symbol(s))
        }
        Q::Regexp(re) => {
            let case_sensitive = sensitive(re.pattern());
            re.with_case_sensitive(case_sensitive)
                .map(Q::Regexp)
                .map_err(|e| ParseError {
                    message: format!("invalid regex: {}", e),
                    position,
                })
        }
        other => Ok(other),
    })
}
