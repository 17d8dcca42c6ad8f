// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Line-oriented parser for the manifest's closed configuration subset.
//!
//! Supported syntax: scalar `key: value` pairs, block mappings up to three
//! levels deep, inline (`[a, b]`) and block (`- item`) sequences, single and
//! double-quoted scalars, bare boolean/number literals, and `#` comments.
//! This is deliberately not a general YAML parser; the manifest format is a
//! fixed subset and anything outside it is a parse error.

use super::ManifestError;

/// Maximum depth of nested block mappings.
const MAX_DEPTH: usize = 3;

/// A parsed scalar value with its literal interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    Str(String),
}

impl Scalar {
    /// The string form of the scalar, used where the schema wants text
    /// (defaults, enum members, patterns).
    pub fn to_text(&self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Scalar::Str(s) => s.clone(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Scalar::Number(n) if n.fract() == 0.0 && *n >= 0.0 => Some(*n as u64),
            _ => None,
        }
    }
}

/// A parsed node: scalar leaf, sequence of scalars, or nested mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    Sequence(Vec<Scalar>),
    Mapping(Vec<(String, Node)>),
}

impl Node {
    /// Line the node started on, for schema-level error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Node::Scalar(_) => "scalar",
            Node::Sequence(_) => "sequence",
            Node::Mapping(_) => "mapping",
        }
    }
}

#[derive(Debug)]
struct Line {
    number: usize,
    indent: usize,
    content: String,
}

struct Cursor {
    lines: Vec<Line>,
    pos: usize,
}

impl Cursor {
    fn peek(&self) -> Option<&Line> {
        self.lines.get(self.pos)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }
}

fn parse_err(line: usize, message: impl Into<String>) -> ManifestError {
    ManifestError::Parse {
        line,
        message: message.into(),
    }
}

/// Strip a trailing comment, honoring single/double quote state.
fn strip_comment(raw: &str) -> &str {
    let mut in_single = false;
    let mut in_double = false;
    for (i, c) in raw.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double => return &raw[..i],
            _ => {}
        }
    }
    raw
}

fn scan_lines(input: &str) -> Result<Vec<Line>, ManifestError> {
    let mut lines = Vec::new();
    for (idx, raw) in input.lines().enumerate() {
        let number = idx + 1;
        let stripped = strip_comment(raw);
        if stripped.trim().is_empty() {
            continue;
        }
        let trimmed = stripped.trim_start();
        let leading = &stripped[..stripped.len() - trimmed.len()];
        if leading.contains('\t') {
            return Err(parse_err(number, "tabs are not allowed in indentation"));
        }
        let indent = leading.len();
        lines.push(Line {
            number,
            indent,
            content: stripped.trim().to_string(),
        });
    }
    Ok(lines)
}

/// Parse one scalar token.
fn parse_scalar(text: &str, line: usize) -> Result<Scalar, ManifestError> {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix('"') {
        let Some(inner) = rest.strip_suffix('"') else {
            return Err(parse_err(line, "unterminated double-quoted scalar"));
        };
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => {
                        return Err(parse_err(line, format!("unknown escape \\{other}")))
                    }
                    None => return Err(parse_err(line, "dangling escape at end of scalar")),
                }
            } else {
                out.push(c);
            }
        }
        return Ok(Scalar::Str(out));
    }
    if let Some(rest) = text.strip_prefix('\'') {
        let Some(inner) = rest.strip_suffix('\'') else {
            return Err(parse_err(line, "unterminated single-quoted scalar"));
        };
        return Ok(Scalar::Str(inner.replace("''", "'")));
    }

    match text {
        "true" => return Ok(Scalar::Bool(true)),
        "false" => return Ok(Scalar::Bool(false)),
        "" => return Err(parse_err(line, "empty scalar")),
        _ => {}
    }

    let numeric_start = text
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+');
    if numeric_start {
        if let Ok(n) = text.parse::<f64>() {
            return Ok(Scalar::Number(n));
        }
    }

    Ok(Scalar::Str(text.to_string()))
}

/// Split inline sequence items on commas outside quotes.
fn parse_inline_sequence(text: &str, line: usize) -> Result<Vec<Scalar>, ManifestError> {
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| parse_err(line, "unterminated inline sequence"))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    for c in inner.chars() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            }
            ',' if !in_single && !in_double => {
                items.push(parse_scalar(&current, line)?);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    items.push(parse_scalar(&current, line)?);
    Ok(items)
}

fn parse_block_sequence(cur: &mut Cursor, indent: usize) -> Result<Vec<Scalar>, ManifestError> {
    let mut items = Vec::new();
    while let Some(line) = cur.peek() {
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(parse_err(line.number, "unexpected indentation in sequence"));
        }
        let Some(rest) = line.content.strip_prefix('-') else {
            break;
        };
        let item = parse_scalar(rest, line.number)?;
        cur.advance();
        items.push(item);
    }
    Ok(items)
}

/// Split `key: value` at the first colon outside quotes.
fn split_key(line: &Line) -> Result<(String, String), ManifestError> {
    let mut in_single = false;
    let mut in_double = false;
    for (i, c) in line.content.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ':' if !in_single && !in_double => {
                let key = line.content[..i].trim();
                if key.is_empty() {
                    return Err(parse_err(line.number, "empty key"));
                }
                let key = match parse_scalar(key, line.number)? {
                    Scalar::Str(s) => s,
                    other => other.to_text(),
                };
                return Ok((key, line.content[i + 1..].trim().to_string()));
            }
            _ => {}
        }
    }
    Err(parse_err(line.number, "expected `key: value`"))
}

fn parse_mapping(
    cur: &mut Cursor,
    indent: usize,
    depth: usize,
) -> Result<Vec<(String, Node)>, ManifestError> {
    let mut entries: Vec<(String, Node)> = Vec::new();

    while let Some(line) = cur.peek() {
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            return Err(parse_err(line.number, "unexpected indentation"));
        }
        if line.content.starts_with('-') {
            return Err(parse_err(line.number, "sequence item outside a sequence"));
        }

        let number = line.number;
        let (key, rest) = split_key(line)?;
        if entries.iter().any(|(k, _)| *k == key) {
            return Err(parse_err(number, format!("duplicate key \"{key}\"")));
        }
        cur.advance();

        let node = if rest.is_empty() {
            match cur.peek() {
                Some(next) if next.indent > indent => {
                    if next.content.starts_with('-') {
                        let item_indent = next.indent;
                        Node::Sequence(parse_block_sequence(cur, item_indent)?)
                    } else {
                        if depth >= MAX_DEPTH {
                            return Err(parse_err(
                                next.number,
                                format!("block nesting deeper than {MAX_DEPTH} levels"),
                            ));
                        }
                        let child_indent = next.indent;
                        Node::Mapping(parse_mapping(cur, child_indent, depth + 1)?)
                    }
                }
                _ => return Err(parse_err(number, "expected a value or nested block")),
            }
        } else if rest.starts_with('[') {
            Node::Sequence(parse_inline_sequence(&rest, number)?)
        } else {
            Node::Scalar(parse_scalar(&rest, number)?)
        };

        entries.push((key, node));
    }

    Ok(entries)
}

/// Parse a complete manifest document into its root mapping.
pub fn parse_document(input: &str) -> Result<Vec<(String, Node)>, ManifestError> {
    let lines = scan_lines(input)?;
    if lines.is_empty() {
        return Ok(Vec::new());
    }
    let root_indent = lines[0].indent;
    if root_indent != 0 {
        return Err(parse_err(lines[0].number, "root keys must not be indented"));
    }
    let mut cur = Cursor { lines, pos: 0 };
    let entries = parse_mapping(&mut cur, 0, 1)?;
    if let Some(line) = cur.peek() {
        return Err(parse_err(line.number, "unexpected trailing content"));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get<'a>(entries: &'a [(String, Node)], key: &str) -> &'a Node {
        &entries
            .iter()
            .find(|(k, _)| k == key)
            .unwrap_or_else(|| panic!("missing key {key}"))
            .1
    }

    #[test]
    fn parses_scalars_and_literals() {
        let doc = parse_document(
            "version: 1\nname: gateway\nstrict: true\nratio: 2.5\nquoted: \"a: b\"\n",
        )
        .unwrap();

        assert_eq!(get(&doc, "version"), &Node::Scalar(Scalar::Number(1.0)));
        assert_eq!(
            get(&doc, "name"),
            &Node::Scalar(Scalar::Str("gateway".to_string()))
        );
        assert_eq!(get(&doc, "strict"), &Node::Scalar(Scalar::Bool(true)));
        assert_eq!(get(&doc, "ratio"), &Node::Scalar(Scalar::Number(2.5)));
        assert_eq!(
            get(&doc, "quoted"),
            &Node::Scalar(Scalar::Str("a: b".to_string()))
        );
    }

    #[test]
    fn parses_nested_mappings() {
        let doc = parse_document(
            "settings:\n  hot_reload:\n    mode: poll\n    interval: 30\n",
        )
        .unwrap();

        let Node::Mapping(settings) = get(&doc, "settings") else {
            panic!("expected mapping");
        };
        let Node::Mapping(hot_reload) = get(settings, "hot_reload") else {
            panic!("expected mapping");
        };
        assert_eq!(
            get(hot_reload, "mode"),
            &Node::Scalar(Scalar::Str("poll".to_string()))
        );
        assert_eq!(
            get(hot_reload, "interval"),
            &Node::Scalar(Scalar::Number(30.0))
        );
    }

    #[test]
    fn rejects_nesting_beyond_three_levels() {
        let err = parse_document("a:\n  b:\n    c:\n      d: 1\n").unwrap_err();
        assert!(err.to_string().contains("nesting"));
    }

    #[test]
    fn parses_inline_and_block_sequences() {
        let doc = parse_document(
            "inline: [a, \"b, c\", 3]\nblock:\n  - first\n  - second\n",
        )
        .unwrap();

        assert_eq!(
            get(&doc, "inline"),
            &Node::Sequence(vec![
                Scalar::Str("a".to_string()),
                Scalar::Str("b, c".to_string()),
                Scalar::Number(3.0),
            ])
        );
        assert_eq!(
            get(&doc, "block"),
            &Node::Sequence(vec![
                Scalar::Str("first".to_string()),
                Scalar::Str("second".to_string()),
            ])
        );
    }

    #[test]
    fn strips_comments_outside_quotes() {
        let doc = parse_document(
            "# full-line comment\nkey: value # trailing\nhash: \"in # quotes\"\n",
        )
        .unwrap();
        assert_eq!(
            get(&doc, "key"),
            &Node::Scalar(Scalar::Str("value".to_string()))
        );
        assert_eq!(
            get(&doc, "hash"),
            &Node::Scalar(Scalar::Str("in # quotes".to_string()))
        );
    }

    #[test]
    fn single_quoted_scalar_unescapes_doubled_quote() {
        let doc = parse_document("key: 'it''s'\n").unwrap();
        assert_eq!(
            get(&doc, "key"),
            &Node::Scalar(Scalar::Str("it's".to_string()))
        );
    }

    #[test]
    fn rejects_tabs_in_indentation() {
        let err = parse_document("a:\n\tb: 1\n").unwrap_err();
        assert!(err.to_string().contains("tabs"));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = parse_document("a: 1\na: 2\n").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_missing_value() {
        let err = parse_document("a:\nb: 2\n").unwrap_err();
        assert!(err.to_string().contains("expected a value"));
    }

    #[test]
    fn rejects_bad_indentation() {
        let err = parse_document("a: 1\n   b: 2\n").unwrap_err();
        assert!(err.to_string().contains("indentation"));
    }

    #[test]
    fn empty_document_parses_to_empty_mapping() {
        assert!(parse_document("# only comments\n\n").unwrap().is_empty());
    }

    #[test]
    fn bare_scalar_that_is_not_numeric_stays_text() {
        let doc = parse_document("version_tag: 1.2.3\n").unwrap();
        assert_eq!(
            get(&doc, "version_tag"),
            &Node::Scalar(Scalar::Str("1.2.3".to_string()))
        );
    }

    #[test]
    fn scalar_to_text_forms() {
        assert_eq!(Scalar::Bool(true).to_text(), "true");
        assert_eq!(Scalar::Number(30.0).to_text(), "30");
        assert_eq!(Scalar::Number(2.5).to_text(), "2.5");
        assert_eq!(Scalar::Str("x".to_string()).to_text(), "x");
    }
}
