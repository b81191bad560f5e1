//! Watch paths and snapshot navigation.
//!
//! Paths accept dotted and bracketed forms (`a.b`, `a["b"]`, `a['b']`,
//! `a[0]`) and normalize to a single canonical string, so two spellings of
//! the same address compare equal. The empty path addresses the root.

use crate::codec::StateValue;
use crate::error::PathError;
use std::collections::BTreeMap;
use std::fmt;
use std::iter::Peekable;
use std::str::{CharIndices, FromStr};

/// A normalized address into a connection's state tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchPath {
    segments: Vec<String>,
}

impl WatchPath {
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, PathError> {
        Ok(Self {
            segments: parse_segments(input)?,
        })
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when `self` equals `other` or lies above it in the tree.
    pub fn contains(&self, other: &WatchPath) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// True when either path is an ancestor of (or equal to) the other.
    pub fn overlaps(&self, other: &WatchPath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for WatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if is_plain_segment(segment) {
                if i > 0 {
                    f.write_str(".")?;
                }
                f.write_str(segment)?;
            } else {
                f.write_str("[\"")?;
                for c in segment.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{}", c)?;
                }
                f.write_str("\"]")?;
            }
        }
        Ok(())
    }
}

impl FromStr for WatchPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn parse_segments(input: &str) -> Result<Vec<String>, PathError> {
    let path = input.trim();
    let mut segments = Vec::new();
    let mut chars = path.char_indices().peekable();

    match chars.peek() {
        None => return Ok(segments),
        Some(&(offset, '[')) => {
            chars.next();
            segments.push(parse_bracket(path, offset, &mut chars)?);
        }
        Some(&(offset, _)) => segments.push(parse_identifier(path, offset, &mut chars)?),
    }

    while let Some((offset, c)) = chars.next() {
        match c {
            '.' => segments.push(parse_identifier(path, offset + 1, &mut chars)?),
            '[' => segments.push(parse_bracket(path, offset, &mut chars)?),
            found => {
                return Err(PathError::UnexpectedChar {
                    path: path.to_string(),
                    offset,
                    found,
                })
            }
        }
    }

    Ok(segments)
}

fn parse_identifier(
    path: &str,
    start: usize,
    chars: &mut Peekable<CharIndices<'_>>,
) -> Result<String, PathError> {
    let mut segment = String::new();
    while let Some(&(offset, c)) = chars.peek() {
        match c {
            '.' | '[' => break,
            ']' | '"' | '\'' => {
                return Err(PathError::UnexpectedChar {
                    path: path.to_string(),
                    offset,
                    found: c,
                })
            }
            _ => {
                segment.push(c);
                chars.next();
            }
        }
    }

    let segment = segment.trim();
    if segment.is_empty() {
        return Err(PathError::EmptySegment {
            path: path.to_string(),
            offset: start,
        });
    }
    Ok(segment.to_string())
}

/// Parses the body of `[...]`; the opening bracket is already consumed.
fn parse_bracket(
    path: &str,
    open: usize,
    chars: &mut Peekable<CharIndices<'_>>,
) -> Result<String, PathError> {
    let unterminated = || PathError::UnterminatedBracket {
        path: path.to_string(),
        offset: open,
    };

    skip_whitespace(chars);
    let segment = match chars.peek() {
        Some(&(_, quote @ ('"' | '\''))) => {
            chars.next();
            let mut segment = String::new();
            loop {
                match chars.next() {
                    None => return Err(unterminated()),
                    Some((_, '\\')) => match chars.next() {
                        Some((_, escaped)) => segment.push(escaped),
                        None => return Err(unterminated()),
                    },
                    Some((_, c)) if c == quote => break,
                    Some((_, c)) => segment.push(c),
                }
            }
            skip_whitespace(chars);
            match chars.next() {
                Some((_, ']')) => segment,
                Some((offset, found)) => {
                    return Err(PathError::UnexpectedChar {
                        path: path.to_string(),
                        offset,
                        found,
                    })
                }
                None => return Err(unterminated()),
            }
        }
        _ => {
            let mut segment = String::new();
            loop {
                match chars.next() {
                    None => return Err(unterminated()),
                    Some((_, ']')) => break,
                    Some((_, c)) => segment.push(c),
                }
            }
            let segment = segment.trim();
            if segment.is_empty() {
                return Err(PathError::EmptySegment {
                    path: path.to_string(),
                    offset: open,
                });
            }
            segment.to_string()
        }
    };

    Ok(segment)
}

fn skip_whitespace(chars: &mut Peekable<CharIndices<'_>>) {
    while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
}

/// Walk `path` through `snapshot`. Missing intermediate nodes yield `None`.
pub fn resolve<'a>(snapshot: &'a StateValue, path: &WatchPath) -> Option<&'a StateValue> {
    let mut node = snapshot;
    for segment in path.segments() {
        node = match node {
            StateValue::Object(fields) => fields.get(segment)?,
            StateValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

/// Store `subtree` at `path`, creating intermediate objects as needed.
///
/// Scalars on the way are replaced by objects. An array index may be at
/// most one past the end, which appends; anything further is rejected
/// before the snapshot is touched.
pub fn write(
    snapshot: &mut StateValue,
    path: &WatchPath,
    subtree: StateValue,
) -> Result<(), PathError> {
    write_segments(snapshot, path, path.segments(), subtree)
}

// Nodes created on the way down are `Undefined`, so an index can only be
// out of range in a node that already existed and nothing has been changed
// when the error is returned.
fn write_segments(
    target: &mut StateValue,
    path: &WatchPath,
    segments: &[String],
    subtree: StateValue,
) -> Result<(), PathError> {
    let Some((head, rest)) = segments.split_first() else {
        *target = subtree;
        return Ok(());
    };

    let index = match target {
        StateValue::Array(_) => head.parse::<usize>().ok(),
        _ => None,
    };

    match (target, index) {
        (StateValue::Array(items), Some(i)) => {
            if i > items.len() {
                return Err(PathError::IndexOutOfRange {
                    path: path.to_string(),
                    index: i,
                    len: items.len(),
                });
            }
            if i == items.len() {
                items.push(StateValue::Undefined);
            }
            write_segments(&mut items[i], path, rest, subtree)
        }
        (StateValue::Object(fields), _) => {
            let child = fields.entry(head.clone()).or_default();
            write_segments(child, path, rest, subtree)
        }
        (other, _) => {
            let mut child = StateValue::Undefined;
            write_segments(&mut child, path, rest, subtree)?;
            let mut fields = BTreeMap::new();
            fields.insert(head.clone(), child);
            *other = StateValue::Object(fields);
            Ok(())
        }
    }
}

/// Watched paths whose value may have changed when `changed` was written:
/// the path itself, its ancestors, and its descendants. Input order is kept.
pub fn affected_paths<'a, I>(changed: &WatchPath, watched: I) -> Vec<WatchPath>
where
    I: IntoIterator<Item = &'a WatchPath>,
{
    watched
        .into_iter()
        .filter(|path| path.overlaps(changed))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ValueCodec;
    use serde_json::json;

    fn p(s: &str) -> WatchPath {
        WatchPath::parse(s).unwrap()
    }

    fn tree(value: serde_json::Value) -> StateValue {
        ValueCodec::default().decode(&value).unwrap()
    }

    #[test]
    fn test_spellings_normalize_to_one_form() {
        assert_eq!(p("a.b"), p("a[\"b\"]"));
        assert_eq!(p("a.b"), p(" a['b'] "));
        assert_eq!(p("a.b"), p("a[ b ]"));
        assert_eq!(p("items[0].name"), p("items.0.name"));
        assert_eq!(p("a.b").to_string(), "a.b");
        assert_eq!(p("a['b']").to_string(), "a.b");
    }

    #[test]
    fn test_canonical_form_quotes_unusual_keys() {
        let path = p(r#"config["api.url"]["say \"hi\""]"#);
        assert_eq!(path.segments(), &["config", "api.url", "say \"hi\""]);
        assert_eq!(path.to_string(), r#"config["api.url"]["say \"hi\""]"#);
        assert_eq!(p(&path.to_string()), path);
    }

    #[test]
    fn test_root_path() {
        assert!(p("").is_root());
        assert!(p("   ").is_root());
        assert_eq!(p("").to_string(), "");
    }

    #[test]
    fn test_malformed_paths() {
        assert!(matches!(
            WatchPath::parse("a..b"),
            Err(PathError::EmptySegment { offset: 2, .. })
        ));
        assert!(matches!(
            WatchPath::parse("a."),
            Err(PathError::EmptySegment { .. })
        ));
        assert!(matches!(
            WatchPath::parse("a[\"b"),
            Err(PathError::UnterminatedBracket { offset: 1, .. })
        ));
        assert!(matches!(
            WatchPath::parse("a[0"),
            Err(PathError::UnterminatedBracket { .. })
        ));
        assert!(matches!(
            WatchPath::parse("a[0]b"),
            Err(PathError::UnexpectedChar { found: 'b', .. })
        ));
        assert!(matches!(
            WatchPath::parse("a[]"),
            Err(PathError::EmptySegment { .. })
        ));
    }

    #[test]
    fn test_resolve() {
        let snapshot = tree(json!({"a": {"b": 5, "list": [10, {"x": true}]}}));

        assert_eq!(resolve(&snapshot, &p("a.b")), Some(&StateValue::from(5i64)));
        assert_eq!(
            resolve(&snapshot, &p("a.list[1].x")),
            Some(&StateValue::from(true))
        );
        assert_eq!(resolve(&snapshot, &p("")), Some(&snapshot));
        assert_eq!(resolve(&snapshot, &p("a.missing.deeper")), None);
        assert_eq!(resolve(&snapshot, &p("a.b.c")), None);
        assert_eq!(resolve(&snapshot, &p("a.list.nope")), None);
        assert_eq!(resolve(&snapshot, &p("a.list[7]")), None);
    }

    #[test]
    fn test_write_creates_intermediate_nodes() {
        let mut snapshot = StateValue::Undefined;
        write(&mut snapshot, &p("a.b.c"), StateValue::from(1i64)).unwrap();
        assert_eq!(snapshot, tree(json!({"a": {"b": {"c": 1}}})));

        write(&mut snapshot, &p("a.b"), StateValue::from(7i64)).unwrap();
        assert_eq!(snapshot, tree(json!({"a": {"b": 7}})));

        write(&mut snapshot, &p("a.b.c"), StateValue::from(2i64)).unwrap();
        assert_eq!(snapshot, tree(json!({"a": {"b": {"c": 2}}})));
    }

    #[test]
    fn test_write_into_arrays() {
        let mut snapshot = tree(json!({"list": [1, 2]}));
        write(&mut snapshot, &p("list[1]"), StateValue::from(20i64)).unwrap();
        write(&mut snapshot, &p("list[2]"), StateValue::from(30i64)).unwrap();
        write(&mut snapshot, &p("list[3].done"), StateValue::from(true)).unwrap();
        assert_eq!(snapshot, tree(json!({"list": [1, 20, 30, {"done": true}]})));
    }

    #[test]
    fn test_write_rejects_index_past_the_end() {
        let original = tree(json!({"list": [1, 2], "nested": [[0]]}));
        let mut snapshot = original.clone();

        for path in [
            "list[3]",
            "list[1000000000]",
            "list[18446744073709551615]",
            "nested[0][5].x",
        ] {
            let err = write(&mut snapshot, &p(path), StateValue::from(1i64)).unwrap_err();
            assert!(matches!(err, PathError::IndexOutOfRange { .. }), "{path}");
        }
        assert_eq!(
            write(&mut snapshot, &p("list[9]"), StateValue::Null),
            Err(PathError::IndexOutOfRange {
                path: "list.9".to_string(),
                index: 9,
                len: 2,
            })
        );
        assert_eq!(snapshot, original);
    }

    #[test]
    fn test_write_root_replaces_snapshot() {
        let mut snapshot = tree(json!({"a": 1}));
        write(&mut snapshot, &WatchPath::root(), tree(json!({"b": 2}))).unwrap();
        assert_eq!(snapshot, tree(json!({"b": 2})));
    }

    #[test]
    fn test_affected_paths() {
        let watched = vec![p("a"), p("a.b.c"), p("a.bc"), p("x"), p("a.b")];
        let affected = affected_paths(&p("a[\"b\"]"), &watched);
        assert_eq!(affected, vec![p("a"), p("a.b.c"), p("a.b")]);

        let affected = affected_paths(&WatchPath::root(), &watched);
        assert_eq!(affected.len(), watched.len());

        assert!(affected_paths(&p("y"), &watched).is_empty());
    }
}
