use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;

use crate::error::NameError;

pub(crate) const SEPARATOR: char = '.';

/// A single name segment: the unescaped body plus an optional query.
///
/// The query is the text inside a trailing `[...]` pair, e.g. `point[3]` has
/// the body `point` and the query `3`. Query text is opaque to this crate;
/// it is carried around, compared and printed, never interpreted.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Token {
    body: String,
    query: Option<String>,
}

impl Token {
    /// Parse a raw (escaped) segment into body + query.
    ///
    /// Only a well-formed trailing `[...]` is recognized as a query; a
    /// segment with unmatched brackets keeps them as part of the body.
    fn parse(raw: &str) -> Self {
        let (body, query) = match split_query(raw) {
            Some((body, query)) => (body, Some(query.to_string())),
            None => (raw, None),
        };

        Token {
            body: unescape(body),
            query,
        }
    }

    fn escaped(&self) -> String {
        let mut out = escape(&self.body);
        if let Some(query) = &self.query {
            out.push('[');
            out.push_str(query);
            out.push(']');
        }
        out
    }

    fn unescaped(&self) -> String {
        let mut out = self.body.clone();
        if let Some(query) = &self.query {
            out.push('[');
            out.push_str(query);
            out.push(']');
        }
        out
    }
}

/// Find a well-formed trailing `[...]` query in a raw segment.
fn split_query(raw: &str) -> Option<(&str, &str)> {
    if !raw.ends_with(']') {
        return None;
    }

    let start = raw.find('[')?;
    if start == 0 && raw.len() == 2 {
        // "[]" alone has no body; treat as plain text
        return None;
    }

    // The bracketed suffix must be balanced, closing exactly at the end.
    let mut depth = 0usize;
    for (i, c) in raw[start..].char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 && start + i != raw.len() - 1 {
                    return None;
                }
            }
            _ => {}
        }
    }

    if depth != 0 {
        return None;
    }

    Some((&raw[..start], &raw[start + 1..raw.len() - 1]))
}

fn unescape(text: &str) -> String {
    text.replace("\\.", ".")
}

fn escape(text: &str) -> String {
    text.replace('.', "\\.")
}

/// A hierarchical address: a sequence of dot-separated tokens.
///
/// Names are parsed from strings (`Name::of`), composed structurally
/// (`Name::join`, `+`) and immutable thereafter. A literal `.` inside a
/// token is written `\.`; each token may carry a trailing bracketed query.
/// The empty name is the distinguished zero-token value.
///
/// `Display` output round-trips: `Name::of(&name.to_string()) == name`.
/// Ordering is lexicographic on the escaped string form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Name {
    tokens: Vec<Token>,
}

impl Name {
    /// The empty name.
    pub fn empty() -> Self {
        Name { tokens: Vec::new() }
    }

    /// Parse a dot-separated name. An empty string parses to the empty name.
    pub fn of(text: &str) -> Self {
        if text.is_empty() {
            return Name::empty();
        }

        Name {
            tokens: split_segments(text)
                .into_iter()
                .filter(|raw| !raw.is_empty())
                .map(|raw| Token::parse(&raw))
                .collect(),
        }
    }

    /// Build a name from a string treated as a single token, ignoring
    /// separators.
    pub fn of_single(text: &str) -> Self {
        if text.is_empty() {
            return Name::empty();
        }

        Name {
            tokens: vec![Token::parse(text)],
        }
    }

    /// Build a single-token name from an already-unescaped token body,
    /// without query recognition. Used when reconstructing names from tree
    /// keys, which store plain bodies.
    pub(crate) fn of_token_body(body: &str) -> Self {
        if body.is_empty() {
            return Name::empty();
        }

        Name {
            tokens: vec![Token {
                body: body.to_string(),
                query: None,
            }],
        }
    }

    /// Join names in the given order, skipping empty ones.
    pub fn join(names: impl IntoIterator<Item = Name>) -> Self {
        Name {
            tokens: names.into_iter().flat_map(|name| name.tokens).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// The leading token as a name. Empty for the empty name.
    pub fn first(&self) -> Name {
        Name {
            tokens: self.tokens.first().cloned().into_iter().collect(),
        }
    }

    /// The trailing token as a name. Empty for the empty name.
    pub fn last(&self) -> Name {
        Name {
            tokens: self.tokens.last().cloned().into_iter().collect(),
        }
    }

    /// The ordered sequence of tokens, each as a single-token name.
    pub fn tokens(&self) -> impl Iterator<Item = Name> + '_ {
        self.tokens.iter().map(|token| Name {
            tokens: vec![token.clone()],
        })
    }

    /// Everything but the first token.
    ///
    /// Cutting the empty name is a no-op; cutting a single-token name is an
    /// invalid operation.
    pub fn cut_first(&self) -> Result<Name, NameError> {
        match self.len() {
            0 => Ok(Name::empty()),
            1 => Err(NameError::InvalidOperation),
            _ => Ok(Name {
                tokens: self.tokens[1..].to_vec(),
            }),
        }
    }

    /// Everything but the last token. Arity rules match [`Name::cut_first`].
    pub fn cut_last(&self) -> Result<Name, NameError> {
        match self.len() {
            0 => Ok(Name::empty()),
            1 => Err(NameError::InvalidOperation),
            _ => Ok(Name {
                tokens: self.tokens[..self.len() - 1].to_vec(),
            }),
        }
    }

    /// Whether the last token carries a query.
    pub fn has_query(&self) -> bool {
        self.tokens
            .last()
            .is_some_and(|token| token.query.is_some())
    }

    /// The last token's query text, if any.
    pub fn query(&self) -> Option<&str> {
        self.tokens.last().and_then(|token| token.query.as_deref())
    }

    /// This name with the last token's query removed. Returns a clone of
    /// itself when there is no query.
    pub fn ignore_query(&self) -> Name {
        if !self.has_query() {
            return self.clone();
        }

        let mut tokens = self.tokens.clone();
        if let Some(last) = tokens.last_mut() {
            last.query = None;
        }
        Name { tokens }
    }

    /// The leading token's body without query, used as a map key when
    /// routing through data trees. Empty string for the empty name.
    pub fn entry(&self) -> &str {
        self.tokens
            .first()
            .map(|token| token.body.as_str())
            .unwrap_or("")
    }

    /// The ordered token strings, escaped, including queries.
    pub fn as_array(&self) -> Vec<String> {
        self.tokens.iter().map(Token::escaped).collect()
    }

    /// String form without separator escaping.
    pub fn unescaped(&self) -> String {
        self.tokens
            .iter()
            .map(Token::unescaped)
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Split on unescaped separators; a `.` preceded by `\` is not a split point.
fn split_segments(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut escaped = false;

    for c in text.chars() {
        match c {
            '\\' if !escaped => escaped = true,
            SEPARATOR if !escaped => {
                segments.push(std::mem::take(&mut current));
            }
            _ => {
                if escaped {
                    current.push('\\');
                    escaped = false;
                }
                current.push(c);
            }
        }
    }

    if escaped {
        current.push('\\');
    }
    segments.push(current);

    segments
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let escaped = self
            .tokens
            .iter()
            .map(Token::escaped)
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&escaped)
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl From<&str> for Name {
    fn from(text: &str) -> Self {
        Name::of(text)
    }
}

impl Add<&Name> for &Name {
    type Output = Name;

    fn add(self, rhs: &Name) -> Name {
        Name::join([self.clone(), rhs.clone()])
    }
}

impl Add<&str> for &Name {
    type Output = Name;

    /// Append a string as a single trailing token, without splitting it.
    fn add(self, rhs: &str) -> Name {
        Name::join([self.clone(), Name::of_single(rhs)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let name = Name::of("a.b.c");
        assert_eq!(name.len(), 3);
        assert_eq!(name.as_array(), vec!["a", "b", "c"]);
    }

    #[test]
    fn parse_empty() {
        assert!(Name::of("").is_empty());
        assert_eq!(Name::of("").len(), 0);
    }

    #[test]
    fn parse_escaped_dot() {
        let name = Name::of("a\\.b.c");
        assert_eq!(name.len(), 2);
        assert_eq!(name.entry(), "a.b");
        assert_eq!(name.as_array(), vec!["a\\.b", "c"]);
    }

    #[test]
    fn parse_query() {
        let name = Name::of("scan.point[3]");
        assert!(name.has_query());
        assert_eq!(name.query(), Some("3"));
        assert_eq!(name.ignore_query().to_string(), "scan.point");
        assert!(!name.ignore_query().has_query());
    }

    #[test]
    fn unmatched_brackets_are_plain_text() {
        let name = Name::of("point[3");
        assert!(!name.has_query());
        assert_eq!(name.entry(), "point[3");

        let name = Name::of("point]3[");
        assert!(!name.has_query());
    }

    #[test]
    fn nested_query_brackets() {
        let name = Name::of("point[a[b]]");
        assert_eq!(name.query(), Some("a[b]"));
        assert_eq!(name.entry(), "point");
    }

    #[test]
    fn round_trip() {
        for text in ["a", "a.b.c", "a\\.b.c", "scan.point[3]", "x[a[b]].y"] {
            let name = Name::of(text);
            assert_eq!(Name::of(&name.to_string()), name, "failed for {text}");
        }
    }

    #[test]
    fn cut_rules() {
        let name = Name::of("a.b.c");
        assert_eq!(name.cut_first().unwrap().to_string(), "b.c");
        assert_eq!(name.cut_last().unwrap().to_string(), "a.b");

        let single = Name::of("a");
        assert_eq!(single.cut_first(), Err(NameError::InvalidOperation));
        assert_eq!(single.cut_last(), Err(NameError::InvalidOperation));

        assert_eq!(Name::empty().cut_first(), Ok(Name::empty()));
        assert_eq!(Name::empty().cut_last(), Ok(Name::empty()));
    }

    #[test]
    fn join_skips_empty() {
        let name = Name::join([Name::of("a"), Name::empty(), Name::of("b.c")]);
        assert_eq!(name.to_string(), "a.b.c");
    }

    #[test]
    fn add_operators() {
        let base = Name::of("a.b");
        assert_eq!((&base + &Name::of("c.d")).len(), 4);
        // &str is appended as a single token
        let joined = &base + "c.d";
        assert_eq!(joined.len(), 3);
        assert_eq!(joined.last().entry(), "c.d");
    }

    #[test]
    fn ordering_is_lexicographic_on_escaped_form() {
        let mut names = vec![Name::of("b"), Name::of("a.c"), Name::of("a")];
        names.sort();
        let sorted: Vec<_> = names.iter().map(Name::to_string).collect();
        assert_eq!(sorted, vec!["a", "a.c", "b"]);
    }

    #[test]
    fn of_single_keeps_dots() {
        let name = Name::of_single("a.b");
        assert_eq!(name.len(), 1);
        assert_eq!(name.entry(), "a.b");
        assert_eq!(name.to_string(), "a\\.b");
    }

    #[test]
    fn equality_includes_query() {
        assert_ne!(Name::of("a[1]"), Name::of("a[2]"));
        assert_ne!(Name::of("a[1]"), Name::of("a"));
        assert_eq!(Name::of("a[1]"), Name::of("a[1]"));
    }
}
