//! Route pattern compiler.
//!
//! Pattern syntax:
//!
//! - literal text, matched verbatim: `/users/list`
//! - `@name`: one or more characters other than `/`
//! - `@name:regex`: the embedded regex; it ends at the next `/`, `(` or `)`
//! - `( ... )`: an optional group, e.g. `/blog(/@year(/@month))`
//! - a trailing `/*` (or a bare `*`): the remainder of the path, exposed
//!   as the splat
//!
//! A trailing slash in the path is always tolerated.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use regex::{Regex, RegexBuilder};
use std::fmt;

const SPLAT_GROUP: &str = "splat";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param { name: String },
    Optional(Vec<Segment>),
    Splat,
}

/// A compiled route pattern. Compilation is a pure function of the raw
/// string.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
    names: Vec<String>,
    source: String,
    matcher: Regex,
    matcher_ci: OnceCell<Regex>,
}

impl RoutePattern {
    pub fn compile(raw: &str) -> Result<Self> {
        let parsed = Parser::new(raw).parse()?;
        let matcher = build_regex(raw, &parsed.source, false)?;

        Ok(Self {
            raw: raw.to_string(),
            segments: parsed.segments,
            names: parsed.names,
            source: parsed.source,
            matcher,
            matcher_ci: OnceCell::new(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parameter names in declaration order.
    pub fn param_names(&self) -> &[String] {
        &self.names
    }

    /// The anchored regex source the pattern compiled to.
    pub fn regex_source(&self) -> &str {
        &self.source
    }

    pub fn has_splat(&self) -> bool {
        contains_splat(&self.segments)
    }

    /// Matches a decoded path (no query string) and extracts parameters.
    pub fn captures(&self, path: &str, case_sensitive: bool) -> Option<Params> {
        let regex = if case_sensitive {
            &self.matcher
        } else {
            self.matcher_ci
                .get_or_try_init(|| build_regex(&self.raw, &self.source, true))
                .ok()?
        };

        let caps = regex.captures(path)?;
        let mut params = Params::default();
        for (index, name) in self.names.iter().enumerate() {
            let value = caps
                .name(&group_name(index))
                .map(|m| m.as_str().to_string());
            params.values.insert(name.clone(), value);
        }
        if self.has_splat() {
            params.splat = Some(
                caps.name(SPLAT_GROUP)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            );
        }
        Some(params)
    }

    /// Rebuilds a concrete URL. Optional groups whose parameters cannot be
    /// resolved are dropped; an unresolved required parameter is returned
    /// as the error value. Values are substituted without being checked
    /// against their constraint.
    pub(crate) fn hydrate<F>(&self, lookup: F) -> std::result::Result<String, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut url = match render(&self.segments, &lookup) {
            Rendered::Complete(url) => url,
            Rendered::Omitted(name) => return Err(name),
        };
        while url.len() > 1 && url.ends_with('/') {
            url.pop();
        }
        Ok(url)
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parameters extracted by a successful match, in pattern order.
///
/// Parameters of an optional group that was absent from the path are
/// present with no value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: IndexMap<String, Option<String>>,
    splat: Option<String>,
}

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|v| v.as_deref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    /// Values in pattern order, absent optionals included as `None`.
    pub fn values(&self) -> Vec<Option<&str>> {
        self.values.values().map(|v| v.as_deref()).collect()
    }

    /// The remainder matched by a trailing wildcard.
    pub fn splat(&self) -> Option<&str> {
        self.splat.as_deref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

struct Parsed {
    segments: Vec<Segment>,
    names: Vec<String>,
    source: String,
}

struct Parser<'a> {
    raw: &'a str,
    chars: Vec<char>,
    pos: usize,
    names: Vec<String>,
    source: String,
}

impl<'a> Parser<'a> {
    fn new(raw: &'a str) -> Self {
        Self {
            raw,
            chars: raw.chars().collect(),
            pos: 0,
            names: Vec::new(),
            source: String::from("^"),
        }
    }

    fn parse(mut self) -> Result<Parsed> {
        if self.raw == "*" {
            return Ok(Parsed {
                segments: vec![Segment::Splat],
                names: Vec::new(),
                source: format!("^/?(?P<{}>.*)$", SPLAT_GROUP),
            });
        }

        let segments = self.parse_sequence(0)?;

        if self.raw.ends_with('/') {
            self.source.push('?');
        } else {
            self.source.push_str("/?");
        }
        self.source.push('$');

        Ok(Parsed {
            segments,
            names: self.names,
            source: self.source,
        })
    }

    fn parse_sequence(&mut self, depth: usize) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut literal = String::new();

        while let Some(&c) = self.chars.get(self.pos) {
            match c {
                '@' => {
                    self.flush_literal(&mut literal, &mut segments);
                    self.pos += 1;
                    segments.push(self.parse_param()?);
                }
                '(' => {
                    self.flush_literal(&mut literal, &mut segments);
                    self.pos += 1;
                    self.source.push_str("(?:");
                    let inner = self.parse_sequence(depth + 1)?;
                    segments.push(Segment::Optional(inner));
                }
                ')' => {
                    if depth == 0 {
                        return Err(self.malformed("unbalanced `)`"));
                    }
                    self.flush_literal(&mut literal, &mut segments);
                    self.pos += 1;
                    self.source.push_str(")?");
                    return Ok(segments);
                }
                '*' => {
                    if self.pos + 1 != self.chars.len() || !literal.ends_with('/') || depth != 0 {
                        return Err(self.malformed("`*` is only allowed as the last segment"));
                    }
                    literal.pop();
                    self.flush_literal(&mut literal, &mut segments);
                    self.pos += 1;
                    self.source
                        .push_str(&format!("(?:/(?P<{}>.*))?", SPLAT_GROUP));
                    segments.push(Segment::Literal("/".to_string()));
                    segments.push(Segment::Splat);
                }
                _ => {
                    literal.push(c);
                    self.pos += 1;
                }
            }
        }

        if depth != 0 {
            return Err(self.malformed("unclosed `(`"));
        }
        self.flush_literal(&mut literal, &mut segments);
        Ok(segments)
    }

    fn parse_param(&mut self) -> Result<Segment> {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_alphanumeric() || *c == '_')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        if name.is_empty() {
            return Err(self.malformed("`@` must be followed by a parameter name"));
        }
        if self.names.contains(&name) {
            return Err(Error::DuplicateParameter {
                name,
                pattern: self.raw.to_string(),
            });
        }

        let constraint = if self.chars.get(self.pos) == Some(&':') {
            self.pos += 1;
            let start = self.pos;
            while self
                .chars
                .get(self.pos)
                .is_some_and(|c| !matches!(*c, '/' | '(' | ')'))
            {
                self.pos += 1;
            }
            let constraint: String = self.chars[start..self.pos].iter().collect();
            if constraint.is_empty() {
                return Err(self.malformed(&format!("empty constraint for `@{}`", name)));
            }
            Some(constraint)
        } else {
            None
        };

        let group = group_name(self.names.len());
        match &constraint {
            Some(constraint) => self
                .source
                .push_str(&format!("(?P<{}>{})", group, constraint)),
            None => self.source.push_str(&format!("(?P<{}>[^/]+)", group)),
        }
        self.names.push(name.clone());

        Ok(Segment::Param { name })
    }

    fn flush_literal(&mut self, literal: &mut String, segments: &mut Vec<Segment>) {
        if literal.is_empty() {
            return;
        }
        self.source.push_str(&regex::escape(literal));
        segments.push(Segment::Literal(std::mem::take(literal)));
    }

    fn malformed(&self, reason: &str) -> Error {
        Error::MalformedPattern {
            pattern: self.raw.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn group_name(index: usize) -> String {
    format!("p{}", index)
}

fn build_regex(raw: &str, source: &str, case_insensitive: bool) -> Result<Regex> {
    RegexBuilder::new(source)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|source| Error::InvalidConstraint {
            pattern: raw.to_string(),
            source,
        })
}

fn contains_splat(segments: &[Segment]) -> bool {
    segments.iter().any(|segment| match segment {
        Segment::Splat => true,
        Segment::Optional(inner) => contains_splat(inner),
        _ => false,
    })
}

enum Rendered {
    Complete(String),
    /// A parameter had no value; carries its name.
    Omitted(String),
}

fn render<F>(segments: &[Segment], lookup: &F) -> Rendered
where
    F: Fn(&str) -> Option<String>,
{
    let mut url = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(text) => url.push_str(text),
            Segment::Param { name } => match lookup(name) {
                Some(value) => url.push_str(&value),
                None => return Rendered::Omitted(name.clone()),
            },
            Segment::Optional(inner) => {
                if let Rendered::Complete(part) = render(inner, lookup) {
                    url.push_str(&part);
                }
            }
            Segment::Splat => {
                if let Some(rest) = lookup(SPLAT_GROUP) {
                    url.push_str(rest.trim_start_matches('/'));
                }
            }
        }
    }
    Rendered::Complete(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn matches(pattern: &str, path: &str) -> Option<Params> {
        RoutePattern::compile(pattern).unwrap().captures(path, true)
    }

    #[rstest]
    #[case("/", "/", true)]
    #[case("/about", "/about", true)]
    #[case("/about", "/about/", true)]
    #[case("/about", "/about/team", false)]
    #[case("/user/@name", "/user/alice", true)]
    #[case("/user/@name", "/user/alice/extra", false)]
    #[case("/user/@name", "/user/", false)]
    #[case("/path1/@param:[0-9]{3}", "/path1/123", true)]
    #[case("/path1/@param:[0-9]{3}", "/path1/12", false)]
    #[case("/path1/@param:[0-9]{3}", "/path1/abc", false)]
    #[case("/key/@k:[a-zA-Z0-9]{16}", "/key/abcdEFGH12345678", true)]
    #[case("/file.json", "/fileXjson", false)]
    #[case("/files/*", "/files", true)]
    #[case("/files/*", "/files/a/b/c", true)]
    #[case("*", "/anything/at/all", true)]
    #[case("/trailing/", "/trailing", true)]
    #[case("/trailing/", "/trailing/", true)]
    fn test_accepts(#[case] pattern: &str, #[case] path: &str, #[case] expected: bool) {
        assert_eq!(matches(pattern, path).is_some(), expected, "{} vs {}", pattern, path);
    }

    #[test]
    fn test_params_in_declared_order() {
        let params = matches("/path1/@id/subpath1/@another_id", "/path1/123/subpath1/456").unwrap();
        let names: Vec<_> = params.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["id", "another_id"]);
        assert_eq!(params.get("id"), Some("123"));
        assert_eq!(params.get("another_id"), Some("456"));
    }

    #[test]
    fn test_optional_segments() {
        let pattern = "/blog(/@year(/@month(/@day)))";
        let params = matches(pattern, "/blog").unwrap();
        assert_eq!(params.len(), 3);
        assert!(!params.contains("year"));

        let params = matches(pattern, "/blog/2024/05").unwrap();
        assert_eq!(params.get("year"), Some("2024"));
        assert_eq!(params.get("month"), Some("05"));
        assert_eq!(params.get("day"), None);

        assert!(matches(pattern, "/blog/2024/05/17/x").is_none());
    }

    #[test]
    fn test_splat_remainder() {
        let params = matches("/files/*", "/files/a/b.txt").unwrap();
        assert_eq!(params.splat(), Some("a/b.txt"));

        let params = matches("/files/*", "/files").unwrap();
        assert_eq!(params.splat(), Some(""));
    }

    #[test]
    fn test_case_insensitive_matching() {
        let pattern = RoutePattern::compile("/Hello/@name").unwrap();
        assert!(pattern.captures("/hello/bob", true).is_none());
        let params = pattern.captures("/HELLO/Bob", false).unwrap();
        assert_eq!(params.get("name"), Some("Bob"));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let a = RoutePattern::compile("/a/@x:[0-9]+(/@y)").unwrap();
        let b = RoutePattern::compile("/a/@x:[0-9]+(/@y)").unwrap();
        assert_eq!(a.regex_source(), b.regex_source());
        assert_eq!(a.param_names(), b.param_names());
        for path in ["/a/1", "/a/1/z", "/a/z", "/a/1/z/q", "/a"] {
            assert_eq!(a.captures(path, true), b.captures(path, true));
        }
    }

    #[rstest]
    #[case("/a/@id/b/@id")]
    #[case("/a(/@id)/@id")]
    fn test_duplicate_parameter(#[case] pattern: &str) {
        assert!(matches!(
            RoutePattern::compile(pattern),
            Err(Error::DuplicateParameter { ref name, .. }) if name == "id"
        ));
    }

    #[rstest]
    #[case("/a/@")]
    #[case("/a/@/b")]
    #[case("/a(/b")]
    #[case("/a)/b")]
    #[case("/a/*/b")]
    #[case("/a/@id:")]
    fn test_malformed(#[case] pattern: &str) {
        assert!(matches!(
            RoutePattern::compile(pattern),
            Err(Error::MalformedPattern { .. })
        ));
    }

    #[test]
    fn test_invalid_constraint() {
        assert!(matches!(
            RoutePattern::compile("/a/@id:[0-9"),
            Err(Error::InvalidConstraint { .. })
        ));
    }

    #[test]
    fn test_hydrate() {
        let pattern = RoutePattern::compile("/item/@item:[a-z0-9]{16}/by-status/@token").unwrap();
        let url = pattern
            .hydrate(|name| match name {
                "item" => Some("1234567890123456".into()),
                "token" => Some("abc".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(url, "/item/1234567890123456/by-status/abc");

        let missing = pattern.hydrate(|name| (name == "item").then(|| "x".to_string()));
        assert_eq!(missing, Err("token".to_string()));
    }

    #[test]
    fn test_hydrate_drops_unresolved_optionals() {
        let pattern = RoutePattern::compile("/blog(/@year(/@month))").unwrap();
        let url = pattern
            .hydrate(|name| (name == "year").then(|| "2024".to_string()))
            .unwrap();
        assert_eq!(url, "/blog/2024");
        assert_eq!(pattern.hydrate(|_| None).unwrap(), "/blog");
    }
}
