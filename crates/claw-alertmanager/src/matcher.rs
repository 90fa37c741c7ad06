//! Label matchers shared by silences, routes, inhibit rules and listing filters.
//!
//! A matcher is written `name<op>"value"` where `<op>` is one of `=`, `!=`,
//! `=~` or `!~`. Regular expressions are fully anchored and compiled once,
//! when the matcher is built.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AlertmanagerError, Result};
use crate::types::LabelSet;

/// How a matcher compares a label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `=~`
    Regex,
    /// `!~`
    NotRegex,
}

impl MatchType {
    /// Returns the operator symbol.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NotRegex => "!~",
        }
    }

    const fn is_regex(self) -> bool {
        matches!(self, Self::Regex | Self::NotRegex)
    }

    const fn is_equal(self) -> bool {
        matches!(self, Self::Equal | Self::Regex)
    }
}

/// A single label condition.
///
/// A label that is absent from the label set is treated as the empty string,
/// so `team!="db"` matches an alert with no `team` label at all.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "WireMatcher", into = "WireMatcher")]
pub struct Matcher {
    name: String,
    value: String,
    match_type: MatchType,
    regex: Option<Regex>,
}

impl Matcher {
    /// Builds a matcher, compiling the regex for regex match types.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidPayload` if the name is empty or the
    /// regex does not compile.
    pub fn new(
        match_type: MatchType,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let value = value.into();

        if name.is_empty() {
            return Err(AlertmanagerError::invalid_payload(
                "matcher label name cannot be empty",
            ));
        }

        let regex = if match_type.is_regex() {
            let anchored = format!("^(?:{value})$");
            Some(Regex::new(&anchored).map_err(|e| {
                AlertmanagerError::invalid_payload(format!("invalid regex in matcher {name}: {e}"))
            })?)
        } else {
            None
        };

        Ok(Self {
            name,
            value,
            match_type,
            regex,
        })
    }

    /// Shorthand for an equality matcher.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidPayload` if the name is empty.
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        Self::new(MatchType::Equal, name, value)
    }

    /// Parses the textual form, e.g. `severity=~"crit.*"`.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidPayload` on malformed input.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let op_start = input.find(['=', '!']).ok_or_else(|| {
            AlertmanagerError::invalid_payload(format!("bad matcher format: {input}"))
        })?;

        let name = input[..op_start].trim();
        if !is_valid_label_name(name) {
            return Err(AlertmanagerError::invalid_payload(format!(
                "invalid label name in matcher: {input}"
            )));
        }

        let rest = &input[op_start..];
        let (match_type, value) = if let Some(v) = rest.strip_prefix("=~") {
            (MatchType::Regex, v)
        } else if let Some(v) = rest.strip_prefix("!~") {
            (MatchType::NotRegex, v)
        } else if let Some(v) = rest.strip_prefix("!=") {
            (MatchType::NotEqual, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (MatchType::Equal, v)
        } else {
            return Err(AlertmanagerError::invalid_payload(format!(
                "bad matcher operator: {input}"
            )));
        };

        Self::new(match_type, name, unquote(value.trim())?)
    }

    /// Returns the label name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the raw value (the regex source for regex matchers).
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the match type.
    #[must_use]
    pub const fn match_type(&self) -> MatchType {
        self.match_type
    }

    /// Checks a single value against this matcher.
    #[must_use]
    pub fn matches_value(&self, value: &str) -> bool {
        match (&self.match_type, &self.regex) {
            (MatchType::Equal, _) => value == self.value,
            (MatchType::NotEqual, _) => value != self.value,
            (MatchType::Regex, Some(re)) => re.is_match(value),
            (MatchType::NotRegex, Some(re)) => !re.is_match(value),
            _ => false,
        }
    }

    /// Checks this matcher against a label set.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> bool {
        let value = labels.get(&self.name).map_or("", String::as_str);
        self.matches_value(value)
    }
}

/// Returns true if every matcher matches the label set.
#[must_use]
pub fn matches_all(matchers: &[Matcher], labels: &LabelSet) -> bool {
    matchers.iter().all(|m| m.matches(labels))
}

/// Parses a list of textual matchers.
///
/// # Errors
///
/// Returns `AlertmanagerError::InvalidPayload` for the first malformed entry.
pub fn parse_matchers<S: AsRef<str>>(filters: &[S]) -> Result<Vec<Matcher>> {
    filters.iter().map(|f| Matcher::parse(f.as_ref())).collect()
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unquote(raw: &str) -> Result<String> {
    let Some(inner) = raw.strip_prefix('"') else {
        return Ok(raw.to_string());
    };
    let inner = inner.strip_suffix('"').ok_or_else(|| {
        AlertmanagerError::invalid_payload(format!("unterminated quoted value: {raw}"))
    })?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value && self.match_type == other.match_type
    }
}

impl Eq for Matcher {}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matcher({self})")
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{:?}",
            self.name,
            self.match_type.as_symbol(),
            self.value
        )
    }
}

/// Wire form of a matcher, compatible with the Alertmanager API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMatcher {
    name: String,
    value: String,
    is_regex: bool,
    #[serde(default = "default_is_equal")]
    is_equal: bool,
}

const fn default_is_equal() -> bool {
    true
}

impl TryFrom<WireMatcher> for Matcher {
    type Error = AlertmanagerError;

    fn try_from(wire: WireMatcher) -> Result<Self> {
        let match_type = match (wire.is_regex, wire.is_equal) {
            (false, true) => MatchType::Equal,
            (false, false) => MatchType::NotEqual,
            (true, true) => MatchType::Regex,
            (true, false) => MatchType::NotRegex,
        };
        Self::new(match_type, wire.name, wire.value)
    }
}

impl From<Matcher> for WireMatcher {
    fn from(m: Matcher) -> Self {
        Self {
            is_regex: m.match_type.is_regex(),
            is_equal: m.match_type.is_equal(),
            name: m.name,
            value: m.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test_case(r#"alertname="Foo""#, MatchType::Equal, "alertname", "Foo" ; "quoted equal")]
    #[test_case("alertname=Foo", MatchType::Equal, "alertname", "Foo" ; "bare equal")]
    #[test_case(r#"severity!="info""#, MatchType::NotEqual, "severity", "info" ; "not equal")]
    #[test_case(r#"instance=~"node-[0-9]+""#, MatchType::Regex, "instance", "node-[0-9]+" ; "regex")]
    #[test_case(r#" team !~ "db|cache" "#, MatchType::NotRegex, "team", "db|cache" ; "not regex with spaces")]
    #[test_case(r#"summary="say \"hi\"""#, MatchType::Equal, "summary", "say \"hi\"" ; "escaped quotes")]
    fn parse_valid(input: &str, match_type: MatchType, name: &str, value: &str) {
        let m = Matcher::parse(input).unwrap();
        assert_eq!(m.match_type(), match_type);
        assert_eq!(m.name(), name);
        assert_eq!(m.value(), value);
    }

    #[test_case("alertname" ; "no operator")]
    #[test_case(r#"="Foo""# ; "empty name")]
    #[test_case(r#"1abc="Foo""# ; "name starts with digit")]
    #[test_case(r#"job=~"(unclosed""# ; "bad regex")]
    #[test_case(r#"job="open"# ; "unterminated quote")]
    fn parse_invalid(input: &str) {
        assert!(matches!(
            Matcher::parse(input),
            Err(AlertmanagerError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn regex_is_anchored() {
        let m = Matcher::parse(r#"instance=~"node""#).unwrap();
        assert!(m.matches_value("node"));
        assert!(!m.matches_value("node-1"));
        assert!(!m.matches_value("my-node"));
    }

    #[test]
    fn absent_label_is_empty_string() {
        let set = labels(&[("alertname", "Foo")]);
        assert!(Matcher::parse(r#"team!="db""#).unwrap().matches(&set));
        assert!(Matcher::parse(r#"team="""#).unwrap().matches(&set));
        assert!(!Matcher::parse(r#"team=~".+""#).unwrap().matches(&set));
    }

    #[test]
    fn matches_all_is_conjunctive() {
        let set = labels(&[("alertname", "Foo"), ("severity", "critical")]);
        let both = parse_matchers(&[r#"alertname="Foo""#, r#"severity=~"crit.*""#]).unwrap();
        assert!(matches_all(&both, &set));

        let one_fails = parse_matchers(&[r#"alertname="Foo""#, r#"severity="info""#]).unwrap();
        assert!(!matches_all(&one_fails, &set));
    }

    #[test]
    fn display_uses_filter_syntax() {
        let m = Matcher::new(MatchType::NotRegex, "job", "api.*").unwrap();
        assert_eq!(m.to_string(), r#"job!~"api.*""#);
    }

    #[test]
    fn serde_uses_api_shape() {
        let m = Matcher::parse(r#"job!~"api.*""#).unwrap();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "job", "value": "api.*", "isRegex": true, "isEqual": false})
        );

        let back: Matcher = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
        assert!(back.matches_value("db"));
        assert!(!back.matches_value("api-1"));
    }

    #[test]
    fn serde_rejects_bad_regex() {
        let json = serde_json::json!({"name": "job", "value": "(", "isRegex": true});
        assert!(serde_json::from_value::<Matcher>(json).is_err());
    }
}
