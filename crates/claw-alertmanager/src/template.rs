//! Sandboxed notification templates.
//!
//! Templates use a small subset of the Go `text/template` syntax familiar to
//! Alertmanager users:
//!
//! ```text
//! {{ define "my.title" }}[{{ .Status | toUpper }}] {{ .CommonLabels.alertname }}{{ end }}
//! {{ range .Alerts.Firing }}{{ .Labels.instance }} {{ end }}
//! {{ if .CommonAnnotations.summary }}{{ .CommonAnnotations.summary }}{{ else }}n/a{{ end }}
//! {{ template "default.message" . }}
//! ```
//!
//! Templates are interpreted against a JSON view of [`TemplateData`] and
//! nothing else: there are no variables, no method calls and no access to
//! process state. Template inclusion depth and output size are bounded.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::error::{AlertmanagerError, Result};
use crate::types::{Alert, AlertStatus, LabelSet};

/// Name of the built-in title template.
pub const DEFAULT_TITLE: &str = "default.title";
/// Name of the built-in message template.
pub const DEFAULT_MESSAGE: &str = "default.message";
/// Inline template rendering the built-in title.
pub const DEFAULT_TITLE_TEXT: &str = r#"{{ template "default.title" . }}"#;
/// Inline template rendering the built-in message.
pub const DEFAULT_MESSAGE_TEXT: &str = r#"{{ template "default.message" . }}"#;

const MAX_TEMPLATE_DEPTH: usize = 32;
const MAX_TEMPLATE_CALLS: usize = 10_000;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

const DEFAULT_TEMPLATE_SOURCE: &str = r#"
{{ define "__subject" }}[{{ .Status | toUpper }}{{ if eq .Status "firing" }}:{{ .Alerts.Firing | len }}{{ end }}] {{ .GroupLabels.Values | join " " }}{{ end }}

{{ define "__text_alert_list" }}{{ range . }}Labels:
{{ range .Labels.SortedPairs }} - {{ .Name }} = {{ .Value }}
{{ end }}Annotations:
{{ range .Annotations.SortedPairs }} - {{ .Name }} = {{ .Value }}
{{ end }}{{ if .GeneratorURL }}Source: {{ .GeneratorURL }}
{{ end }}
{{ end }}{{ end }}

{{ define "default.title" }}{{ template "__subject" . }}{{ end }}

{{ define "default.message" }}{{ if .Alerts.Firing }}**Firing**
{{ template "__text_alert_list" .Alerts.Firing }}{{ end }}{{ if .Alerts.Resolved }}**Resolved**
{{ template "__text_alert_list" .Alerts.Resolved }}{{ end }}{{ end }}
"#;

static DEFAULT_TEMPLATES: Lazy<TemplateSet> = Lazy::new(|| {
    let mut set = TemplateSet::empty();
    if let Err(e) = set.add_file("__default__", DEFAULT_TEMPLATE_SOURCE) {
        error!(error = %e, "failed to parse built-in templates");
    }
    set
});

// ============ Template data ============

/// The data a template is rendered against.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateData {
    /// Receiver name.
    pub receiver: String,
    /// `firing` if any alert in the group fires, else `resolved`.
    pub status: String,
    /// The alerts in the group.
    pub alerts: Vec<TemplateAlert>,
    /// Labels the group was formed on.
    pub group_labels: LabelSet,
    /// Labels shared by every alert.
    pub common_labels: LabelSet,
    /// Annotations shared by every alert.
    pub common_annotations: LabelSet,
    /// Link back to the alerting UI.
    #[serde(rename = "ExternalURL")]
    pub external_url: String,
}

/// A single alert as seen by templates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateAlert {
    /// `firing` or `resolved`.
    pub status: String,
    /// Alert labels.
    pub labels: LabelSet,
    /// Alert annotations.
    pub annotations: LabelSet,
    /// RFC 3339 start time.
    pub starts_at: String,
    /// RFC 3339 end time, empty while unknown.
    pub ends_at: String,
    /// Link to the alert's generator.
    #[serde(rename = "GeneratorURL")]
    pub generator_url: String,
    /// Fingerprint of the label set.
    pub fingerprint: String,
}

impl TemplateData {
    /// Builds template data for an alert group.
    #[must_use]
    pub fn new(
        receiver: &str,
        group_labels: &LabelSet,
        alerts: &[Alert],
        external_url: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let firing = alerts.iter().any(|a| !a.is_resolved_at(now));
        let status = if firing {
            AlertStatus::Firing
        } else {
            AlertStatus::Resolved
        };

        let (common_labels, common_annotations) = extract_common(alerts);

        Self {
            receiver: receiver.to_string(),
            status: status.as_str().to_string(),
            alerts: alerts
                .iter()
                .map(|a| TemplateAlert {
                    status: a.status_at(now).as_str().to_string(),
                    labels: a.labels.clone(),
                    annotations: a.annotations.clone(),
                    starts_at: a.starts_at.to_rfc3339(),
                    ends_at: a.ends_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    generator_url: a.generator_url.clone(),
                    fingerprint: a.fingerprint(),
                })
                .collect(),
            group_labels: group_labels.clone(),
            common_labels,
            common_annotations,
            external_url: external_url.to_string(),
        }
    }

    /// Number of firing alerts.
    #[must_use]
    pub fn firing_count(&self) -> usize {
        self.alerts.iter().filter(|a| a.status == "firing").count()
    }
}

/// Labels and annotations carried with identical values by every alert.
#[must_use]
pub fn extract_common(alerts: &[Alert]) -> (LabelSet, LabelSet) {
    let Some(first) = alerts.first() else {
        return (LabelSet::new(), LabelSet::new());
    };

    let common_labels = first
        .labels
        .iter()
        .filter(|(k, v)| alerts.iter().all(|a| a.labels.get(*k) == Some(*v)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let common_annotations = first
        .annotations
        .iter()
        .filter(|(k, v)| alerts.iter().all(|a| a.annotations.get(*k) == Some(*v)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    (common_labels, common_annotations)
}

// ============ Syntax tree ============

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Output(Pipeline),
    If {
        cond: Pipeline,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Range {
        over: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Include {
        name: String,
        arg: Option<Pipeline>,
    },
}

#[derive(Debug, Clone)]
struct Pipeline {
    commands: Vec<Command>,
}

#[derive(Debug, Clone)]
struct Command {
    func: Option<Func>,
    args: Vec<Operand>,
}

#[derive(Debug, Clone)]
enum Operand {
    Field { from_root: bool, path: Vec<String> },
    Str(String),
    Int(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Len,
    ToUpper,
    ToLower,
    Title,
    Join,
    Eq,
    Ne,
    Not,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "len" => Self::Len,
            "toUpper" => Self::ToUpper,
            "toLower" => Self::ToLower,
            "title" => Self::Title,
            "join" => Self::Join,
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "not" => Self::Not,
            _ => return None,
        })
    }

    const fn arity(self) -> usize {
        match self {
            Self::Join | Self::Eq | Self::Ne => 2,
            _ => 1,
        }
    }
}

// ============ Lexing ============

enum Token {
    Text(String),
    Action(String),
}

fn lex(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = src;

    while let Some(open) = rest.find("{{") {
        let mut text = &rest[..open];
        let mut after = &rest[open + 2..];

        if after.starts_with("- ") || after.starts_with("-\n") || after.starts_with("-\t") {
            text = text.trim_end();
            after = &after[1..];
        }

        let close = after
            .find("}}")
            .ok_or_else(|| AlertmanagerError::template("unclosed action"))?;
        let mut inner = &after[..close];
        let mut trim_next = false;
        if inner.ends_with(" -") || inner.ends_with("\n-") || inner.ends_with("\t-") {
            inner = &inner[..inner.len() - 1];
            trim_next = true;
        }

        if !text.is_empty() {
            tokens.push(Token::Text(text.to_string()));
        }

        let inner = inner.trim();
        let is_comment = inner.starts_with("/*") && inner.ends_with("*/");
        if !is_comment {
            tokens.push(Token::Action(inner.to_string()));
        }

        rest = &after[close + 2..];
        if trim_next {
            rest = rest.trim_start();
        }
    }

    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Word {
    Field(String),
    Str(String),
    Int(i64),
    Ident(String),
    Pipe,
}

fn tokenize(src: &str) -> Result<Vec<Word>> {
    let chars: Vec<char> = src.chars().collect();
    let mut words = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '|' {
            words.push(Word::Pipe);
            i += 1;
        } else if c == '"' {
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(AlertmanagerError::template("unterminated string")),
                    Some('"') => break,
                    Some('\\') => {
                        match chars.get(i + 1) {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(*other),
                            None => return Err(AlertmanagerError::template("unterminated string")),
                        }
                        i += 2;
                        continue;
                    }
                    Some(other) => s.push(*other),
                }
                i += 1;
            }
            words.push(Word::Str(s));
            i += 1;
        } else if c == '`' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|&ch| ch == '`')
                .ok_or_else(|| AlertmanagerError::template("unterminated raw string"))?;
            words.push(Word::Str(chars[start..start + end].iter().collect()));
            i = start + end + 1;
        } else if c == '.' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || matches!(chars[i], '.' | '_' | '$'))
            {
                i += 1;
            }
            words.push(Word::Field(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit()
            || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit))
        {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse()
                .map_err(|_| AlertmanagerError::template(format!("bad number {text}")))?;
            words.push(Word::Int(n));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            words.push(Word::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(AlertmanagerError::template(format!(
                "unexpected character {c:?} in action"
            )));
        }
    }

    Ok(words)
}

// ============ Parsing ============

enum Terminator {
    Eof,
    End,
    Else(Vec<Word>),
}

struct Parser {
    tokens: std::vec::IntoIter<Token>,
    nesting: usize,
    defines: Vec<(String, Vec<Node>)>,
}

impl Parser {
    fn new(src: &str) -> Result<Self> {
        Ok(Self {
            tokens: lex(src)?.into_iter(),
            nesting: 0,
            defines: Vec::new(),
        })
    }

    fn parse_top(&mut self) -> Result<Vec<Node>> {
        let (nodes, term) = self.parse_list()?;
        match term {
            Terminator::Eof => Ok(nodes),
            Terminator::End => Err(AlertmanagerError::template("unexpected {{end}}")),
            Terminator::Else(_) => Err(AlertmanagerError::template("unexpected {{else}}")),
        }
    }

    fn parse_list(&mut self) -> Result<(Vec<Node>, Terminator)> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.next() {
            let src = match token {
                Token::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Token::Action(src) => src,
            };

            let words = tokenize(&src)?;
            let (keyword, rest) = match words.split_first() {
                Some((Word::Ident(k), rest)) => (k.as_str(), rest),
                Some(_) => {
                    nodes.push(Node::Output(parse_pipeline(&words)?));
                    continue;
                }
                None => return Err(AlertmanagerError::template("empty action")),
            };

            match keyword {
                "end" => {
                    if !rest.is_empty() {
                        return Err(AlertmanagerError::template("unexpected tokens after end"));
                    }
                    return Ok((nodes, Terminator::End));
                }
                "else" => return Ok((nodes, Terminator::Else(rest.to_vec()))),
                "if" => nodes.push(self.parse_if(rest)?),
                "range" => nodes.push(self.parse_range(rest)?),
                "template" => nodes.push(parse_include(rest)?),
                "define" => self.parse_define(rest)?,
                _ => nodes.push(Node::Output(parse_pipeline(&words)?)),
            }
        }

        Ok((nodes, Terminator::Eof))
    }

    fn parse_block(&mut self, what: &str) -> Result<(Vec<Node>, Vec<Node>)> {
        self.nesting += 1;
        let (body, term) = self.parse_list()?;
        let otherwise = match term {
            Terminator::End => Vec::new(),
            Terminator::Else(rest) if rest.is_empty() => {
                let (otherwise, term) = self.parse_list()?;
                if !matches!(term, Terminator::End) {
                    return Err(AlertmanagerError::template(format!("unterminated {what}")));
                }
                otherwise
            }
            Terminator::Else(rest) if what == "if" && rest.first() == Some(&Word::Ident("if".into())) => {
                vec![self.parse_if(&rest[1..])?]
            }
            Terminator::Else(_) => {
                return Err(AlertmanagerError::template("unexpected tokens after else"));
            }
            Terminator::Eof => {
                return Err(AlertmanagerError::template(format!("unterminated {what}")));
            }
        };
        self.nesting -= 1;
        Ok((body, otherwise))
    }

    fn parse_if(&mut self, words: &[Word]) -> Result<Node> {
        let cond = parse_pipeline(words)?;
        let (then, otherwise) = self.parse_block("if")?;
        Ok(Node::If {
            cond,
            then,
            otherwise,
        })
    }

    fn parse_range(&mut self, words: &[Word]) -> Result<Node> {
        let over = parse_pipeline(words)?;
        let (body, otherwise) = self.parse_block("range")?;
        Ok(Node::Range {
            over,
            body,
            otherwise,
        })
    }

    fn parse_define(&mut self, words: &[Word]) -> Result<()> {
        if self.nesting > 0 {
            return Err(AlertmanagerError::template("define is only allowed at top level"));
        }
        let [Word::Str(name)] = words else {
            return Err(AlertmanagerError::template("define expects a quoted name"));
        };
        let name = name.clone();

        self.nesting += 1;
        let (body, term) = self.parse_list()?;
        self.nesting -= 1;
        if !matches!(term, Terminator::End) {
            return Err(AlertmanagerError::template(format!("unterminated define {name:?}")));
        }
        self.defines.push((name, body));
        Ok(())
    }
}

fn parse_include(words: &[Word]) -> Result<Node> {
    let Some((Word::Str(name), rest)) = words.split_first() else {
        return Err(AlertmanagerError::template("template expects a quoted name"));
    };
    let arg = if rest.is_empty() {
        None
    } else {
        Some(parse_pipeline(rest)?)
    };
    Ok(Node::Include {
        name: name.clone(),
        arg,
    })
}

fn parse_pipeline(words: &[Word]) -> Result<Pipeline> {
    let mut commands = Vec::new();

    for segment in words.split(|w| *w == Word::Pipe) {
        let (func, operands) = match segment.split_first() {
            None => return Err(AlertmanagerError::template("empty pipeline stage")),
            Some((Word::Ident(name), rest)) => {
                let func = Func::lookup(name).ok_or_else(|| {
                    AlertmanagerError::template(format!("function {name:?} not defined"))
                })?;
                (Some(func), rest)
            }
            Some(_) => (None, segment),
        };

        let args = operands
            .iter()
            .map(|w| match w {
                Word::Field(f) => Ok(parse_field(f)),
                Word::Str(s) => Ok(Operand::Str(s.clone())),
                Word::Int(n) => Ok(Operand::Int(*n)),
                Word::Ident(name) => Err(AlertmanagerError::template(format!(
                    "unexpected identifier {name:?}"
                ))),
                Word::Pipe => Err(AlertmanagerError::template("unexpected pipe")),
            })
            .collect::<Result<Vec<_>>>()?;

        if func.is_none() && args.len() != 1 {
            return Err(AlertmanagerError::template("can't give argument to non-function"));
        }
        commands.push(Command { func, args });
    }

    Ok(Pipeline { commands })
}

fn parse_field(raw: &str) -> Operand {
    let from_root = raw.starts_with('$');
    let path = raw
        .trim_start_matches('$')
        .split('.')
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect();
    Operand::Field { from_root, path }
}

fn collect_includes(nodes: &[Node], out: &mut Vec<String>) {
    for node in nodes {
        match node {
            Node::Include { name, .. } => out.push(name.clone()),
            Node::If {
                then, otherwise, ..
            } => {
                collect_includes(then, out);
                collect_includes(otherwise, out);
            }
            Node::Range {
                body, otherwise, ..
            } => {
                collect_includes(body, out);
                collect_includes(otherwise, out);
            }
            Node::Text(_) | Node::Output(_) => {}
        }
    }
}

// ============ Execution ============

struct Exec<'a> {
    set: &'a TemplateSet,
    root: &'a Value,
    out: String,
    depth: usize,
    calls: usize,
}

impl<'a> Exec<'a> {
    fn new(set: &'a TemplateSet, root: &'a Value) -> Self {
        Self {
            set,
            root,
            out: String::new(),
            depth: 0,
            calls: 0,
        }
    }

    fn write(&mut self, s: &str) -> Result<()> {
        self.out.push_str(s);
        if self.out.len() > self.set.max_output_bytes {
            let mut cut = self.set.max_output_bytes;
            while !self.out.is_char_boundary(cut) {
                cut -= 1;
            }
            self.out.truncate(cut);
            return Err(AlertmanagerError::template(format!(
                "output exceeds {} bytes",
                self.set.max_output_bytes
            )));
        }
        Ok(())
    }

    fn run(&mut self, nodes: &[Node], dot: &Value) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(text) => self.write(text)?,
                Node::Output(pipeline) => {
                    let value = self.eval(pipeline, dot)?;
                    self.write(&print(&value))?;
                }
                Node::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    if truthy(&self.eval(cond, dot)?) {
                        self.run(then, dot)?;
                    } else {
                        self.run(otherwise, dot)?;
                    }
                }
                Node::Range {
                    over,
                    body,
                    otherwise,
                } => {
                    let items = match self.eval(over, dot)? {
                        Value::Array(items) => items,
                        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
                        Value::Null => Vec::new(),
                        other => {
                            return Err(AlertmanagerError::template(format!(
                                "range can't iterate over {}",
                                print(&other)
                            )));
                        }
                    };
                    if items.is_empty() {
                        self.run(otherwise, dot)?;
                    }
                    for item in &items {
                        self.run(body, item)?;
                    }
                }
                Node::Include { name, arg } => {
                    let nodes = self.set.templates.get(name).cloned().ok_or_else(|| {
                        AlertmanagerError::template(format!("template {name:?} not defined"))
                    })?;
                    let arg = match arg {
                        Some(p) => self.eval(p, dot)?,
                        None => Value::Null,
                    };
                    if self.depth >= MAX_TEMPLATE_DEPTH {
                        return Err(AlertmanagerError::template(format!(
                            "exceeded maximum template depth ({MAX_TEMPLATE_DEPTH})"
                        )));
                    }
                    // Fan-out below the depth limit can still explode.
                    if self.calls >= MAX_TEMPLATE_CALLS {
                        return Err(AlertmanagerError::template(format!(
                            "exceeded maximum template calls ({MAX_TEMPLATE_CALLS})"
                        )));
                    }
                    self.calls += 1;
                    self.depth += 1;
                    let result = self.run(&nodes, &arg);
                    self.depth -= 1;
                    result?;
                }
            }
        }
        Ok(())
    }

    fn eval(&self, pipeline: &Pipeline, dot: &Value) -> Result<Value> {
        let mut prev: Option<Value> = None;

        for command in &pipeline.commands {
            let mut args = command
                .args
                .iter()
                .map(|a| self.operand(a, dot))
                .collect::<Result<Vec<_>>>()?;
            if let Some(v) = prev.take() {
                args.push(v);
            }

            prev = Some(match command.func {
                Some(func) => call(func, args)?,
                None => {
                    if args.len() != 1 {
                        return Err(AlertmanagerError::template(
                            "can't give argument to non-function",
                        ));
                    }
                    args.swap_remove(0)
                }
            });
        }

        prev.ok_or_else(|| AlertmanagerError::template("empty pipeline"))
    }

    fn operand(&self, operand: &Operand, dot: &Value) -> Result<Value> {
        match operand {
            Operand::Str(s) => Ok(Value::String(s.clone())),
            Operand::Int(n) => Ok(Value::from(*n)),
            Operand::Field { from_root, path } => {
                let mut current = Cow::Borrowed(if *from_root { self.root } else { dot });
                for segment in path {
                    current = match current {
                        Cow::Borrowed(v) => field(v, segment)?,
                        Cow::Owned(v) => Cow::Owned(field(&v, segment)?.into_owned()),
                    };
                }
                Ok(current.into_owned())
            }
        }
    }
}

/// Looks up `name` on `value`. Stored fields are borrowed; only the derived
/// views (`SortedPairs`, `Names`, `Values`, `Firing`, `Resolved`) allocate.
fn field<'v>(value: &'v Value, name: &str) -> Result<Cow<'v, Value>> {
    match value {
        Value::Object(map) => {
            if let Some(v) = map.get(name) {
                return Ok(Cow::Borrowed(v));
            }
            Ok(match name {
                "SortedPairs" => Cow::Owned(Value::Array(
                    map.iter()
                        .map(|(k, v)| {
                            let mut pair = Map::new();
                            pair.insert("Name".into(), Value::String(k.clone()));
                            pair.insert("Value".into(), v.clone());
                            Value::Object(pair)
                        })
                        .collect(),
                )),
                "Names" => Cow::Owned(Value::Array(map.keys().cloned().map(Value::String).collect())),
                "Values" => Cow::Owned(Value::Array(map.values().cloned().collect())),
                _ => Cow::Owned(Value::Null),
            })
        }
        Value::Array(items) if name == "Firing" || name == "Resolved" => {
            let wanted = name.to_lowercase();
            Ok(Cow::Owned(Value::Array(
                items
                    .iter()
                    .filter(|item| item.get("Status").and_then(Value::as_str) == Some(wanted.as_str()))
                    .cloned()
                    .collect(),
            )))
        }
        Value::Null => Ok(Cow::Borrowed(value)),
        other => Err(AlertmanagerError::template(format!(
            "can't evaluate field {name} in {}",
            type_name(other)
        ))),
    }
}

fn call(func: Func, mut args: Vec<Value>) -> Result<Value> {
    if args.len() != func.arity() {
        return Err(AlertmanagerError::template(format!(
            "wrong number of args for {func:?}: want {} got {}",
            func.arity(),
            args.len()
        )));
    }

    Ok(match func {
        Func::Len => {
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(m) => m.len(),
                Value::Null => 0,
                other => {
                    return Err(AlertmanagerError::template(format!(
                        "len of {}",
                        type_name(other)
                    )));
                }
            };
            Value::from(n)
        }
        Func::ToUpper => Value::String(print(&args[0]).to_uppercase()),
        Func::ToLower => Value::String(print(&args[0]).to_lowercase()),
        Func::Title => Value::String(title_case(&print(&args[0]))),
        Func::Join => {
            let list = args.pop().unwrap_or(Value::Null);
            let sep = print(&args[0]);
            let parts: Vec<String> = match list {
                Value::Array(items) => items.iter().map(print).collect(),
                Value::Null => Vec::new(),
                other => {
                    return Err(AlertmanagerError::template(format!(
                        "join of {}",
                        type_name(&other)
                    )));
                }
            };
            Value::String(parts.join(&sep))
        }
        Func::Eq => Value::Bool(args[0] == args[1]),
        Func::Ne => Value::Bool(args[0] != args[1]),
        Func::Not => Value::Bool(!truthy(&args[0])),
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(m) => !m.is_empty(),
    }
}

fn print(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace();
    }
    out
}

// ============ Public API ============

/// Output of a render: the best-effort text plus the first error, if any.
#[derive(Debug)]
pub struct Rendered {
    /// Text produced before any error.
    pub text: String,
    /// The error that stopped rendering.
    pub error: Option<AlertmanagerError>,
}

impl Rendered {
    /// Converts into a result, discarding partial text on error.
    ///
    /// # Errors
    ///
    /// Returns the rendering error.
    pub fn into_result(self) -> Result<String> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.text),
        }
    }
}

/// A set of named templates: the built-ins plus any user template files.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: HashMap<String, Arc<Vec<Node>>>,
    max_output_bytes: usize,
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::defaults()
    }
}

impl TemplateSet {
    fn empty() -> Self {
        Self {
            templates: HashMap::new(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Returns a copy of the built-in templates.
    #[must_use]
    pub fn defaults() -> Self {
        DEFAULT_TEMPLATES.clone()
    }

    /// Builds the built-ins plus the given template files, then checks that
    /// every `template` reference resolves.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::TemplateExecution` on parse errors or
    /// dangling references.
    pub fn from_files(files: &BTreeMap<String, String>) -> Result<Self> {
        let mut set = Self::defaults();
        for (name, src) in files {
            set.add_file(name, src).map_err(|e| {
                AlertmanagerError::template(format!("template file {name:?}: {e}"))
            })?;
        }
        set.validate()?;
        Ok(set)
    }

    /// Caps the output size of a single render.
    #[must_use]
    pub const fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Parses a template file. Each `define` block becomes a named template;
    /// non-blank text outside of them is registered under the file name.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::TemplateExecution` on parse errors.
    pub fn add_file(&mut self, file_name: &str, src: &str) -> Result<()> {
        let mut parser = Parser::new(src)?;
        let body = parser.parse_top()?;

        let has_content = body.iter().any(|n| match n {
            Node::Text(t) => !t.trim().is_empty(),
            _ => true,
        });
        if has_content {
            self.templates.insert(file_name.to_string(), Arc::new(body));
        }
        for (name, nodes) in parser.defines {
            self.templates.insert(name, Arc::new(nodes));
        }
        Ok(())
    }

    /// Returns true if a template with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Returns the sorted template names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }

    /// Checks that every template reference in the set resolves.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::TemplateExecution` naming the first
    /// dangling reference.
    pub fn validate(&self) -> Result<()> {
        let mut includes = Vec::new();
        for nodes in self.templates.values() {
            collect_includes(nodes, &mut includes);
        }
        self.check_names(includes)
    }

    /// Parses inline template text and checks its references.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::TemplateExecution` on parse errors or
    /// dangling references.
    pub fn check(&self, text: &str) -> Result<()> {
        let nodes = Parser::new(text)?.parse_top()?;
        let mut includes = Vec::new();
        collect_includes(&nodes, &mut includes);
        self.check_names(includes)
    }

    fn check_names(&self, names: Vec<String>) -> Result<()> {
        let mut seen = HashSet::new();
        for name in names {
            if seen.insert(name.clone()) && !self.contains(&name) {
                return Err(AlertmanagerError::template(format!(
                    "template {name:?} not defined"
                )));
            }
        }
        Ok(())
    }

    /// Renders a named template.
    #[must_use]
    pub fn render(&self, name: &str, data: &TemplateData) -> Rendered {
        let root = match serde_json::to_value(data) {
            Ok(v) => v,
            Err(e) => {
                return Rendered {
                    text: String::new(),
                    error: Some(e.into()),
                };
            }
        };

        let mut exec = Exec::new(self, &root);
        let result = match self.templates.get(name) {
            Some(nodes) => exec.run(nodes, &root),
            None => Err(AlertmanagerError::template(format!(
                "template {name:?} not defined"
            ))),
        };
        Rendered {
            text: exec.out,
            error: result.err(),
        }
    }

    /// Renders inline template text.
    #[must_use]
    pub fn render_text(&self, text: &str, data: &TemplateData) -> Rendered {
        let mut expander = self.expander(data);
        let text = expander.expand(text);
        Rendered {
            text,
            error: expander.error,
        }
    }

    /// Creates an expander that renders several texts against the same data,
    /// keeping the first error.
    #[must_use]
    pub fn expander(&self, data: &TemplateData) -> TemplateExpander<'_> {
        let (data, error) = match serde_json::to_value(data) {
            Ok(v) => (v, None),
            Err(e) => (Value::Null, Some(e.into())),
        };
        TemplateExpander {
            set: self,
            data,
            error,
        }
    }
}

/// Renders inline template texts for one notification.
#[derive(Debug)]
pub struct TemplateExpander<'a> {
    set: &'a TemplateSet,
    data: Value,
    error: Option<AlertmanagerError>,
}

impl TemplateExpander<'_> {
    /// Renders `text`, returning whatever output was produced.
    pub fn expand(&mut self, text: &str) -> String {
        let nodes = match Parser::new(text).and_then(|mut p| p.parse_top()) {
            Ok(nodes) => nodes,
            Err(e) => {
                self.record(e);
                return String::new();
            }
        };

        let mut exec = Exec::new(self.set, &self.data);
        let result = exec.run(&nodes, &self.data);
        let out = exec.out;
        if let Err(e) = result {
            self.record(e);
        }
        out
    }

    /// Returns the first error recorded so far.
    #[must_use]
    pub const fn error(&self) -> Option<&AlertmanagerError> {
        self.error.as_ref()
    }

    /// Decides whether a notification may go out after rendering.
    ///
    /// With no error this succeeds. After an error the degraded text is still
    /// sent, with a warning, as long as some rendered field is non-blank;
    /// otherwise the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the recorded template error when nothing usable was rendered.
    pub fn finish(self, notifier: &str, rendered: &[&str]) -> Result<()> {
        match self.error {
            None => Ok(()),
            Some(e) if rendered.iter().any(|s| !s.trim().is_empty()) => {
                warn!(notifier = %notifier, error = %e, "sending degraded notification after template error");
                Ok(())
            }
            Some(e) => Err(e),
        }
    }

    fn record(&mut self, err: AlertmanagerError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::label_set;
    use chrono::Duration as ChronoDuration;

    fn data() -> TemplateData {
        let now = Utc::now();
        let firing = Alert::new(label_set(&[
            ("alertname", "Foo"),
            ("severity", "critical"),
            ("instance", "node-1"),
        ]))
        .with_annotation("summary", "disk full")
        .with_generator_url("http://grafana/alerting/1");
        let resolved = Alert::new(label_set(&[
            ("alertname", "Foo"),
            ("severity", "critical"),
            ("instance", "node-2"),
        ]))
        .with_annotation("summary", "disk full")
        .starting_at(now - ChronoDuration::hours(1))
        .ending_at(now - ChronoDuration::minutes(1));

        TemplateData::new(
            "ops",
            &label_set(&[("alertname", "Foo")]),
            &[firing, resolved],
            "http://grafana",
            now,
        )
    }

    fn render_inline(text: &str) -> Rendered {
        TemplateSet::defaults().render_text(text, &data())
    }

    mod data_tests {
        use super::*;

        #[test]
        fn common_labels_and_status() {
            let d = data();
            assert_eq!(d.status, "firing");
            assert_eq!(d.firing_count(), 1);
            assert_eq!(d.common_labels.get("severity"), Some(&"critical".to_string()));
            assert!(!d.common_labels.contains_key("instance"));
            assert_eq!(
                d.common_annotations.get("summary"),
                Some(&"disk full".to_string())
            );
        }

        #[test]
        fn all_resolved_group_is_resolved() {
            let now = Utc::now();
            let alert = Alert::new(label_set(&[("alertname", "Foo")]))
                .starting_at(now - ChronoDuration::hours(1))
                .ending_at(now);
            let d = TemplateData::new("ops", &LabelSet::new(), &[alert], "", now);
            assert_eq!(d.status, "resolved");
        }
    }

    mod syntax_tests {
        use super::*;

        #[test]
        fn field_access() {
            let r = render_inline("{{ .Receiver }}/{{ .CommonLabels.alertname }}/{{ .ExternalURL }}");
            assert!(r.error.is_none());
            assert_eq!(r.text, "ops/Foo/http://grafana");
        }

        #[test]
        fn missing_key_renders_empty() {
            let r = render_inline("[{{ .CommonLabels.nope }}]");
            assert!(r.error.is_none());
            assert_eq!(r.text, "[]");
        }

        #[test]
        fn range_over_firing_and_resolved() {
            let r = render_inline(
                "{{ range .Alerts.Firing }}F:{{ .Labels.instance }} {{ end }}{{ range .Alerts.Resolved }}R:{{ .Labels.instance }}{{ end }}",
            );
            assert_eq!(r.text, "F:node-1 R:node-2");
        }

        #[test]
        fn range_else_on_empty() {
            let set = TemplateSet::defaults();
            let now = Utc::now();
            let d = TemplateData::new("ops", &LabelSet::new(), &[], "", now);
            let r = set.render_text("{{ range .Alerts }}x{{ else }}none{{ end }}", &d);
            assert_eq!(r.text, "none");
        }

        #[test]
        fn if_else_if_chain() {
            let r = render_inline(
                r#"{{ if eq .Status "resolved" }}ok{{ else if eq .Status "firing" }}fire{{ else }}?{{ end }}"#,
            );
            assert_eq!(r.text, "fire");
        }

        #[test]
        fn pipelines_and_functions() {
            let r = render_inline(
                r#"{{ .Status | toUpper }} {{ len .Alerts }} {{ .GroupLabels.Names | join "," }} {{ "hello world" | title }} {{ not .Alerts }}"#,
            );
            assert!(r.error.is_none(), "{:?}", r.error);
            assert_eq!(r.text, "FIRING 2 alertname Hello World false");
        }

        #[test]
        fn root_access_inside_range() {
            let r = render_inline("{{ range .Alerts.Firing }}{{ $.Receiver }}:{{ .Fingerprint | len }}{{ end }}");
            assert_eq!(r.text, "ops:16");
        }

        #[test]
        fn trim_markers_and_comments() {
            let r = render_inline("a  {{- /* note */ -}}  {{- .Receiver -}}  \n b");
            assert_eq!(r.text, "aopsb");
        }

        #[test]
        fn sorted_pairs() {
            let r = render_inline(
                "{{ range .CommonLabels.SortedPairs }}{{ .Name }}={{ .Value }};{{ end }}",
            );
            assert_eq!(r.text, "alertname=Foo;severity=critical;");
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn unknown_function_is_parse_error() {
            let r = render_inline("{{ exec \"rm\" }}");
            assert!(matches!(r.error, Some(AlertmanagerError::TemplateExecution { .. })));
            assert!(r.text.is_empty());
        }

        #[test]
        fn partial_output_is_kept() {
            let r = render_inline("before {{ .Status.Nope }} after");
            assert_eq!(r.text, "before ");
            assert!(matches!(r.error, Some(AlertmanagerError::TemplateExecution { .. })));
        }

        #[test]
        fn unclosed_blocks_fail() {
            assert!(render_inline("{{ if .Status }}x").error.is_some());
            assert!(render_inline("{{ end }}").error.is_some());
            assert!(render_inline("{{ .Status").error.is_some());
        }

        #[test]
        fn recursion_is_bounded() {
            let mut set = TemplateSet::defaults();
            set.add_file("loop.tmpl", r#"{{ define "loop" }}x{{ template "loop" . }}{{ end }}"#)
                .unwrap();
            let r = set.render("loop", &data());
            assert_eq!(r.text.len(), MAX_TEMPLATE_DEPTH + 1);
            assert!(r.error.unwrap().to_string().contains("maximum template depth"));
        }

        #[test]
        fn fan_out_is_bounded() {
            let mut source = String::new();
            for i in 0..15 {
                let next = i + 1;
                source.push_str(&format!(
                    r#"{{{{ define "f{i}" }}}}{{{{ template "f{next}" . }}}}{{{{ template "f{next}" . }}}}{{{{ end }}}}"#
                ));
            }
            source.push_str(r#"{{ define "f15" }}x{{ end }}"#);
            let mut set = TemplateSet::defaults();
            set.add_file("fan.tmpl", &source).unwrap();

            let r = set.render("f0", &data());
            assert!(r.text.len() < MAX_TEMPLATE_CALLS);
            assert!(r.error.unwrap().to_string().contains("maximum template calls"));
        }

        #[test]
        fn output_is_bounded() {
            let set = TemplateSet::defaults().with_max_output_bytes(8);
            let r = set.render_text("{{ range .Alerts }}0123456789{{ end }}", &data());
            assert_eq!(r.text, "01234567");
            assert!(r.error.is_some());
        }

        #[test]
        fn render_unknown_template() {
            let r = TemplateSet::defaults().render("nope", &data());
            assert!(r.into_result().is_err());
        }
    }

    mod set_tests {
        use super::*;

        #[test]
        fn defaults_exist() {
            let set = TemplateSet::defaults();
            assert!(set.contains(DEFAULT_TITLE));
            assert!(set.contains(DEFAULT_MESSAGE));
            assert!(set.validate().is_ok());
        }

        #[test]
        fn default_title_and_message() {
            let set = TemplateSet::defaults();
            let title = set.render(DEFAULT_TITLE, &data()).into_result().unwrap();
            assert_eq!(title, "[FIRING:1] Foo");

            let message = set.render(DEFAULT_MESSAGE, &data()).into_result().unwrap();
            assert!(message.starts_with("**Firing**\nLabels:\n"));
            assert!(message.contains(" - instance = node-1\n"));
            assert!(message.contains("Source: http://grafana/alerting/1\n"));
            assert!(message.contains("**Resolved**"));
            assert!(message.contains(" - instance = node-2\n"));
        }

        #[test]
        fn user_files_add_and_override() {
            let mut files = BTreeMap::new();
            files.insert(
                "custom.tmpl".to_string(),
                r#"{{ define "custom" }}{{ .Receiver }}!{{ end }}{{ define "default.title" }}T{{ end }}"#
                    .to_string(),
            );
            let set = TemplateSet::from_files(&files).unwrap();
            assert_eq!(set.render("custom", &data()).text, "ops!");
            assert_eq!(set.render(DEFAULT_TITLE, &data()).text, "T");
            assert!(!set.contains("custom.tmpl"));

            assert!(!TemplateSet::defaults().contains("custom"));
        }

        #[test]
        fn dangling_reference_rejected() {
            let mut files = BTreeMap::new();
            files.insert(
                "bad.tmpl".to_string(),
                r#"{{ define "a" }}{{ template "missing" . }}{{ end }}"#.to_string(),
            );
            assert!(TemplateSet::from_files(&files).is_err());

            let set = TemplateSet::defaults();
            assert!(set.check(r#"{{ template "missing" . }}"#).is_err());
            assert!(set.check(DEFAULT_MESSAGE_TEXT).is_ok());
        }

        #[test]
        fn nested_define_rejected() {
            let mut set = TemplateSet::defaults();
            assert!(set
                .add_file("x", r#"{{ if .A }}{{ define "b" }}{{ end }}{{ end }}"#)
                .is_err());
        }
    }

    mod expander_tests {
        use super::*;

        #[test]
        fn keeps_first_error_and_degrades() {
            let set = TemplateSet::defaults();
            let d = data();
            let mut tmpl = set.expander(&d);
            let title = tmpl.expand("{{ .Status.Bad }}");
            let message = tmpl.expand(DEFAULT_MESSAGE_TEXT);
            assert!(title.is_empty());
            assert!(!message.is_empty());
            assert!(tmpl.error().is_some());
            assert!(tmpl.finish("test", &[&title, &message]).is_ok());
        }

        #[test]
        fn fails_when_nothing_rendered() {
            let set = TemplateSet::defaults();
            let d = data();
            let mut tmpl = set.expander(&d);
            let title = tmpl.expand("{{ .Status.Bad }}");
            assert!(tmpl.finish("test", &[&title]).is_err());
        }
    }
}
