//! Routing tree: maps alerts to receivers and alert groups.

use serde::{Deserialize, Serialize};

use crate::error::{AlertmanagerError, Result};
use crate::matcher::{matches_all, parse_matchers, Matcher};
use crate::types::LabelSet;

/// `group_by` value meaning "group by every label".
pub const GROUP_BY_ALL: &str = "...";

/// A route as written in the alerting configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Receiver for matching alerts; inherited from the parent when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    /// Labels to group by; inherited from the parent when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    /// Label matchers in filter syntax.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<String>,
    /// Keep evaluating siblings after this route matched.
    #[serde(default, rename = "continue")]
    pub continue_matching: bool,
    /// Child routes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,
}

impl RouteConfig {
    /// Creates a route to `receiver`.
    #[must_use]
    pub fn to(receiver: impl Into<String>) -> Self {
        Self {
            receiver: Some(receiver.into()),
            ..Default::default()
        }
    }

    /// Adds a matcher.
    #[must_use]
    pub fn matching(mut self, matcher: impl Into<String>) -> Self {
        self.matchers.push(matcher.into());
        self
    }

    /// Sets the group-by labels.
    #[must_use]
    pub fn grouped_by<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.group_by = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a child route.
    #[must_use]
    pub fn with_route(mut self, route: Self) -> Self {
        self.routes.push(route);
        self
    }

    /// Sets `continue`.
    #[must_use]
    pub const fn continuing(mut self) -> Self {
        self.continue_matching = true;
        self
    }
}

/// How alerts of a route are grouped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupBy {
    /// Every label is a grouping label.
    All,
    /// Only these labels.
    Labels(Vec<String>),
}

impl GroupBy {
    fn from_config(labels: &[String]) -> Self {
        if labels.iter().any(|l| l == GROUP_BY_ALL) {
            Self::All
        } else {
            Self::Labels(labels.to_vec())
        }
    }
}

/// A compiled route with inherited settings resolved.
#[derive(Debug, Clone)]
pub struct Route {
    receiver: String,
    group_by: GroupBy,
    matchers: Vec<Matcher>,
    continue_matching: bool,
    routes: Vec<Route>,
}

impl Route {
    /// Compiles the root route. `default_receiver` is used when the root
    /// names no receiver.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::InvalidConfig` if the root has no receiver
    /// and there is no default, or a matcher is malformed.
    pub fn compile_root(config: &RouteConfig, default_receiver: Option<&str>) -> Result<Self> {
        let receiver = config
            .receiver
            .clone()
            .filter(|r| !r.is_empty())
            .or_else(|| default_receiver.map(ToString::to_string))
            .ok_or_else(|| AlertmanagerError::invalid_config("root route must specify a receiver"))?;

        Self::compile(config, receiver, GroupBy::from_config(&config.group_by))
    }

    fn compile(config: &RouteConfig, receiver: String, group_by: GroupBy) -> Result<Self> {
        let matchers = parse_matchers(&config.matchers)
            .map_err(|e| AlertmanagerError::invalid_config(format!("route matchers: {e}")))?;

        let routes = config
            .routes
            .iter()
            .map(|child| {
                let receiver = child
                    .receiver
                    .clone()
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| receiver.clone());
                let group_by = if child.group_by.is_empty() {
                    group_by.clone()
                } else {
                    GroupBy::from_config(&child.group_by)
                };
                Self::compile(child, receiver, group_by)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            receiver,
            group_by,
            matchers,
            continue_matching: config.continue_matching,
            routes,
        })
    }

    /// Returns the receiver of this route.
    #[must_use]
    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    /// Returns the grouping mode.
    #[must_use]
    pub const fn group_by(&self) -> &GroupBy {
        &self.group_by
    }

    /// Returns the child routes.
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Returns every receiver name referenced in the tree, depth-first.
    #[must_use]
    pub fn receivers(&self) -> Vec<&str> {
        let mut out = vec![self.receiver.as_str()];
        for child in &self.routes {
            out.extend(child.receivers());
        }
        out
    }

    /// Returns the routes that take `labels`: the first matching child at
    /// each level (more if `continue` is set), falling back to this route.
    /// Unmatched alerts go to the root.
    #[must_use]
    pub fn route(&self, labels: &LabelSet) -> Vec<&Self> {
        let matched = self.find(labels);
        if matched.is_empty() {
            vec![self]
        } else {
            matched
        }
    }

    fn find(&self, labels: &LabelSet) -> Vec<&Self> {
        if !matches_all(&self.matchers, labels) {
            return Vec::new();
        }

        let mut matched = Vec::new();
        for child in &self.routes {
            let found = child.find(labels);
            if found.is_empty() {
                continue;
            }
            matched.extend(found);
            if !child.continue_matching {
                break;
            }
        }

        if matched.is_empty() {
            matched.push(self);
        }
        matched
    }

    /// Returns the grouping labels of an alert under this route.
    #[must_use]
    pub fn group_labels(&self, labels: &LabelSet) -> LabelSet {
        match &self.group_by {
            GroupBy::All => labels.clone(),
            GroupBy::Labels(names) => names
                .iter()
                .filter_map(|n| labels.get(n).map(|v| (n.clone(), v.clone())))
                .collect(),
        }
    }

    /// Returns the group key, `receiver:{name="value",...}`.
    #[must_use]
    pub fn group_key(&self, group_labels: &LabelSet) -> String {
        let pairs: Vec<String> = group_labels
            .iter()
            .map(|(k, v)| format!("{k}={v:?}"))
            .collect();
        format!("{}:{{{}}}", self.receiver, pairs.join(","))
    }

    /// One line per route, indented by depth.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.describe_into(0, &mut lines);
        lines
    }

    fn describe_into(&self, depth: usize, lines: &mut Vec<String>) {
        let matchers: Vec<String> = self.matchers.iter().map(ToString::to_string).collect();
        let group_by = match &self.group_by {
            GroupBy::All => GROUP_BY_ALL.to_string(),
            GroupBy::Labels(l) => l.join(","),
        };
        lines.push(format!(
            "{}{} [{}] group_by=[{}]{}",
            "  ".repeat(depth),
            self.receiver,
            matchers.join(", "),
            group_by,
            if self.continue_matching { " continue" } else { "" }
        ));
        for child in &self.routes {
            child.describe_into(depth + 1, lines);
        }
    }
}
