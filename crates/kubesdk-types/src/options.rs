//!
//! # Request options
//!
//! Query parameters accepted by list, delete and watch calls. Options render
//! to an ordered list of `(key, value)` pairs; the transport layer is
//! responsible for percent-encoding.
//!
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub label_selector: Option<LabelSelector>,
    pub field_selector: Option<FieldSelector>,
    pub resource_version: Option<String>,
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
    pub timeout_seconds: Option<u32>,
    pub watch: bool,
    pub allow_watch_bookmarks: bool,
}

impl ListOptions {
    /// ordered query pairs; flags absent from the request are omitted entirely
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(token) = &self.continue_token {
            pairs.push(("continue".to_owned(), token.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_owned(), limit.to_string()));
        }
        if let Some(rv) = &self.resource_version {
            pairs.push(("resourceVersion".to_owned(), rv.clone()));
        }
        if let Some(timeout) = self.timeout_seconds {
            pairs.push(("timeoutSeconds".to_owned(), timeout.to_string()));
        }
        if self.watch {
            pairs.push(("watch".to_owned(), "true".to_owned()));
            if self.allow_watch_bookmarks {
                pairs.push(("allowWatchBookmarks".to_owned(), "true".to_owned()));
            }
        }
        if let Some(selector) = &self.field_selector {
            let value = selector.to_query_value();
            if !value.is_empty() {
                pairs.push(("fieldSelector".to_owned(), value));
            }
        }
        if let Some(selector) = &self.label_selector {
            let value = selector.to_query_value();
            if !value.is_empty() {
                pairs.push(("labelSelector".to_owned(), value));
            }
        }
        pairs
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    pub fn match_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            match_labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            match_expressions: Vec::new(),
        }
    }

    pub fn to_query_value(&self) -> String {
        let mut terms: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        for req in &self.match_expressions {
            terms.push(req.to_query_value());
        }
        terms.join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: LabelOperator,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl LabelSelectorRequirement {
    fn to_query_value(&self) -> String {
        match self.operator {
            LabelOperator::In => format!("{} in ({})", self.key, self.values.join(",")),
            LabelOperator::NotIn => format!("{} notin ({})", self.key, self.values.join(",")),
            LabelOperator::Exists => self.key.clone(),
            LabelOperator::DoesNotExist => format!("!{}", self.key),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FieldSelector {
    pub requirements: Vec<FieldSelectorRequirement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelectorRequirement {
    pub field: String,
    pub operator: FieldOperator,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOperator {
    Eq,
    Neq,
}

impl FieldSelector {
    pub fn to_query_value(&self) -> String {
        self.requirements
            .iter()
            .map(|req| match req.operator {
                FieldOperator::Eq => format!("{}={}", req.field, req.value),
                FieldOperator::Neq => format!("{}!={}", req.field, req.value),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// options attached to delete requests as a body, not as query parameters
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagation_policy: Option<PropagationPolicy>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dry_run: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PropagationPolicy {
    Orphan,
    Background,
    Foreground,
}
