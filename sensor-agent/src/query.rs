//! Backend-facing query descriptions
//!
//! Every requested metric is rendered to one description string:
//! `(<param>, <param>) <aspect>, <aspect>`. Either half may be absent.

use crate::request::{MetricRequest, RequestModel};
use std::collections::{btree_map, BTreeMap};
use tracing::debug;

/// Metric name to query-description string, derived from a [`RequestModel`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryModel {
    queries: BTreeMap<String, String>,
}

impl QueryModel {
    pub fn build(model: &RequestModel) -> Self {
        let queries: BTreeMap<String, String> = model
            .iter()
            .map(|request| (request.metric().to_string(), render(request)))
            .collect();
        debug!("Query model: {:?}", queries);
        Self { queries }
    }

    pub fn get(&self, metric: &str) -> Option<&str> {
        self.queries.get(metric).map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.queries.iter()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

impl FromIterator<(String, String)> for QueryModel {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            queries: iter.into_iter().collect(),
        }
    }
}

/// Render one metric's description.
pub fn render(request: &MetricRequest) -> String {
    let params = request.function_params();
    let aspects = request.aspects();

    let mut text = String::new();
    if !params.is_empty() {
        text.push('(');
        text.push_str(&params.join(", "));
        text.push(')');
    }
    if !aspects.is_empty() {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&aspects.join(", "));
    }
    text
}

/// A description string split back into its parts, as the backend reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDescription {
    pub params: Vec<String>,
    /// Empty means every aspect the metric offers.
    pub aspects: Vec<String>,
}

impl QueryDescription {
    /// Returns `None` for an unbalanced parameter list, like `(eth0 rx_bytes`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (params, rest) = match text.strip_prefix('(') {
            Some(inner) => {
                let close = inner.find(')')?;
                (split_list(&inner[..close]), &inner[close + 1..])
            }
            None => (Vec::new(), text),
        };

        Some(Self {
            params,
            aspects: split_list(rest),
        })
    }

    /// No aspect list, or `*` anywhere in it.
    pub fn wants_all(&self) -> bool {
        self.aspects.is_empty() || self.aspects.iter().any(|a| a == "*")
    }
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
