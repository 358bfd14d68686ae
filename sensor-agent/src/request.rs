//! Metric request mini-language
//!
//! A request is a list of items separated by commas (or whitespace):
//!
//! ```text
//! currentLoad, mem/used, mem/active, cpuTemperature/(main)
//! ```
//!
//! Each item takes one of three forms:
//! - `<metric>`: bare metric, aspect resolved through the [`DefaultAspectTable`]
//! - `<metric>/<aspect>`: explicit aspect
//! - `<metric>/(<param>)`: function parameter handed to the backend
//!
//! Parsing never fails. Items that cannot be understood are logged and skipped.

use std::collections::{btree_map, BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

/// Separates the metric from its detail, like `mem/active`.
pub const DETAIL_SEPARATOR: char = '/';

/// Default request when none is configured.
pub const DEFAULT_REQUEST: &str = "currentLoad, cpuTemperature, mem";

/// Aspect selected when a metric is requested without qualification.
const STANDARD_DEFAULT_ASPECTS: &[(&str, &str)] = &[
    ("cpuTemperature", "main"),
    ("currentLoad", "currentLoad"),
    ("mem", "active"),
    ("networkStats", "tx_bytes, rx_bytes"),
];

/// How items are separated in a request string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemDelimiter {
    #[default]
    Comma,
    Space,
}

impl ItemDelimiter {
    /// Accepts `comma`/`,` and `space`/` `.
    pub fn from_name(name: &str) -> Option<Self> {
        if name == " " {
            return Some(Self::Space);
        }
        match name.trim().to_ascii_lowercase().as_str() {
            "comma" | "," => Some(Self::Comma),
            "space" => Some(Self::Space),
            _ => None,
        }
    }

    fn split(self, text: &str) -> Vec<&str> {
        let items: Vec<&str> = match self {
            Self::Comma => text.split(',').collect(),
            Self::Space => text.split_whitespace().collect(),
        };
        items
            .into_iter()
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .collect()
    }
}

/// Static mapping from metric name to its default aspect selector.
///
/// A selector may name several aspects separated by `, `; each one becomes
/// its own aspect entry when resolved.
#[derive(Debug, Clone)]
pub struct DefaultAspectTable {
    entries: HashMap<String, String>,
}

impl DefaultAspectTable {
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(metric, selector)| (metric.into(), selector.into()))
                .collect(),
        }
    }

    pub fn lookup(&self, metric: &str) -> Option<&str> {
        self.entries.get(metric).map(String::as_str)
    }
}

impl Default for DefaultAspectTable {
    fn default() -> Self {
        Self::from_entries(STANDARD_DEFAULT_ASPECTS.iter().copied())
    }
}

/// Append-only set keeping first-insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedSet(Vec<String>);

impl OrderedSet {
    /// Returns false when the value was already present.
    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if self.0.contains(&value) {
            return false;
        }
        self.0.push(value);
        true
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|v| v == value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn join(&self, separator: &str) -> String {
        self.0.join(separator)
    }
}

/// What a single request item contributes to its metric.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Detail {
    /// Bare metric, resolved through the default table.
    Default(String),
    /// `<metric>/<aspect>`
    Aspect(String),
    /// `<metric>/(<param>)`
    FunctionParam(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
enum ItemError {
    #[error("no default aspect for metric '{0}'")]
    NoDefaultAspect(String),
    #[error("missing metric name before '/'")]
    EmptyMetric,
    #[error("missing detail after '/'")]
    EmptyDetail,
    #[error("empty function parameter")]
    EmptyParam,
    #[error("unbalanced parentheses in '{0}'")]
    Unbalanced(String),
}

/// Everything requested for one metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRequest {
    metric: String,
    aspects: OrderedSet,
    function_params: OrderedSet,
    is_default_aspect: bool,
}

impl MetricRequest {
    fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            aspects: OrderedSet::default(),
            function_params: OrderedSet::default(),
            is_default_aspect: false,
        }
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn aspects(&self) -> &OrderedSet {
        &self.aspects
    }

    pub fn function_params(&self) -> &OrderedSet {
        &self.function_params
    }

    /// True when the single aspect came from the default table, so the
    /// published key is the bare metric name.
    pub fn is_default_aspect(&self) -> bool {
        self.is_default_aspect
    }

    fn add(&mut self, detail: Detail) {
        match detail {
            Detail::Default(selector) => {
                let was_empty = self.aspects.is_empty();
                for aspect in selector.split(',').map(str::trim).filter(|a| !a.is_empty()) {
                    self.aspects.insert(aspect);
                }
                // An earlier explicit aspect always leaves the set non-empty.
                self.is_default_aspect =
                    (was_empty || self.is_default_aspect) && self.aspects.len() == 1;
            }
            Detail::Aspect(aspect) => {
                self.aspects.insert(aspect);
                self.is_default_aspect = false;
            }
            Detail::FunctionParam(param) => {
                self.function_params.insert(param);
            }
        }
    }
}

/// Parsed request: metric name to its [`MetricRequest`].
///
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestModel {
    metrics: BTreeMap<String, MetricRequest>,
}

impl RequestModel {
    /// Parse with the standard default-aspect table.
    pub fn parse(text: &str, delimiter: ItemDelimiter) -> Self {
        Self::parse_with_defaults(text, delimiter, &DefaultAspectTable::default())
    }

    pub fn parse_with_defaults(
        text: &str,
        delimiter: ItemDelimiter,
        defaults: &DefaultAspectTable,
    ) -> Self {
        let mut metrics: BTreeMap<String, MetricRequest> = BTreeMap::new();

        for item in delimiter.split(text) {
            match parse_item(item, defaults) {
                Ok((metric, detail)) => {
                    debug!("Request item '{}' -> {} {:?}", item, metric, detail);
                    metrics
                        .entry(metric.clone())
                        .or_insert_with(|| MetricRequest::new(metric))
                        .add(detail);
                }
                Err(e) => warn!("Skipping request item '{}': {}", item, e),
            }
        }

        // Several aspects cannot share the bare-metric key.
        for request in metrics.values_mut() {
            if request.aspects.len() > 1 {
                request.is_default_aspect = false;
            }
        }

        debug!("Request model: {:?}", metrics);
        Self { metrics }
    }

    pub fn get(&self, metric: &str) -> Option<&MetricRequest> {
        self.metrics.get(metric)
    }

    pub fn iter(&self) -> btree_map::Values<'_, String, MetricRequest> {
        self.metrics.values()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

fn parse_item(item: &str, defaults: &DefaultAspectTable) -> Result<(String, Detail), ItemError> {
    let Some((metric, detail)) = item.split_once(DETAIL_SEPARATOR) else {
        let selector = defaults
            .lookup(item)
            .ok_or_else(|| ItemError::NoDefaultAspect(item.to_string()))?;
        return Ok((item.to_string(), Detail::Default(selector.to_string())));
    };

    let metric = metric.trim();
    let detail = detail.trim();
    if metric.is_empty() {
        return Err(ItemError::EmptyMetric);
    }
    if detail.is_empty() {
        return Err(ItemError::EmptyDetail);
    }

    let detail = match detail
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(param) => {
            let param = param.trim();
            if param.is_empty() {
                return Err(ItemError::EmptyParam);
            }
            if param.contains(|c: char| c == '(' || c == ')') {
                return Err(ItemError::Unbalanced(detail.to_string()));
            }
            Detail::FunctionParam(param.to_string())
        }
        // The rendered query would not read back.
        None if detail.starts_with('(') => return Err(ItemError::Unbalanced(detail.to_string())),
        None => Detail::Aspect(detail.to_string()),
    };

    Ok((metric.to_string(), detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> RequestModel {
        RequestModel::parse(text, ItemDelimiter::Comma)
    }

    #[test]
    fn test_bare_metric_uses_default_aspect() {
        let model = parse("mem");
        let mem = model.get("mem").unwrap();
        assert!(mem.is_default_aspect());
        assert_eq!(mem.aspects().iter().collect::<Vec<_>>(), vec!["active"]);
        assert!(mem.function_params().is_empty());
    }

    #[test]
    fn test_second_aspect_clears_default_flag() {
        let model = parse("mem/used, mem/active");
        let mem = model.get("mem").unwrap();
        assert!(!mem.is_default_aspect());
        assert_eq!(mem.aspects().join(", "), "used, active");

        let model = parse("mem, mem/used");
        assert!(!model.get("mem").unwrap().is_default_aspect());
        assert_eq!(model.get("mem").unwrap().aspects().len(), 2);
    }

    #[test]
    fn test_explicitly_named_default_aspect_is_not_default() {
        let model = parse("mem, mem/active");
        let mem = model.get("mem").unwrap();
        assert_eq!(mem.aspects().len(), 1);
        assert!(!mem.is_default_aspect());

        let model = parse("mem/active, mem");
        assert!(!model.get("mem").unwrap().is_default_aspect());
    }

    #[test]
    fn test_repeated_bare_metric_stays_default() {
        let model = parse("mem, mem");
        let mem = model.get("mem").unwrap();
        assert!(mem.is_default_aspect());
        assert_eq!(mem.aspects().len(), 1);
    }

    #[test]
    fn test_parenthesised_detail_is_function_param() {
        let model = parse("mem/(main)");
        let mem = model.get("mem").unwrap();
        assert!(mem.aspects().is_empty());
        assert!(mem.function_params().contains("main"));
        assert!(!mem.is_default_aspect());
    }

    #[test]
    fn test_function_param_does_not_affect_default_flag() {
        let model = parse("cpuTemperature/(cpu), cpuTemperature");
        let temp = model.get("cpuTemperature").unwrap();
        assert!(temp.is_default_aspect());
        assert_eq!(temp.function_params().join(","), "cpu");
        assert_eq!(temp.aspects().join(","), "main");
    }

    #[test]
    fn test_unknown_bare_metric_is_dropped() {
        let model = parse("bogus");
        assert!(model.is_empty());

        let model = parse("bogus, mem");
        assert_eq!(model.len(), 1);
        assert!(model.get("bogus").is_none());
    }

    #[test]
    fn test_multi_aspect_default_selector_expands() {
        let model = parse("networkStats");
        let net = model.get("networkStats").unwrap();
        assert_eq!(net.aspects().join(", "), "tx_bytes, rx_bytes");
        assert!(!net.is_default_aspect());
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let model = parse("mem/used, mem/used, mem/(x), mem/(x)");
        let mem = model.get("mem").unwrap();
        assert_eq!(mem.aspects().len(), 1);
        assert_eq!(mem.function_params().len(), 1);
    }

    #[test]
    fn test_malformed_items_are_skipped() {
        let model = parse(" , /used, mem/, mem/(), mem/(eth0 ,currentLoad");
        assert_eq!(model.len(), 1);
        assert!(model.get("currentLoad").is_some());
        assert!(model.get("mem").is_none());
    }

    #[test]
    fn test_only_first_separator_splits() {
        let model = parse("fsSize/dev/sda1");
        let fs = model.get("fsSize").unwrap();
        assert!(fs.aspects().contains("dev/sda1"));
    }

    #[test]
    fn test_space_delimited_requests() {
        let model = RequestModel::parse("currentLoad   mem/used\tmem/active", ItemDelimiter::Space);
        assert_eq!(model.len(), 2);
        assert!(model.get("currentLoad").unwrap().is_default_aspect());
        assert_eq!(model.get("mem").unwrap().aspects().join(" "), "used active");
    }

    #[test]
    fn test_custom_default_table() {
        let defaults = DefaultAspectTable::from_entries([("battery", "percent")]);
        let model = RequestModel::parse_with_defaults("battery, mem", ItemDelimiter::Comma, &defaults);
        assert_eq!(model.len(), 1);
        assert!(model.get("battery").unwrap().is_default_aspect());
    }

    #[test]
    fn test_delimiter_names() {
        assert_eq!(ItemDelimiter::from_name("comma"), Some(ItemDelimiter::Comma));
        assert_eq!(ItemDelimiter::from_name(","), Some(ItemDelimiter::Comma));
        assert_eq!(ItemDelimiter::from_name("SPACE"), Some(ItemDelimiter::Space));
        assert_eq!(ItemDelimiter::from_name(" "), Some(ItemDelimiter::Space));
        assert_eq!(ItemDelimiter::from_name("tab"), None);
    }

    #[test]
    fn test_item_errors() {
        let defaults = DefaultAspectTable::default();
        assert_eq!(
            parse_item("bogus", &defaults),
            Err(ItemError::NoDefaultAspect("bogus".into()))
        );
        assert_eq!(parse_item("/x", &defaults), Err(ItemError::EmptyMetric));
        assert_eq!(parse_item("mem/", &defaults), Err(ItemError::EmptyDetail));
        assert_eq!(parse_item("mem/( )", &defaults), Err(ItemError::EmptyParam));
        assert_eq!(
            parse_item("mem/(", &defaults),
            Err(ItemError::Unbalanced("(".into()))
        );
        assert_eq!(
            parse_item("mem/(a)b)", &defaults),
            Err(ItemError::Unbalanced("(a)b)".into()))
        );
        assert_eq!(
            parse_item("mem/a)", &defaults),
            Ok(("mem".into(), Detail::Aspect("a)".into())))
        );
    }
}
