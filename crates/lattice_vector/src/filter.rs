//! Metadata filter predicate.
//!
//! A filter is three disjoint condition lists: every `must` condition
//! holds, at least one `should` condition holds (or the list is empty),
//! and no `must_not` condition holds. Conditions compare a metadata
//! field against a JSON value; comparisons go numeric when both sides
//! parse as numbers and fall back to lexicographic string compare
//! otherwise.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Comparison operator for one condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    /// Value is a list; holds when the field equals any element.
    In,
    /// Value is a list; holds when the field equals no element.
    Nin,
    /// Holds iff the key is present, regardless of value.
    Exists,
    /// Case-insensitive substring match.
    Contains,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Gt => "gt",
            FilterOp::Lt => "lt",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::Nin => "nin",
            FilterOp::Exists => "exists",
            FilterOp::Contains => "contains",
        }
    }
}

/// One `(field, op, value)` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Gt, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Lt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Gte, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Lte, value)
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, FilterOp::In, Value::Array(values))
    }

    pub fn not_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, FilterOp::Nin, Value::Array(values))
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::new(field, FilterOp::Exists, Value::Null)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, FilterOp::Contains, Value::String(value.into()))
    }

    /// Evaluate against a metadata bag. A missing key fails every
    /// operator except `Exists` (which tests presence itself).
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        if self.op == FilterOp::Exists {
            return metadata.contains_key(&self.field);
        }
        let Some(actual) = metadata.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => compare(actual, &self.value) == Some(Ordering::Equal),
            FilterOp::Ne => compare(actual, &self.value) != Some(Ordering::Equal),
            FilterOp::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            FilterOp::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ),
            FilterOp::In => list_values(&self.value)
                .iter()
                .any(|v| compare(actual, v) == Some(Ordering::Equal)),
            FilterOp::Nin => !list_values(&self.value)
                .iter()
                .any(|v| compare(actual, v) == Some(Ordering::Equal)),
            FilterOp::Contains => value_text(actual)
                .to_lowercase()
                .contains(&value_text(&self.value).to_lowercase()),
            FilterOp::Exists => unreachable!(),
        }
    }
}

/// Boolean filter tree: `must AND (should-any OR empty) AND NOT must_not`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, condition: Condition) -> Self {
        self.must.push(condition);
        self
    }

    pub fn should(mut self, condition: Condition) -> Self {
        self.should.push(condition);
        self
    }

    pub fn must_not(mut self, condition: Condition) -> Self {
        self.must_not.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty() && self.must_not.is_empty()
    }

    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        if !self.must.iter().all(|c| c.matches(metadata)) {
            return false;
        }
        if !self.should.is_empty() && !self.should.iter().any(|c| c.matches(metadata)) {
            return false;
        }
        !self.must_not.iter().any(|c| c.matches(metadata))
    }
}

/// Compare two JSON values: numeric when both sides parse as numbers,
/// lexicographic on their string renderings otherwise.
fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (value_number(actual), value_number(expected)) {
        return a.partial_cmp(&b);
    }
    Some(value_text(actual).cmp(&value_text(expected)))
}

pub(crate) fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn list_values(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn must_is_conjunction() {
        let bag = meta(&[("kind", json!("report")), ("pages", json!(12))]);
        let both = Filter::new()
            .must(Condition::eq("kind", "report"))
            .must(Condition::gt("pages", 10));
        assert!(both.matches(&bag));

        let one_fails = Filter::new()
            .must(Condition::eq("kind", "report"))
            .must(Condition::gt("pages", 20));
        assert!(!one_fails.matches(&bag));
    }

    #[test]
    fn should_is_disjunction_and_empty_passes() {
        let bag = meta(&[("lang", json!("en"))]);
        let any = Filter::new()
            .should(Condition::eq("lang", "de"))
            .should(Condition::eq("lang", "en"));
        assert!(any.matches(&bag));

        let none = Filter::new()
            .should(Condition::eq("lang", "de"))
            .should(Condition::eq("lang", "fr"));
        assert!(!none.matches(&bag));

        assert!(Filter::new().matches(&bag));
    }

    #[test]
    fn must_not_excludes() {
        let bag = meta(&[("status", json!("draft"))]);
        let filter = Filter::new().must_not(Condition::eq("status", "draft"));
        assert!(!filter.matches(&bag));

        let filter = Filter::new().must_not(Condition::eq("status", "final"));
        assert!(filter.matches(&bag));
    }

    #[test]
    fn numeric_coercion_against_string_fields() {
        // "42" as a string still compares numerically against 40.
        let bag = meta(&[("count", json!("42"))]);
        assert!(Condition::gt("count", 40).matches(&bag));
        assert!(Condition::lte("count", 42).matches(&bag));
        assert!(!Condition::lt("count", 42).matches(&bag));
    }

    #[test]
    fn non_numeric_falls_back_to_lexicographic() {
        let bag = meta(&[("version", json!("v10"))]);
        // Lexicographic: "v10" < "v9".
        assert!(Condition::lt("version", "v9").matches(&bag));
    }

    #[test]
    fn in_and_nin() {
        let bag = meta(&[("source", json!("upload"))]);
        assert!(Condition::is_in("source", vec![json!("crawl"), json!("upload")]).matches(&bag));
        assert!(!Condition::not_in("source", vec![json!("upload")]).matches(&bag));
        // Missing key fails both.
        assert!(!Condition::is_in("missing", vec![json!("x")]).matches(&bag));
        assert!(!Condition::not_in("missing", vec![json!("x")]).matches(&bag));
    }

    #[test]
    fn exists_ignores_value() {
        let bag = meta(&[("flag", json!(null))]);
        assert!(Condition::exists("flag").matches(&bag));
        assert!(!Condition::exists("other").matches(&bag));
    }

    #[test]
    fn contains_is_case_insensitive() {
        let bag = meta(&[("title", json!("Quarterly Report"))]);
        assert!(Condition::contains("title", "quarterly").matches(&bag));
        assert!(Condition::contains("title", "REPORT").matches(&bag));
        assert!(!Condition::contains("title", "annual").matches(&bag));
    }

    #[test]
    fn filter_round_trips_through_json() {
        let filter = Filter::new()
            .must(Condition::eq("kind", "report"))
            .must_not(Condition::exists("deleted_at"));
        let encoded = serde_json::to_string(&filter).unwrap();
        let decoded: Filter = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, filter);
    }
}
