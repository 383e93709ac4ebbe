//! Field filter: a configurable predicate over one record field.
//!
//! One component covers the whole comparison family; the operator is picked
//! by the `op` option:
//!
//! | op            | options            | keeps the record when |
//! |---------------|--------------------|------------------------|
//! | `eq` (default), `ne`, `gt`, `ge`, `lt`, `le` | `value` | the field compares accordingly |
//! | `contains`    | `value`            | a string field contains the substring, or an array field contains the element |
//! | `matches`     | `pattern` (or `value`) | the regex matches the field's string form |
//! | `in_range`    | `min` and/or `max` | the numeric field lies inside the bounds |
//! | `type_check`  | `value`            | the field's JSON type is the named one |
//!
//! Comparisons are typed against the record value: numbers compare
//! numerically, strings lexicographically, booleans by truthiness of the
//! configured value. A missing field rejects the record (except under `ne`,
//! where absence differs from every value).

use std::cmp::Ordering;

use anyhow::{anyhow, bail};
use regex::Regex;
use serde_json::Value;

use async_trait::async_trait;

use crate::components::common::required;
use crate::components::{Component, Filter, Options, Record};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FieldOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    Matches,
    InRange,
    TypeCheck,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JsonType {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    fn parse(name: &str) -> anyhow::Result<Self> {
        Ok(match name {
            "null" => JsonType::Null,
            "boolean" | "bool" => JsonType::Boolean,
            "number" => JsonType::Number,
            "string" => JsonType::String,
            "array" => JsonType::Array,
            "object" => JsonType::Object,
            _ => bail!("unknown type '{name}' for type_check filter"),
        })
    }

    fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (JsonType::Null, Value::Null)
                | (JsonType::Boolean, Value::Bool(_))
                | (JsonType::Number, Value::Number(_))
                | (JsonType::String, Value::String(_))
                | (JsonType::Array, Value::Array(_))
                | (JsonType::Object, Value::Object(_))
        )
    }
}

pub struct FieldFilter {
    field: String,
    op: FieldOp,
    expected: Option<String>,
    pattern: Option<Regex>,
    min: Option<f64>,
    max: Option<f64>,
    type_check: Option<JsonType>,
}

impl FieldFilter {
    pub fn from_options(options: &Options) -> anyhow::Result<Self> {
        let field = required(options, "field", "field filter")?.to_string();

        let op = match options.get("op").map(String::as_str).unwrap_or("eq") {
            "eq" => FieldOp::Eq,
            "ne" => FieldOp::Ne,
            "gt" => FieldOp::Gt,
            "ge" => FieldOp::Ge,
            "lt" => FieldOp::Lt,
            "le" => FieldOp::Le,
            "contains" => FieldOp::Contains,
            "matches" => FieldOp::Matches,
            "in_range" => FieldOp::InRange,
            "type_check" => FieldOp::TypeCheck,
            other => bail!("unsupported filter operator '{other}'"),
        };

        let expected = options.get("value").cloned();

        let mut pattern = None;
        if op == FieldOp::Matches {
            let source = options
                .get("pattern")
                .or(options.get("value"))
                .ok_or_else(|| anyhow!("matches filter requires 'pattern' or 'value'"))?;
            pattern = Some(Regex::new(source)?);
        }

        let mut min = None;
        let mut max = None;
        if op == FieldOp::InRange {
            min = parse_bound(options, "min")?;
            max = parse_bound(options, "max")?;
            if min.is_none() && max.is_none() {
                bail!("in_range filter requires 'min' and/or 'max'");
            }
        }

        let mut type_check = None;
        if op == FieldOp::TypeCheck {
            let name = expected
                .as_deref()
                .ok_or_else(|| anyhow!("type_check filter requires a 'value' option"))?;
            type_check = Some(JsonType::parse(name)?);
        }

        if matches!(
            op,
            FieldOp::Eq
                | FieldOp::Ne
                | FieldOp::Gt
                | FieldOp::Ge
                | FieldOp::Lt
                | FieldOp::Le
                | FieldOp::Contains
        ) && expected.is_none()
        {
            bail!("'{}' filter requires a 'value' option", op_name(op));
        }

        Ok(Self {
            field,
            op,
            expected,
            pattern,
            min,
            max,
            type_check,
        })
    }

    fn check(&self, value: Option<&Value>) -> bool {
        match self.op {
            FieldOp::Eq => compare(value, self.expected.as_deref()) == Some(Ordering::Equal),
            FieldOp::Ne => compare(value, self.expected.as_deref()) != Some(Ordering::Equal),
            FieldOp::Gt => compare(value, self.expected.as_deref()) == Some(Ordering::Greater),
            FieldOp::Ge => matches!(
                compare(value, self.expected.as_deref()),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FieldOp::Lt => compare(value, self.expected.as_deref()) == Some(Ordering::Less),
            FieldOp::Le => matches!(
                compare(value, self.expected.as_deref()),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FieldOp::Contains => {
                let Some(needle) = self.expected.as_deref() else {
                    return false;
                };
                match value {
                    Some(Value::String(text)) => text.contains(needle),
                    Some(Value::Array(items)) => items.iter().any(|item| match item {
                        Value::String(text) => text == needle,
                        other => other.to_string() == needle,
                    }),
                    _ => false,
                }
            }
            FieldOp::Matches => {
                let (Some(regex), Some(value)) = (&self.pattern, value) else {
                    return false;
                };
                let text = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                regex.is_match(&text)
            }
            FieldOp::InRange => {
                let Some(number) = value.and_then(Value::as_f64) else {
                    return false;
                };
                self.min.is_none_or(|min| number >= min)
                    && self.max.is_none_or(|max| number <= max)
            }
            FieldOp::TypeCheck => match (self.type_check, value) {
                (Some(expected), Some(value)) => expected.matches(value),
                _ => false,
            },
        }
    }
}

/// Compare a record value against the configured string, using the record
/// value's own type. `None` means the two are incomparable (missing field or
/// type mismatch).
fn compare(value: Option<&Value>, raw: Option<&str>) -> Option<Ordering> {
    let (value, raw) = (value?, raw?);
    match value {
        Value::Number(number) => {
            let lhs = number.as_f64()?;
            let rhs: f64 = raw.trim().parse().ok()?;
            lhs.partial_cmp(&rhs)
        }
        Value::String(text) => Some(text.as_str().cmp(raw)),
        Value::Bool(flag) => {
            let rhs = matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
            Some(flag.cmp(&rhs))
        }
        _ => None,
    }
}

fn op_name(op: FieldOp) -> &'static str {
    match op {
        FieldOp::Eq => "eq",
        FieldOp::Ne => "ne",
        FieldOp::Gt => "gt",
        FieldOp::Ge => "ge",
        FieldOp::Lt => "lt",
        FieldOp::Le => "le",
        FieldOp::Contains => "contains",
        FieldOp::Matches => "matches",
        FieldOp::InRange => "in_range",
        FieldOp::TypeCheck => "type_check",
    }
}

fn parse_bound(options: &Options, key: &str) -> anyhow::Result<Option<f64>> {
    match options.get(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("invalid value '{value}' for option '{key}'")),
    }
}

impl Component for FieldFilter {}

#[async_trait]
impl Filter for FieldFilter {
    async fn allow(&self, record: &Record) -> anyhow::Result<bool> {
        Ok(self.check(record.get(&self.field)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(pairs: &[(&str, &str)]) -> FieldFilter {
        let options: Options = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FieldFilter::from_options(&options).unwrap()
    }

    fn record(value: Value) -> Record {
        let mut record = Record::new();
        record.insert("level".to_string(), value);
        record
    }

    #[tokio::test]
    async fn eq_compares_by_record_type() {
        let by_string = filter(&[("field", "level"), ("value", "info")]);
        assert!(by_string.allow(&record(json!("info"))).await.unwrap());
        assert!(!by_string.allow(&record(json!("debug"))).await.unwrap());

        let by_number = filter(&[("field", "level"), ("value", "3")]);
        assert!(by_number.allow(&record(json!(3))).await.unwrap());
        assert!(by_number.allow(&record(json!(3.0))).await.unwrap());
        assert!(!by_number.allow(&record(json!(4))).await.unwrap());

        let by_bool = filter(&[("field", "level"), ("value", "yes")]);
        assert!(by_bool.allow(&record(json!(true))).await.unwrap());
    }

    #[tokio::test]
    async fn missing_field_rejects_except_under_ne() {
        let eq = filter(&[("field", "absent"), ("value", "x")]);
        assert!(!eq.allow(&record(json!("info"))).await.unwrap());

        let ne = filter(&[("field", "absent"), ("op", "ne"), ("value", "x")]);
        assert!(ne.allow(&record(json!("info"))).await.unwrap());
    }

    #[tokio::test]
    async fn ordering_operators() {
        let gt = filter(&[("field", "level"), ("op", "gt"), ("value", "5")]);
        assert!(gt.allow(&record(json!(7))).await.unwrap());
        assert!(!gt.allow(&record(json!(5))).await.unwrap());

        let le = filter(&[("field", "level"), ("op", "le"), ("value", "5")]);
        assert!(le.allow(&record(json!(5))).await.unwrap());
        assert!(!le.allow(&record(json!(6))).await.unwrap());
    }

    #[tokio::test]
    async fn contains_on_strings_and_arrays() {
        let substring = filter(&[("field", "level"), ("op", "contains"), ("value", "ERR")]);
        assert!(substring.allow(&record(json!("ERROR: boom"))).await.unwrap());
        assert!(!substring.allow(&record(json!("fine"))).await.unwrap());

        let membership = filter(&[("field", "level"), ("op", "contains"), ("value", "b")]);
        assert!(membership.allow(&record(json!(["a", "b"]))).await.unwrap());
        assert!(!membership.allow(&record(json!(["a", "c"]))).await.unwrap());
    }

    #[tokio::test]
    async fn matches_uses_the_pattern() {
        let regex = filter(&[
            ("field", "level"),
            ("op", "matches"),
            ("pattern", "^err(or)?$"),
        ]);
        assert!(regex.allow(&record(json!("error"))).await.unwrap());
        assert!(!regex.allow(&record(json!("warning"))).await.unwrap());
    }

    #[tokio::test]
    async fn in_range_checks_bounds() {
        let range = filter(&[
            ("field", "level"),
            ("op", "in_range"),
            ("min", "2"),
            ("max", "4"),
        ]);
        assert!(range.allow(&record(json!(3))).await.unwrap());
        assert!(!range.allow(&record(json!(5))).await.unwrap());
        assert!(!range.allow(&record(json!("3?"))).await.unwrap());

        let open_ended = filter(&[("field", "level"), ("op", "in_range"), ("min", "10")]);
        assert!(open_ended.allow(&record(json!(11))).await.unwrap());
    }

    #[tokio::test]
    async fn type_check_names_json_types() {
        let is_number = filter(&[("field", "level"), ("op", "type_check"), ("value", "number")]);
        assert!(is_number.allow(&record(json!(1))).await.unwrap());
        assert!(!is_number.allow(&record(json!("1"))).await.unwrap());
    }

    #[test]
    fn construction_validates_options() {
        assert!(FieldFilter::from_options(&Options::new()).is_err());

        let bad_op: Options = [
            ("field".to_string(), "x".to_string()),
            ("op".to_string(), "spaceship".to_string()),
        ]
        .into();
        assert!(FieldFilter::from_options(&bad_op).is_err());

        let bad_pattern: Options = [
            ("field".to_string(), "x".to_string()),
            ("op".to_string(), "matches".to_string()),
            ("pattern".to_string(), "(unclosed".to_string()),
        ]
        .into();
        assert!(FieldFilter::from_options(&bad_pattern).is_err());

        let empty_range: Options = [
            ("field".to_string(), "x".to_string()),
            ("op".to_string(), "in_range".to_string()),
        ]
        .into();
        assert!(FieldFilter::from_options(&empty_range).is_err());

        let contains_without_value: Options = [
            ("field".to_string(), "x".to_string()),
            ("op".to_string(), "contains".to_string()),
        ]
        .into();
        assert!(FieldFilter::from_options(&contains_without_value).is_err());
    }
}
