//! JSON parser: one JSON object per line.

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde_json::Value;

use crate::components::{Component, Options, Parser, Record};

/// Parse each input line as a JSON object. Blank lines are dropped without
/// error; malformed JSON and non-object values are transient parse errors.
pub struct JsonParser;

impl JsonParser {
    pub fn from_options(_options: &Options) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

impl Component for JsonParser {}

#[async_trait]
impl Parser for JsonParser {
    async fn parse(&mut self, line: &str) -> anyhow::Result<Option<Record>> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(line).context("invalid JSON record")?;
        match value {
            Value::Object(record) => Ok(Some(record)),
            other => bail!("expected a JSON object, got {}", type_name(&other)),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn parses_objects() {
        let mut parser = JsonParser::from_options(&Options::new()).unwrap();
        let record = parser
            .parse(r#"{"message": "hi", "level": "info"}"#)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.get("message").unwrap(), &json!("hi"));
    }

    #[tokio::test]
    async fn blank_lines_are_dropped_silently() {
        let mut parser = JsonParser::from_options(&Options::new()).unwrap();
        assert!(parser.parse("   ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_and_non_object_input_are_errors() {
        let mut parser = JsonParser::from_options(&Options::new()).unwrap();
        assert!(parser.parse("{not json").await.is_err());
        assert!(parser.parse("[1, 2]").await.is_err());
    }
}
