//! JSON output format.

use async_trait::async_trait;
use serde_json::Value;

use crate::components::common::u64_option;
use crate::components::{Component, Options, OutputFormat, Record};

/// Serialise the record as a JSON string — compact by default, pretty when
/// `indent` is set to a non-zero value.
pub struct JsonFormat {
    pretty: bool,
}

impl JsonFormat {
    pub fn from_options(options: &Options) -> anyhow::Result<Self> {
        let pretty = u64_option(options, "indent", 0)? > 0;
        Ok(Self { pretty })
    }
}

impl Component for JsonFormat {}

#[async_trait]
impl OutputFormat for JsonFormat {
    async fn format(&self, record: &Record) -> anyhow::Result<Value> {
        let text = if self.pretty {
            serde_json::to_string_pretty(record)?
        } else {
            serde_json::to_string(record)?
        };
        Ok(Value::String(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Record {
        let mut record = Record::new();
        record.insert("message".to_string(), json!("hi"));
        record.insert("level".to_string(), json!("info"));
        record
    }

    #[tokio::test]
    async fn compact_by_default() {
        let format = JsonFormat::from_options(&Options::new()).unwrap();
        let rendered = format.format(&record()).await.unwrap();
        assert_eq!(rendered, json!(r#"{"level":"info","message":"hi"}"#));
    }

    #[tokio::test]
    async fn indent_switches_to_pretty() {
        let options: Options = [("indent".to_string(), "2".to_string())].into();
        let format = JsonFormat::from_options(&options).unwrap();
        let rendered = format.format(&record()).await.unwrap();
        assert!(rendered.as_str().unwrap().contains("\n  \"level\""));
    }

    #[test]
    fn indent_must_be_numeric() {
        let options: Options = [("indent".to_string(), "wide".to_string())].into();
        assert!(JsonFormat::from_options(&options).is_err());
    }
}
