//! Text output format: renders records through a `{field}` template.

use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value;

use crate::components::{Component, Options, OutputFormat, Record};

const DEFAULT_TEMPLATE: &str = "{message}";

/// Substitute `{field}` placeholders with record values. `{{` and `}}`
/// escape literal braces. A placeholder naming a field the record does not
/// carry is an error; the flow drops that record and moves on.
pub struct TextFormat {
    template: String,
}

impl TextFormat {
    pub fn from_options(options: &Options) -> anyhow::Result<Self> {
        let template = options
            .get("template")
            .cloned()
            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());
        Ok(Self { template })
    }

    fn render(&self, record: &Record) -> anyhow::Result<String> {
        let mut out = String::with_capacity(self.template.len());
        let mut chars = self.template.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => bail!("unclosed placeholder in template '{}'", self.template),
                        }
                    }
                    match record.get(&name) {
                        Some(Value::String(text)) => out.push_str(text),
                        Some(other) => out.push_str(&other.to_string()),
                        None => bail!("template field '{name}' missing from record"),
                    }
                }
                ch => out.push(ch),
            }
        }
        Ok(out)
    }
}

impl Component for TextFormat {}

#[async_trait]
impl OutputFormat for TextFormat {
    async fn format(&self, record: &Record) -> anyhow::Result<Value> {
        Ok(Value::String(self.render(record)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn format(template: &str) -> TextFormat {
        let options: Options = [("template".to_string(), template.to_string())].into();
        TextFormat::from_options(&options).unwrap()
    }

    fn record() -> Record {
        let mut record = Record::new();
        record.insert("message".to_string(), json!("boom"));
        record.insert("severity".to_string(), json!(2));
        record
    }

    #[tokio::test]
    async fn substitutes_fields() {
        let rendered = format("[{severity}] {message}")
            .format(&record())
            .await
            .unwrap();
        assert_eq!(rendered, json!("[2] boom"));
    }

    #[tokio::test]
    async fn escaped_braces_are_literal() {
        let rendered = format("{{{message}}}").format(&record()).await.unwrap();
        assert_eq!(rendered, json!("{boom}"));
    }

    #[tokio::test]
    async fn missing_field_is_an_error() {
        assert!(format("{absent}").format(&record()).await.is_err());
        assert!(format("{oops").format(&record()).await.is_err());
    }
}
