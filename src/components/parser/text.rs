//! Plain text parser: wraps the raw line in a record.

use async_trait::async_trait;
use serde_json::Value;

use crate::components::{Component, Options, Parser, Record};

/// Wrap the raw line as `{"message": <line>}` with trailing newlines
/// stripped.
pub struct TextParser;

impl TextParser {
    pub fn from_options(_options: &Options) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

impl Component for TextParser {}

#[async_trait]
impl Parser for TextParser {
    async fn parse(&mut self, line: &str) -> anyhow::Result<Option<Record>> {
        let mut record = Record::new();
        record.insert(
            "message".to_string(),
            Value::String(line.trim_end_matches(['\r', '\n']).to_string()),
        );
        Ok(Some(record))
    }
}
