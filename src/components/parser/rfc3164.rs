//! RFC 3164 (BSD syslog) parser.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};

use crate::components::common::u64_option;
use crate::components::{Component, Options, Parser, Record};

const DEFAULT_MAX_MESSAGE_LENGTH: u64 = 1024;

/// Parse classic `<PRI>timestamp host tag: message` syslog lines.
///
/// The priority is split into `facility` and `severity`; lines that do not
/// match the grammar, exceed `max_message_length` or carry an out-of-range
/// priority are dropped rather than failed — a syslog socket sees plenty of
/// junk and one bad datagram must not disturb the flow.
pub struct Rfc3164Parser {
    with_tag: Regex,
    without_tag: Regex,
    max_message_length: usize,
}

impl Rfc3164Parser {
    pub fn from_options(options: &Options) -> anyhow::Result<Self> {
        let max_message_length =
            u64_option(options, "max_message_length", DEFAULT_MAX_MESSAGE_LENGTH)? as usize;
        Ok(Self {
            with_tag: Regex::new(
                r"^<(\d{1,3})>(\w{3}\s+\d{1,2}\s\d{2}:\d{2}:\d{2})\s(\S+)\s([^:\s\[]+(?:\[\d+\])?):\s(.*)$",
            )
            .expect("static pattern"),
            without_tag: Regex::new(
                r"^<(\d{1,3})>(\w{3}\s+\d{1,2}\s\d{2}:\d{2}:\d{2})\s(\S+)\s(.*)$",
            )
            .expect("static pattern"),
            max_message_length,
        })
    }
}

impl Component for Rfc3164Parser {}

#[async_trait]
impl Parser for Rfc3164Parser {
    async fn parse(&mut self, line: &str) -> anyhow::Result<Option<Record>> {
        if line.len() > self.max_message_length {
            tracing::warn!(
                "rfc3164: message exceeds maximum length ({} > {})",
                line.len(),
                self.max_message_length
            );
            return Ok(None);
        }

        let (priority, timestamp, host, tag, message) =
            if let Some(captures) = self.with_tag.captures(line) {
                (
                    captures[1].to_string(),
                    captures[2].to_string(),
                    captures[3].to_string(),
                    Some(captures[4].to_string()),
                    captures[5].to_string(),
                )
            } else if let Some(captures) = self.without_tag.captures(line) {
                (
                    captures[1].to_string(),
                    captures[2].to_string(),
                    captures[3].to_string(),
                    None,
                    captures[4].to_string(),
                )
            } else {
                tracing::debug!("rfc3164: message does not match any known format");
                return Ok(None);
            };

        let priority: u16 = match priority.parse() {
            Ok(value) if value <= 191 => value,
            _ => {
                tracing::warn!("rfc3164: invalid priority value '{priority}'");
                return Ok(None);
            }
        };

        let mut record = Record::new();
        record.insert("facility".to_string(), json!(priority >> 3));
        record.insert("severity".to_string(), json!(priority & 0x7));
        record.insert("timestamp".to_string(), Value::String(timestamp));
        record.insert("host".to_string(), Value::String(host));
        if let Some(tag) = tag {
            record.insert("tag".to_string(), Value::String(tag));
        }
        record.insert("message".to_string(), Value::String(message));
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn parse(line: &str) -> Option<Record> {
        Rfc3164Parser::from_options(&Options::new())
            .unwrap()
            .parse(line)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn parses_tagged_messages() {
        let record = parse("<34>Oct 11 22:14:15 mymachine su: 'su root' failed on /dev/pts/8")
            .await
            .unwrap();
        assert_eq!(record.get("facility").unwrap(), &json!(4));
        assert_eq!(record.get("severity").unwrap(), &json!(2));
        assert_eq!(record.get("host").unwrap(), &json!("mymachine"));
        assert_eq!(record.get("tag").unwrap(), &json!("su"));
        assert_eq!(
            record.get("message").unwrap(),
            &json!("'su root' failed on /dev/pts/8")
        );
    }

    #[tokio::test]
    async fn parses_pid_suffixed_tags() {
        let record = parse("<13>Feb  5 17:32:18 web01 nginx[1234]: GET /health 200")
            .await
            .unwrap();
        assert_eq!(record.get("tag").unwrap(), &json!("nginx[1234]"));
        assert_eq!(record.get("message").unwrap(), &json!("GET /health 200"));
    }

    #[tokio::test]
    async fn untagged_messages_still_parse() {
        let record = parse("<13>Feb  5 17:32:18 web01 plain message body")
            .await
            .unwrap();
        assert!(record.get("tag").is_none());
        assert_eq!(
            record.get("message").unwrap(),
            &json!("plain message body")
        );
    }

    #[tokio::test]
    async fn junk_and_bad_priority_are_dropped() {
        assert!(parse("not syslog at all").await.is_none());
        assert!(
            parse("<999>Oct 11 22:14:15 mymachine su: hm")
                .await
                .is_none()
        );
    }
}
