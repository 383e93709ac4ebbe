//! Shared option-parsing and rendering helpers for the built-in components.

use anyhow::anyhow;
use serde_json::Value;

use crate::config::Options;

/// Fetch a required option, with an error naming the component kind that
/// wanted it.
pub(crate) fn required<'a>(
    options: &'a Options,
    key: &str,
    component: &str,
) -> anyhow::Result<&'a str> {
    options
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{component} requires a '{key}' option"))
}

/// Interpret an option as a boolean. Recognises `1`, `true`, `yes` and `on`
/// (case-insensitive); anything else is false.
pub(crate) fn bool_option(options: &Options, key: &str, default: bool) -> bool {
    options
        .get(key)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

/// Parse a numeric option strictly: a present-but-unparsable value is a
/// construction error, not a silent default.
pub(crate) fn u64_option(options: &Options, key: &str, default: u64) -> anyhow::Result<u64> {
    match options.get(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| anyhow!("invalid value '{value}' for option '{key}'")),
    }
}

/// Render a payload as a single output line: strings pass through verbatim,
/// anything else is serialised as JSON.
pub(crate) fn render_line(rendered: &Value) -> anyhow::Result<String> {
    match rendered {
        Value::String(text) => Ok(text.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(pairs: &[(&str, &str)]) -> Options {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn bool_option_recognises_truthy_spellings() {
        let opts = options(&[("a", "Yes"), ("b", "0"), ("c", "on")]);
        assert!(bool_option(&opts, "a", false));
        assert!(!bool_option(&opts, "b", true));
        assert!(bool_option(&opts, "c", false));
        assert!(bool_option(&opts, "missing", true));
    }

    #[test]
    fn u64_option_rejects_garbage() {
        let opts = options(&[("n", "12"), ("bad", "dozen")]);
        assert_eq!(u64_option(&opts, "n", 0).unwrap(), 12);
        assert_eq!(u64_option(&opts, "missing", 7).unwrap(), 7);
        assert!(u64_option(&opts, "bad", 0).is_err());
    }

    #[test]
    fn render_line_passes_strings_through() {
        assert_eq!(render_line(&json!("plain")).unwrap(), "plain");
        assert_eq!(render_line(&json!({"a": 1})).unwrap(), r#"{"a":1}"#);
    }
}
