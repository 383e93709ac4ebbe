//! Configuration Loader
//!
//! Loads the INI-style configuration that declares flows, channels and
//! settings. The grammar is deliberately small: `[section]` headers,
//! `key = value` options, `#`/`;` comments, case-sensitive keys, no value
//! interpolation. Option names are dotted paths and the first segment routes
//! the option to the right component inside a flow section.
//!
//! Recognised sections:
//!
//! - `[flow.<name>]` — one pipeline. `input.type`, `parser.type` and
//!   `output.type` are required; `output.format`, `format.*`, `channel` and
//!   `filter[.<name>].*` are optional.
//! - `[channel.<name>]` — a reliability queue (`maxsize`, `ack_timeout`,
//!   `retry_limit`).
//! - `[settings]` — free-form global key/value pairs.
//! - `[use]` — `include = <glob>` pulls additional files, read in sorted
//!   order and merged into the same document.
//!
//! Unknown sections, and unknown options inside recognised sections, are
//! ignored for forward compatibility.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::config::types::{
    ChannelConfig, ComponentConfig, FilterConfig, FilterStage, FlowConfig, Options, RuntimeConfig,
    default_ack_timeout, default_maxsize, default_retry_limit,
};

/// Errors raised while loading or validating a configuration.
///
/// Every variant names the section (and option, where one exists) that
/// caused the failure, so the operator can find the offending line without
/// re-reading the whole file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{source_name}:{line}: cannot parse line: {text}")]
    Syntax {
        source_name: String,
        line: usize,
        text: String,
    },

    #[error("invalid include pattern '{pattern}' in [use]")]
    IncludePattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("missing required option '{option}' in [{section}]")]
    MissingOption { section: String, option: String },

    #[error("invalid value '{value}' for option '{option}' in [{section}]")]
    InvalidValue {
        section: String,
        option: String,
        value: String,
    },

    #[error("filter '{name}' in flow '{flow}' is missing the 'type' option")]
    FilterMissingType { flow: String, name: String },

    #[error("no flow sections were defined in the configuration")]
    NoFlows,
}

/// One `[section]` of the parsed document. Options keep their declaration
/// order; re-assigning a key (e.g. from an included file) overwrites in
/// place.
#[derive(Debug, Default)]
struct IniSection {
    name: String,
    options: Vec<(String, String)>,
}

impl IniSection {
    fn set(&mut self, key: String, value: String) {
        match self.options.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.options.push((key, value)),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }
}

/// The whole configuration document, sections in declaration order.
#[derive(Debug, Default)]
struct IniDocument {
    sections: Vec<IniSection>,
}

impl IniDocument {
    fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|section| section.name == name)
    }

    fn section_index(&mut self, name: &str) -> usize {
        if let Some(index) = self.sections.iter().position(|s| s.name == name) {
            return index;
        }
        self.sections.push(IniSection {
            name: name.to_string(),
            ..IniSection::default()
        });
        self.sections.len() - 1
    }

    /// Scan `text` into the document, merging with whatever is already
    /// there. `source_name` only feeds error messages.
    fn scan(&mut self, source_name: &str, text: &str) -> Result<(), ConfigError> {
        let mut current: Option<usize> = None;
        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                current = Some(self.section_index(header.trim()));
                continue;
            }
            let (key, value) = match (line.split_once('='), current) {
                (Some((key, value)), Some(_)) => (key.trim(), value.trim()),
                _ => {
                    return Err(ConfigError::Syntax {
                        source_name: source_name.to_string(),
                        line: number + 1,
                        text: line.to_string(),
                    });
                }
            };
            let index = current.expect("checked above");
            self.sections[index].set(key.to_string(), value.to_string());
        }
        Ok(())
    }
}

/// Loads configuration files into a validated [`RuntimeConfig`].
#[derive(Debug, Default)]
pub struct ConfigLoader {
    base_dir: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve include globs against `dir` instead of the root config
    /// file's parent directory.
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }

    /// Load and validate the configuration rooted at `path`, expanding any
    /// `[use] include` directive.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<RuntimeConfig, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut document = IniDocument::default();
        document.scan(&path.display().to_string(), &text)?;

        let root_dir = match &self.base_dir {
            Some(dir) => dir.clone(),
            None => path.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        self.load_includes(&mut document, &root_dir)?;

        parse_document(&document)
    }

    /// Parse configuration from a string. Include directives are not
    /// expanded; primarily useful in tests.
    pub fn load_str(&self, text: &str) -> Result<RuntimeConfig, ConfigError> {
        let mut document = IniDocument::default();
        document.scan("<string>", text)?;
        parse_document(&document)
    }

    fn load_includes(
        &self,
        document: &mut IniDocument,
        root_dir: &Path,
    ) -> Result<(), ConfigError> {
        let Some(pattern) = document
            .section("use")
            .and_then(|section| section.get("include"))
            .map(str::to_string)
        else {
            return Ok(());
        };

        let full_pattern = root_dir.join(&pattern).display().to_string();
        let entries = glob::glob(&full_pattern).map_err(|source| ConfigError::IncludePattern {
            pattern: pattern.clone(),
            source,
        })?;

        let mut includes: Vec<PathBuf> = entries.filter_map(Result::ok).collect();
        includes.sort();

        for include in includes {
            tracing::debug!("including configuration file {}", include.display());
            let text = std::fs::read_to_string(&include).map_err(|source| ConfigError::Read {
                path: include.clone(),
                source,
            })?;
            document.scan(&include.display().to_string(), &text)?;
        }
        Ok(())
    }
}

fn parse_document(document: &IniDocument) -> Result<RuntimeConfig, ConfigError> {
    let mut channels = parse_channels(document)?;
    let flows = parse_flows(document, &mut channels)?;
    if flows.is_empty() {
        return Err(ConfigError::NoFlows);
    }

    let settings: Options = document
        .section("settings")
        .map(|section| section.options.iter().cloned().collect())
        .unwrap_or_default();

    Ok(RuntimeConfig {
        flows,
        channels,
        settings,
    })
}

fn parse_channels(document: &IniDocument) -> Result<HashMap<String, ChannelConfig>, ConfigError> {
    let mut channels = HashMap::new();
    for section in &document.sections {
        let Some(name) = section.name.strip_prefix("channel.") else {
            continue;
        };

        let maxsize = match section.get("maxsize") {
            None => default_maxsize(),
            Some(value) => match value.parse::<usize>() {
                Ok(parsed) if parsed > 0 => parsed,
                _ => {
                    return Err(invalid_value(&section.name, "maxsize", value));
                }
            },
        };
        let ack_timeout = match section.get("ack_timeout") {
            None => default_ack_timeout(),
            Some(value) => match value.parse::<f64>() {
                Ok(seconds) if seconds > 0.0 && seconds.is_finite() => {
                    Duration::from_secs_f64(seconds)
                }
                _ => {
                    return Err(invalid_value(&section.name, "ack_timeout", value));
                }
            },
        };
        let retry_limit = match section.get("retry_limit") {
            None => default_retry_limit(),
            Some(value) => value
                .parse::<u32>()
                .map_err(|_| invalid_value(&section.name, "retry_limit", value))?,
        };

        channels.insert(
            name.to_string(),
            ChannelConfig {
                name: name.to_string(),
                maxsize,
                ack_timeout,
                retry_limit,
            },
        );
    }
    Ok(channels)
}

fn parse_flows(
    document: &IniDocument,
    channels: &mut HashMap<String, ChannelConfig>,
) -> Result<Vec<FlowConfig>, ConfigError> {
    let mut flows = Vec::new();
    for section in &document.sections {
        let Some(name) = section.name.strip_prefix("flow.") else {
            continue;
        };

        let input = component_from_section(section, "input")?;
        let parser = component_from_section(section, "parser")?;
        let output = component_from_section(section, "output")?;

        let output_format = section.get("output.format").map(str::to_string);
        let format_options: Options = section
            .options
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix("format.")
                    .map(|stripped| (stripped.to_string(), value.clone()))
            })
            .collect();

        let channel = section
            .get("channel")
            .or_else(|| section.get("channel.name"))
            .map(str::to_string);
        if let Some(channel_name) = &channel {
            // A referenced-but-undeclared channel gets default sizing.
            channels
                .entry(channel_name.clone())
                .or_insert_with(|| ChannelConfig::named(channel_name.clone()));
        }

        let filters = parse_filters(name, section)?;

        flows.push(FlowConfig {
            name: name.to_string(),
            input,
            parser,
            output,
            output_format,
            format_options,
            channel,
            filters,
        });
    }
    Ok(flows)
}

/// Collect `<prefix>.*` options into a component declaration.
/// `<prefix>.type` is required and routed to the type field; `output.format`
/// belongs to the format component and is excluded from the output's options.
fn component_from_section(
    section: &IniSection,
    prefix: &str,
) -> Result<ComponentConfig, ConfigError> {
    let type_key = format!("{prefix}.type");
    let Some(type_name) = section.get(&type_key) else {
        return Err(ConfigError::MissingOption {
            section: section.name.clone(),
            option: type_key,
        });
    };

    let dotted = format!("{prefix}.");
    let options: Options = section
        .options
        .iter()
        .filter(|(key, _)| *key != type_key && !(prefix == "output" && key == "output.format"))
        .filter_map(|(key, value)| {
            key.strip_prefix(&dotted)
                .map(|stripped| (stripped.to_string(), value.clone()))
        })
        .collect();

    Ok(ComponentConfig {
        r#type: type_name.to_string(),
        options,
    })
}

/// Collect `filter[.<name>].<opt>` declarations. A bare `filter.<opt>`
/// belongs to the filter named "default". Emitted sorted by filter name.
fn parse_filters(flow_name: &str, section: &IniSection) -> Result<Vec<FilterConfig>, ConfigError> {
    let mut declarations: BTreeMap<String, Options> = BTreeMap::new();
    for (key, value) in &section.options {
        let Some(mut remainder) = key.strip_prefix("filter") else {
            continue;
        };
        remainder = remainder.strip_prefix('.').unwrap_or(remainder);
        if remainder.is_empty() {
            continue;
        }
        let (name, option) = match remainder.split_once('.') {
            Some((name, option)) => (name, option),
            None => ("default", remainder),
        };
        declarations
            .entry(name.to_string())
            .or_default()
            .insert(option.to_string(), value.clone());
    }

    let mut filters = Vec::with_capacity(declarations.len());
    for (name, mut options) in declarations {
        let Some(type_name) = options.remove("type") else {
            return Err(ConfigError::FilterMissingType {
                flow: flow_name.to_string(),
                name,
            });
        };
        let stage = match options.remove("stage") {
            None => FilterStage::default(),
            Some(value) => value.parse().map_err(|_| {
                invalid_value(&section.name, &format!("filter.{name}.stage"), &value)
            })?,
        };
        filters.push(FilterConfig {
            name,
            component: ComponentConfig {
                r#type: type_name,
                options,
            },
            stage,
        });
    }
    Ok(filters)
}

fn invalid_value(section: &str, option: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        option: option.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_flows_channels_and_settings() {
        let text = r#"
# root configuration
[flow.main]
input.type = memory
parser.type = text
output.type = memory
output.format = json
format.indent = 2
channel = reliable

[channel.reliable]
maxsize = 256
ack_timeout = 1.5

[settings]
log_level = debug
"#;
        let config = ConfigLoader::new().load_str(text).unwrap();
        assert_eq!(config.flows.len(), 1);

        let flow = config.get_flow("main").unwrap();
        assert_eq!(flow.input.r#type, "memory");
        assert_eq!(flow.output_format.as_deref(), Some("json"));
        assert_eq!(flow.format_options.get("indent").unwrap(), "2");
        assert_eq!(flow.channel.as_deref(), Some("reliable"));

        let channel = config.get_channel("reliable").unwrap();
        assert_eq!(channel.maxsize, 256);
        assert_eq!(channel.ack_timeout, Duration::from_millis(1500));
        assert_eq!(channel.retry_limit, 3);

        assert_eq!(config.settings.get("log_level").unwrap(), "debug");
    }

    #[test]
    fn component_options_are_prefix_stripped() {
        let text = "
[flow.f]
input.type = file
input.path = /var/log/app.log
input.follow = true
parser.type = text
output.type = stdout
output.stream = stderr
";
        let config = ConfigLoader::new().load_str(text).unwrap();
        let flow = config.get_flow("f").unwrap();
        assert_eq!(flow.input.option("path"), Some("/var/log/app.log"));
        assert_eq!(flow.input.option("follow"), Some("true"));
        assert_eq!(flow.output.option("stream"), Some("stderr"));
        // the type key itself never leaks into the options
        assert_eq!(flow.input.option("type"), None);
    }

    #[test]
    fn output_format_does_not_leak_into_output_options() {
        let text = "
[flow.f]
input.type = memory
parser.type = text
output.type = memory
output.format = text
format.template = {message}
";
        let config = ConfigLoader::new().load_str(text).unwrap();
        let flow = config.get_flow("f").unwrap();
        assert_eq!(flow.output.option("format"), None);
        assert_eq!(flow.output_format.as_deref(), Some("text"));
        assert_eq!(flow.format_options.get("template").unwrap(), "{message}");
    }

    #[test]
    fn filters_are_sorted_by_name_and_default_to_parser_stage() {
        let text = "
[flow.f]
input.type = memory
parser.type = json
output.type = memory
filter.zeta.type = field
filter.zeta.field = level
filter.alpha.type = field
filter.alpha.field = host
filter.alpha.stage = output
filter.type = field
filter.field = raw
filter.stage = input
";
        let config = ConfigLoader::new().load_str(text).unwrap();
        let flow = config.get_flow("f").unwrap();
        let names: Vec<&str> = flow.filters.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "default", "zeta"]);
        assert_eq!(flow.filters[0].stage, FilterStage::Output);
        assert_eq!(flow.filters[1].stage, FilterStage::Input);
        assert_eq!(flow.filters[2].stage, FilterStage::Parser);
        // stage/type are consumed, the rest stays with the component
        assert_eq!(flow.filters[1].component.option("field"), Some("raw"));
        assert_eq!(flow.filters[1].component.option("stage"), None);
    }

    #[test]
    fn referenced_channel_is_auto_created_with_defaults() {
        let text = "
[flow.f]
input.type = memory
parser.type = text
output.type = memory
channel = shared
";
        let config = ConfigLoader::new().load_str(text).unwrap();
        let channel = config.get_channel("shared").unwrap();
        assert_eq!(channel.maxsize, 1000);
        assert_eq!(channel.retry_limit, 3);
    }

    #[test]
    fn missing_component_type_is_an_error() {
        let text = "
[flow.broken]
parser.type = text
output.type = memory
";
        let error = ConfigLoader::new().load_str(text).unwrap_err();
        match error {
            ConfigError::MissingOption { section, option } => {
                assert_eq!(section, "flow.broken");
                assert_eq!(option, "input.type");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn filter_without_type_is_an_error() {
        let text = "
[flow.broken]
input.type = memory
parser.type = text
output.type = memory
filter.stage = parser
";
        let error = ConfigLoader::new().load_str(text).unwrap_err();
        assert!(matches!(error, ConfigError::FilterMissingType { .. }));
    }

    #[test]
    fn invalid_stage_is_an_error() {
        let text = "
[flow.broken]
input.type = memory
parser.type = text
output.type = memory
filter.f.type = field
filter.f.field = level
filter.f.stage = sideways
";
        let error = ConfigLoader::new().load_str(text).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn non_numeric_channel_options_are_errors() {
        for option in ["maxsize = many", "ack_timeout = soon", "retry_limit = -1"] {
            let text = format!(
                "
[channel.c]
{option}

[flow.f]
input.type = memory
parser.type = text
output.type = memory
"
            );
            let error = ConfigLoader::new().load_str(&text).unwrap_err();
            assert!(
                matches!(error, ConfigError::InvalidValue { .. }),
                "expected InvalidValue for '{option}'"
            );
        }
    }

    #[test]
    fn zero_maxsize_is_rejected() {
        let text = "
[channel.c]
maxsize = 0

[flow.f]
input.type = memory
parser.type = text
output.type = memory
";
        let error = ConfigLoader::new().load_str(text).unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn empty_configuration_has_no_flows() {
        let error = ConfigLoader::new().load_str("[settings]\nx = y\n").unwrap_err();
        assert!(matches!(error, ConfigError::NoFlows));
    }

    #[test]
    fn malformed_line_is_a_syntax_error() {
        let error = ConfigLoader::new()
            .load_str("[flow.f]\nthis is not an option\n")
            .unwrap_err();
        match error {
            ConfigError::Syntax { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn includes_merge_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("main.ini");
        let mut file = std::fs::File::create(&root).unwrap();
        writeln!(
            file,
            "[use]\ninclude = conf.d/*.ini\n\n[flow.base]\ninput.type = memory\nparser.type = text\noutput.type = memory\n"
        )
        .unwrap();

        std::fs::create_dir(dir.path().join("conf.d")).unwrap();
        // 20-maxsize.ini overrides 10-maxsize.ini because it sorts later
        std::fs::write(
            dir.path().join("conf.d/10-maxsize.ini"),
            "[channel.shared]\nmaxsize = 10\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("conf.d/20-maxsize.ini"),
            "[channel.shared]\nmaxsize = 20\n",
        )
        .unwrap();

        let config = ConfigLoader::new().load(&root).unwrap();
        assert_eq!(config.get_channel("shared").unwrap().maxsize, 20);
        assert_eq!(config.flows.len(), 1);
    }
}
