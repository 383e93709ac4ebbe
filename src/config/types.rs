//! Configuration Type Definitions
//!
//! Core configuration structures for sluice. These types are built by the
//! INI loader and are read-only for the rest of the runtime: the loader
//! validates once, everything downstream trusts the result.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Option map carried by every component declaration.
///
/// Values stay as strings; each component parses the options it understands
/// during construction and ignores the rest.
pub type Options = HashMap<String, String>;

/// Description of a single component (input, parser, filter, output or
/// format) declared in the configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComponentConfig {
    /// The component type to resolve through the registry (e.g. "memory",
    /// "json", "field")
    pub r#type: String,

    /// Component-specific options, prefix-stripped (e.g. `input.path` in the
    /// file becomes `path` here)
    pub options: Options,
}

impl ComponentConfig {
    pub fn new(r#type: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            options: Options::new(),
        }
    }

    /// Look up a single option value.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }
}

/// The point in a flow where a filter runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FilterStage {
    /// Before parsing, against the synthetic `{"raw": <line>}` record
    Input,

    /// After parsing, against the structured record (default)
    #[default]
    Parser,

    /// Before writing, against the structured record
    Output,
}

impl FromStr for FilterStage {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "input" => Ok(FilterStage::Input),
            "parser" => Ok(FilterStage::Parser),
            "output" => Ok(FilterStage::Output),
            _ => Err(()),
        }
    }
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FilterStage::Input => "input",
            FilterStage::Parser => "parser",
            FilterStage::Output => "output",
        })
    }
}

/// A named filter declaration inside a flow.
///
/// Filters are ordered lexicographically by name within each stage; the
/// loader emits them already sorted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterConfig {
    pub name: String,
    pub component: ComponentConfig,
    pub stage: FilterStage,
}

/// Definition of a reliability queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub name: String,

    /// Upper bound on messages held by the channel, queued plus in-flight
    pub maxsize: usize,

    /// How long a delivery may stay unacknowledged before the watchdog
    /// requeues it
    pub ack_timeout: Duration,

    /// How many times a message may be re-enqueued before it is dropped
    pub retry_limit: u32,
}

impl ChannelConfig {
    /// A channel definition with default sizing, used for anonymous per-flow
    /// channels and for named channels referenced but never declared.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            maxsize: default_maxsize(),
            ack_timeout: default_ack_timeout(),
            retry_limit: default_retry_limit(),
        }
    }
}

pub(crate) const fn default_maxsize() -> usize {
    1000
}

pub(crate) const fn default_ack_timeout() -> Duration {
    Duration::from_secs(30)
}

pub(crate) const fn default_retry_limit() -> u32 {
    3
}

/// Definition of one flow pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowConfig {
    pub name: String,
    pub input: ComponentConfig,
    pub parser: ComponentConfig,
    pub output: ComponentConfig,

    /// Optional output format identifier; when absent the structured record
    /// itself is handed to the output
    pub output_format: Option<String>,
    pub format_options: Options,

    /// Named channel reference; `None` means the flow owns a private channel
    /// with default sizing
    pub channel: Option<String>,

    /// Filter declarations, sorted by name
    pub filters: Vec<FilterConfig>,
}

/// Root configuration returned by the loader.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Flows in declaration order; guaranteed non-empty by the loader
    pub flows: Vec<FlowConfig>,

    /// Channel definitions, including auto-created ones for named channels
    /// that flows reference without declaring
    pub channels: HashMap<String, ChannelConfig>,

    /// Free-form `[settings]` key/value pairs
    pub settings: Options,
}

const DEFAULT_INPUT_ERROR_LIMIT: u32 = 10;

impl RuntimeConfig {
    pub fn get_flow(&self, name: &str) -> Option<&FlowConfig> {
        self.flows.iter().find(|flow| flow.name == name)
    }

    pub fn get_channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.get(name)
    }

    /// Consecutive input read failures a flow tolerates before its ingest
    /// task gives up. Taken from `[settings] input_error_limit`.
    pub fn input_error_limit(&self) -> u32 {
        self.settings
            .get("input_error_limit")
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_INPUT_ERROR_LIMIT)
    }
}
