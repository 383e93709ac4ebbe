//! Sluice — a configuration-driven log flow processor.
//!
//! An operator declares independent **flows** in an INI file; each flow
//! reads raw lines from an input, parses them into structured records,
//! filters them at up to three stages, optionally renders them through an
//! output format, and writes them to an output. Between parsing and writing
//! sits a **reliability channel**: a bounded queue with acknowledged
//! delivery, bounded retries and timeout-driven redelivery. All flows run
//! cooperatively inside one process under a supervising [`core::Runtime`].

pub mod components;
pub mod config;
pub mod core;
pub mod logging;

pub use crate::components::{
    ComponentRegistry, Filter, InputDriver, Output, OutputFormat, Parser, ReadOutcome, Record,
};
pub use crate::config::{ConfigError, ConfigLoader, RuntimeConfig};
pub use crate::core::{Channel, ChannelError, Delivery, Flow, Runtime};
