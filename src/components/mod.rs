//! Component Contracts
//!
//! The five capability surfaces a flow is assembled from, plus the registry
//! that resolves configuration strings to factories. Every component shares
//! the `start`/`stop` lifecycle; the flow opens components before spawning
//! its tasks and closes them in reverse order on shutdown, on every exit
//! path.
//!
//! All operations are async: components perform I/O, and even trivially
//! synchronous ones (filters, formats) are called through the suspending
//! contract so a flow task can be cancelled at any stage boundary.

pub mod common;
pub mod filter;
pub mod format;
pub mod input;
pub mod output;
pub mod parser;
pub mod registry;

use async_trait::async_trait;
use serde_json::Value;

pub use crate::config::Options;
pub use registry::{ComponentKind, ComponentRegistry, RegistryError};

/// A structured log record as produced by a parser and carried through
/// filters, format and output.
pub type Record = serde_json::Map<String, Value>;

/// Result of one [`InputDriver::read`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The next raw log line
    Line(String),

    /// No data right now; the flow yields and retries
    Idle,

    /// The source is exhausted and will never produce again
    Eof,
}

/// Shared lifecycle for all component kinds.
///
/// `start` is called before any operation and must be idempotent; `stop`
/// must release every resource and tolerate being called without a prior
/// successful `start`.
#[async_trait]
pub trait Component: Send + Sync {
    async fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A source of raw log lines.
#[async_trait]
pub trait InputDriver: Component {
    /// Produce the next raw line, report that nothing is available right
    /// now, or signal permanent exhaustion.
    async fn read(&mut self) -> anyhow::Result<ReadOutcome>;
}

/// Converts a raw line into a structured record.
#[async_trait]
pub trait Parser: Component {
    /// Parse `line`. `Ok(None)` drops the line without error; `Err` is a
    /// transient failure the flow logs and absorbs.
    async fn parse(&mut self, line: &str) -> anyhow::Result<Option<Record>>;
}

/// A predicate over records. Filters run at the stage their configuration
/// assigns them to; within a stage they run in declaration order and the
/// first rejection drops the record.
#[async_trait]
pub trait Filter: Component {
    async fn allow(&self, record: &Record) -> anyhow::Result<bool>;
}

/// Renders a record into the payload handed to the output.
#[async_trait]
pub trait OutputFormat: Component {
    async fn format(&self, record: &Record) -> anyhow::Result<Value>;
}

/// Sink for rendered payloads. A write failure is retryable: the flow nacks
/// the delivery and the channel redelivers up to its retry limit.
#[async_trait]
pub trait Output: Component {
    async fn write(&mut self, rendered: &Value) -> anyhow::Result<()>;
}
