//! In-memory output: collects rendered payloads, used in tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::components::{Component, Options, Output};

/// Collects every written payload in a shared buffer the test (or embedder)
/// can hold on to.
pub struct MemoryOutput {
    records: Arc<Mutex<Vec<Value>>>,
}

impl MemoryOutput {
    pub fn from_options(_options: &Options) -> anyhow::Result<Self> {
        Ok(Self::with_buffer(Arc::default()))
    }

    pub fn with_buffer(records: Arc<Mutex<Vec<Value>>>) -> Self {
        Self { records }
    }

    /// Snapshot of everything written so far.
    pub fn records(&self) -> Vec<Value> {
        self.records.lock().expect("records mutex poisoned").clone()
    }
}

impl Component for MemoryOutput {}

#[async_trait]
impl Output for MemoryOutput {
    async fn write(&mut self, rendered: &Value) -> anyhow::Result<()> {
        self.records
            .lock()
            .expect("records mutex poisoned")
            .push(rendered.clone());
        Ok(())
    }
}
