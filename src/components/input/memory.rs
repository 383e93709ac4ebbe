//! In-memory input driver, used in tests and as a feed point for embedders.

use std::time::Duration;

use async_trait::async_trait;

use crate::components::common::u64_option;
use crate::components::{Component, InputDriver, Options, ReadOutcome};

const DEFAULT_IDLE_SLEEP_MS: u64 = 10;

/// Input driver backed by an unbounded queue.
///
/// Lines can be preloaded through the `messages` option (newline-separated)
/// or injected at runtime through a cloned [`MemoryInput::sender`]. The
/// driver reports [`ReadOutcome::Eof`] once every sender is gone and the
/// queue is drained.
pub struct MemoryInput {
    tx: Option<flume::Sender<String>>,
    rx: flume::Receiver<String>,
    idle_sleep: Duration,
}

impl MemoryInput {
    pub fn from_options(options: &Options) -> anyhow::Result<Self> {
        let (tx, rx) = flume::unbounded();
        if let Some(messages) = options.get("messages") {
            for line in messages.lines() {
                // unbounded: cannot fail while we hold the receiver
                let _ = tx.send(line.to_string());
            }
        }
        let idle_sleep = Duration::from_millis(u64_option(
            options,
            "idle_sleep_ms",
            DEFAULT_IDLE_SLEEP_MS,
        )?);
        Ok(Self {
            tx: Some(tx),
            rx,
            idle_sleep,
        })
    }

    /// Build an input around an externally held queue; the caller keeps the
    /// sending side and can close the stream by dropping it.
    pub fn with_receiver(rx: flume::Receiver<String>) -> Self {
        Self {
            tx: None,
            rx,
            idle_sleep: Duration::from_millis(DEFAULT_IDLE_SLEEP_MS),
        }
    }

    /// A handle for injecting lines into the stream.
    pub fn sender(&self) -> Option<flume::Sender<String>> {
        self.tx.clone()
    }
}

#[async_trait]
impl Component for MemoryInput {
    async fn stop(&mut self) -> anyhow::Result<()> {
        self.tx = None;
        Ok(())
    }
}

#[async_trait]
impl InputDriver for MemoryInput {
    async fn read(&mut self) -> anyhow::Result<ReadOutcome> {
        match self.rx.try_recv() {
            Ok(line) => Ok(ReadOutcome::Line(line)),
            Err(flume::TryRecvError::Empty) => {
                tokio::time::sleep(self.idle_sleep).await;
                Ok(ReadOutcome::Idle)
            }
            Err(flume::TryRecvError::Disconnected) => Ok(ReadOutcome::Eof),
        }
    }
}
