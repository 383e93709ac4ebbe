//! Flow Runtime
//!
//! A flow wires one input, one parser, one output, an optional format and a
//! set of stage-partitioned filters around a reliability channel, then runs
//! two long-lived tasks:
//!
//! - **ingest**: read → input-stage filters → parse → parser-stage filters
//!   → format → `channel.put` (which blocks under backpressure);
//! - **drain**: `channel.get` → output-stage filters → write → `ack`, or
//!   `nack` on a failed write so the channel redelivers.
//!
//! Record-level failures are absorbed where they happen: a parser, filter
//! or format error costs that record only. Output failures are retryable
//! through the channel. Persistent input failures terminate the ingest task
//! after a configurable number of consecutive errors; the supervisor does
//! not restart flows.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::components::{
    Component, ComponentRegistry, Filter, InputDriver, Output, OutputFormat, Parser, ReadOutcome,
    Record,
};
use crate::config::{FilterStage, FlowConfig};
use crate::core::channel::{Channel, ChannelRegistry, Token};
use crate::core::metrics::{ChannelMetricsSnapshot, FlowMetrics};

/// What travels through a flow's channel: the structured record (filters at
/// the output stage still need it) together with the payload the format
/// stage produced for the output.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub record: Record,
    pub rendered: Value,
}

/// How long `stop` waits for a task to observe cancellation before aborting
/// it outright.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

enum Control {
    Continue,
    Stop,
}

/// A single pipeline, built from configuration and run as an ingest task
/// plus a drain task.
pub struct Flow {
    name: String,
    channel: Arc<Channel<Delivery>>,
    owns_channel: bool,
    metrics: Arc<FlowMetrics>,
    ingest: Option<IngestStage>,
    drain: Option<DrainStage>,
    ingest_task: Option<JoinHandle<IngestStage>>,
    drain_task: Option<JoinHandle<DrainStage>>,
    shutdown: Option<watch::Sender<bool>>,
    running: bool,
}

impl Flow {
    /// Resolve every component named by `config` through the registry and
    /// assemble the flow. Construction failures (unknown types, invalid
    /// options) are fatal for the flow.
    pub fn new(
        config: &FlowConfig,
        registry: &ComponentRegistry,
        channels: &ChannelRegistry<Delivery>,
        input_error_limit: u32,
    ) -> anyhow::Result<Self> {
        let name = config.name.clone();

        let input = registry
            .create_input(&config.input.r#type, &config.input.options)
            .with_context(|| format!("flow '{name}': input"))?;
        let parser = registry
            .create_parser(&config.parser.r#type, &config.parser.options)
            .with_context(|| format!("flow '{name}': parser"))?;
        let output = registry
            .create_output(&config.output.r#type, &config.output.options)
            .with_context(|| format!("flow '{name}': output"))?;
        let format = match &config.output_format {
            Some(format_type) => Some(
                registry
                    .create_format(format_type, &config.format_options)
                    .with_context(|| format!("flow '{name}': format"))?,
            ),
            None => None,
        };

        let mut input_filters = Vec::new();
        let mut parser_filters = Vec::new();
        let mut output_filters = Vec::new();
        for filter_config in &config.filters {
            let filter = registry
                .create_filter(
                    &filter_config.component.r#type,
                    &filter_config.component.options,
                )
                .with_context(|| format!("flow '{name}': filter '{}'", filter_config.name))?;
            match filter_config.stage {
                FilterStage::Input => input_filters.push(filter),
                FilterStage::Parser => parser_filters.push(filter),
                FilterStage::Output => output_filters.push(filter),
            }
        }

        let (channel, owns_channel) = match &config.channel {
            Some(channel_name) => (channels.get(channel_name)?, false),
            None => (
                Arc::new(Channel::new(crate::config::ChannelConfig::named(format!(
                    "flow-{name}"
                )))),
                true,
            ),
        };

        let metrics = Arc::new(FlowMetrics::default());

        Ok(Self {
            ingest: Some(IngestStage {
                flow: name.clone(),
                input,
                parser,
                format,
                input_filters,
                parser_filters,
                channel: Arc::clone(&channel),
                metrics: Arc::clone(&metrics),
                error_limit: input_error_limit,
                consecutive_errors: 0,
            }),
            drain: Some(DrainStage {
                flow: name.clone(),
                output,
                output_filters,
                channel: Arc::clone(&channel),
                metrics: Arc::clone(&metrics),
            }),
            name,
            channel,
            owns_channel,
            metrics,
            ingest_task: None,
            drain_task: None,
            shutdown: None,
            running: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> Arc<FlowMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn channel_metrics(&self) -> ChannelMetricsSnapshot {
        self.channel.metrics()
    }

    /// Open every component (input, parser, output, format, filters), start
    /// the channel watchdog and spawn the ingest and drain tasks.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.running {
            return Ok(());
        }
        let mut ingest = self
            .ingest
            .take()
            .context("flow tasks were lost during a previous shutdown")?;
        let mut drain = self
            .drain
            .take()
            .context("flow tasks were lost during a previous shutdown")?;

        if let Err(error) = Self::open_components(&mut ingest, &mut drain).await {
            // unwind whatever did open before giving up
            Self::close_components(&mut ingest, &mut drain).await;
            self.ingest = Some(ingest);
            self.drain = Some(drain);
            return Err(error);
        }
        self.channel.start();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.ingest_task = Some(tokio::spawn(ingest.run(shutdown_rx.clone())));
        self.drain_task = Some(tokio::spawn(drain.run(shutdown_rx)));
        self.shutdown = Some(shutdown_tx);
        self.running = true;
        tracing::info!("{}: flow started", self.name);
        Ok(())
    }

    /// Signal cancellation, wait for both tasks to unwind, then close
    /// components in reverse open order and close the private channel (a
    /// shared channel stays open for its other flows).
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }

        let mut ingest = Self::join_task(&self.name, "ingest", self.ingest_task.take()).await;
        let mut drain = Self::join_task(&self.name, "drain", self.drain_task.take()).await;

        if let (Some(ingest), Some(drain)) = (&mut ingest, &mut drain) {
            Self::close_components(ingest, drain).await;
        }
        self.ingest = ingest;
        self.drain = drain;

        if self.owns_channel {
            self.channel.close().await;
        }
        tracing::info!("{}: flow stopped", self.name);
        Ok(())
    }

    async fn open_components(
        ingest: &mut IngestStage,
        drain: &mut DrainStage,
    ) -> anyhow::Result<()> {
        ingest.input.start().await.context("starting input")?;
        ingest.parser.start().await.context("starting parser")?;
        drain.output.start().await.context("starting output")?;
        if let Some(format) = &mut ingest.format {
            format.start().await.context("starting format")?;
        }
        for filter in ingest
            .input_filters
            .iter_mut()
            .chain(ingest.parser_filters.iter_mut())
            .chain(drain.output_filters.iter_mut())
        {
            filter.start().await.context("starting filter")?;
        }
        Ok(())
    }

    /// Close components in reverse open order. Stop failures are logged,
    /// never propagated: one leaky component must not keep the rest open.
    async fn close_components(ingest: &mut IngestStage, drain: &mut DrainStage) {
        let flow = ingest.flow.clone();
        let mut log_error = |what: &str, result: anyhow::Result<()>| {
            if let Err(error) = result {
                tracing::error!("{flow}: failed to stop {what}: {error:#}");
            }
        };

        for filter in drain
            .output_filters
            .iter_mut()
            .chain(ingest.parser_filters.iter_mut())
            .chain(ingest.input_filters.iter_mut())
        {
            log_error("filter", filter.stop().await);
        }
        if let Some(format) = &mut ingest.format {
            log_error("format", format.stop().await);
        }
        log_error("output", drain.output.stop().await);
        log_error("parser", ingest.parser.stop().await);
        log_error("input", ingest.input.stop().await);
    }

    async fn join_task<S>(flow: &str, label: &str, task: Option<JoinHandle<S>>) -> Option<S> {
        let mut task = task?;
        match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
            Ok(Ok(stage)) => Some(stage),
            Ok(Err(join_error)) => {
                tracing::error!("{flow}: {label} task failed: {join_error}");
                None
            }
            Err(_) => {
                tracing::error!("{flow}: {label} task ignored shutdown, aborting it");
                task.abort();
                None
            }
        }
    }
}

struct IngestStage {
    flow: String,
    input: Box<dyn InputDriver>,
    parser: Box<dyn Parser>,
    format: Option<Box<dyn OutputFormat>>,
    input_filters: Vec<Box<dyn Filter>>,
    parser_filters: Vec<Box<dyn Filter>>,
    channel: Arc<Channel<Delivery>>,
    metrics: Arc<FlowMetrics>,
    error_limit: u32,
    consecutive_errors: u32,
}

impl IngestStage {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Self {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                control = self.step() => match control {
                    Control::Continue => {}
                    Control::Stop => break,
                },
            }
        }
        tracing::debug!("{}: ingest task finished", self.flow);
        self
    }

    /// One read and, if it produced a line, the full journey to the
    /// channel.
    async fn step(&mut self) -> Control {
        match self.input.read().await {
            Ok(ReadOutcome::Line(raw)) => {
                self.consecutive_errors = 0;
                self.process(raw).await
            }
            Ok(ReadOutcome::Idle) => {
                tokio::task::yield_now().await;
                Control::Continue
            }
            Ok(ReadOutcome::Eof) => {
                tracing::info!("{}: input exhausted", self.flow);
                Control::Stop
            }
            Err(error) => {
                self.consecutive_errors += 1;
                tracing::warn!(
                    "{}: input read failed ({}/{}): {error:#}",
                    self.flow,
                    self.consecutive_errors,
                    self.error_limit
                );
                if self.consecutive_errors >= self.error_limit {
                    tracing::error!(
                        "{}: terminating ingest after {} consecutive input errors",
                        self.flow,
                        self.consecutive_errors
                    );
                    return Control::Stop;
                }
                tokio::task::yield_now().await;
                Control::Continue
            }
        }
    }

    async fn process(&mut self, raw: String) -> Control {
        self.metrics.record_in();

        // input-stage filters see the line before any parsing
        let mut synthetic = Record::new();
        synthetic.insert("raw".to_string(), Value::String(raw.clone()));
        match apply_filters(&self.input_filters, &synthetic).await {
            Ok(true) => {}
            Ok(false) => {
                self.metrics.record_dropped();
                return Control::Continue;
            }
            Err(error) => {
                tracing::warn!("{}: input-stage filter failed: {error:#}", self.flow);
                self.metrics.record_dropped();
                return Control::Continue;
            }
        }

        let record = match self.parser.parse(&raw).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.metrics.record_dropped();
                return Control::Continue;
            }
            Err(error) => {
                tracing::warn!("{}: parse failed: {error:#}", self.flow);
                self.metrics.record_dropped();
                return Control::Continue;
            }
        };

        match apply_filters(&self.parser_filters, &record).await {
            Ok(true) => {}
            Ok(false) => {
                self.metrics.record_dropped();
                return Control::Continue;
            }
            Err(error) => {
                tracing::warn!("{}: parser-stage filter failed: {error:#}", self.flow);
                self.metrics.record_dropped();
                return Control::Continue;
            }
        }

        // render now, while the record is hot; the drain task only replays
        // the finished payload on retries
        let rendered = match &self.format {
            Some(format) => match format.format(&record).await {
                Ok(rendered) => rendered,
                Err(error) => {
                    tracing::warn!("{}: format failed: {error:#}", self.flow);
                    self.metrics.record_dropped();
                    return Control::Continue;
                }
            },
            None => Value::Object(record.clone()),
        };

        // blocks under backpressure; that is the flow-control mechanism
        if self.channel.put(Delivery { record, rendered }).await.is_err() {
            tracing::info!("{}: channel closed, stopping ingest", self.flow);
            return Control::Stop;
        }
        Control::Continue
    }
}

struct DrainStage {
    flow: String,
    output: Box<dyn Output>,
    output_filters: Vec<Box<dyn Filter>>,
    channel: Arc<Channel<Delivery>>,
    metrics: Arc<FlowMetrics>,
}

impl DrainStage {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Self {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                control = self.step() => match control {
                    Control::Continue => {}
                    Control::Stop => break,
                },
            }
        }
        tracing::debug!("{}: drain task finished", self.flow);
        self
    }

    async fn step(&mut self) -> Control {
        let (token, delivery) = match self.channel.get().await {
            Ok(delivery) => delivery,
            Err(_) => return Control::Stop,
        };

        match apply_filters(&self.output_filters, &delivery.record).await {
            Ok(true) => {}
            Ok(false) => {
                // dropping here is the filter doing its job: the record is
                // processed as far as it was meant to go
                self.metrics.record_dropped();
                self.settle(token, true).await;
                return Control::Continue;
            }
            Err(error) => {
                tracing::warn!("{}: output-stage filter failed: {error:#}", self.flow);
                self.metrics.record_dropped();
                self.settle(token, true).await;
                return Control::Continue;
            }
        }

        match self.output.write(&delivery.rendered).await {
            Ok(()) => {
                self.metrics.record_written();
                self.settle(token, true).await;
            }
            Err(error) => {
                tracing::warn!("{}: output write failed: {error:#}", self.flow);
                // no sleep here: a bounded channel already regulates the
                // retry rate through backpressure
                self.settle(token, false).await;
            }
        }
        Control::Continue
    }

    async fn settle(&self, token: Token, ok: bool) {
        let result = if ok {
            self.channel.ack(token).await
        } else {
            self.channel.nack(token, true).await
        };
        if let Err(error) = result {
            tracing::debug!("{}: settling delivery {token} failed: {error}", self.flow);
        }
    }
}

async fn apply_filters(filters: &[Box<dyn Filter>], record: &Record) -> anyhow::Result<bool> {
    for filter in filters {
        if !filter.allow(record).await? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use crate::core::metrics::FlowMetricsSnapshot;

    fn flow_config(text: &str, name: &str) -> FlowConfig {
        ConfigLoader::new()
            .load_str(text)
            .unwrap()
            .get_flow(name)
            .unwrap()
            .clone()
    }

    #[test]
    fn construction_resolves_components() {
        let config = flow_config(
            "
[flow.demo]
input.type = memory
parser.type = json
output.type = memory
output.format = text
format.template = {message}
filter.keep.type = field
filter.keep.field = level
filter.keep.value = info
",
            "demo",
        );
        let registry = ComponentRegistry::new();
        let channels = ChannelRegistry::new(Default::default());
        let flow = Flow::new(&config, &registry, &channels, 10).unwrap();
        assert_eq!(flow.name(), "demo");
        assert!(flow.owns_channel);
    }

    #[test]
    fn unknown_component_fails_construction() {
        let config = flow_config(
            "
[flow.demo]
input.type = carrier-pigeon
parser.type = json
output.type = memory
",
            "demo",
        );
        let registry = ComponentRegistry::new();
        let channels = ChannelRegistry::new(Default::default());
        assert!(Flow::new(&config, &registry, &channels, 10).is_err());
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let config = flow_config(
            "
[flow.demo]
input.type = memory
parser.type = text
output.type = memory
",
            "demo",
        );
        let registry = ComponentRegistry::new();
        let channels = ChannelRegistry::new(Default::default());
        let mut flow = Flow::new(&config, &registry, &channels, 10).unwrap();

        flow.start().await.unwrap();
        flow.start().await.unwrap();
        flow.stop().await.unwrap();
        flow.stop().await.unwrap();
        assert_eq!(flow.metrics().snapshot(), FlowMetricsSnapshot::default());
    }
}
