//! Runtime Supervisor
//!
//! Owns every flow and the registry of shared channels. Flows start in
//! declaration order and stop in reverse; shared channels are created
//! lazily on first reference and closed only after all flows are down.

use anyhow::bail;

use crate::components::ComponentRegistry;
use crate::config::RuntimeConfig;
use crate::core::channel::ChannelRegistry;
use crate::core::flow::{Delivery, Flow};

pub struct Runtime {
    flows: Vec<Flow>,
    channels: ChannelRegistry<Delivery>,
}

impl Runtime {
    /// Build all flows with the built-in component set. Construction errors
    /// are fatal: a misconfigured flow fails startup as a whole.
    pub fn new(config: RuntimeConfig) -> anyhow::Result<Self> {
        Self::with_registry(config, &ComponentRegistry::new())
    }

    /// Build all flows, resolving components through a caller-supplied
    /// registry (embedders and tests register their own types here).
    pub fn with_registry(
        config: RuntimeConfig,
        registry: &ComponentRegistry,
    ) -> anyhow::Result<Self> {
        let channels = ChannelRegistry::new(config.channels.clone());
        let input_error_limit = config.input_error_limit();

        let mut flows = Vec::with_capacity(config.flows.len());
        for flow_config in &config.flows {
            flows.push(Flow::new(
                flow_config,
                registry,
                &channels,
                input_error_limit,
            )?);
        }
        Ok(Self { flows, channels })
    }

    pub fn flow(&self, name: &str) -> Option<&Flow> {
        self.flows.iter().find(|flow| flow.name() == name)
    }

    /// Start every flow. A flow that fails to start is reported and
    /// skipped; its siblings keep running. Startup fails only when nothing
    /// could be started at all.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        tracing::info!("starting {} flows", self.flows.len());
        let mut started = 0usize;
        for flow in &mut self.flows {
            match flow.start().await {
                Ok(()) => started += 1,
                Err(error) => {
                    tracing::error!("{}: failed to start flow: {error:#}", flow.name());
                }
            }
        }
        if started == 0 {
            bail!("no flow could be started");
        }
        Ok(())
    }

    /// Stop flows in reverse start order, then close the shared channels.
    pub async fn stop(&mut self) {
        for flow in self.flows.iter_mut().rev() {
            if let Err(error) = flow.stop().await {
                tracing::error!("{}: failed to stop flow: {error:#}", flow.name());
            }
            if let Ok(counters) = serde_json::to_string(&flow.metrics().snapshot()) {
                tracing::info!("{}: final counters {counters}", flow.name());
            }
        }
        self.channels.close_all().await;
    }

    /// Start all flows, park until `shutdown` resolves, then stop
    /// everything. Returns whatever the shutdown future produced, so the
    /// caller can map different stop signals to different exit codes.
    pub async fn run<T>(&mut self, shutdown: impl Future<Output = T>) -> anyhow::Result<T> {
        self.start().await?;
        let outcome = shutdown.await;
        self.stop().await;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;

    fn config(text: &str) -> RuntimeConfig {
        ConfigLoader::new().load_str(text).unwrap()
    }

    #[test]
    fn construction_fails_on_unknown_components() {
        let config = config(
            "
[flow.bad]
input.type = memory
parser.type = morse
output.type = memory
",
        );
        assert!(Runtime::new(config).is_err());
    }

    #[tokio::test]
    async fn run_starts_and_stops_around_the_signal() {
        let config = config(
            "
[flow.a]
input.type = memory
parser.type = text
output.type = memory

[flow.b]
input.type = memory
parser.type = text
output.type = memory
channel = shared
",
        );
        let mut runtime = Runtime::new(config).unwrap();
        let outcome = runtime
            .run(async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                42
            })
            .await
            .unwrap();
        assert_eq!(outcome, 42);
    }
}
