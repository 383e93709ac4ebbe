//! Reliability Channel
//!
//! The bounded in-memory queue that sits between a flow's parsing and
//! writing stages. Every message handed out by [`Channel::get`] carries a
//! delivery token; the consumer settles it with [`Channel::ack`] on success
//! or [`Channel::nack`] on failure, and a watchdog task requeues deliveries
//! whose ack never arrives within the configured timeout.
//!
//! Delivery guarantees: at-least-once, FIFO for first deliveries. A message
//! may be handed out up to `retry_limit + 1` times; redeliveries join the
//! tail of the queue. A message holds one capacity slot from `put` until it
//! is acked or permanently dropped, so `queued + in_flight` never exceeds
//! `maxsize` — a stalled consumer therefore backpressures producers even
//! when the queue itself looks empty.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ChannelConfig;
use crate::core::metrics::{ChannelMetrics, ChannelMetricsSnapshot};

/// Failures surfaced by channel operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel '{0}' is closed")]
    Closed(String),

    #[error("unknown delivery token {0}")]
    UnknownToken(u64),
}

/// Delivery token returned by [`Channel::get`].
pub type Token = u64;

#[derive(Debug)]
struct ChannelMessage<T> {
    id: Token,
    payload: T,
    attempts: u32,
    last_attempt: Instant,
}

#[derive(Debug)]
struct ChannelState<T> {
    queue: VecDeque<ChannelMessage<T>>,
    in_flight: HashMap<Token, ChannelMessage<T>>,
    counter: u64,
    closed: bool,
}

/// A bounded FIFO with acknowledged, retried delivery.
pub struct Channel<T> {
    config: ChannelConfig,
    state: Mutex<ChannelState<T>>,
    /// Free capacity; a permit is held per live message, from put to
    /// ack/permanent drop
    slots: Semaphore,
    /// Deliverable messages; one permit per queued message
    items: Semaphore,
    metrics: ChannelMetrics,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + 'static> Channel<T> {
    pub fn new(config: ChannelConfig) -> Self {
        let maxsize = config.maxsize;
        Self {
            config,
            state: Mutex::new(ChannelState {
                queue: VecDeque::new(),
                in_flight: HashMap::new(),
                counter: 0,
                closed: false,
            }),
            slots: Semaphore::new(maxsize),
            items: Semaphore::new(0),
            metrics: ChannelMetrics::default(),
            watchdog: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn metrics(&self) -> ChannelMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Spawn the redelivery watchdog. Idempotent; every flow using a shared
    /// channel calls this on start.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.watchdog.lock().expect("watchdog mutex poisoned");
        if guard.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let channel = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            channel.watch_ack_timeouts().await;
        }));
    }

    /// Enqueue a payload. Blocks while the channel is at capacity — this is
    /// the flow's backpressure mechanism, so there is no try-variant and no
    /// drop policy here.
    pub async fn put(&self, payload: T) -> Result<(), ChannelError> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| ChannelError::Closed(self.config.name.clone()))?;
        // the permit is returned on ack or permanent drop
        permit.forget();

        let mut state = self.state.lock().expect("channel state poisoned");
        if state.closed {
            return Err(ChannelError::Closed(self.config.name.clone()));
        }
        state.counter += 1;
        let id = state.counter;
        state.queue.push_back(ChannelMessage {
            id,
            payload,
            attempts: 0,
            last_attempt: Instant::now(),
        });
        drop(state);

        self.items.add_permits(1);
        Ok(())
    }

    /// Remove the next message from the queue and move it in-flight.
    /// Blocks while the queue is empty.
    pub async fn get(&self) -> Result<(Token, T), ChannelError> {
        let permit = self
            .items
            .acquire()
            .await
            .map_err(|_| ChannelError::Closed(self.config.name.clone()))?;
        permit.forget();

        let mut state = self.state.lock().expect("channel state poisoned");
        if state.closed {
            return Err(ChannelError::Closed(self.config.name.clone()));
        }
        let mut message = state
            .queue
            .pop_front()
            .expect("item permit issued without a queued message");
        message.attempts += 1;
        message.last_attempt = Instant::now();
        let token = message.id;
        let payload = message.payload.clone();
        state.in_flight.insert(token, message);
        Ok((token, payload))
    }

    /// Settle a delivery as processed. Unknown tokens are an error on an
    /// open channel; after close the message is already gone and the ack is
    /// accepted silently.
    pub async fn ack(&self, token: Token) -> Result<(), ChannelError> {
        let mut state = self.state.lock().expect("channel state poisoned");
        if state.closed {
            return Ok(());
        }
        if state.in_flight.remove(&token).is_none() {
            return Err(ChannelError::UnknownToken(token));
        }
        drop(state);
        self.slots.add_permits(1);
        Ok(())
    }

    /// Settle a delivery as failed. With `requeue`, the message rejoins the
    /// tail of the queue while it has retries left; otherwise (or once the
    /// retry limit is exhausted) it is dropped for good.
    pub async fn nack(&self, token: Token, requeue: bool) -> Result<(), ChannelError> {
        let mut state = self.state.lock().expect("channel state poisoned");
        if state.closed {
            return Ok(());
        }
        let Some(message) = state.in_flight.remove(&token) else {
            return Err(ChannelError::UnknownToken(token));
        };

        if requeue && message.attempts <= self.config.retry_limit {
            tracing::debug!(
                "{}: redelivering message {} (attempt {})",
                self.config.name,
                token,
                message.attempts
            );
            state.queue.push_back(message);
            drop(state);
            self.metrics.retry();
            self.items.add_permits(1);
        } else {
            tracing::warn!(
                "{}: dropping message {} after {} attempts",
                self.config.name,
                token,
                message.attempts
            );
            drop(state);
            self.metrics.permanent_drop();
            self.slots.add_permits(1);
        }
        Ok(())
    }

    /// Close the channel: wake every blocked producer and consumer, stop
    /// the watchdog and discard all queued and in-flight messages without
    /// retry.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().expect("channel state poisoned");
            if state.closed {
                return;
            }
            state.closed = true;
            state.queue.clear();
            state.in_flight.clear();
        }
        self.slots.close();
        self.items.close();
        if let Some(task) = self.watchdog.lock().expect("watchdog mutex poisoned").take() {
            task.abort();
        }
        tracing::debug!("{}: channel closed", self.config.name);
    }

    /// Requeue in-flight messages whose consumer has gone quiet. Runs at
    /// half the ack timeout so a delivery is redelivered at most one period
    /// late.
    async fn watch_ack_timeouts(&self) {
        let period = self.config.ack_timeout / 2;
        loop {
            tokio::time::sleep(period).await;

            let mut requeued = 0usize;
            let mut dropped = 0usize;
            {
                let mut state = self.state.lock().expect("channel state poisoned");
                if state.closed {
                    break;
                }
                let now = Instant::now();
                let expired: Vec<Token> = state
                    .in_flight
                    .iter()
                    .filter(|(_, message)| {
                        now.duration_since(message.last_attempt) >= self.config.ack_timeout
                    })
                    .map(|(token, _)| *token)
                    .collect();

                for token in expired {
                    let message = state
                        .in_flight
                        .remove(&token)
                        .expect("expired token vanished");
                    if message.attempts <= self.config.retry_limit {
                        tracing::debug!(
                            "{}: ack timeout, redelivering message {} (attempt {})",
                            self.config.name,
                            token,
                            message.attempts
                        );
                        state.queue.push_back(message);
                        self.metrics.retry();
                        requeued += 1;
                    } else {
                        tracing::warn!(
                            "{}: ack timeout, dropping message {} after {} attempts",
                            self.config.name,
                            token,
                            message.attempts
                        );
                        self.metrics.permanent_drop();
                        dropped += 1;
                    }
                }
            }
            if requeued > 0 {
                self.items.add_permits(requeued);
            }
            if dropped > 0 {
                self.slots.add_permits(dropped);
            }
        }
    }
}

/// Owner of the channels shared between flows by name. Channels are created
/// lazily on first reference and closed together once every flow has
/// stopped.
pub struct ChannelRegistry<T> {
    configs: HashMap<String, ChannelConfig>,
    channels: Mutex<HashMap<String, Arc<Channel<T>>>>,
}

impl<T: Clone + Send + 'static> ChannelRegistry<T> {
    pub fn new(configs: HashMap<String, ChannelConfig>) -> Self {
        Self {
            configs,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> anyhow::Result<Arc<Channel<T>>> {
        let mut channels = self.channels.lock().expect("channel registry poisoned");
        if let Some(channel) = channels.get(name) {
            return Ok(Arc::clone(channel));
        }
        let config = self
            .configs
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("unknown channel '{name}'"))?;
        let channel = Arc::new(Channel::new(config.clone()));
        channels.insert(name.to_string(), Arc::clone(&channel));
        Ok(channel)
    }

    pub async fn close_all(&self) {
        let channels: Vec<Arc<Channel<T>>> = {
            let mut guard = self.channels.lock().expect("channel registry poisoned");
            guard.drain().map(|(_, channel)| channel).collect()
        };
        for channel in channels {
            channel.close().await;
        }
    }
}
