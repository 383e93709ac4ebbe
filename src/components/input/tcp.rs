//! TCP input driver: accepts line-oriented connections and feeds every
//! received line into one stream.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::components::common::u64_option;
use crate::components::{Component, InputDriver, Options, ReadOutcome};

const DEFAULT_PORT: u64 = 5140;
const DEFAULT_QUEUE_CAPACITY: u64 = 1024;
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Listening socket input.
///
/// Options: `host` (default `0.0.0.0`), `port` (default 5140), `capacity`
/// (internal line queue bound, default 1024). Each accepted connection is
/// read line by line on its own task; the queue bound applies backpressure
/// to every connection.
pub struct TcpInput {
    addr: String,
    tx: flume::Sender<String>,
    rx: flume::Receiver<String>,
    acceptor: Option<JoinHandle<()>>,
}

impl TcpInput {
    pub fn from_options(options: &Options) -> anyhow::Result<Self> {
        let host = options
            .get("host")
            .map(String::as_str)
            .unwrap_or("0.0.0.0");
        let port = u64_option(options, "port", DEFAULT_PORT)?;
        let capacity = u64_option(options, "capacity", DEFAULT_QUEUE_CAPACITY)? as usize;
        let (tx, rx) = flume::bounded(capacity);
        Ok(Self {
            addr: format!("{host}:{port}"),
            tx,
            rx,
            acceptor: None,
        })
    }

    async fn accept_loop(listener: TcpListener, tx: flume::Sender<String>) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!("tcp input: connection from {peer}");
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        if let Err(error) = Self::read_connection(stream, tx).await {
                            tracing::debug!("tcp input: connection from {peer} ended: {error:#}");
                        }
                    });
                }
                Err(error) => {
                    tracing::warn!("tcp input: accept failed: {error}");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn read_connection(stream: TcpStream, tx: flume::Sender<String>) -> anyhow::Result<()> {
        let mut lines = BufReader::new(stream).lines();
        while let Some(line) = lines.next_line().await? {
            if tx.send_async(line).await.is_err() {
                // input stopped; drop the connection
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Component for TcpInput {
    async fn start(&mut self) -> anyhow::Result<()> {
        if self.acceptor.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("binding tcp input to {}", self.addr))?;
        tracing::info!("tcp input listening on {}", self.addr);
        let tx = self.tx.clone();
        self.acceptor = Some(tokio::spawn(Self::accept_loop(listener, tx)));
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(task) = self.acceptor.take() {
            task.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl InputDriver for TcpInput {
    async fn read(&mut self) -> anyhow::Result<ReadOutcome> {
        match self.rx.recv_async().await {
            Ok(line) => Ok(ReadOutcome::Line(line)),
            Err(flume::RecvError::Disconnected) => Ok(ReadOutcome::Eof),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn receives_lines_from_connections() {
        let mut options = Options::new();
        options.insert("host".to_string(), "127.0.0.1".to_string());
        options.insert("port".to_string(), "0".to_string());
        let mut input = TcpInput::from_options(&options).unwrap();

        // bind to an ephemeral port by hand so the test can learn it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        input.acceptor = Some(tokio::spawn(TcpInput::accept_loop(
            listener,
            input.tx.clone(),
        )));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello\nworld\n").await.unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(
            input.read().await.unwrap(),
            ReadOutcome::Line("hello".into())
        );
        assert_eq!(
            input.read().await.unwrap(),
            ReadOutcome::Line("world".into())
        );
        input.stop().await.unwrap();
    }
}
