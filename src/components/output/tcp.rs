//! TCP output: ships rendered payloads as lines to a remote collector.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::components::common::{render_line, required, u64_option};
use crate::components::{Component, Options, Output};

const DEFAULT_PORT: u64 = 5140;

/// Line-per-record TCP client.
///
/// Options: `host` (required), `port` (default 5140). The connection is
/// established lazily on the first write and re-established on the write
/// after a failure; the failed write itself surfaces as an error so the
/// flow's channel can redeliver the record.
pub struct TcpOutput {
    addr: String,
    stream: Option<TcpStream>,
}

impl TcpOutput {
    pub fn from_options(options: &Options) -> anyhow::Result<Self> {
        let host = required(options, "host", "tcp output")?;
        let port = u64_option(options, "port", DEFAULT_PORT)?;
        Ok(Self {
            addr: format!("{host}:{port}"),
            stream: None,
        })
    }

    async fn ensure_connected(&mut self) -> anyhow::Result<&mut TcpStream> {
        if self.stream.is_none() {
            let stream = TcpStream::connect(&self.addr)
                .await
                .with_context(|| format!("connecting tcp output to {}", self.addr))?;
            tracing::info!("tcp output connected to {}", self.addr);
            self.stream = Some(stream);
        }
        Ok(self.stream.as_mut().expect("connected above"))
    }
}

#[async_trait]
impl Component for TcpOutput {
    async fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}

#[async_trait]
impl Output for TcpOutput {
    async fn write(&mut self, rendered: &Value) -> anyhow::Result<()> {
        let line = render_line(rendered)?;
        let stream = match self.ensure_connected().await {
            Ok(stream) => stream,
            Err(error) => return Err(error),
        };

        let result = async {
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            Ok::<(), std::io::Error>(())
        }
        .await;

        if let Err(error) = result {
            // drop the connection; the next write reconnects
            self.stream = None;
            return Err(error).context("tcp output write failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn delivers_lines_to_the_collector() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = tokio::io::BufReader::new(stream).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        let mut options = Options::new();
        options.insert("host".to_string(), addr.ip().to_string());
        options.insert("port".to_string(), addr.port().to_string());
        let mut output = TcpOutput::from_options(&options).unwrap();

        output.write(&json!("shipped")).await.unwrap();
        assert_eq!(server.await.unwrap(), "shipped");
        output.stop().await.unwrap();
    }

    #[tokio::test]
    async fn connection_failure_is_a_retryable_error() {
        // nothing listens on this port
        let mut options = Options::new();
        options.insert("host".to_string(), "127.0.0.1".to_string());
        options.insert("port".to_string(), "1".to_string());
        let mut output = TcpOutput::from_options(&options).unwrap();
        assert!(output.write(&json!("lost")).await.is_err());
    }
}
