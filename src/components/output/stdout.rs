//! Standard stream output.

use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::components::common::{bool_option, render_line};
use crate::components::{Component, Options, Output};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Write one line per record to stdout or stderr.
///
/// Options: `stream` (`stdout` or `stderr`, default `stdout`), `newline`
/// (append a trailing newline when missing, default true).
pub struct StdoutOutput {
    stream: Stream,
    newline: bool,
}

impl StdoutOutput {
    pub fn from_options(options: &Options) -> anyhow::Result<Self> {
        let stream = match options.get("stream").map(String::as_str) {
            None | Some("stdout") => Stream::Stdout,
            Some("stderr") => Stream::Stderr,
            Some(other) => bail!("stream must be 'stdout' or 'stderr', got '{other}'"),
        };
        let newline = bool_option(options, "newline", true);
        Ok(Self { stream, newline })
    }
}

impl Component for StdoutOutput {}

#[async_trait]
impl Output for StdoutOutput {
    async fn write(&mut self, rendered: &Value) -> anyhow::Result<()> {
        let mut text = render_line(rendered)?;
        if self.newline && !text.ends_with('\n') {
            text.push('\n');
        }
        match self.stream {
            Stream::Stdout => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(text.as_bytes()).await?;
                stdout.flush().await?;
            }
            Stream::Stderr => {
                let mut stderr = tokio::io::stderr();
                stderr.write_all(text.as_bytes()).await?;
                stderr.flush().await?;
            }
        }
        Ok(())
    }
}
