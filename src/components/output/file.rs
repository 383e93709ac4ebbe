//! File output: appends rendered payloads to a file, one line per record.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::components::common::{bool_option, render_line, required, u64_option};
use crate::components::{Component, Options, Output};

const DEFAULT_BUFFER_SIZE: u64 = 8192;

/// Buffered line writer.
///
/// Options: `path` (required), `append` (default true), `create_dirs`
/// (default true), `buffer_size` (bytes, default 8192), `flush` (flush after
/// every record, default true — a log sink that loses tail lines on crash is
/// worse than a slightly slower one).
pub struct FileOutput {
    path: PathBuf,
    append: bool,
    create_dirs: bool,
    buffer_size: usize,
    flush: bool,
    writer: Option<BufWriter<File>>,
}

impl FileOutput {
    pub fn from_options(options: &Options) -> anyhow::Result<Self> {
        Ok(Self {
            path: PathBuf::from(required(options, "path", "file output")?),
            append: bool_option(options, "append", true),
            create_dirs: bool_option(options, "create_dirs", true),
            buffer_size: u64_option(options, "buffer_size", DEFAULT_BUFFER_SIZE)? as usize,
            flush: bool_option(options, "flush", true),
            writer: None,
        })
    }
}

#[async_trait]
impl Component for FileOutput {
    async fn start(&mut self) -> anyhow::Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }

        if self.create_dirs {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating directory '{}'", parent.display()))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.append)
            .truncate(!self.append)
            .open(&self.path)
            .await
            .with_context(|| format!("opening output file '{}'", self.path.display()))?;

        self.writer = Some(BufWriter::with_capacity(self.buffer_size, file));
        tracing::info!(
            "file output writing to '{}' (append: {})",
            self.path.display(),
            self.append
        );
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Output for FileOutput {
    async fn write(&mut self, rendered: &Value) -> anyhow::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .context("file output used before start")?;

        let line = render_line(rendered)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        if self.flush {
            writer.flush().await?;
        }
        Ok(())
    }
}
