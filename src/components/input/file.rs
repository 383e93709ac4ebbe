//! File input driver: reads a log file line by line, optionally following
//! it as it grows.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::components::common::{bool_option, required, u64_option};
use crate::components::{Component, InputDriver, Options, ReadOutcome};

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Line-oriented file reader.
///
/// Options: `path` (required), `follow` (keep polling for appended data
/// instead of reporting exhaustion, default false), `poll_interval_ms`
/// (follow-mode sleep between polls, default 500).
pub struct FileInput {
    path: PathBuf,
    follow: bool,
    poll_interval: Duration,
    reader: Option<BufReader<File>>,
}

impl FileInput {
    pub fn from_options(options: &Options) -> anyhow::Result<Self> {
        let path = PathBuf::from(required(options, "path", "file input")?);
        let follow = bool_option(options, "follow", false);
        let poll_interval = Duration::from_millis(u64_option(
            options,
            "poll_interval_ms",
            DEFAULT_POLL_INTERVAL_MS,
        )?);
        Ok(Self {
            path,
            follow,
            poll_interval,
            reader: None,
        })
    }
}

#[async_trait]
impl Component for FileInput {
    async fn start(&mut self) -> anyhow::Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }
        let file = File::open(&self.path)
            .await
            .with_context(|| format!("opening input file '{}'", self.path.display()))?;
        self.reader = Some(BufReader::new(file));
        tracing::info!("file input reading from '{}'", self.path.display());
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.reader = None;
        Ok(())
    }
}

#[async_trait]
impl InputDriver for FileInput {
    async fn read(&mut self) -> anyhow::Result<ReadOutcome> {
        let reader = self
            .reader
            .as_mut()
            .context("file input used before start")?;

        let mut line = String::new();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            if self.follow {
                // At end of file; wait for the writer to append more.
                tokio::time::sleep(self.poll_interval).await;
                return Ok(ReadOutcome::Idle);
            }
            return Ok(ReadOutcome::Eof);
        }

        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(ReadOutcome::Line(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn input_for(path: &std::path::Path, follow: bool) -> FileInput {
        let mut options = Options::new();
        options.insert("path".to_string(), path.display().to_string());
        options.insert("follow".to_string(), follow.to_string());
        options.insert("poll_interval_ms".to_string(), "1".to_string());
        FileInput::from_options(&options).unwrap()
    }

    #[tokio::test]
    async fn reads_lines_then_reports_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "first\nsecond\n").unwrap();

        let mut input = input_for(&path, false);
        input.start().await.unwrap();
        assert_eq!(
            input.read().await.unwrap(),
            ReadOutcome::Line("first".into())
        );
        assert_eq!(
            input.read().await.unwrap(),
            ReadOutcome::Line("second".into())
        );
        assert_eq!(input.read().await.unwrap(), ReadOutcome::Eof);
        input.stop().await.unwrap();
    }

    #[tokio::test]
    async fn follow_mode_picks_up_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "first\n").unwrap();

        let mut input = input_for(&path, true);
        input.start().await.unwrap();
        assert_eq!(
            input.read().await.unwrap(),
            ReadOutcome::Line("first".into())
        );
        assert_eq!(input.read().await.unwrap(), ReadOutcome::Idle);

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        writeln!(file, "second").unwrap();
        file.flush().unwrap();

        // idle polls until the appended line shows up
        loop {
            match input.read().await.unwrap() {
                ReadOutcome::Line(line) => {
                    assert_eq!(line, "second");
                    break;
                }
                ReadOutcome::Idle => continue,
                ReadOutcome::Eof => panic!("follow mode must not report exhaustion"),
            }
        }
    }

    #[test]
    fn path_is_required() {
        assert!(FileInput::from_options(&Options::new()).is_err());
    }
}
