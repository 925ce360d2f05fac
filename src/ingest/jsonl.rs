use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use crate::ingest::{FetchError, FetchedRecord, PlatformFetcher};

/// Reads one record per line.
///
/// Lines are either `{"kind": ..., "payload": {...}}` or, when the fetcher was
/// given a fixed kind, bare payloads. Blank lines are ignored.
pub struct JsonLinesFetcher<R> {
    name: String,
    kind: Option<String>,
    lines: Lines<R>,
    line: usize,
}

impl JsonLinesFetcher<BufReader<tokio::fs::File>> {
    pub async fn open(path: impl AsRef<Path>, kind: Option<String>) -> anyhow::Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self::new(path.display().to_string(), BufReader::new(file), kind))
    }
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesFetcher<R> {
    pub fn new(name: impl Into<String>, reader: R, kind: Option<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            lines: reader.lines(),
            line: 0,
        }
    }

    fn parse(&self, text: &str) -> Result<FetchedRecord, FetchError> {
        let malformed = |message: String| FetchError::Malformed {
            location: format!("line {}", self.line),
            message,
        };
        match &self.kind {
            Some(kind) => {
                let payload: Value = serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;
                Ok(FetchedRecord {
                    kind: kind.clone(),
                    payload,
                })
            }
            None => serde_json::from_str(text).map_err(|e| malformed(e.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl<R: AsyncBufRead + Unpin + Send> PlatformFetcher for JsonLinesFetcher<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_record(&mut self) -> Result<Option<FetchedRecord>, FetchError> {
        loop {
            let Some(text) = self
                .lines
                .next_line()
                .await
                .with_context(|| format!("Failed to read {}", self.name))?
            else {
                return Ok(None);
            };
            self.line += 1;
            if text.trim().is_empty() {
                continue;
            }
            return self.parse(&text).map(Some);
        }
    }
}
