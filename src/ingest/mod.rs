//! Feeds records from external platforms through the regular create path.

pub mod jsonl;

pub use jsonl::JsonLinesFetcher;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::ApiError;
use crate::logic::CatalogService;
use crate::model::Principal;
use crate::store::CatalogStore;

/// One resource as delivered by a platform, in the create shape of `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedRecord {
    pub kind: String,
    pub payload: Value,
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// A single record could not be read; the fetcher can continue.
    #[error("malformed record at {location}: {message}")]
    Malformed { location: String, message: String },

    /// The source itself failed; nothing more can be fetched.
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

/// Source of records from one external platform.
#[async_trait::async_trait]
pub trait PlatformFetcher: Send {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Next record, or `None` once the source is exhausted.
    async fn next_record(&mut self) -> Result<Option<FetchedRecord>, FetchError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub created: usize,
    /// Records whose platform identifier was already taken.
    pub skipped: usize,
    pub failed: usize,
}

/// Drain `fetcher` into the catalog, one write transaction per record.
///
/// Conflicts mean the record was ingested before and are counted as skipped.
/// Other per-record failures are logged and counted; only a failing source
/// aborts the run.
pub async fn run<S: CatalogStore>(
    service: &CatalogService<S>,
    fetcher: &mut dyn PlatformFetcher,
    principal: &Principal,
) -> Result<IngestReport, FetchError> {
    let mut report = IngestReport::default();

    loop {
        let record = match fetcher.next_record().await {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(FetchError::Malformed { location, message }) => {
                log::warn!("{}: skipping malformed record at {}: {}", fetcher.name(), location, message);
                report.failed += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        match service.create(&record.kind, record.payload, principal).await {
            Ok(_) => report.created += 1,
            Err(ApiError::Conflict { .. }) => report.skipped += 1,
            Err(e) => {
                log::warn!("{}: failed to ingest {}: {}", fetcher.name(), record.kind, e);
                report.failed += 1;
            }
        }
    }

    log::info!(
        "{}: ingested {} created, {} skipped, {} failed",
        fetcher.name(),
        report.created,
        report.skipped,
        report.failed
    );
    Ok(report)
}
