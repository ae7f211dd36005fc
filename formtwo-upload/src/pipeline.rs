//! Batch upload pipeline
//!
//! Per-document lifecycle:
//!
//! ```text
//! Discovered → Selected → (ItemStarted) → Succeeded
//!                                       ↘ Failed
//! ```
//!
//! While a batch runs the pipeline is borrowed, so the in-flight step is only
//! visible through the `ItemStarted` event on the bus.
//!
//! `discover()` rebuilds the list from disk, so a failed document comes back
//! as `Discovered` after every batch. Retrying means running a new batch.
//!
//! A batch is gated by a single connectivity check. Items are then uploaded
//! through a worker pool of `concurrency` slots (1 by default, i.e. strictly
//! one after the other). An item's failure is reported right away and never
//! stops the remaining items.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use formtwo_common::config::{DiscoveryPolicy, UploadConfig};
use formtwo_common::events::{EventBus, FormtwoEvent};
use formtwo_common::time::DAY_FILE_EXTENSION;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::collector::{Collector, HttpCollector};
use crate::connectivity::{ConnectivityProbe, TcpProbe};
use crate::error::{PipelineError, UploadError};

/// Where a document stands in the upload lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Discovered,
    Selected,
    Succeeded,
    Failed,
}

/// A day file found in the survey directory
#[derive(Debug, Clone)]
pub struct DiscoveredDocument {
    pub name: String,
    pub path: PathBuf,
    /// Parsed content
    pub content: Value,
    /// Exact file content, sent as the request body
    pub raw: String,
    pub selected: bool,
}

impl DiscoveredDocument {
    pub fn state(&self) -> DocumentState {
        if self.selected {
            DocumentState::Selected
        } else {
            DocumentState::Discovered
        }
    }
}

/// A day file left out by `DiscoveryPolicy::SkipInvalid`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub name: String,
    pub message: String,
}

/// Result of uploading one document
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub file_name: String,
    pub result: Result<Value, UploadError>,
}

impl ItemOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn state(&self) -> DocumentState {
        if self.succeeded() {
            DocumentState::Succeeded
        } else {
            DocumentState::Failed
        }
    }

    /// User-facing description of the outcome
    pub fn message(&self) -> String {
        match &self.result {
            Ok(_) => format!("{} uploaded", self.file_name),
            Err(e) => format!("Error processing {}: {}", self.file_name, e),
        }
    }
}

/// Outcome of one `submit_selected` call
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// One entry per selected document, in selection order
    pub outcomes: Vec<ItemOutcome>,
    /// Progress reached when the last item finished (before the reset to 0)
    pub final_progress: f64,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Upload pipeline over one survey directory
pub struct UploadPipeline {
    dir: PathBuf,
    collector: Arc<dyn Collector>,
    probe: Arc<dyn ConnectivityProbe>,
    events: EventBus,
    policy: DiscoveryPolicy,
    timeout: Duration,
    concurrency: usize,
    documents: Vec<DiscoveredDocument>,
    skipped: Vec<SkippedFile>,
    error: Option<String>,
    progress: f64,
    processing: bool,
}

impl UploadPipeline {
    /// Pipeline with default settings (strict discovery, 30 s timeout, sequential)
    pub fn new(
        dir: impl Into<PathBuf>,
        collector: Arc<dyn Collector>,
        probe: Arc<dyn ConnectivityProbe>,
        events: EventBus,
    ) -> Self {
        let defaults = UploadConfig::default();
        Self {
            dir: dir.into(),
            collector,
            probe,
            events,
            policy: defaults.discovery,
            timeout: defaults.timeout(),
            concurrency: defaults.concurrency,
            documents: Vec::new(),
            skipped: Vec::new(),
            error: None,
            progress: 0.0,
            processing: false,
        }
    }

    /// Pipeline talking HTTP to the configured collector
    pub fn from_config(
        dir: impl Into<PathBuf>,
        config: &UploadConfig,
        events: EventBus,
    ) -> Result<Self, UploadError> {
        let collector = HttpCollector::new(&config.collector_url, config.timeout())?;
        let probe = TcpProbe::for_url(&config.collector_url, config.connect_check_timeout())?;

        Ok(Self::new(dir, Arc::new(collector), Arc::new(probe), events)
            .with_discovery_policy(config.discovery)
            .with_timeout(config.timeout())
            .with_concurrency(config.concurrency))
    }

    pub fn with_discovery_policy(mut self, policy: DiscoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of uploads in flight at once (clamped to at least 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn documents(&self) -> &[DiscoveredDocument] {
        &self.documents
    }

    pub fn skipped(&self) -> &[SkippedFile] {
        &self.skipped
    }

    /// Pipeline-level error left by the last discovery, if it failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Batch progress in percent; 0 outside of `submit_selected`
    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// Rebuild the document list from the survey directory
    ///
    /// Documents are listed by name. Under `DiscoveryPolicy::Strict` a single
    /// unreadable or unparsable file fails the whole discovery and leaves the
    /// list empty.
    pub async fn discover(&mut self) -> Result<&[DiscoveredDocument], PipelineError> {
        match self.scan().await {
            Ok((documents, skipped)) => {
                info!(
                    dir = ?self.dir,
                    documents = documents.len(),
                    skipped = skipped.len(),
                    "Discovered survey documents"
                );
                self.documents = documents;
                self.skipped = skipped;
                self.error = None;
                Ok(&self.documents)
            }
            Err(e) => {
                error!(dir = ?self.dir, error = %e, "Document discovery failed");
                self.documents.clear();
                self.skipped.clear();
                self.error = Some(e.to_string());
                self.events.emit_lossy(FormtwoEvent::DiscoveryFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn scan(&self) -> Result<(Vec<DiscoveredDocument>, Vec<SkippedFile>), PipelineError> {
        let listing_error =
            |e: std::io::Error| PipelineError::Discovery(format!("{}: {}", self.dir.display(), e));

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(listing_error)?;
        let suffix = format!(".{}", DAY_FILE_EXTENSION);

        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(listing_error)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(&suffix) {
                continue;
            }
            let path = entry.path();
            // Follows symlinks; directories named *.json are not documents
            match tokio::fs::metadata(&path).await {
                Ok(meta) if !meta.is_file() => continue,
                _ => candidates.push((name, path)),
            }
        }
        candidates.sort();

        let mut documents = Vec::with_capacity(candidates.len());
        let mut skipped = Vec::new();
        for (name, path) in candidates {
            match read_document(&path).await {
                Ok((raw, content)) => documents.push(DiscoveredDocument {
                    name,
                    path,
                    content,
                    raw,
                    selected: false,
                }),
                Err(message) => match self.policy {
                    DiscoveryPolicy::Strict => {
                        return Err(PipelineError::Discovery(format!("{}: {}", name, message)));
                    }
                    DiscoveryPolicy::SkipInvalid => {
                        warn!(file = %name, error = %message, "Skipping unreadable survey document");
                        self.events.emit_lossy(FormtwoEvent::DiscoverySkipped {
                            file_name: name.clone(),
                            message: message.clone(),
                        });
                        skipped.push(SkippedFile { name, message });
                    }
                },
            }
        }

        Ok((documents, skipped))
    }

    /// Flip the selection of one document
    pub fn toggle_selection(&mut self, index: usize) -> Result<(), PipelineError> {
        let len = self.documents.len();
        let document = self
            .documents
            .get_mut(index)
            .ok_or(PipelineError::IndexOutOfRange { index, len })?;
        document.selected = !document.selected;
        Ok(())
    }

    /// Upload every selected document
    ///
    /// Fails before sending anything when nothing is selected or the collector
    /// is unreachable. Otherwise every selected document is attempted; the
    /// per-document results are in the returned report. The document list is
    /// refreshed from disk afterwards and progress goes back to 0.
    pub async fn submit_selected(&mut self) -> Result<BatchReport, PipelineError> {
        let selected: Vec<usize> = self
            .documents
            .iter()
            .enumerate()
            .filter(|(_, d)| d.selected)
            .map(|(i, _)| i)
            .collect();

        if selected.is_empty() {
            warn!("Submit requested with no survey selected");
            self.events.emit_lossy(FormtwoEvent::NothingSelected);
            return Err(PipelineError::NothingSelected);
        }

        self.processing = true;
        self.progress = 0.0;
        let result = self.run_batch(&selected).await;
        self.processing = false;
        self.progress = 0.0;

        if let Err(e) = &result {
            error!(error = %e, "Survey batch aborted");
        }
        result
    }

    async fn run_batch(&mut self, selected: &[usize]) -> Result<BatchReport, PipelineError> {
        if !self.probe.is_connected().await {
            let e = PipelineError::Offline;
            self.events.emit_lossy(FormtwoEvent::Offline {
                message: e.to_string(),
            });
            return Err(e);
        }

        let jobs: Vec<(String, String)> = selected
            .iter()
            .map(|&i| (self.documents[i].name.clone(), self.documents[i].raw.clone()))
            .collect();
        let total = jobs.len();
        info!(total, concurrency = self.concurrency, "Starting survey batch");

        let collector = Arc::clone(&self.collector);
        let events = self.events.clone();
        let timeout = self.timeout;
        let mut uploads = futures::stream::iter(jobs.into_iter().enumerate())
            .map(move |(position, (file_name, body))| {
                let collector = Arc::clone(&collector);
                let events = events.clone();
                async move {
                    events.emit_lossy(FormtwoEvent::ItemStarted {
                        file_name: file_name.clone(),
                    });
                    let result = upload_one(collector.as_ref(), &file_name, &body, timeout).await;
                    (position, ItemOutcome { file_name, result })
                }
            })
            .buffer_unordered(self.concurrency);

        let mut slots: Vec<Option<ItemOutcome>> = (0..total).map(|_| None).collect();
        let mut completed = 0usize;
        while let Some((position, outcome)) = uploads.next().await {
            completed += 1;
            self.progress = completed as f64 / total as f64 * 100.0;
            self.report_item(&outcome);
            self.events.emit_lossy(FormtwoEvent::UploadProgress {
                completed,
                total,
                percent: self.progress,
            });
            slots[position] = Some(outcome);
        }
        drop(uploads);

        let report = BatchReport {
            outcomes: slots.into_iter().flatten().collect(),
            final_progress: self.progress,
        };

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Survey batch completed"
        );
        self.events.emit_lossy(FormtwoEvent::BatchCompleted {
            succeeded: report.succeeded(),
            failed: report.failed(),
        });

        // A failed refresh is already recorded as the pipeline error state
        let _ = self.discover().await;

        Ok(report)
    }

    fn report_item(&self, outcome: &ItemOutcome) {
        match &outcome.result {
            Ok(_) => {
                info!(file = %outcome.file_name, "Survey document uploaded");
                self.events.emit_lossy(FormtwoEvent::ItemSucceeded {
                    file_name: outcome.file_name.clone(),
                });
            }
            Err(e) => {
                error!(file = %outcome.file_name, error = %e, "Error processing survey");
                self.events.emit_lossy(FormtwoEvent::ItemFailed {
                    file_name: outcome.file_name.clone(),
                    message: outcome.message(),
                });
            }
        }
    }
}

/// One upload with the per-document timeout and panic isolation
async fn upload_one(
    collector: &dyn Collector,
    file_name: &str,
    body: &str,
    timeout: Duration,
) -> Result<Value, UploadError> {
    let attempt = tokio::time::timeout(timeout, collector.submit(file_name, body));
    match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(_elapsed)) => Err(UploadError::Timeout(timeout)),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "upload task panicked".to_string());
            Err(UploadError::Unexpected(message))
        }
    }
}

async fn read_document(path: &Path) -> Result<(String, Value), String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| e.to_string())?;
    let content = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
    Ok((raw, content))
}
