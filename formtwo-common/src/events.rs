//! Event types for FormTwo notifications
//!
//! The store and the upload pipeline never talk to a screen directly. Anything
//! the user should see (file created, upload progress, per-item failures) is
//! broadcast as a `FormtwoEvent` and rendered by whoever subscribes.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// FormTwo event types
///
/// Events are broadcast via EventBus and can be serialized for transmission
/// to a UI process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FormtwoEvent {
    /// A new day file was written for the first time
    DayFileCreated {
        file_name: String,
        survey_number: String,
    },

    /// An existing day file received a new survey record
    DayFileUpdated {
        file_name: String,
        survey_number: String,
    },

    /// Answers were merged into a day file
    ResponsesSaved {
        file_name: String,
        survey_number: String,
        /// Number of answers written by this call
        answers: usize,
        /// True when no matching record existed and one was synthesized
        recovered: bool,
    },

    /// Document discovery failed as a whole
    DiscoveryFailed { message: String },

    /// A file was left out of discovery because it could not be read or parsed
    DiscoverySkipped { file_name: String, message: String },

    /// Submit was requested without any selected document
    NothingSelected,

    /// Connectivity check failed; no upload was attempted
    Offline { message: String },

    /// One document's upload has started
    ItemStarted { file_name: String },

    /// Batch progress after an item finished (0.0 ..= 100.0)
    UploadProgress {
        completed: usize,
        total: usize,
        percent: f64,
    },

    /// One document was accepted by the collector
    ItemSucceeded { file_name: String },

    /// One document failed; the batch continues
    ItemFailed { file_name: String, message: String },

    /// Every selected document has been attempted
    BatchCompleted { succeeded: usize, failed: usize },
}

impl FormtwoEvent {
    /// Event name used in logs
    pub fn event_type(&self) -> &str {
        match self {
            FormtwoEvent::DayFileCreated { .. } => "DayFileCreated",
            FormtwoEvent::DayFileUpdated { .. } => "DayFileUpdated",
            FormtwoEvent::ResponsesSaved { .. } => "ResponsesSaved",
            FormtwoEvent::DiscoveryFailed { .. } => "DiscoveryFailed",
            FormtwoEvent::DiscoverySkipped { .. } => "DiscoverySkipped",
            FormtwoEvent::NothingSelected => "NothingSelected",
            FormtwoEvent::Offline { .. } => "Offline",
            FormtwoEvent::ItemStarted { .. } => "ItemStarted",
            FormtwoEvent::UploadProgress { .. } => "UploadProgress",
            FormtwoEvent::ItemSucceeded { .. } => "ItemSucceeded",
            FormtwoEvent::ItemFailed { .. } => "ItemFailed",
            FormtwoEvent::BatchCompleted { .. } => "BatchCompleted",
        }
    }

    /// Human-readable notification text
    pub fn message(&self) -> String {
        match self {
            FormtwoEvent::DayFileCreated { file_name, .. } => {
                format!("File {} created and updated", file_name)
            }
            FormtwoEvent::DayFileUpdated { file_name, .. } => {
                format!("File {} updated", file_name)
            }
            FormtwoEvent::ResponsesSaved { file_name, answers, .. } => {
                format!("Saved {} answer(s) to {}", answers, file_name)
            }
            FormtwoEvent::DiscoveryFailed { message } => format!("Error reading files: {}", message),
            FormtwoEvent::DiscoverySkipped { file_name, message } => {
                format!("Skipped {}: {}", file_name, message)
            }
            FormtwoEvent::NothingSelected => "Please select at least one survey.".to_string(),
            FormtwoEvent::Offline { message } => message.clone(),
            FormtwoEvent::ItemStarted { file_name } => format!("Uploading {}", file_name),
            FormtwoEvent::UploadProgress { completed, total, percent } => {
                format!("Uploaded {}/{} ({:.0}%)", completed, total, percent)
            }
            FormtwoEvent::ItemSucceeded { file_name } => format!("{} uploaded", file_name),
            FormtwoEvent::ItemFailed { message, .. } => message.clone(),
            FormtwoEvent::BatchCompleted { .. } => {
                "Survey processing finished. Check the individual results.".to_string()
            }
        }
    }
}

/// Broadcast bus for FormTwo events
///
/// Cloning the bus shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FormtwoEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before the
    /// oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<FormtwoEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: FormtwoEvent) {
        tracing::debug!(event = event.event_type(), "{}", event.message());
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
