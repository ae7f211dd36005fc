//! formtwo-upload library - batch upload of day files to the collector
//!
//! Exposes the pipeline and its collaborators for the CLI and for
//! integration testing

pub mod collector;
pub mod connectivity;
pub mod error;
pub mod pipeline;

pub use crate::collector::{Collector, HttpCollector};
pub use crate::connectivity::{ConnectivityProbe, TcpProbe};
pub use crate::error::{PipelineError, UploadError};
pub use crate::pipeline::{
    BatchReport, DiscoveredDocument, DocumentState, ItemOutcome, SkippedFile, UploadPipeline,
};
