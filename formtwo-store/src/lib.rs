//! formtwo-store library - day file store with merge semantics
//!
//! Exposes `SurveyStore` for the CLI and for integration testing

pub mod error;
pub mod store;

pub use crate::error::{StoreError, StoreResult};
pub use crate::store::{answers_from_value, DocumentWrite, SurveyStore, UpsertOutcome};
