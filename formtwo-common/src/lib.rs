//! # FormTwo Common Library
//!
//! Shared code for the FormTwo survey store and upload pipeline:
//! - Day file document model (`SurveyDocument`, `SurveyRecord`, `Answer`)
//! - Event types and EventBus for user-visible notifications
//! - Configuration loading and survey directory resolution
//! - Time and day file naming helpers

pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod logging;
pub mod time;

pub use document::{Answer, QuestionId, SurveyDocument, SurveyRecord};
pub use error::{Error, Result};
pub use events::{EventBus, FormtwoEvent};
