//! Day file store
//!
//! Every operation re-reads the day file from disk; there is no in-memory
//! copy between calls, so a process killed between screens never loses an
//! answer that was already reported as saved. Writes replace the whole file
//! through a temp file and a rename.
//!
//! Failures are logged here and handed back as `Err`; callers only need to
//! decide what to show the user.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use formtwo_common::config::temp_path_for;
use formtwo_common::document::{Answer, MergeAction, SurveyDocument, SurveyRecord};
use formtwo_common::events::{EventBus, FormtwoEvent};
use formtwo_common::time::{today_file_name, Clock, SystemClock, DAY_FILE_EXTENSION};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::error::{StoreError, StoreResult};

/// Whether `create_survey` started a new day file or extended one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentWrite {
    Created,
    Updated,
}

/// Result of merging answers into a day file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Answers that overwrote an existing `qId`
    pub replaced: usize,
    /// Answers appended under a new `qId`
    pub appended: usize,
    /// No record matched the survey number and one was synthesized
    pub recovered: bool,
}

/// What was found on disk for a day file
enum DayFile {
    Missing,
    Parsed(SurveyDocument),
    Corrupt(String),
}

/// Day file store rooted at the survey directory
#[derive(Clone)]
pub struct SurveyStore {
    dir: PathBuf,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl SurveyStore {
    pub fn new(dir: impl Into<PathBuf>, events: EventBus) -> Self {
        Self::with_clock(dir, events, Arc::new(SystemClock))
    }

    pub fn with_clock(dir: impl Into<PathBuf>, events: EventBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            events,
            clock,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Day file name for the store clock's current date
    pub fn today_file_name(&self) -> String {
        today_file_name(self.clock.as_ref())
    }

    /// Full path of a day file, rejecting anything but a plain `*.json` name
    pub fn day_file_path(&self, day_file: &str) -> StoreResult<PathBuf> {
        let is_plain = !day_file.is_empty()
            && !day_file.contains(['/', '\\'])
            && day_file != "."
            && day_file != "..";
        let has_extension = Path::new(day_file)
            .extension()
            .is_some_and(|ext| ext == DAY_FILE_EXTENSION)
            && Path::new(day_file).file_stem().is_some_and(|s| !s.is_empty());

        if is_plain && has_extension {
            Ok(self.dir.join(day_file))
        } else {
            Err(StoreError::InvalidFileName(day_file.to_string()))
        }
    }

    /// Start a new survey record in a day file
    ///
    /// The record is appended without checking for an existing record with the
    /// same survey number; survey numbers are expected to be unique upstream.
    pub async fn create_survey(
        &self,
        day_file: &str,
        survey_number: &str,
    ) -> StoreResult<DocumentWrite> {
        match self.try_create_survey(day_file, survey_number).await {
            Ok(write) => {
                let event = match write {
                    DocumentWrite::Created => FormtwoEvent::DayFileCreated {
                        file_name: day_file.to_string(),
                        survey_number: survey_number.to_string(),
                    },
                    DocumentWrite::Updated => FormtwoEvent::DayFileUpdated {
                        file_name: day_file.to_string(),
                        survey_number: survey_number.to_string(),
                    },
                };
                info!(file = day_file, survey_number, "{}", event.message());
                self.events.emit_lossy(event);
                Ok(write)
            }
            Err(e) => {
                error!(file = day_file, survey_number, error = %e, "Failed to create survey");
                Err(e)
            }
        }
    }

    async fn try_create_survey(
        &self,
        day_file: &str,
        survey_number: &str,
    ) -> StoreResult<DocumentWrite> {
        let path = self.day_file_path(day_file)?;
        let record = SurveyRecord::new(survey_number, &self.clock.now());

        let (doc, write) = match self.load_for_write(&path).await? {
            Some(mut doc) => {
                doc.push_record(record);
                (doc, DocumentWrite::Updated)
            }
            None => (SurveyDocument::with_record(record), DocumentWrite::Created),
        };

        write_document(&path, &doc).await?;
        Ok(write)
    }

    /// Merge answers into the record for `survey_number`
    ///
    /// Each answer replaces the existing answer with the same `qId` in place or
    /// is appended. When the day file has no record for `survey_number`, one is
    /// synthesized holding all incoming answers so nothing is dropped.
    pub async fn upsert_responses<I>(
        &self,
        day_file: &str,
        answers: I,
        survey_number: &str,
    ) -> StoreResult<UpsertOutcome>
    where
        I: IntoIterator<Item = Answer>,
    {
        match self.try_upsert_responses(day_file, answers, survey_number).await {
            Ok(outcome) => {
                info!(
                    file = day_file,
                    survey_number,
                    replaced = outcome.replaced,
                    appended = outcome.appended,
                    recovered = outcome.recovered,
                    "Data saved successfully"
                );
                self.events.emit_lossy(FormtwoEvent::ResponsesSaved {
                    file_name: day_file.to_string(),
                    survey_number: survey_number.to_string(),
                    answers: outcome.replaced + outcome.appended,
                    recovered: outcome.recovered,
                });
                Ok(outcome)
            }
            Err(e) => {
                error!(file = day_file, survey_number, error = %e, "Failed to save data");
                Err(e)
            }
        }
    }

    async fn try_upsert_responses<I>(
        &self,
        day_file: &str,
        answers: I,
        survey_number: &str,
    ) -> StoreResult<UpsertOutcome>
    where
        I: IntoIterator<Item = Answer>,
    {
        let path = self.day_file_path(day_file)?;
        let mut doc = self.load_for_write(&path).await?.unwrap_or_default();

        let mut outcome = UpsertOutcome::default();
        let index = match doc
            .records()
            .iter()
            .position(|r| r.survey_number == survey_number)
        {
            Some(index) => index,
            None => {
                warn!(
                    file = day_file,
                    survey_number, "No record for survey number, creating one"
                );
                outcome.recovered = true;
                doc.push_record(SurveyRecord::new(survey_number, &self.clock.now()));
                doc.records().len() - 1
            }
        };

        let record = &mut doc.payload.responses[index];
        for answer in answers {
            match record.merge_answer(answer) {
                MergeAction::Replaced => outcome.replaced += 1,
                MergeAction::Appended => outcome.appended += 1,
            }
        }

        write_document(&path, &doc).await?;
        Ok(outcome)
    }

    /// Read a day file without any recovery
    ///
    /// A missing file is `NotFound`, an unparsable one is `Parse`. The file is
    /// never modified.
    pub async fn read_document(&self, day_file: &str) -> StoreResult<SurveyDocument> {
        let path = self.day_file_path(day_file)?;
        match read_day_file(&path).await? {
            DayFile::Parsed(doc) => Ok(doc),
            DayFile::Missing => Err(StoreError::NotFound(path)),
            DayFile::Corrupt(message) => Err(StoreError::Parse { path, message }),
        }
    }

    /// Like [`read_document`](Self::read_document), but `None` on any failure
    ///
    /// Callers use this to tell whether a day file exists. Failures other than
    /// a missing file are logged.
    pub async fn fetch_document(&self, day_file: &str) -> Option<SurveyDocument> {
        match self.read_document(day_file).await {
            Ok(doc) => Some(doc),
            Err(StoreError::NotFound(path)) => {
                debug!("File does not exist: {:?}", path);
                None
            }
            Err(e) => {
                error!(file = day_file, error = %e, "Failed to read file");
                None
            }
        }
    }

    /// Load a day file for a read-modify-write
    ///
    /// `None` means the file does not exist. A corrupt file is moved aside and
    /// replaced by an empty document.
    async fn load_for_write(&self, path: &Path) -> StoreResult<Option<SurveyDocument>> {
        match read_day_file(path).await? {
            DayFile::Missing => Ok(None),
            DayFile::Parsed(doc) => Ok(Some(doc)),
            DayFile::Corrupt(message) => {
                let aside = quarantine(path, self.clock.now().timestamp_millis()).await?;
                warn!(
                    path = ?path,
                    moved_to = ?aside,
                    error = %message,
                    "Day file is corrupt, starting from an empty document"
                );
                Ok(Some(SurveyDocument::default()))
            }
        }
    }
}

async fn read_day_file(path: &Path) -> StoreResult<DayFile> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(DayFile::Missing),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let parsed = std::str::from_utf8(&bytes)
        .map_err(|e| e.to_string())
        .and_then(|text| SurveyDocument::from_json(text).map_err(|e| e.to_string()));

    Ok(match parsed {
        Ok(doc) => DayFile::Parsed(doc),
        Err(message) => DayFile::Corrupt(message),
    })
}

/// Move an unparsable day file to `<name>.corrupt-<millis>`
async fn quarantine(path: &Path, stamp: i64) -> StoreResult<PathBuf> {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".corrupt-{}", stamp));
    let aside = path.with_file_name(name);

    tokio::fs::rename(path, &aside)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    Ok(aside)
}

/// Serialize and atomically replace a day file
async fn write_document(path: &Path, doc: &SurveyDocument) -> StoreResult<()> {
    let body = doc.to_pretty_json()?;
    let temp = temp_path_for(path);

    let written = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(body.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(StoreError::io(path, e));
    }

    debug!(path = ?path, bytes = body.len(), "Day file written");
    Ok(())
}

/// Answers from a form-layer JSON value
///
/// Accepts either an array of answer objects or an object whose values are
/// answer objects (keys are ignored, iteration follows document order).
/// Every answer must carry a number or string `qId`.
pub fn answers_from_value(value: Value) -> StoreResult<Vec<Answer>> {
    let answers: Vec<Answer> = match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(_, answer)| serde_json::from_value(answer))
            .collect::<serde_json::Result<_>>()?,
        other => serde_json::from_value(other)?,
    };

    match answers.iter().position(|a| a.question_id.is_none()) {
        Some(index) => Err(StoreError::InvalidAnswer(format!(
            "answer {} has no usable qId",
            index
        ))),
        None => Ok(answers),
    }
}
