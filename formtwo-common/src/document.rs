//! Day file document model
//!
//! One `SurveyDocument` is persisted per calendar day. The field names on the
//! wire (`surveyid`, `payload.responses`, `nroEnCuesta`, `fecha`, `hora`,
//! `responses[].qId`) are shared with collectors already in the field and must
//! not change.
//!
//! ```json
//! {
//!   "surveyid": 1,
//!   "payload": {
//!     "responses": [
//!       { "nroEnCuesta": "A-17", "fecha": "2024-03-07", "hora": "1709802300000",
//!         "responses": [ { "qId": 3, "value": "si" } ] }
//!     ]
//!   }
//! }
//! ```
//!
//! Unknown fields at every level are kept in `extra` maps so a
//! read-modify-write never drops data written by a newer form layer.

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::time::{calendar_date, epoch_millis};

/// Current document schema tag
pub const CURRENT_SURVEY_ID: u32 = 1;

fn default_survey_id() -> u32 {
    CURRENT_SURVEY_ID
}

/// Any `surveyid` that is not a valid tag (`null`, a string, a negative
/// number) reads as the current one; writes then normalize it.
fn lenient_survey_id<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .unwrap_or(CURRENT_SURVEY_ID))
}

/// All survey sessions captured on one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyDocument {
    /// Schema/version tag, defaulted to 1 for files written before it existed
    #[serde(
        rename = "surveyid",
        default = "default_survey_id",
        deserialize_with = "lenient_survey_id"
    )]
    pub survey_id: u32,

    #[serde(default)]
    pub payload: Payload,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Wrapper object around the record list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub responses: Vec<SurveyRecord>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One survey-taking session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyRecord {
    /// Caller-supplied session identifier
    #[serde(rename = "nroEnCuesta")]
    pub survey_number: String,

    /// Capture date (`YYYY-MM-DD`)
    #[serde(rename = "fecha", default, skip_serializing_if = "Option::is_none")]
    pub created_at_date: Option<String>,

    /// Capture time as epoch milliseconds (empty when the file lacked it)
    #[serde(rename = "hora", default)]
    pub created_at_timestamp: String,

    #[serde(rename = "responses", default)]
    pub answers: Vec<Answer>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One question's response
///
/// Only `qId` is interpreted. Everything else belongs to the form layer and is
/// carried through untouched. An entry whose `qId` is missing or is neither a
/// number nor a string has no `question_id`; it keeps its raw fields in
/// `payload` and never matches during a merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Answer {
    pub question_id: Option<QuestionId>,

    /// Every field except an interpreted `qId`
    pub payload: Map<String, Value>,
}

/// Question identifier as written by the form layer (number or string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionId {
    Number(i64),
    Text(String),
}

/// What `SurveyRecord::merge_answer` did with an incoming answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    Replaced,
    Appended,
}

impl Default for SurveyDocument {
    fn default() -> Self {
        Self {
            survey_id: CURRENT_SURVEY_ID,
            payload: Payload::default(),
            extra: Map::new(),
        }
    }
}

impl SurveyDocument {
    /// Document holding a single record
    pub fn with_record(record: SurveyRecord) -> Self {
        let mut doc = Self::default();
        doc.payload.responses.push(record);
        doc
    }

    /// Parse a day file's contents
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Pretty-printed JSON with two-space indentation
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn records(&self) -> &[SurveyRecord] {
        &self.payload.responses
    }

    pub fn push_record(&mut self, record: SurveyRecord) {
        self.payload.responses.push(record);
    }

    pub fn find_record(&self, survey_number: &str) -> Option<&SurveyRecord> {
        self.payload
            .responses
            .iter()
            .find(|r| r.survey_number == survey_number)
    }
}

impl SurveyRecord {
    /// Fresh record stamped with the given capture time and no answers
    pub fn new(survey_number: impl Into<String>, at: &DateTime<Local>) -> Self {
        Self {
            survey_number: survey_number.into(),
            created_at_date: Some(calendar_date(at)),
            created_at_timestamp: epoch_millis(at),
            answers: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn answer(&self, question_id: &QuestionId) -> Option<&Answer> {
        self.answers
            .iter()
            .find(|a| a.question_id.as_ref() == Some(question_id))
    }

    /// Last-write-wins merge of one answer
    ///
    /// An answer whose `qId` already exists replaces the old one at the same
    /// position; a new `qId`, or no `qId` at all, is appended.
    pub fn merge_answer(&mut self, answer: Answer) -> MergeAction {
        let slot = match &answer.question_id {
            Some(id) => self
                .answers
                .iter_mut()
                .find(|existing| existing.question_id.as_ref() == Some(id)),
            None => None,
        };
        match slot {
            Some(slot) => {
                *slot = answer;
                MergeAction::Replaced
            }
            None => {
                self.answers.push(answer);
                MergeAction::Appended
            }
        }
    }

    /// Merge answers in iteration order, returning how many were replaced
    pub fn merge_answers<I>(&mut self, answers: I) -> usize
    where
        I: IntoIterator<Item = Answer>,
    {
        answers
            .into_iter()
            .map(|a| self.merge_answer(a))
            .filter(|action| *action == MergeAction::Replaced)
            .count()
    }
}

impl Answer {
    /// Answer for `question_id`; a `qId` key already in `payload` is dropped
    pub fn new(question_id: impl Into<QuestionId>, mut payload: Map<String, Value>) -> Self {
        payload.shift_remove(QID_KEY);
        Self {
            question_id: Some(question_id.into()),
            payload,
        }
    }

    /// Answer carrying a single `value` field
    pub fn with_value(question_id: impl Into<QuestionId>, value: impl Into<Value>) -> Self {
        let mut payload = Map::new();
        payload.insert("value".to_string(), value.into());
        Self::new(question_id, payload)
    }
}

const QID_KEY: &str = "qId";

impl From<Map<String, Value>> for Answer {
    fn from(mut fields: Map<String, Value>) -> Self {
        let question_id = match fields.get(QID_KEY) {
            Some(Value::String(id)) => Some(QuestionId::Text(id.clone())),
            Some(Value::Number(n)) => n.as_i64().map(QuestionId::Number),
            _ => None,
        };
        // An unusable qId stays in place with the rest of the entry
        if question_id.is_some() {
            fields.shift_remove(QID_KEY);
        }
        Self {
            question_id,
            payload: fields,
        }
    }
}

impl From<Answer> for Map<String, Value> {
    fn from(answer: Answer) -> Self {
        let mut fields = Map::with_capacity(answer.payload.len() + 1);
        match answer.question_id {
            Some(id) => {
                fields.insert(QID_KEY.to_string(), id.into());
                fields.extend(answer.payload.into_iter().filter(|(k, _)| k != QID_KEY));
            }
            None => fields.extend(answer.payload),
        }
        fields
    }
}

impl From<QuestionId> for Value {
    fn from(id: QuestionId) -> Self {
        match id {
            QuestionId::Number(n) => Value::from(n),
            QuestionId::Text(s) => Value::String(s),
        }
    }
}

impl From<i64> for QuestionId {
    fn from(id: i64) -> Self {
        QuestionId::Number(id)
    }
}

impl From<i32> for QuestionId {
    fn from(id: i32) -> Self {
        QuestionId::Number(id.into())
    }
}

impl From<&str> for QuestionId {
    fn from(id: &str) -> Self {
        QuestionId::Text(id.to_string())
    }
}

impl From<String> for QuestionId {
    fn from(id: String) -> Self {
        QuestionId::Text(id)
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionId::Number(n) => write!(f, "{}", n),
            QuestionId::Text(s) => f.write_str(s),
        }
    }
}
