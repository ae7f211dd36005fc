//! Day file store integration tests
//!
//! Covers create/upsert/fetch against a real survey directory:
//! - last-write-wins merge, no duplicate qId
//! - upsert on a missing day file
//! - create ordering and created/updated notifications
//! - corrupt day files in write and read paths
//! - write/read round trip

use std::sync::Arc;

use chrono::{Local, TimeZone};
use formtwo_common::document::{Answer, QuestionId, SurveyDocument};
use formtwo_common::events::{EventBus, FormtwoEvent};
use formtwo_common::time::FixedClock;
use formtwo_store::{DocumentWrite, StoreError, SurveyStore};
use serde_json::{json, Value};
use tempfile::TempDir;

const DAY: &str = "2024-03-07.json";

fn test_store(dir: &TempDir) -> (SurveyStore, EventBus) {
    let clock = FixedClock(Local.with_ymd_and_hms(2024, 3, 7, 10, 30, 0).unwrap());
    let events = EventBus::new(64);
    let store = SurveyStore::with_clock(dir.path(), events.clone(), Arc::new(clock));
    (store, events)
}

fn answer_values(doc: &SurveyDocument, survey_number: &str) -> Vec<(String, Value)> {
    doc.find_record(survey_number)
        .unwrap()
        .answers
        .iter()
        .map(|a| {
            let id = a.question_id.as_ref().map(ToString::to_string).unwrap_or_default();
            (id, a.payload["value"].clone())
        })
        .collect()
}

#[tokio::test]
async fn test_create_twice_keeps_call_order() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);

    assert_eq!(store.create_survey(DAY, "S-1").await.unwrap(), DocumentWrite::Created);
    assert_eq!(store.create_survey(DAY, "S-2").await.unwrap(), DocumentWrite::Updated);

    let doc = store.fetch_document(DAY).await.unwrap();
    let numbers: Vec<&str> = doc.records().iter().map(|r| r.survey_number.as_str()).collect();
    assert_eq!(numbers, vec!["S-1", "S-2"]);
    assert_eq!(doc.survey_id, 1);
}

#[tokio::test]
async fn test_create_notifies_created_then_updated() {
    let dir = TempDir::new().unwrap();
    let (store, events) = test_store(&dir);
    let mut rx = events.subscribe();

    store.create_survey(DAY, "S-1").await.unwrap();
    store.create_survey(DAY, "S-2").await.unwrap();

    assert!(matches!(rx.recv().await.unwrap(), FormtwoEvent::DayFileCreated { .. }));
    assert!(matches!(rx.recv().await.unwrap(), FormtwoEvent::DayFileUpdated { .. }));
}

#[tokio::test]
async fn test_create_does_not_dedup_survey_numbers() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);

    store.create_survey(DAY, "S-1").await.unwrap();
    store.create_survey(DAY, "S-1").await.unwrap();

    assert_eq!(store.fetch_document(DAY).await.unwrap().records().len(), 2);
}

#[tokio::test]
async fn test_upsert_last_write_wins() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);
    store.create_survey(DAY, "S-1").await.unwrap();

    store
        .upsert_responses(
            DAY,
            vec![Answer::with_value(1, "a"), Answer::with_value(2, "b")],
            "S-1",
        )
        .await
        .unwrap();
    let outcome = store
        .upsert_responses(
            DAY,
            vec![Answer::with_value(2, "B"), Answer::with_value(3, "c")],
            "S-1",
        )
        .await
        .unwrap();

    assert_eq!(outcome.replaced, 1);
    assert_eq!(outcome.appended, 1);
    assert!(!outcome.recovered);

    let doc = store.fetch_document(DAY).await.unwrap();
    assert_eq!(
        answer_values(&doc, "S-1"),
        vec![
            ("1".to_string(), json!("a")),
            ("2".to_string(), json!("B")),
            ("3".to_string(), json!("c")),
        ]
    );
}

#[tokio::test]
async fn test_upsert_only_touches_matching_record() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);
    store.create_survey(DAY, "S-1").await.unwrap();
    store.create_survey(DAY, "S-2").await.unwrap();

    store
        .upsert_responses(DAY, vec![Answer::with_value("q", 1)], "S-2")
        .await
        .unwrap();

    let doc = store.fetch_document(DAY).await.unwrap();
    assert!(doc.find_record("S-1").unwrap().answers.is_empty());
    assert_eq!(doc.find_record("S-2").unwrap().answers.len(), 1);
}

#[tokio::test]
async fn test_upsert_on_missing_file_creates_single_record() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);

    let outcome = store
        .upsert_responses(
            DAY,
            vec![Answer::with_value(7, "x"), Answer::with_value(8, "y")],
            "S-9",
        )
        .await
        .unwrap();
    assert!(outcome.recovered);

    let doc = store.fetch_document(DAY).await.unwrap();
    assert_eq!(doc.records().len(), 1);
    let record = &doc.records()[0];
    assert_eq!(record.survey_number, "S-9");
    assert!(!record.created_at_timestamp.is_empty());
    assert_eq!(
        answer_values(&doc, "S-9"),
        vec![("7".to_string(), json!("x")), ("8".to_string(), json!("y"))]
    );
}

#[tokio::test]
async fn test_upsert_recovers_missing_record_in_existing_file() {
    let dir = TempDir::new().unwrap();
    let (store, events) = test_store(&dir);
    store.create_survey(DAY, "S-1").await.unwrap();
    let mut rx = events.subscribe();

    store
        .upsert_responses(DAY, vec![Answer::with_value(1, "lost?")], "S-404")
        .await
        .unwrap();

    let doc = store.fetch_document(DAY).await.unwrap();
    assert_eq!(doc.records().len(), 2);
    assert_eq!(answer_values(&doc, "S-404"), vec![("1".to_string(), json!("lost?"))]);
    assert!(matches!(
        rx.recv().await.unwrap(),
        FormtwoEvent::ResponsesSaved { recovered: true, answers: 1, .. }
    ));
}

#[tokio::test]
async fn test_upsert_sets_missing_surveyid() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);
    std::fs::write(
        dir.path().join(DAY),
        r#"{"payload":{"responses":[{"nroEnCuesta":"S-1","hora":"1","responses":[]}]}}"#,
    )
    .unwrap();

    store
        .upsert_responses(DAY, vec![Answer::with_value(1, "a")], "S-1")
        .await
        .unwrap();

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(dir.path().join(DAY)).unwrap()).unwrap();
    assert_eq!(raw["surveyid"], json!(1));
    assert_eq!(raw["payload"]["responses"][0]["responses"][0]["qId"], json!(1));
}

#[tokio::test]
async fn test_corrupt_file_does_not_break_upsert() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);
    std::fs::write(dir.path().join(DAY), "{ not json").unwrap();

    store
        .upsert_responses(DAY, vec![Answer::with_value(1, "a")], "S-1")
        .await
        .unwrap();

    let doc = store.fetch_document(DAY).await.unwrap();
    assert_eq!(doc.records().len(), 1);
    assert_eq!(doc.records()[0].survey_number, "S-1");
}

#[tokio::test]
async fn test_corrupt_file_does_not_break_create_and_is_kept_aside() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);
    std::fs::write(dir.path().join(DAY), [0xff, 0xfe, 0x00]).unwrap();

    store.create_survey(DAY, "S-1").await.unwrap();

    let doc = store.fetch_document(DAY).await.unwrap();
    assert_eq!(doc.records().len(), 1);

    let quarantined: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("2024-03-07.json.corrupt-"))
        .collect();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(
        std::fs::read(dir.path().join(&quarantined[0])).unwrap(),
        vec![0xff, 0xfe, 0x00]
    );
}

#[tokio::test]
async fn test_fetch_missing_is_none() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);
    assert!(store.fetch_document(DAY).await.is_none());
}

#[tokio::test]
async fn test_fetch_corrupt_is_none_and_untouched() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);
    std::fs::write(dir.path().join(DAY), "[1, 2").unwrap();

    assert!(store.fetch_document(DAY).await.is_none());
    // Read path never repairs
    assert_eq!(std::fs::read_to_string(dir.path().join(DAY)).unwrap(), "[1, 2");
}

#[tokio::test]
async fn test_read_document_reports_missing_and_corrupt() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);

    let result = store.read_document(DAY).await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));

    std::fs::write(dir.path().join(DAY), "{ not json").unwrap();
    let result = store.read_document(DAY).await;
    assert!(matches!(result, Err(StoreError::Parse { .. })));

    let result = store.read_document("notes.txt").await;
    assert!(matches!(result, Err(StoreError::InvalidFileName(_))));
}

fn day_file_names(dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_malformed_surveyid_is_normalized_not_quarantined() {
    for surveyid in [json!(null), json!("1")] {
        let dir = TempDir::new().unwrap();
        let (store, _) = test_store(&dir);
        let existing = json!({
            "surveyid": surveyid,
            "payload": { "responses": [{
                "nroEnCuesta": "OLD",
                "hora": "1709800000000",
                "responses": [{ "qId": 1, "value": "keep" }]
            }]}
        });
        std::fs::write(dir.path().join(DAY), existing.to_string()).unwrap();

        let outcome = store
            .upsert_responses(DAY, vec![Answer::with_value(2, "new")], "OLD")
            .await
            .unwrap();

        assert!(!outcome.recovered);
        assert_eq!(day_file_names(&dir), vec![DAY.to_string()]);
        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(DAY)).unwrap()).unwrap();
        assert_eq!(raw["surveyid"], json!(1));
        let doc = store.fetch_document(DAY).await.unwrap();
        assert_eq!(
            answer_values(&doc, "OLD"),
            vec![("1".to_string(), json!("keep")), ("2".to_string(), json!("new"))]
        );
    }
}

#[tokio::test]
async fn test_payload_carrying_qid_reads_back() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);
    store.create_survey(DAY, "S-1").await.unwrap();

    let payload = serde_json::from_value(json!({ "qId": 1, "value": "a" })).unwrap();
    store
        .upsert_responses(DAY, vec![Answer::new(1, payload)], "S-1")
        .await
        .unwrap();

    let text = std::fs::read_to_string(dir.path().join(DAY)).unwrap();
    assert_eq!(text.matches("\"qId\"").count(), 1);
    let doc = store.fetch_document(DAY).await.unwrap();
    assert_eq!(answer_values(&doc, "S-1"), vec![("1".to_string(), json!("a"))]);

    // A second write still finds and replaces the same answer
    store
        .upsert_responses(DAY, vec![Answer::with_value(1, "b")], "S-1")
        .await
        .unwrap();
    let doc = store.fetch_document(DAY).await.unwrap();
    assert_eq!(answer_values(&doc, "S-1"), vec![("1".to_string(), json!("b"))]);
    assert_eq!(day_file_names(&dir), vec![DAY.to_string()]);
}

#[tokio::test]
async fn test_record_without_hora_survives_write() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);
    let existing = json!({
        "surveyid": 1,
        "payload": { "responses": [
            { "nroEnCuesta": "A", "responses": [{ "qId": 1, "value": "x" }] }
        ]}
    });
    std::fs::write(dir.path().join(DAY), existing.to_string()).unwrap();

    store.create_survey(DAY, "B").await.unwrap();

    assert_eq!(day_file_names(&dir), vec![DAY.to_string()]);
    let doc = store.fetch_document(DAY).await.unwrap();
    let numbers: Vec<&str> = doc.records().iter().map(|r| r.survey_number.as_str()).collect();
    assert_eq!(numbers, vec!["A", "B"]);
    assert_eq!(answer_values(&doc, "A"), vec![("1".to_string(), json!("x"))]);
}

#[tokio::test]
async fn test_answer_without_qid_is_kept_untouched() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);
    let existing = json!({
        "surveyid": 1,
        "payload": { "responses": [{
            "nroEnCuesta": "A",
            "hora": "1709800000000",
            "responses": [{ "value": "orphan" }, { "qId": 1, "value": "x" }]
        }]}
    });
    std::fs::write(dir.path().join(DAY), existing.to_string()).unwrap();

    let outcome = store
        .upsert_responses(DAY, vec![Answer::with_value(1, "y")], "A")
        .await
        .unwrap();

    assert_eq!(outcome.replaced, 1);
    assert_eq!(day_file_names(&dir), vec![DAY.to_string()]);
    let raw: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join(DAY)).unwrap()).unwrap();
    assert_eq!(
        raw["payload"]["responses"][0]["responses"],
        json!([{ "value": "orphan" }, { "qId": 1, "value": "y" }])
    );
}

#[tokio::test]
async fn test_round_trip_is_structurally_identical() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);

    let original = json!({
        "payload": {
            "responses": [{
                "responses": [
                    { "value": { "opcion": 2, "otro": null }, "qId": "p1", "tipo": "radio" }
                ],
                "hora": "1709807400000",
                "nroEnCuesta": "S-1",
                "fecha": "2024-03-07"
            }]
        },
        "surveyid": 1
    });
    std::fs::write(dir.path().join(DAY), original.to_string()).unwrap();

    // A replace of an identical answer rewrites the file without changing content
    let same = Answer::new(
        "p1",
        serde_json::from_value(json!({ "value": { "opcion": 2, "otro": null }, "tipo": "radio" })).unwrap(),
    );
    store.upsert_responses(DAY, vec![same], "S-1").await.unwrap();

    let written: Value = serde_json::from_str(&std::fs::read_to_string(dir.path().join(DAY)).unwrap()).unwrap();
    assert_eq!(written, original);

    let doc = store.fetch_document(DAY).await.unwrap();
    assert_eq!(serde_json::to_value(&doc).unwrap(), original);
    assert!(doc
        .find_record("S-1")
        .unwrap()
        .answer(&QuestionId::Text("p1".into()))
        .is_some());
}

#[tokio::test]
async fn test_written_file_is_pretty_printed() {
    let dir = TempDir::new().unwrap();
    let (store, _) = test_store(&dir);
    store.create_survey(DAY, "S-1").await.unwrap();

    let text = std::fs::read_to_string(dir.path().join(DAY)).unwrap();
    assert!(text.starts_with("{\n  \"surveyid\": 1,\n  \"payload\": {"));
}

#[tokio::test]
async fn test_unwritable_directory_reports_io_error() {
    let dir = TempDir::new().unwrap();
    let missing_dir = dir.path().join("not-created");
    let store = SurveyStore::new(&missing_dir, EventBus::new(4));

    let result = store
        .upsert_responses(DAY, vec![Answer::with_value(1, "a")], "S-1")
        .await;
    assert!(matches!(result, Err(StoreError::Io { .. })));
}
