//! Test: independent steps keep their per-run state to themselves

use crate::helpers::*;
use stpipe::logging::capture_subscriber;
use stpipe::{Model, Step, StepData, Value};

fn named_calibrate(name: &str, reftype: &str, references: RecordingReferences) -> Step {
    Step::new(
        &CALIBRATE,
        Some(name),
        &keywords(&[("reftype", Value::from(reftype))]),
        services().with_references(references),
    )
    .unwrap()
}

#[test]
fn test_sequential_runs_do_not_share_state() {
    let references = RecordingReferences::default()
        .with_answer("flat", "/refs/jwst_flat_0001.fits")
        .with_answer("dark", "N/A");
    let mut a = named_calibrate("a", "flat", references.clone());
    let mut b = named_calibrate("b", "dark", references);

    let model_a = Model::new(MemoryModel::new("a_rate.fits"));
    let model_b = Model::new(MemoryModel::new("b_rate.fits"));

    tracing::subscriber::with_default(capture_subscriber(), || {
        a.run(vec![StepData::Model(model_a.clone())]).unwrap();
        b.run(vec![StepData::Model(model_b.clone())]).unwrap();
    });

    let attributes_a = model_a.meta().attributes;
    let attributes_b = model_b.meta().attributes;
    assert_eq!(attributes_a.keys().collect::<Vec<_>>(), vec!["flat"]);
    assert_eq!(attributes_b.keys().collect::<Vec<_>>(), vec!["dark"]);
    assert!(a.reference_files_used().is_empty());
    assert!(b.reference_files_used().is_empty());

    let records_a = a.log_records();
    let records_b = b.log_records();
    assert!(!records_a.is_empty());
    assert!(!records_b.is_empty());
    assert!(records_a.iter().any(|r| r.message.contains("Calibrating")));
    assert!(records_a.iter().all(|r| r.step.as_deref() != Some("stpipe.b")));
    assert!(records_b.iter().all(|r| r.step.as_deref() != Some("stpipe.a")));
}

#[test]
fn test_log_records_belong_to_the_latest_run() {
    let mut step = Step::new(&SCALE, Some("scaler"), &keywords(&[]), services()).unwrap();

    tracing::subscriber::with_default(capture_subscriber(), || {
        step.run(vec![int(1)]).unwrap();
        assert!(!step.log_records().is_empty());
        step.run(vec![int(2)]).unwrap();
    });

    let messages: Vec<String> = step.log_records().iter().map(|r| r.message.clone()).collect();
    assert!(messages.iter().any(|m| m.contains("Step scaler running with args (2)")));
    assert!(messages.iter().any(|m| m.contains("Step scaler done")));
    assert!(!messages.iter().any(|m| m.contains("(1)")));
}

#[test]
fn test_pipeline_records_include_sub_steps() {
    let mut step = Step::new(&SCALE_TWICE, Some("twice"), &keywords(&[]), services()).unwrap();
    tracing::subscriber::with_default(capture_subscriber(), || {
        step.run(vec![int(1)]).unwrap();
    });

    let pipeline_records = step.log_records();
    assert!(pipeline_records
        .iter()
        .any(|r| r.step.as_deref() == Some("stpipe.twice.first")));
    let child_records = step.child("second").unwrap().log_records();
    assert!(child_records
        .iter()
        .all(|r| r.step.as_deref() == Some("stpipe.twice.second")));
}

#[test]
fn test_records_survive_a_failed_run() {
    let mut step = Step::new(&REFUSE, Some("refuser"), &keywords(&[]), services()).unwrap();
    let outcome = tracing::subscriber::with_default(capture_subscriber(), || step.run(vec![int(5)]));
    assert!(outcome.is_err());

    let messages: Vec<String> = step.log_records().iter().map(|r| r.message.clone()).collect();
    assert!(messages.iter().any(|m| m.contains("Step refuser running with args (5)")));
    assert!(!messages.iter().any(|m| m.contains("Step refuser done")));
}
