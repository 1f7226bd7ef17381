//! Test: reference files and remote step parameters

use crate::helpers::*;
use stpipe::core::data::OpenOptions;
use stpipe::reference::{get_config_from_reference, ParameterSource, ReferenceRule};
use stpipe::{LocalReferenceService, Model, Step, StepData, StepError, Value};
use tempfile::TempDir;

fn calibrate(pairs: &[(&str, Value)], references: RecordingReferences) -> Step {
    Step::new(
        &CALIBRATE,
        None,
        &keywords(pairs),
        services().with_references(references),
    )
    .unwrap()
}

fn attributes_after_run(step: &mut Step) -> indexmap::IndexMap<String, String> {
    let model = Model::new(MemoryModel::new("jw01_rate.fits").with_crds("META.INSTRUMENT.NAME", "NIRCAM"));
    step.run(vec![StepData::Model(model.clone())]).unwrap();
    model.meta().attributes
}

#[test]
fn test_service_answer_is_recorded_as_crds_uri() {
    let references = RecordingReferences::default().with_answer("flat", "/refs/jwst_nircam_flat_0042.fits");
    let mut step = calibrate(&[], references.clone());

    let attributes = attributes_after_run(&mut step);
    assert_eq!(
        attributes.get("flat").map(String::as_str),
        Some("crds://jwst_nircam_flat_0042.fits")
    );
    let queries = references.queries.lock().unwrap();
    assert_eq!(queries[0].0, "flat");
    assert_eq!(
        queries[0].1.get("META.INSTRUMENT.NAME").map(String::as_str),
        Some("NIRCAM")
    );
    assert!(step.reference_files_used().is_empty());
}

#[test]
fn test_not_applicable_is_not_an_error() {
    let references = RecordingReferences::default().with_answer("dark", "N/A");
    let mut step = calibrate(&[("reftype", Value::from("dark"))], references);
    let attributes = attributes_after_run(&mut step);
    assert_eq!(attributes.get("dark").map(String::as_str), Some("N/A"));
}

#[test]
fn test_override_path_skips_the_service() {
    let references = RecordingReferences::default();
    let mut step = calibrate(&[("override_flat", Value::from("my_flat.fits"))], references.clone());
    let attributes = attributes_after_run(&mut step);
    assert_eq!(attributes.get("flat").map(String::as_str), Some("my_flat.fits"));
    assert!(references.queried().is_empty());
}

#[test]
fn test_override_model_is_recorded_by_handle() {
    let flat = Model::new(MemoryModel::new("custom_flat.fits"));
    let mut step = calibrate(&[("override_flat", Value::Model(flat))], RecordingReferences::default());
    let attributes = attributes_after_run(&mut step);
    assert_eq!(attributes.get("flat").map(String::as_str), Some("override:custom_flat.fits"));
}

#[test]
fn test_empty_override_records_nothing() {
    let mut step = calibrate(&[("override_flat", Value::from(""))], RecordingReferences::default());
    let attributes = attributes_after_run(&mut step);
    assert!(attributes.is_empty());
}

#[test]
fn test_service_failure_fails_the_run() {
    let mut step = calibrate(&[], RecordingReferences::default());
    let model = Model::new(MemoryModel::new("jw01_rate.fits"));
    let err = step.run(vec![StepData::Model(model)]).unwrap_err();
    assert!(matches!(err, StepError::Reference(_)));
}

#[test]
fn test_pipeline_parameters_cover_sub_steps() {
    let dir = TempDir::new().unwrap();
    let scale_pars = write_file(dir.path(), "scale.yaml", "class: Scale\nfactor: 2\n");
    let twice_pars = write_file(dir.path(), "twice.yaml", "class: ScaleTwice\nsuffix: remote\n");
    let references = RecordingReferences::default()
        .with_answer("pars-scale", scale_pars.to_string_lossy())
        .with_answer("pars-scaletwice", twice_pars.to_string_lossy());
    let services = services().with_references(references.clone());

    let input = StepData::Model(Model::new(MemoryModel::new("jw01_rate.fits")));
    let fragment = get_config_from_reference(&SCALE_TWICE, ParameterSource::Data(&input), Some(false), &services);

    assert_eq!(fragment.value("suffix"), Some(&Value::from("remote")));
    let steps = fragment.section("steps").unwrap();
    assert_eq!(steps.section("first").unwrap().value("factor"), Some(&Value::Int(2)));
    assert_eq!(steps.section("second").unwrap().value("factor"), Some(&Value::Int(2)));
    assert_eq!(references.queried(), vec!["pars-scale", "pars-scale", "pars-scaletwice"]);
}

#[test]
fn test_disabled_lookup_queries_nothing() {
    let references = RecordingReferences::default().with_answer("pars-scale", "/nowhere.yaml");
    let services = services().with_references(references.clone());
    let input = StepData::Model(Model::new(MemoryModel::new("jw01_rate.fits")));

    let fragment = get_config_from_reference(&SCALE, ParameterSource::Data(&input), Some(true), &services);
    assert!(fragment.is_empty());
    assert!(references.queried().is_empty());
}

#[test]
fn test_unreadable_remote_parameters_are_ignored() {
    let references = RecordingReferences::default().with_answer("pars-scale", "/nowhere/pars.yaml");
    let services = services().with_references(references);
    let input = StepData::Model(Model::new(MemoryModel::new("jw01_rate.fits")));

    let fragment = get_config_from_reference(&SCALE, ParameterSource::Data(&input), Some(false), &services);
    assert!(fragment.is_empty());
}

#[test]
fn test_association_input_opens_first_science_member() {
    let opener = MemoryOpener::default().with_crds("META.INSTRUMENT.NAME", "MIRI");
    let references = RecordingReferences::default().with_answer("pars-scale", "N/A");
    let services = services().with_models(opener.clone()).with_references(references.clone());

    let input = StepData::from("jw01_asn.json");
    let fragment = get_config_from_reference(&SCALE, ParameterSource::Data(&input), Some(false), &services);
    assert!(fragment.is_empty());

    let opened = opener.opened.lock().unwrap();
    assert_eq!(opened[0].1, OpenOptions::for_reference_lookup(std::path::Path::new("jw01_asn.json")));
    assert_eq!(opened[0].1.asn_n_members, Some(1));
    let queries = references.queries.lock().unwrap();
    assert_eq!(queries[0].1.get("META.INSTRUMENT.NAME").map(String::as_str), Some("MIRI"));
}

#[test]
fn test_local_rules_answer_lookups() {
    let dir = TempDir::new().unwrap();
    let flat = write_file(dir.path(), "flat.fits", "flat");
    let rules = write_file(
        dir.path(),
        "rules.yaml",
        "rules:\n  - reftype: flat\n    path: flat.fits\n    match:\n      META.INSTRUMENT.NAME: NIRCAM\n  - reftype: dark\n    path: N/A\n",
    );
    let local = LocalReferenceService::from_file(&rules).unwrap();
    assert_eq!(local.rules[1], ReferenceRule::new("dark", "N/A"));

    let mut step = Step::new(&CALIBRATE, None, &keywords(&[]), services().with_references(local)).unwrap();
    let attributes = attributes_after_run(&mut step);
    assert_eq!(attributes.get("flat").map(String::as_str), Some("crds://flat.fits"));
    assert!(flat.exists());
}
