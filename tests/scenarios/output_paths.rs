//! Test: output file naming and saving results

use crate::helpers::*;
use std::path::PathBuf;
use stpipe::core::output::{OutputPathRequest, Suffix};
use stpipe::{Model, Step, StepData, Value};
use tempfile::TempDir;

fn scale_step(pairs: &[(&str, Value)]) -> Step {
    Step::new(&SCALE, None, &keywords(pairs), services()).unwrap()
}

fn request() -> OutputPathRequest {
    OutputPathRequest::default().with_basepath("abc.fits")
}

#[test]
fn test_suffix_is_appended_to_the_stem() {
    let step = scale_step(&[]);
    let path = step.make_output_path(&request().with_suffix(Suffix::from("cal"))).unwrap();
    assert_eq!(path, PathBuf::from("abc_cal.fits"));
}

#[test]
fn test_suppressed_suffix_keeps_the_name() {
    let step = scale_step(&[]);
    let path = step.make_output_path(&request().with_suffix(Suffix::Off)).unwrap();
    assert_eq!(path, PathBuf::from("abc.fits"));
}

#[test]
fn test_components_go_between_stem_and_suffix() {
    let step = scale_step(&[]);
    let path = step
        .make_output_path(
            &request()
                .with_suffix(Suffix::from("cal"))
                .with_component("idx", Some("1".to_string())),
        )
        .unwrap();
    assert_eq!(path, PathBuf::from("abc_1_cal.fits"));
}

#[test]
fn test_step_suffix_and_output_dir_are_used() {
    let step = scale_step(&[
        ("suffix", Value::from("flat")),
        ("output_dir", Value::from("/scratch/out")),
        ("output_ext", Value::from(".asdf")),
    ]);
    let path = step.make_output_path(&request()).unwrap();
    assert_eq!(path, PathBuf::from("/scratch/out/abc_flat.asdf"));
}

#[test]
fn test_requested_extension_wins() {
    let step = scale_step(&[("output_ext", Value::from(".asdf"))]);
    let path = step
        .make_output_path(&request().with_ext(".h5").with_suffix(Suffix::Off))
        .unwrap();
    assert_eq!(path, PathBuf::from("abc.h5"));
}

#[test]
fn test_default_output_file_uses_step_name() {
    let step = scale_step(&[]);
    assert_eq!(step.default_output_file(None), "step_Scale.fits");
    assert_eq!(step.default_output_file(Some("in.fits")), "in.fits");
}

#[test]
fn test_run_saves_result_in_output_dir() {
    let dir = TempDir::new().unwrap();
    let output_dir = dir.path().to_string_lossy().into_owned();
    let mut step = scale_step(&[
        ("save_results", Value::Bool(true)),
        ("output_dir", Value::from(output_dir.as_str())),
    ]);

    let (model, saved) = memory_model("abc_rate.fits");
    step.run(vec![StepData::Model(model)]).unwrap();

    let saved = saved.lock().unwrap();
    assert_eq!(saved.as_slice(), &[dir.path().join("abc_rate_scale.fits")]);
}

#[test]
fn test_nothing_is_saved_by_default() {
    let mut step = scale_step(&[]);
    let (model, saved) = memory_model("abc_rate.fits");
    step.run(vec![StepData::Model(model)]).unwrap();
    assert!(saved.lock().unwrap().is_empty());
}

#[test]
fn test_skipped_steps_do_not_save() {
    let steps = keywords(&[(
        "gate",
        Value::Map(keywords(&[("skip", Value::Bool(true)), ("save_results", Value::Bool(true))])),
    )]);
    let mut pipeline = Step::new(&GATED, None, &keywords(&[("steps", Value::Map(steps))]), services()).unwrap();
    let model = MemoryModel::new("abc_rate.fits");
    let saved = model.saved.clone();
    pipeline.run(vec![StepData::Model(Model::new(model))]).unwrap();
    assert!(saved.lock().unwrap().is_empty());
}
