//! Test: sub-step configuration files referenced from `steps`

use crate::helpers::*;
use stpipe::execution::build_config;
use stpipe::{ConfigError, Step, Value};
use tempfile::TempDir;

fn pipeline_keywords(config_file: &std::path::Path, first: &[(&str, Value)]) -> indexmap::IndexMap<String, Value> {
    let steps = keywords(&[("first", Value::Map(keywords(first)))]);
    keywords(&[
        ("config_file", Value::from(config_file.to_string_lossy().as_ref())),
        ("steps", Value::Map(steps)),
    ])
}

#[test]
fn test_sub_step_file_with_other_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    let main = write_file(dir.path(), "twice.yaml", "class: ScaleTwice\nname: twice\n");
    write_file(dir.path(), "first.yaml", "name: other\nfactor: 4\n");

    let keywords = pipeline_keywords(&main, &[("config_file", Value::from("first.yaml"))]);
    let err = build_config(&SCALE_TWICE, None, &keywords, Some(true), &services()).unwrap_err();
    match err {
        ConfigError::StepNameMismatch { expected, found, .. } => {
            assert_eq!(expected, "first");
            assert_eq!(found, "other");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_sub_step_file_with_wrong_class_is_rejected() {
    let dir = TempDir::new().unwrap();
    let main = write_file(dir.path(), "twice.yaml", "class: ScaleTwice\n");
    write_file(dir.path(), "first.yaml", "class: Increment\nname: first\n");

    let keywords = pipeline_keywords(&main, &[("config_file", Value::from("first.yaml"))]);
    let err = build_config(&SCALE_TWICE, None, &keywords, Some(true), &services()).unwrap_err();
    assert!(matches!(err, ConfigError::StepClassMismatch { .. }));
}

#[test]
fn test_sub_step_file_is_merged_under_inline_keywords() {
    let dir = TempDir::new().unwrap();
    let main = write_file(
        dir.path(),
        "twice.yaml",
        "class: ScaleTwice\nname: twice\nsuffix: file\nsteps:\n  second:\n    factor: 9\n",
    );
    write_file(dir.path(), "first.yaml", "class: Scale\nname: first\nfactor: 4\nlabel: from_file\n");

    let keywords = pipeline_keywords(
        &main,
        &[("config_file", Value::from("first.yaml")), ("label", Value::from("inline"))],
    );
    let built = build_config(&SCALE_TWICE, None, &keywords, Some(true), &services()).unwrap();
    assert_eq!(built.config_file.as_deref(), Some(main.as_path()));

    let step = Step::from_config_section(&SCALE_TWICE, built.config, None, built.config_file.as_deref(), services())
        .unwrap();
    assert_eq!(step.name(), "twice");
    assert_eq!(step.suffix(), Some("file"));

    let first = step.child("first").unwrap();
    assert_eq!(first.get_par("factor"), Some(&Value::Int(4)));
    assert_eq!(first.get_par("label"), Some(&Value::from("inline")));
    assert_eq!(step.child("second").unwrap().get_par("factor"), Some(&Value::Int(9)));
}

#[test]
fn test_sub_step_values_are_validated() {
    let steps = keywords(&[("first", Value::Map(keywords(&[("factor", Value::from("many"))])))]);
    let result = Step::new(&SCALE_TWICE, None, &keywords(&[("steps", Value::Map(steps))]), services());
    assert!(matches!(result, Err(ConfigError::Validation(_))));

    let steps = keywords(&[("first", Value::Map(keywords(&[("no_such_key", Value::Int(1))])))]);
    let step = Step::new(&SCALE_TWICE, None, &keywords(&[("steps", Value::Map(steps))]), services()).unwrap();
    assert!(step.child("first").unwrap().get_par("no_such_key").is_none());
}
