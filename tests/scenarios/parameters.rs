//! Test: reading, updating and exporting step parameters

use crate::helpers::*;
use indexmap::IndexMap;
use stpipe::persistence::{export_config, ParameterFile};
use stpipe::{Step, Value, STEP};
use tempfile::TempDir;

fn scale_twice(first: i64, second: i64) -> Step {
    let steps = keywords(&[
        ("first", Value::Map(keywords(&[("factor", Value::Int(first))]))),
        ("second", Value::Map(keywords(&[("factor", Value::Int(second))]))),
    ]);
    Step::new(
        &SCALE_TWICE,
        Some("twice"),
        &keywords(&[("steps", Value::Map(steps)), ("suffix", Value::from("scaled"))]),
        services(),
    )
    .unwrap()
}

fn child_pars(pars: &IndexMap<String, Value>, name: &str) -> IndexMap<String, Value> {
    pars.get("steps")
        .and_then(Value::as_map)
        .and_then(|steps| steps.get(name))
        .and_then(Value::as_map)
        .cloned()
        .unwrap()
}

#[test]
fn test_get_pars_nests_sub_steps() {
    let step = scale_twice(3, 5);
    let pars = step.get_pars(true);
    assert_eq!(pars.get("suffix"), Some(&Value::from("scaled")));
    assert_eq!(child_pars(&pars, "first").get("factor"), Some(&Value::Int(3)));
    assert_eq!(child_pars(&pars, "second").get("factor"), Some(&Value::Int(5)));

    // Without the full spec only the class's own declarations are listed
    let own = step.child("first").unwrap().get_pars(false);
    assert!(own.contains_key("factor"));
    assert!(!own.contains_key("skip"));
}

#[test]
fn test_update_pars_with_get_pars_is_idempotent() {
    let mut step = scale_twice(3, 5);
    let before = step.get_pars(true);
    step.update_pars(&before).unwrap();
    assert_eq!(step.get_pars(true), before);
    step.update_pars(&before).unwrap();
    assert_eq!(step.get_pars(true), before);
}

#[test]
fn test_update_pars_ignores_unknown_keys_and_recurses() {
    let mut step = scale_twice(3, 5);
    let steps = keywords(&[("second", Value::Map(keywords(&[("factor", Value::Int(7))])))]);
    step.update_pars(&keywords(&[
        ("not_a_parameter", Value::Int(1)),
        ("steps", Value::Map(steps)),
    ]))
    .unwrap();

    assert!(!step.get_pars(true).contains_key("not_a_parameter"));
    assert_eq!(step.child("second").unwrap().get_par("factor"), Some(&Value::Int(7)));
    assert_eq!(step.child("first").unwrap().get_par("factor"), Some(&Value::Int(3)));
}

#[test]
fn test_pipeline_runs_sub_steps_in_order() {
    let mut step = scale_twice(3, 5);
    let result = step.run(vec![int(2)]).unwrap();
    assert!(matches!(result, Some(stpipe::StepData::Value(Value::Int(30)))));
    assert_eq!(step.child("first").unwrap().qualified_name(), "stpipe.twice.first");
}

#[test]
fn test_preserved_pars_are_restored() {
    let mut step = scale_twice(3, 5);
    let factor = step
        .with_preserved_pars(|step| {
            step.child_mut("first").unwrap().set_par("factor", 100i64).unwrap();
            step.child("first").unwrap().get_par("factor").cloned()
        })
        .unwrap();
    assert_eq!(factor, Some(Value::Int(100)));
    assert_eq!(step.child("first").unwrap().get_par("factor"), Some(&Value::Int(3)));
}

#[test]
fn test_exported_parameters_rebuild_the_step() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("twice_pars.yaml");
    let original = scale_twice(4, 6);
    export_config(&original, &path, true).unwrap();

    let file = ParameterFile::load(&path).unwrap();
    assert_eq!(file.root.class, "ScaleTwice");
    assert_eq!(file.root.name, "twice");

    let rebuilt = Step::from_config_file(&STEP, &path, None, services()).unwrap();
    assert_eq!(rebuilt.class().name, "ScaleTwice");
    assert_eq!(rebuilt.name(), "twice");
    assert_eq!(rebuilt.get_pars(true), original.get_pars(true));
}

#[test]
fn test_fragment_rebuilds_the_same_parameters() {
    let original = scale_twice(2, 9);
    let copy = Step::from_config_section(&SCALE_TWICE, original.to_fragment(), Some("twice"), None, services())
        .unwrap();
    assert_eq!(copy.get_pars(true), original.get_pars(true));
}
