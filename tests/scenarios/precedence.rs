//! Test: every combination of configuration sources for one key

use crate::helpers::*;
use stpipe::core::config::ConfigFragment;
use stpipe::execution::ConfigSources;
use stpipe::reference::{get_config_from_reference, ParameterSource};
use stpipe::{Model, Origin, Step, StepClass, StepData, Value, STEP};
use tempfile::TempDir;

struct Unlabeled;
impl stpipe::StepBehavior for Unlabeled {}
fn unlabeled() -> Box<dyn stpipe::StepBehavior> {
    Box::new(Unlabeled)
}

/// Same key as `Scale`, without a default
static UNLABELED: StepClass =
    StepClass::new("Unlabeled", Some(&STEP), unlabeled).with_spec("label = string(default=None)  # Free-form label");

const DEFAULT: u32 = 1;
const REMOTE: u32 = 1 << 1;
const FILE: u32 = 1 << 2;
const KEYWORD: u32 = 1 << 3;
const CLI: u32 = 1 << 4;

fn expected(mask: u32) -> Value {
    if mask & CLI != 0 {
        Value::from("cli")
    } else if mask & KEYWORD != 0 {
        Value::from("keyword")
    } else if mask & FILE != 0 {
        Value::from("file")
    } else if mask & REMOTE != 0 {
        Value::from("remote")
    } else if mask & DEFAULT != 0 {
        Value::from("default")
    } else {
        Value::None
    }
}

fn resolve_label(mask: u32, dir: &TempDir) -> Value {
    let class: &'static StepClass = if mask & DEFAULT != 0 { &SCALE } else { &UNLABELED };

    let pars_file = write_file(
        dir.path(),
        &format!("pars-{}.yaml", mask),
        &format!("class: {}\nlabel: remote\n", class.name),
    );
    let mut references = RecordingReferences::default();
    if mask & REMOTE != 0 {
        references = references.with_answer(&class.config_reftype(), pars_file.to_string_lossy());
    }
    let services = services().with_references(references);

    let input = StepData::Model(Model::new(MemoryModel::new("input.fits").with_crds("instrument", "nircam")));
    let reference = get_config_from_reference(class, ParameterSource::Data(&input), Some(false), &services);

    let mut sources = ConfigSources::new().with_reference(reference);
    if mask & FILE != 0 {
        let config_file = write_file(dir.path(), &format!("config-{}.yaml", mask), "label: file\n");
        sources = sources.with_config_file(config_file);
    }
    if mask & KEYWORD != 0 {
        sources = sources.with_keywords(keywords(&[("label", Value::from("keyword"))]));
    }
    if mask & CLI != 0 {
        sources = sources.with_command_line(ConfigFragment::from_dotted([("label", "cli")], Origin::Cli));
    }

    let built = sources.resolve(class, &services).unwrap();
    let step = Step::from_config_section(class, built.config, None, built.config_file.as_deref(), services).unwrap();
    step.get_par("label").cloned().unwrap_or(Value::None)
}

#[test]
fn test_precedence_law_all_combinations() {
    let dir = TempDir::new().unwrap();
    for mask in 0..32u32 {
        assert_eq!(resolve_label(mask, &dir), expected(mask), "source mask {:05b}", mask);
    }
}

#[test]
fn test_remote_fragment_is_queried_under_class_reftype() {
    let dir = TempDir::new().unwrap();
    let pars_file = write_file(dir.path(), "pars.yaml", "class: Scale\nfactor: 5\n");
    let references = RecordingReferences::default().with_answer("pars-scale", pars_file.to_string_lossy());
    let services = services().with_references(references.clone());

    let input = StepData::Model(Model::new(MemoryModel::new("input.fits").with_crds("detector", "nrca1")));
    let fragment = get_config_from_reference(&SCALE, ParameterSource::Data(&input), Some(false), &services);

    assert_eq!(fragment.value("factor"), Some(&Value::Int(5)));
    let queries = references.queries.lock().unwrap();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].0, "pars-scale");
    assert_eq!(queries[0].1.get("detector").map(String::as_str), Some("nrca1"));
}
