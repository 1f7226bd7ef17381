//! Test: relative paths resolve according to where the value came from

use crate::helpers::*;
use std::path::PathBuf;
use stpipe::core::config::{validate, ConfigFragment};
use stpipe::core::schema::{self, PathContext};
use stpipe::core::value::Tagged;
use stpipe::{Origin, Step, Value, STEP};
use tempfile::TempDir;

fn resolved_output_file(origin: Origin, cwd: &str) -> Value {
    let schema = schema::resolve(&STEP).unwrap();
    let mut config = ConfigFragment::new();
    config.insert_value("output_file", Tagged::new(origin, "out/result.fits"));
    let paths = PathContext::new("/data/config").with_cwd(cwd);
    let validated = validate(&config, &schema, &paths).unwrap();
    validated.value("output_file").cloned().unwrap()
}

#[test]
fn test_file_paths_follow_config_dir_and_cli_paths_follow_cwd() {
    let from_file = resolved_output_file(Origin::File, "/work/one");
    let from_cli = resolved_output_file(Origin::Cli, "/work/one");
    assert_eq!(from_file, Value::from("/data/config/out/result.fits"));
    assert_eq!(from_cli, Value::from("/work/one/out/result.fits"));

    // Moving to another working directory only changes the CLI value
    assert_eq!(resolved_output_file(Origin::File, "/work/two"), from_file);
    assert_eq!(
        resolved_output_file(Origin::Cli, "/work/two"),
        Value::from("/work/two/out/result.fits")
    );
}

#[test]
fn test_absolute_paths_are_kept() {
    let schema = schema::resolve(&STEP).unwrap();
    let mut config = ConfigFragment::new();
    config.insert_value("output_file", Tagged::new(Origin::File, "/abs/result.fits"));
    let validated = validate(&config, &schema, &PathContext::new("/data/config")).unwrap();
    assert_eq!(validated.value("output_file"), Some(&Value::from("/abs/result.fits")));
}

#[test]
fn test_config_file_output_file_is_relative_to_the_file() {
    let dir = TempDir::new().unwrap();
    let config_file = write_file(dir.path(), "scale.yaml", "class: Scale\noutput_file: out/scaled.fits\n");

    let step = Step::from_config_file(&STEP, &config_file, None, services()).unwrap();
    assert_eq!(step.class().name, "Scale");
    assert_eq!(step.name(), "scale");
    let expected: PathBuf = dir.path().join("out").join("scaled.fits");
    assert_eq!(step.output_file(), Some(expected.to_string_lossy().as_ref()));
}
