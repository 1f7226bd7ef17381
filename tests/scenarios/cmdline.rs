//! Test: building and running steps from command-line arguments

use crate::helpers::*;
use stpipe::cli::cmdline::{just_the_step_from_cmdline, step_from_cmdline};
use stpipe::cli::commands::RunCommand;
use stpipe::cli::{Cli, Command};
use stpipe::{RunPhase, Value};
use tempfile::TempDir;

fn run_command(args: &[&str]) -> RunCommand {
    let mut argv = vec!["stpipe", "run"];
    argv.extend_from_slice(args);
    match Cli::try_parse_from(argv).unwrap().command {
        Command::Run(run) => run,
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn test_dotted_overrides_reach_sub_steps() {
    let dir = TempDir::new().unwrap();
    let config = write_file(
        dir.path(),
        "twice.yaml",
        "class: ScaleTwice\nname: twice\nsteps:\n  first:\n    factor: 2\n  second:\n    factor: 5\n",
    );
    let path = config.to_string_lossy().into_owned();
    let cmd = run_command(&[&path, "-p", "steps.first.factor=3", "--disable-crds-steppars"]);

    let built = just_the_step_from_cmdline(&cmd, false, &services(), false).unwrap();
    assert_eq!(built.class.name, "ScaleTwice");
    assert_eq!(built.step.child("first").unwrap().get_par("factor"), Some(&Value::Int(3)));
    assert_eq!(built.step.child("second").unwrap().get_par("factor"), Some(&Value::Int(5)));
    assert!(built.positional.is_empty());
}

#[test]
fn test_reserved_keys_are_not_parameters() {
    let cmd = run_command(&["Scale", "-p", "logcfg=log.yaml"]);
    assert!(just_the_step_from_cmdline(&cmd, false, &services(), false).is_err());
}

#[test]
fn test_input_dir_prefixes_remote_lookup() {
    let opener = MemoryOpener::default();
    let references = RecordingReferences::default().with_answer("pars-scale", "N/A");
    let services = services().with_models(opener.clone()).with_references(references.clone());

    let cmd = run_command(&["Scale", "x_rate.fits", "-p", "input_dir=/data/in"]);
    let built = just_the_step_from_cmdline(&cmd, false, &services, false).unwrap();

    let opened = opener.opened.lock().unwrap();
    assert_eq!(opened[0].0, std::path::PathBuf::from("/data/in/x_rate.fits"));
    assert_eq!(references.queried(), vec!["pars-scale"]);
    assert_eq!(built.step.input_dir(), Some("/data/in"));
    assert!(built.step.save_results());
}

#[test]
fn test_save_parameters_writes_a_reloadable_file() {
    let dir = TempDir::new().unwrap();
    let saved = dir.path().join("scale_pars.yaml");
    let saved_arg = saved.to_string_lossy().into_owned();
    let cmd = run_command(&[
        "Scale",
        "-p",
        "factor=6",
        "--save-parameters",
        &saved_arg,
        "--disable-crds-steppars",
    ]);
    just_the_step_from_cmdline(&cmd, false, &services(), false).unwrap();

    let rebuilt = stpipe::Step::from_config_file(&stpipe::STEP, &saved, None, services()).unwrap();
    assert_eq!(rebuilt.class().name, "Scale");
    assert_eq!(rebuilt.get_par("factor"), Some(&Value::Int(6)));
}

#[test]
fn test_step_from_cmdline_runs_the_step() {
    let cmd = run_command(&["Scale", "-p", "factor=2", "--disable-crds-steppars"]);
    let step = step_from_cmdline(&cmd, false, &services()).unwrap();
    assert_eq!(step.phase(), RunPhase::Done);
    assert!(!stpipe::LogConfig::any_applied());

    let cmd = run_command(&["Refuse", "--disable-crds-steppars"]);
    assert!(step_from_cmdline(&cmd, false, &services()).is_err());
    assert!(!stpipe::LogConfig::any_applied());
}
