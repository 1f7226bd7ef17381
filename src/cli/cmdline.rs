//! Building and running a step from command-line arguments

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use crate::cli::commands::RunCommand;
use crate::cli::output::print_important_message;
use crate::core::class::StepClass;
use crate::core::config::{load_config_file, ConfigFragment};
use crate::core::context::Services;
use crate::core::data::StepData;
use crate::core::error::ConfigError;
use crate::core::schema::{self, RESERVED_PARAMETERS};
use crate::core::step::{Step, STEP};
use crate::core::value::Origin;
use crate::execution::builder::{parse_class_and_name, ConfigSources};
use crate::logging::LogConfig;
use crate::persistence::export_config;
use crate::reference::{crds_steppars_disabled, get_config_from_reference, ParameterSource};

/// Environment variable naming a file that receives a timing report
pub const PROFILE_ENV: &str = "STPIPE_PROFILE";

/// A step built from the command line, not yet run
#[derive(Debug)]
pub struct CmdlineStep {
    pub step: Step,
    pub class: &'static StepClass,
    /// Positional arguments to pass to `run`
    pub positional: Vec<String>,
    pub debug_on_exception: bool,
}

struct Identified {
    class: &'static StepClass,
    name: Option<String>,
    config_file: Option<PathBuf>,
}

fn identify(cmd: &RunCommand, services: &Services) -> Result<Identified> {
    let identifier = cmd.cfg_file_or_class.as_str();
    if Path::new(identifier).exists() {
        let config_file = PathBuf::from(identifier);
        let mut config = load_config_file(&config_file)?;
        let (class, name) = parse_class_and_name(&STEP, &mut config, None, Some(&config_file), services)?;
        return Ok(Identified {
            class,
            name: Some(name),
            config_file: Some(config_file),
        });
    }

    let class = services.registry.resolve(identifier).ok_or_else(|| {
        anyhow!(
            "'{}' is not a path to a config file or a registered step class",
            identifier
        )
    })?;
    Ok(Identified {
        class,
        name: None,
        config_file: cmd.config_file.clone(),
    })
}

fn log_config_for(cmd: &RunCommand, verbose: bool) -> Result<LogConfig> {
    if verbose {
        if cmd.logcfg.is_some() {
            bail!("If --verbose is set, a logging configuration file may not be provided");
        }
        return Ok(LogConfig::maximal());
    }
    match &cmd.logcfg {
        Some(path) => {
            if !path.exists() {
                bail!("Logging config '{}' not found", path.display());
            }
            LogConfig::load(path).with_context(|| format!("Error parsing logging config '{}'", path.display()))
        }
        None => LogConfig::discover().context("Error parsing logging config"),
    }
}

/// Command-line overrides, tagged as such. Keys must name schema entries.
fn command_line_fragment(class: &'static StepClass, cmd: &RunCommand) -> Result<ConfigFragment> {
    let schema = schema::resolve(class)?;
    for (key, _) in &cmd.par {
        if RESERVED_PARAMETERS.contains(&key.as_str()) {
            bail!("'{}' is a command option, not a parameter", key);
        }
        if schema.lookup(key).is_none() {
            return Err(ConfigError::UnknownParameter {
                class: class.name.to_string(),
                key: key.clone(),
            }
            .into());
        }
    }
    Ok(ConfigFragment::from_dotted(
        cmd.par.iter().map(|(key, value)| (key.as_str(), value.as_str())),
        Origin::Cli,
    ))
}

/// Create the step described by the command line. Does not run it.
pub fn just_the_step_from_cmdline(
    cmd: &RunCommand,
    verbose: bool,
    services: &Services,
    apply_log_cfg: bool,
) -> Result<CmdlineStep> {
    let Identified {
        class,
        name,
        config_file,
    } = identify(cmd, services)?;

    let log_config = log_config_for(cmd, verbose)?;
    if apply_log_cfg {
        log_config.apply()?;
    }

    let disable = crds_steppars_disabled(cmd.disable_crds_steppars.then_some(true));
    let command_line = command_line_fragment(class, cmd)?;

    let reference = match cmd.args.first() {
        Some(input) => {
            let input_dir = cmd
                .par
                .iter()
                .rev()
                .find(|(key, _)| key == "input_dir")
                .map(|(_, dir)| dir.as_str());
            let input_file = match input_dir {
                Some(dir) => format!("{}/{}", dir, input),
                None => input.clone(),
            };
            let input = StepData::Path(PathBuf::from(input_file));
            get_config_from_reference(class, ParameterSource::Data(&input), Some(disable), services)
        }
        None => {
            info!("No input file specified, unable to retrieve parameters from CRDS");
            ConfigFragment::new()
        }
    };

    let mut sources = ConfigSources::new()
        .with_reference(reference)
        .with_command_line(command_line);
    if let Some(config_file) = &config_file {
        sources = sources.with_config_file(config_file);
    }
    let built = sources.resolve(class, services)?;

    let mut step = Step::from_config_section(
        class,
        built.config,
        name.as_deref(),
        config_file.as_deref(),
        services.clone(),
    )
    .map_err(|err| {
        print_important_message("ERROR PARSING CONFIGURATION:", &err.to_string());
        err
    })?;

    if let Some(input) = cmd.args.first() {
        step.set_primary_input(&StepData::Path(PathBuf::from(input)), true);
        step.set_save_results(true);
    }

    if let Some(path) = &cmd.save_parameters {
        export_config(&step, path, true)?;
        info!("Step/Pipeline parameters saved to '{}'", path.display());
    }

    Ok(CmdlineStep {
        step,
        class,
        positional: cmd.args.clone(),
        debug_on_exception: cmd.debug,
    })
}

/// Create the step described by the command line and run it
pub fn step_from_cmdline(cmd: &RunCommand, verbose: bool, services: &Services) -> Result<Step> {
    let built = just_the_step_from_cmdline(cmd, verbose, services, true);
    let CmdlineStep {
        mut step,
        class,
        positional,
        debug_on_exception,
    } = match built {
        Ok(built) => built,
        Err(err) => {
            LogConfig::undo_applied();
            return Err(err);
        }
    };

    let args: Vec<StepData> = positional.iter().map(|p| StepData::Path(PathBuf::from(p))).collect();
    let profile_path = std::env::var_os(PROFILE_ENV);
    if profile_path.is_some() {
        std::env::remove_var(PROFILE_ENV);
    }

    let started = Instant::now();
    let result = step.run(args);
    let elapsed = started.elapsed();
    LogConfig::undo_applied();

    if let Some(path) = profile_path {
        let report = format!(
            "step: {}\nclass: {}\nphase: {}\nseconds: {:.6}\n",
            step.qualified_name(),
            class.name,
            step.phase(),
            elapsed.as_secs_f64()
        );
        std::fs::write(&path, report)
            .with_context(|| format!("Failed to write profile to {}", PathBuf::from(&path).display()))?;
    }

    match result {
        Ok(_) => Ok(step),
        Err(err) => {
            let err = anyhow::Error::new(err);
            print_important_message(&format!("ERROR RUNNING STEP '{}':", class.name), &err.to_string());
            if debug_on_exception {
                eprintln!("{:?}", err);
            }
            Err(err.context(format!("Step {} failed", class.name)))
        }
    }
}
