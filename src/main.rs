use anyhow::{Context, Result};
use std::path::Path;

use stpipe::cli::cmdline::step_from_cmdline;
use stpipe::cli::commands::{ListCommand, ParsCommand, RunCommand, SpecCommand};
use stpipe::cli::output::*;
use stpipe::cli::{Cli, Command};
use stpipe::core::schema;
use stpipe::core::{Services, Step, StepClass, Value, STEP};
use stpipe::logging::{init_subscriber, LogConfig};
use stpipe::reference::LocalReferenceService;

fn main() -> Result<()> {
    let cli = Cli::from_args();

    init_subscriber(&LogConfig::default()).context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_step(cmd, cli.verbose)?,
        Command::Spec(cmd) => show_spec(cmd)?,
        Command::Pars(cmd) => show_pars(cmd)?,
        Command::List(cmd) => list_classes(cmd)?,
    }

    Ok(())
}

fn services_for(cmd: &RunCommand) -> Result<Services> {
    let services = Services::new();
    match &cmd.references {
        Some(path) => {
            let references = LocalReferenceService::from_file(path)
                .with_context(|| format!("Failed to load reference rules from {}", path.display()))?;
            Ok(services.with_references(references))
        }
        None => Ok(services),
    }
}

fn run_step(cmd: &RunCommand, verbose: bool) -> Result<()> {
    let services = services_for(cmd)?;
    eprintln!("{} Running {}", ROCKET, style(&cmd.cfg_file_or_class).bold());

    match step_from_cmdline(cmd, verbose, &services) {
        Ok(step) => {
            eprintln!(
                "{} {} {}",
                CHECK,
                style(step.qualified_name()).bold(),
                format_phase(step.phase())
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("{} {} {}", CROSS, style(&cmd.cfg_file_or_class).bold(), style("failed").red());
            Err(err)
        }
    }
}

fn resolve_class(services: &Services, identifier: &str) -> Result<&'static StepClass> {
    services
        .registry
        .resolve(identifier)
        .with_context(|| format!("Unknown step class '{}'", identifier))
}

fn show_spec(cmd: &SpecCommand) -> Result<()> {
    let services = Services::new();
    let class = resolve_class(&services, &cmd.class)?;
    let schema = schema::resolve(class).context("Failed to resolve parameter schema")?;
    if schema.is_empty() {
        println!("{} {} declares no parameters", WARN, class.name);
        return Ok(());
    }
    println!("{}", schema.render());
    Ok(())
}

fn show_pars(cmd: &ParsCommand) -> Result<()> {
    let services = Services::new();
    let identifier = cmd.cfg_file_or_class.as_str();
    let step = if Path::new(identifier).exists() {
        Step::from_config_file(&STEP, identifier, None, services)
    } else {
        let class = resolve_class(&services, identifier)?;
        Step::with_defaults(class, services)
    }
    .context("Failed to build step")?;

    let pars = step.get_pars(false);
    if cmd.json {
        let json = Value::Map(pars).to_json();
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("{}", format_pars_yaml(&pars));
    }
    Ok(())
}

fn list_classes(cmd: &ListCommand) -> Result<()> {
    let services = Services::new();
    let classes = services.registry.classes();
    if cmd.json {
        let names: Vec<serde_json::Value> = classes
            .iter()
            .map(|class| {
                serde_json::json!({
                    "name": class.name,
                    "base": class.base.map(|base| base.name),
                    "alias": class.class_alias,
                    "steps": class.step_defs.iter().map(|def| def.name).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&names)?);
        return Ok(());
    }

    println!("{} {} registered step classes", INFO, classes.len());
    for class in classes {
        println!("  {}", format_class_line(class));
    }
    Ok(())
}
