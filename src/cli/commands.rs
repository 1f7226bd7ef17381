//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Run a step or pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Config file or registered step class to run
    pub cfg_file_or_class: String,

    /// Input files passed to the step
    pub args: Vec<String>,

    /// Config file to load parameters from when a class is given
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Parameter overrides (key=value, dotted keys reach sub-steps)
    #[arg(short = 'p', long = "par", value_parser = parse_key_value)]
    pub par: Vec<(String, String)>,

    /// Logging configuration file to load
    #[arg(long)]
    pub logcfg: Option<PathBuf>,

    /// Print the full error chain when the step fails
    #[arg(long)]
    pub debug: bool,

    /// Save step parameters to the given file
    #[arg(long)]
    pub save_parameters: Option<PathBuf>,

    /// Disable retrieval of step parameters from the reference service
    #[arg(long)]
    pub disable_crds_steppars: bool,

    /// Reference rules file used to answer reference lookups
    #[arg(long)]
    pub references: Option<PathBuf>,
}

/// Show the parameter schema of a step class
#[derive(Debug, Args, Clone)]
pub struct SpecCommand {
    /// Registered step class
    pub class: String,
}

/// Show the resolved parameters of a step
#[derive(Debug, Args, Clone)]
pub struct ParsCommand {
    /// Config file or registered step class
    pub cfg_file_or_class: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List registered step classes
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 || parts[0].is_empty() {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
