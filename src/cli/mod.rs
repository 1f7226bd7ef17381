//! Command-line interface

pub mod cmdline;
pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{ListCommand, ParsCommand, RunCommand, SpecCommand};
use std::ffi::OsString;

/// Configure and run data-processing steps
#[derive(Debug, Parser, Clone)]
#[command(name = "stpipe")]
#[command(version = "0.1.0")]
#[command(about = "Configure and run data-processing steps", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Turn on all logging messages
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a step or pipeline
    Run(RunCommand),

    /// Show the parameter schema of a step class
    Spec(SpecCommand),

    /// Show resolved parameters
    Pars(ParsCommand),

    /// List registered step classes
    List(ListCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
