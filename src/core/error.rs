//! Error types for schema resolution, configuration and step execution

use std::path::PathBuf;
use thiserror::Error;

use crate::core::data::ModelError;
use crate::core::output::OutputPathError;
use crate::reference::CrdsError;

/// Errors raised while resolving a step class's parameter schema
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{class}: line {line}: cannot parse schema declaration '{text}'")]
    Syntax {
        class: String,
        line: usize,
        text: String,
    },

    #[error("{class}: unknown parameter kind '{kind}' for '{key}'")]
    UnknownKind {
        class: String,
        key: String,
        kind: String,
    },

    #[error("{class}: invalid argument '{argument}' for '{key}'")]
    BadArgument {
        class: String,
        key: String,
        argument: String,
    },

    #[error("{class}: '{key}' is a reserved parameter name")]
    Reserved { class: String, key: String },
}

/// A single leaf failed type coercion or a required leaf is missing
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Config parameter '{key}': {reason}")]
pub struct ValidationError {
    pub key: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Structural configuration problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config file {path} must contain a mapping at the top level")]
    NotAMapping { path: PathBuf },

    #[error(
        "Step name from configuration file '{file}' does not match step name in the 'steps' \
         argument: expected '{expected}', found '{found}'"
    )]
    StepNameMismatch {
        file: PathBuf,
        expected: String,
        found: String,
    },

    #[error(
        "Step class from configuration file '{file}' does not match the class of sub-step \
         '{step}': expected '{expected}', found '{found}'"
    )]
    StepClassMismatch {
        file: PathBuf,
        step: String,
        expected: String,
        found: String,
    },

    #[error("'{0}' is neither a config file nor a registered step class")]
    UnknownClass(String),

    #[error("configuration class '{found}' is not a '{expected}'")]
    NotASubclass { expected: String, found: String },

    #[error("'{key}' is not a parameter of {class}")]
    UnknownParameter { class: String, key: String },

    #[error("cannot load logging configuration {path}: {reason}")]
    LogConfig { path: PathBuf, reason: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Errors raised by the run lifecycle
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Steps have to override process(): {class}")]
    NotImplemented { class: String },

    #[error("Incorrect number of arguments to step {step}: expected {expected}, got {given}")]
    IncorrectArgumentCount {
        step: String,
        expected: usize,
        given: usize,
    },

    #[error("{step} has no sub-step named '{name}'")]
    UnknownSubstep { step: String, name: String },

    #[error("command '{command}' exited with status {status} (expected {expected})")]
    CommandFailed {
        command: String,
        status: i32,
        expected: i64,
    },

    #[error("cannot run '{command}': {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Reference(#[from] CrdsError),

    #[error(transparent)]
    OutputPath(#[from] OutputPathError),

    #[error("{0}")]
    Process(#[from] anyhow::Error),
}
