//! stpipe - configurable data-processing steps and pipelines

pub mod cli;
pub mod core;
pub mod execution;
pub mod logging;
pub mod persistence;
pub mod reference;

// Re-export commonly used types
pub use core::{
    ConfigError, ConfigFragment, Model, Origin, RunPhase, Services, Step, StepBehavior, StepClass,
    StepContext, StepData, StepError, StepRegistry, Value, PIPELINE, STEP,
};
pub use execution::{build_config, call, SaveOptions};
pub use logging::{LogConfig, LogRecord};
pub use reference::{LocalReferenceService, ReferenceService};
