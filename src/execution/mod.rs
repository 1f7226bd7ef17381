//! Running steps
//!
//! `engine` drives the run lifecycle, `hooks` builds pre/post hook steps,
//! `results` saves outputs and `builder` assembles steps from layered
//! configuration.

pub mod builder;
pub mod engine;
pub mod hooks;
pub mod results;

pub use builder::{build_config, call, parse_class_and_name, BuiltConfig, ConfigSources};
pub use hooks::{HookKind, SystemCall, SYSTEM_CALL};
pub use results::{save_model, SaveOptions};
