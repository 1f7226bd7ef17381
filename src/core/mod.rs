//! Step parameters, configuration and lifecycle state
//!
//! A step class declares a parameter schema. Configuration fragments from
//! reference files, config files, keywords and the command line are merged
//! and validated against it to build a [`Step`].

pub mod class;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod schema;
pub mod state;
pub mod step;
pub mod value;

pub use class::{StepBehavior, StepClass, StepRegistry, SubstepDef};
pub use config::{ConfigEntry, ConfigFragment};
pub use context::{Services, StepContext};
pub use data::{DataModel, Model, ModelLibrary, ModelOpener, StepData};
pub use error::{ConfigError, SchemaError, StepError, ValidationError};
pub use pipeline::PIPELINE;
pub use schema::{ParameterSchema, ParamKind, ParamSpec};
pub use state::RunPhase;
pub use step::{Lineage, Step, StepCore, STEP};
pub use value::{Origin, Tagged, Value};
