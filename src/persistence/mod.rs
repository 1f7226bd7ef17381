//! Exported parameter files
//!
//! A step's parameters can be written out and loaded back as a standalone
//! file, optionally carrying reference metadata so it can be delivered as a
//! `pars-<class>` reference:
//!
//! ```yaml
//! class: FlatFieldStep
//! name: flat_field
//! parameters:
//!   skip: False
//! steps: []
//! meta:
//!   reftype: pars-flatfieldstep
//! ```

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::core::config::ConfigFragment;
use crate::core::error::ConfigError;
use crate::core::step::Step;
use crate::core::value::{Origin, Tagged, Value};

/// Placeholder for metadata the user must fill in before delivery
pub const SPECIFY: &str = "<SPECIFY>";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize parameters: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// Parameters of one step and its sub-steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepParameters {
    /// Class name
    pub class: String,

    /// Instance name
    pub name: String,

    /// Parameter values, in schema order
    #[serde(default)]
    pub parameters: IndexMap<String, serde_yaml::Value>,

    /// Sub-steps of a pipeline
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepParameters>,
}

impl StepParameters {
    pub fn from_step(step: &Step) -> Self {
        let parameters = step
            .get_pars(true)
            .into_iter()
            .filter(|(key, _)| key != "steps")
            .map(|(key, value)| (key, value.to_yaml()))
            .collect();
        Self {
            class: step.class().name.to_string(),
            name: step.name().to_string(),
            parameters,
            steps: step.children().values().map(StepParameters::from_step).collect(),
        }
    }

    fn parameters_fragment(&self, origin: Origin) -> ConfigFragment {
        let mut fragment = ConfigFragment::new();
        for (key, node) in &self.parameters {
            fragment.insert_value(key.clone(), Tagged::new(origin, Value::from_yaml(node)));
        }
        if !self.steps.is_empty() {
            let mut steps = ConfigFragment::new();
            for child in &self.steps {
                steps.insert_section(child.name.clone(), child.parameters_fragment(origin));
            }
            fragment.insert_section("steps", steps);
        }
        fragment
    }
}

/// Delivery metadata of a parameter reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterMetadata {
    pub author: String,
    /// Creation time, `YYYY-MM-DDTHH:MM:SS`
    pub date: String,
    pub description: String,
    pub origin: String,
    pub pedigree: String,
    /// Reference type, `pars-<class>`
    pub reftype: String,
    pub useafter: String,
    #[serde(default)]
    pub telescope: Option<String>,
    #[serde(default)]
    pub instrument: Option<String>,
}

impl ParameterMetadata {
    pub fn for_step(step: &Step) -> Self {
        Self {
            author: SPECIFY.to_string(),
            date: Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            description: format!("Parameters for calibration step {}", step.class().name),
            origin: SPECIFY.to_string(),
            pedigree: SPECIFY.to_string(),
            reftype: step.class().config_reftype(),
            useafter: SPECIFY.to_string(),
            telescope: Some(SPECIFY.to_string()),
            instrument: Some(SPECIFY.to_string()),
        }
    }
}

/// Contents of an exported parameter file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterFile {
    #[serde(flatten)]
    pub root: StepParameters,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ParameterMetadata>,
}

impl ParameterFile {
    pub fn from_step(step: &Step, include_metadata: bool) -> Self {
        Self {
            root: StepParameters::from_step(step),
            meta: include_metadata.then(|| ParameterMetadata::for_step(step)),
        }
    }

    pub fn to_yaml_string(&self) -> Result<String, ExportError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), ExportError> {
        let content = self.to_yaml_string()?;
        std::fs::write(path, content).map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The configuration this file describes, with `class` and `name` kept
    /// at the top level
    pub fn to_fragment(&self, origin: Origin) -> ConfigFragment {
        let mut fragment = ConfigFragment::new();
        fragment.insert_value("class", Tagged::new(origin, self.root.class.as_str()));
        fragment.insert_value("name", Tagged::new(origin, self.root.name.as_str()));
        fragment.merge(&self.root.parameters_fragment(origin));
        fragment
    }
}

/// Write the parameters of `step` and its sub-steps to `path`
pub fn export_config(step: &Step, path: impl AsRef<Path>, include_metadata: bool) -> Result<(), ExportError> {
    let path = path.as_ref();
    ParameterFile::from_step(step, include_metadata).write(path)?;
    info!(step = %step.qualified_name(), "Parameters saved to {}", path.display());
    Ok(())
}
