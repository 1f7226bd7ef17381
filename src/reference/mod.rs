//! Reference file lookup
//!
//! The remote reference service is reached through [`ReferenceService`].
//! This module adds what the step machinery layers on top of it: the
//! `override_<reftype>` parameters, recording which references a run used,
//! and fetching step parameters stored as references.

pub mod client;

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use client::{LocalReferenceService, ReferenceRule};

use crate::core::class::StepClass;
use crate::core::config::{load_config_file_as, merge_config, ConfigFragment};
use crate::core::context::Services;
use crate::core::data::{CrdsParameters, Model, ModelError, OpenOptions, StepData};
use crate::core::error::StepError;
use crate::core::step::StepCore;
use crate::core::value::{Origin, Value};

/// Sentinel the service uses for "no reference applies"
pub const NOT_APPLICABLE: &str = "N/A";

/// Environment variable that disables parameter reference retrieval
pub const DISABLE_ENV: &str = "STPIPE_DISABLE_CRDS_STEPPARS";

#[derive(Debug, Error)]
pub enum CrdsError {
    #[error("reference service unavailable: {0}")]
    Unavailable(String),

    #[error("no {reftype} reference matches: {reason}")]
    NoMatch { reftype: String, reason: String },

    #[error("cannot open reference {name}: {reason}")]
    Unreadable { name: String, reason: String },

    #[error("cannot read reference rules {path}: {reason}")]
    Rules { path: PathBuf, reason: String },
}

/// Outcome of a reference lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceLookup {
    Found(String),
    NotApplicable,
}

impl ReferenceLookup {
    /// Interpret a raw service answer, mapping the `N/A` sentinel
    pub fn from_name(name: &str) -> Self {
        if name == NOT_APPLICABLE {
            ReferenceLookup::NotApplicable
        } else {
            ReferenceLookup::Found(name.to_string())
        }
    }
}

/// The remote reference service
pub trait ReferenceService: Send + Sync {
    fn get_reference_file(
        &self,
        parameters: &CrdsParameters,
        reftype: &str,
        observatory: &str,
    ) -> Result<ReferenceLookup, CrdsError>;

    /// Make sure a reference is available locally, returning its path
    fn check_reference_open(&self, name: &str) -> Result<String, CrdsError> {
        Ok(name.to_string())
    }
}

/// Service used when none is configured: every lookup fails
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineReferenceService;

impl ReferenceService for OfflineReferenceService {
    fn get_reference_file(
        &self,
        _parameters: &CrdsParameters,
        reftype: &str,
        _observatory: &str,
    ) -> Result<ReferenceLookup, CrdsError> {
        Err(CrdsError::Unavailable(format!(
            "no reference service configured for {}",
            reftype
        )))
    }
}

/// One reference used during a run, as recorded on the results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceUse {
    pub reftype: String,
    pub uri: String,
}

/// A reference handed to `process`
#[derive(Debug, Clone)]
pub enum ReferenceFile {
    Path(String),
    Model(Model),
    NotApplicable,
    /// The override parameter was set to an empty string
    Empty,
}

pub fn override_name(reftype: &str) -> String {
    format!("override_{}", reftype)
}

pub fn is_truthy(flag: &str) -> bool {
    matches!(flag, "true" | "True" | "t" | "yes" | "y")
}

/// Whether parameter reference retrieval is disabled. An explicit value wins over the environment.
pub fn crds_steppars_disabled(explicit: Option<bool>) -> bool {
    explicit.unwrap_or_else(|| std::env::var(DISABLE_ENV).is_ok_and(|flag| is_truthy(&flag)))
}

/// Reference selection parameters and observatory of some step data
pub fn crds_parameters_for(
    data: &StepData,
    services: &Services,
) -> Result<(CrdsParameters, String), ModelError> {
    match data {
        StepData::Model(model) => Ok((model.crds_parameters(), model.crds_observatory())),
        StepData::Library(library) => library
            .crds_parameters()
            .ok_or_else(|| ModelError::NotADataModel("empty library".to_string())),
        StepData::Sequence(items) => match items.first() {
            Some(first) => crds_parameters_for(first, services),
            None => Err(ModelError::NotADataModel("empty sequence".to_string())),
        },
        StepData::Path(path) => {
            let opened = services
                .models
                .open(path, &OpenOptions::for_reference_lookup(path))?;
            crds_parameters_for(&opened, services)
        }
        StepData::Value(value) => Err(ModelError::NotADataModel(value.kind_name().to_string())),
    }
}

/// Resolve a reference file for `input`, recording what was used
pub fn get_reference_file(
    core: &mut StepCore,
    input: &StepData,
    reftype: &str,
) -> Result<ReferenceFile, StepError> {
    let override_value = core.get_par(&override_name(reftype)).cloned();
    let reference_name = match override_value {
        Some(Value::Model(model)) => {
            core.reference_files_used.push(ReferenceUse {
                reftype: reftype.to_string(),
                uri: model.override_handle(),
            });
            return Ok(ReferenceFile::Model(model));
        }
        Some(Value::Str(path)) if path.trim().is_empty() => return Ok(ReferenceFile::Empty),
        Some(Value::Str(path)) => {
            let absolute = std::path::absolute(Path::new(&path))
                .unwrap_or_else(|_| PathBuf::from(&path))
                .to_string_lossy()
                .into_owned();
            core.reference_files_used.push(ReferenceUse {
                reftype: reftype.to_string(),
                uri: basename(&absolute),
            });
            absolute
        }
        _ => {
            let services = core.services.clone();
            let (parameters, observatory) = crds_parameters_for(input, &services)?;
            let lookup = services
                .references
                .get_reference_file(&parameters, reftype, &observatory)?;
            match lookup {
                ReferenceLookup::NotApplicable => {
                    core.reference_files_used.push(ReferenceUse {
                        reftype: reftype.to_string(),
                        uri: NOT_APPLICABLE.to_string(),
                    });
                    return Ok(ReferenceFile::NotApplicable);
                }
                ReferenceLookup::Found(name) => {
                    core.reference_files_used.push(ReferenceUse {
                        reftype: reftype.to_string(),
                        uri: format!("crds://{}", basename(&name)),
                    });
                    name
                }
            }
        }
    };

    info!(
        step = %core.qualified_name,
        "Using {} reference file {}",
        reftype.to_uppercase(),
        reference_name
    );
    let opened = core.services.references.check_reference_open(&reference_name)?;
    Ok(ReferenceFile::Path(opened))
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Where parameter references are looked up from
#[derive(Debug, Clone, Copy)]
pub enum ParameterSource<'a> {
    Data(&'a StepData),
    Parameters {
        parameters: &'a CrdsParameters,
        observatory: &'a str,
    },
}

/// Fetch a class's parameters stored as a `pars-<class>` reference.
/// Pipelines also fetch the parameters of each sub-step class into `steps`.
///
/// Never fails: problems are logged and an empty fragment returned.
pub fn get_config_from_reference(
    class: &'static StepClass,
    source: ParameterSource<'_>,
    disable: Option<bool>,
    services: &Services,
) -> ConfigFragment {
    if !class.is_pipeline() {
        return fetch_class_parameters(class, source, disable, services);
    }

    let mut steps = ConfigFragment::new();
    for def in class.step_defs {
        steps.insert_section(def.name, get_config_from_reference(def.class, source, disable, services));
    }
    let mut config = ConfigFragment::new();
    config.insert_section("steps", steps);
    let own = fetch_class_parameters(class, source, disable, services);
    merge_config(&mut config, &own);
    config
}

fn fetch_class_parameters(
    class: &'static StepClass,
    source: ParameterSource<'_>,
    disable: Option<bool>,
    services: &Services,
) -> ConfigFragment {
    let reftype = class.config_reftype();
    let mut disable = disable;

    let (parameters, observatory) = match source {
        ParameterSource::Parameters {
            parameters,
            observatory,
        } => (parameters.clone(), observatory.to_string()),
        ParameterSource::Data(data) => match crds_parameters_for(data, services) {
            Ok(found) => found,
            Err(err) => {
                warn!("Input dataset is not an instance of AbstractDataModel.");
                debug!("Cannot read reference selection parameters: {}", err);
                disable = Some(true);
                (CrdsParameters::new(), String::new())
            }
        },
    };

    if crds_steppars_disabled(disable) {
        info!("{}: CRDS parameter reference retrieval disabled.", reftype.to_uppercase());
        return ConfigFragment::new();
    }

    debug!("Retrieving step {} parameters from CRDS", reftype.to_uppercase());
    let path = match services
        .references
        .get_reference_file(&parameters, &reftype, &observatory)
    {
        Ok(ReferenceLookup::Found(path)) => path,
        Ok(ReferenceLookup::NotApplicable) => {
            debug!("{}: No parameters found", reftype.to_uppercase());
            return ConfigFragment::new();
        }
        Err(err) => {
            debug!("{}: No parameters found: {}", reftype.to_uppercase(), err);
            return ConfigFragment::new();
        }
    };

    info!("{} parameters found: {}", reftype.to_uppercase(), path);
    match load_config_file_as(&path, Origin::Reference) {
        Ok(fragment) => {
            let shown: Vec<_> = fragment
                .keys()
                .filter(|key| !matches!(key.as_str(), "class" | "name"))
                .cloned()
                .collect();
            debug!("{} parameters: {:?}", reftype.to_uppercase(), shown);
            fragment
        }
        Err(err) => {
            warn!("{}: cannot load parameters from {}: {}", reftype.to_uppercase(), path, err);
            ConfigFragment::new()
        }
    }
}
