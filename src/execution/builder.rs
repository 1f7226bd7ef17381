//! Building steps from layered configuration
//!
//! Sources are merged lowest precedence first:
//! schema defaults, remote parameter references, the config file, keyword
//! overrides and finally command-line overrides.

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::class::StepClass;
use crate::core::config::{load_config_file, merge_config, ConfigFragment};
use crate::core::context::Services;
use crate::core::data::StepData;
use crate::core::error::{ConfigError, StepError};
use crate::core::step::Step;
use crate::core::value::{Origin, Value};
use crate::logging::{LogConfig, LogConfigGuard};
use crate::reference::{get_config_from_reference, ParameterSource};

/// A merged configuration and the file it was read from
#[derive(Debug, Clone, Default)]
pub struct BuiltConfig {
    pub config: ConfigFragment,
    pub config_file: Option<PathBuf>,
}

/// The configuration sources of one step, lowest precedence first
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub reference: ConfigFragment,
    pub config_file: Option<PathBuf>,
    pub keywords: IndexMap<String, Value>,
    /// Values tagged as coming from the command line
    pub command_line: ConfigFragment,
}

impl ConfigSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference(mut self, reference: ConfigFragment) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_config_file(mut self, config_file: impl Into<PathBuf>) -> Self {
        self.config_file = Some(config_file.into());
        self
    }

    pub fn with_keywords(mut self, keywords: IndexMap<String, Value>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_command_line(mut self, command_line: ConfigFragment) -> Self {
        self.command_line = command_line;
        self
    }

    /// Merge every source for `class`
    pub fn resolve(&self, class: &'static StepClass, services: &Services) -> Result<BuiltConfig, ConfigError> {
        let mut config = self.reference.clone();

        let config_dir = match &self.config_file {
            Some(path) => {
                let from_file = load_config_file(path)?;
                merge_config(&mut config, &from_file);
                path.parent().map(Path::to_path_buf).unwrap_or_default()
            }
            None => PathBuf::new(),
        };

        let mut keywords = self.keywords.clone();
        let steps = keywords.shift_remove("steps");
        let mut from_keywords = ConfigFragment::from_values(&keywords, Origin::Keyword);
        if let Some(Value::Map(steps)) = steps {
            let mut sections = ConfigFragment::new();
            for (step_name, pars) in &steps {
                let section = substep_section(class, &config_dir, step_name, pars, services)?;
                sections.insert_section(step_name.clone(), section);
            }
            if !sections.is_empty() {
                from_keywords.insert_section("steps", sections);
            }
        }
        merge_config(&mut config, &from_keywords);
        merge_config(&mut config, &self.command_line);

        Ok(BuiltConfig {
            config,
            config_file: self.config_file.clone(),
        })
    }
}

/// Keyword block of one sub-step, with its own `config_file` merged underneath
fn substep_section(
    class: &'static StepClass,
    config_dir: &Path,
    step_name: &str,
    pars: &Value,
    services: &Services,
) -> Result<ConfigFragment, ConfigError> {
    let mut pars = match pars {
        Value::Map(map) => map.clone(),
        _ => IndexMap::new(),
    };
    let Some(file) = pars.shift_remove("config_file") else {
        return Ok(ConfigFragment::from_values(&pars, Origin::Keyword));
    };

    let step_config_file = config_dir.join(file.to_string());
    let mut section = load_config_file(&step_config_file)?;
    if let Some(found) = section.take_str("name") {
        if found != step_name {
            return Err(ConfigError::StepNameMismatch {
                file: step_config_file,
                expected: step_name.to_string(),
                found,
            });
        }
    }
    if let Some(found) = section.take_str("class") {
        let declared = class.substep(step_name);
        let resolved = services.registry.resolve(&found);
        let matches = match (declared, resolved) {
            (Some(declared), Some(resolved)) => resolved.is_subclass_of(declared),
            (None, _) => true,
            (Some(_), None) => false,
        };
        if !matches {
            return Err(ConfigError::StepClassMismatch {
                file: step_config_file,
                step: step_name.to_string(),
                expected: declared.map(|c| c.name).unwrap_or_default().to_string(),
                found,
            });
        }
    }
    merge_config(&mut section, &ConfigFragment::from_values(&pars, Origin::Keyword));
    Ok(section)
}

/// Build the configuration of a step: remote parameters for `input`,
/// then `keywords["config_file"]`, then the remaining keywords.
pub fn build_config(
    class: &'static StepClass,
    input: Option<&StepData>,
    keywords: &IndexMap<String, Value>,
    disable_crds_steppars: Option<bool>,
    services: &Services,
) -> Result<BuiltConfig, ConfigError> {
    let reference = match input {
        Some(input) => get_config_from_reference(
            class,
            ParameterSource::Data(input),
            disable_crds_steppars,
            services,
        ),
        None => {
            info!("No filename given, cannot retrieve config from CRDS");
            ConfigFragment::new()
        }
    };

    let mut keywords = keywords.clone();
    let mut sources = ConfigSources::new().with_reference(reference);
    if let Some(config_file) = keywords.shift_remove("config_file") {
        if !config_file.is_none() {
            sources = sources.with_config_file(config_file.to_string());
        }
    }
    sources.with_keywords(keywords).resolve(class, services)
}

/// Pick the class named by the configuration's `class` key, which must
/// derive from `expected`, and the instance name. Both keys are removed.
///
/// The name is `name` if given, else the configuration's `name`, else the
/// config file's stem, else the class name.
pub fn parse_class_and_name(
    expected: &'static StepClass,
    config: &mut ConfigFragment,
    name: Option<&str>,
    config_file: Option<&Path>,
    services: &Services,
) -> Result<(&'static StepClass, String), ConfigError> {
    let class = match config.take_str("class") {
        Some(identifier) => {
            let class = services
                .registry
                .resolve(&identifier)
                .ok_or_else(|| ConfigError::UnknownClass(identifier.clone()))?;
            if !class.is_subclass_of(expected) {
                return Err(ConfigError::NotASubclass {
                    expected: expected.name.to_string(),
                    found: class.name.to_string(),
                });
            }
            class
        }
        None => expected,
    };

    let config_name = config.take_str("name").filter(|n| !n.is_empty());
    let name = name
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or(config_name)
        .or_else(|| {
            config_file
                .and_then(Path::file_stem)
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| class.name.to_string());
    Ok((class, name))
}

impl Step {
    /// Create a step from a config file. A `class` key in the file selects a
    /// subclass of `class`.
    pub fn from_config_file(
        class: &'static StepClass,
        config_file: impl AsRef<Path>,
        name: Option<&str>,
        services: Services,
    ) -> Result<Step, ConfigError> {
        let config_file = config_file.as_ref();
        let mut config = load_config_file(config_file)?;
        let (class, name) = parse_class_and_name(class, &mut config, name, Some(config_file), &services)?;
        Step::from_config_section(class, config, Some(&name), Some(config_file), services)
    }
}

fn load_log_config(path: &str) -> Result<LogConfig, ConfigError> {
    LogConfig::load(path).map_err(|e| ConfigError::LogConfig {
        path: PathBuf::from(path),
        reason: e.to_string(),
    })
}

/// Create a fresh step of `class` from `keywords` and run it on `args`.
///
/// `keywords` may carry `config_file`, `steps` and `logcfg`. The first
/// argument is used to fetch remote parameters.
pub fn call(
    class: &'static StepClass,
    args: Vec<StepData>,
    keywords: IndexMap<String, Value>,
    services: &Services,
) -> Result<Option<StepData>, StepError> {
    let mut keywords = keywords;
    let mut guard = match keywords.shift_remove("logcfg") {
        Some(logcfg) => load_log_config(&logcfg.to_string())?.context(),
        None if !LogConfig::any_applied() => match LogConfig::find() {
            Some(path) => match LogConfig::load(&path) {
                Ok(config) => config.context(),
                Err(err) => {
                    warn!("Ignoring logging config {}: {}", path.display(), err);
                    LogConfigGuard::none()
                }
            },
            None => LogConfigGuard::none(),
        },
        None => LogConfigGuard::none(),
    };

    let BuiltConfig {
        mut config,
        config_file,
    } = build_config(class, args.first(), &keywords, None, services)?;

    if let Some(logcfg) = config.take_str("logcfg") {
        let log_config = load_log_config(&logcfg)?;
        guard.replace(log_config).map_err(|e| ConfigError::LogConfig {
            path: PathBuf::from(&logcfg),
            reason: e.to_string(),
        })?;
    }
    config.remove("class");
    let name = config.value("name").and_then(Value::as_str).map(str::to_string);

    let mut step = Step::from_config_section(
        class,
        config,
        name.as_deref(),
        config_file.as_deref(),
        services.clone(),
    )?;
    let result = step.run(args);
    drop(guard);
    result
}
