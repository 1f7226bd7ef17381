//! Step domain model

use indexmap::IndexMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::core::class::{StepBehavior, StepClass};
use crate::core::config::{validate, ConfigEntry, ConfigFragment};
use crate::core::context::Services;
use crate::core::data::StepData;
use crate::core::error::{ConfigError, ValidationError};
use crate::core::output::{self, OutputPathError, OutputPathRequest};
use crate::core::schema::{self, ParameterSchema, PathContext};
use crate::core::state::RunPhase;
use crate::core::value::{Origin, Tagged, Value};
use crate::execution::hooks::{self, HookKind};
use crate::logging::{LogRecord, LogRecords};
use crate::reference::ReferenceUse;

/// Root of every step's qualified (logger) name
pub const ROOT_LOGGER: &str = "stpipe";

/// Parameters every step has
pub const STEP_SPEC: &str = r#"
    pre_hooks = string_list(default=list())  # Steps or commands run before processing
    post_hooks = string_list(default=list())  # Steps or commands run after processing
    output_file = output_file(default=None)  # File to save output to.
    output_dir = string(default=None)  # Directory path for output files
    output_ext = string(default='.fits')  # Default type of output
    output_use_model = boolean(default=False)  # When saving use `DataModel.meta.filename`
    output_use_index = boolean(default=True)  # Append index.
    save_results = boolean(default=False)  # Force save results
    skip = boolean(default=False)  # Skip this step
    suffix = string(default=None)  # Default suffix for output files
    search_output_file = boolean(default=True)  # Use outputfile define in parent step
    input_dir = string(default=None)  # Input directory
"#;

struct Unimplemented;

impl StepBehavior for Unimplemented {}

fn unimplemented_step() -> Box<dyn StepBehavior> {
    Box::new(Unimplemented)
}

/// The base step class
pub static STEP: StepClass = StepClass::new("Step", None, unimplemented_step).with_spec(STEP_SPEC);

/// Schema-validated parameter values of one step
#[derive(Debug, Clone)]
pub struct Parameters {
    schema: Arc<ParameterSchema>,
    values: IndexMap<String, Value>,
}

impl Parameters {
    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Assign with schema coercion
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), ValidationError> {
        let spec = self
            .schema
            .leaf(key)
            .ok_or_else(|| ValidationError::new(key, "not a parameter of this step"))?;
        let coerced = spec.coerce(key, &Tagged::new(Origin::Keyword, value), &PathContext::new(""))?;
        self.values.insert(key.to_string(), coerced);
        Ok(())
    }

    fn set_unchecked(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

macro_rules! bool_param {
    ($get:ident, $set:ident, $key:literal) => {
        pub fn $get(&self) -> bool {
            self.params.get_bool($key)
        }

        pub fn $set(&mut self, value: bool) {
            self.params.set_unchecked($key, Value::Bool(value));
        }
    };
}

macro_rules! str_param {
    ($get:ident, $set:ident, $key:literal) => {
        pub fn $get(&self) -> Option<&str> {
            self.params.get_str($key)
        }

        pub fn $set(&mut self, value: Option<&str>) {
            self.params.set_unchecked($key, Value::from(value));
        }
    };
}

/// Identity, parameters and per-run bookkeeping of a step
#[derive(Debug, Clone)]
pub struct StepCore {
    pub(crate) class: &'static StepClass,
    pub(crate) name: String,
    /// Dotted logger name, `stpipe.<parent>.<name>`
    pub(crate) qualified_name: String,
    pub(crate) config_file: Option<PathBuf>,
    pub(crate) params: Parameters,
    pub(crate) input_filename: Option<String>,
    pub(crate) reference_files_used: Vec<ReferenceUse>,
    pub(crate) services: Services,
}

impl StepCore {
    pub fn class(&self) -> &'static StepClass {
        self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn get_par(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn set_par(&mut self, key: &str, value: impl Into<Value>) -> Result<(), ValidationError> {
        self.params.set(key, value.into())
    }

    pub fn input_filename(&self) -> Option<&str> {
        self.input_filename.as_deref()
    }

    pub fn reference_files_used(&self) -> &[ReferenceUse] {
        &self.reference_files_used
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    bool_param!(skip, set_skip, "skip");
    bool_param!(save_results, set_save_results, "save_results");
    bool_param!(output_use_model, set_output_use_model, "output_use_model");
    bool_param!(output_use_index, set_output_use_index, "output_use_index");
    bool_param!(search_output_file, set_search_output_file, "search_output_file");
    str_param!(output_file, set_output_file, "output_file");
    str_param!(output_dir, set_output_dir, "output_dir");
    str_param!(output_ext, set_output_ext, "output_ext");
    str_param!(suffix, set_suffix, "suffix");
    str_param!(input_dir, set_input_dir, "input_dir");

    pub fn pre_hooks(&self) -> Vec<String> {
        self.hook_entries("pre_hooks")
    }

    pub fn post_hooks(&self) -> Vec<String> {
        self.hook_entries("post_hooks")
    }

    fn hook_entries(&self, key: &str) -> Vec<String> {
        self.params
            .get(key)
            .and_then(Value::as_list)
            .map(|items| items.iter().map(|item| item.to_string()).collect())
            .unwrap_or_default()
    }

    /// Record the primary input. With `exclusive`, an input directory or
    /// filename already set here or by an ancestor is kept.
    pub(crate) fn set_primary_input_in(
        &mut self,
        input: &StepData,
        exclusive: bool,
        parent: Option<&Lineage<'_>>,
    ) {
        let inherited_dir = self.input_dir().is_some()
            || parent.is_some_and(|p| p.search_str("input_dir").is_some());
        if !exclusive || !inherited_dir {
            if let StepData::Path(path) = input {
                if path.is_file() {
                    let dir = path
                        .parent()
                        .map(|d| d.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    self.set_input_dir(Some(&dir));
                }
            }
        }

        let inherited_input = self.input_filename.is_some()
            || parent.is_some_and(|p| p.search(|core| core.input_filename().map(str::to_string)).is_some());
        if exclusive && inherited_input {
            return;
        }
        match input {
            StepData::Path(path) => self.input_filename = Some(path.to_string_lossy().into_owned()),
            StepData::Model(model) => match model.filename() {
                Some(filename) => self.input_filename = Some(filename),
                None => debug!(step = %self.qualified_name, "Cannot set input filename: model has no filename"),
            },
            other => debug!(
                step = %self.qualified_name,
                "Cannot set input filename from {:?}",
                other
            ),
        }
    }
}

/// A step and its ancestors for the duration of a run.
///
/// Frames are borrowed from the call stack, so the chain can only point
/// upwards and cannot form a cycle.
#[derive(Debug, Clone, Copy)]
pub struct Lineage<'a> {
    core: &'a StepCore,
    parent: Option<&'a Lineage<'a>>,
}

impl<'a> Lineage<'a> {
    pub fn new(core: &'a StepCore, parent: Option<&'a Lineage<'a>>) -> Self {
        Self { core, parent }
    }

    pub fn root(core: &'a StepCore) -> Self {
        Self::new(core, None)
    }

    pub fn core(&self) -> &'a StepCore {
        self.core
    }

    pub fn parent(&self) -> Option<&'a Lineage<'a>> {
        self.parent
    }

    pub fn is_outermost(&self) -> bool {
        self.parent.is_none()
    }

    /// First hit walking from this step up to the outermost one
    pub fn search<T>(&self, mut f: impl FnMut(&'a StepCore) -> Option<T>) -> Option<T> {
        let mut frame: Option<&Lineage<'a>> = Some(self);
        while let Some(current) = frame {
            if let Some(found) = f(current.core) {
                return Some(found);
            }
            frame = current.parent;
        }
        None
    }

    /// First parameter value along the chain that is not `None`
    pub fn search_param(&self, key: &str) -> Option<&'a Value> {
        self.search(|core| core.params.get(key).filter(|value| !value.is_none()))
    }

    pub fn search_str(&self, key: &str) -> Option<String> {
        self.search_param(key).map(|value| match value {
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Prefix a bare file name with the input directory found along the chain
    pub fn make_input_path(&self, file_path: &str) -> PathBuf {
        let path = Path::new(file_path);
        let has_dir = path.parent().is_some_and(|dir| !dir.as_os_str().is_empty());
        match self.search_str("input_dir") {
            Some(dir) if !has_dir && !dir.is_empty() => Path::new(&dir).join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// A configured, runnable step
pub struct Step {
    pub(crate) core: StepCore,
    pub(crate) behavior: Box<dyn StepBehavior>,
    pub(crate) children: IndexMap<String, Step>,
    pub(crate) pre_hooks: Vec<Step>,
    pub(crate) post_hooks: Vec<Step>,
    pub(crate) log_records: LogRecords,
    pub(crate) phase: RunPhase,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.core.qualified_name)
            .field("class", &self.core.class.name)
            .field("phase", &self.phase)
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl std::ops::Deref for Step {
    type Target = StepCore;

    fn deref(&self) -> &StepCore {
        &self.core
    }
}

impl std::ops::DerefMut for Step {
    fn deref_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }
}

impl Step {
    /// Create a step from keyword parameters
    pub fn new(
        class: &'static StepClass,
        name: Option<&str>,
        keywords: &IndexMap<String, Value>,
        services: Services,
    ) -> Result<Self, ConfigError> {
        let schema = schema::resolve(class)?;
        let fragment = ConfigFragment::from_values(keywords, Origin::Keyword);
        let validated = validate(&fragment, &schema, &PathContext::new(""))?;
        Self::build(class, name.unwrap_or(class.name), None, None, &validated, services)
    }

    /// Create a step with nothing but schema defaults
    pub fn with_defaults(class: &'static StepClass, services: Services) -> Result<Self, ConfigError> {
        Self::new(class, None, &IndexMap::new(), services)
    }

    /// Create a step from an already merged configuration section
    pub fn from_config_section(
        class: &'static StepClass,
        config: ConfigFragment,
        name: Option<&str>,
        config_file: Option<&Path>,
        services: Services,
    ) -> Result<Self, ConfigError> {
        let mut config = config;
        let config_name = config.take_str("name");
        config.remove("class");
        config.remove("config_file");
        let name = name
            .map(str::to_string)
            .or(config_name)
            .unwrap_or_else(|| class.name.to_string());

        let schema = schema::resolve(class)?;
        let root_dir = config_file
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let validated = validate(&config, &schema, &PathContext::new(root_dir))?;
        Self::build(class, &name, None, config_file, &validated, services)
    }

    /// Assemble a step from a validated fragment, building hooks and sub-steps
    pub(crate) fn build(
        class: &'static StepClass,
        name: &str,
        parent: Option<&str>,
        config_file: Option<&Path>,
        validated: &ConfigFragment,
        services: Services,
    ) -> Result<Self, ConfigError> {
        let qualified_name = match parent {
            Some(parent) => format!("{}.{}", parent, name),
            None => format!("{}.{}", ROOT_LOGGER, name),
        };

        let mut values = IndexMap::new();
        for (key, entry) in validated.iter() {
            if let ConfigEntry::Value(tagged) = entry {
                values.insert(key.clone(), tagged.value.clone());
            }
        }

        let core = StepCore {
            class,
            name: name.to_string(),
            qualified_name,
            config_file: config_file.map(Path::to_path_buf),
            params: Parameters {
                schema: schema::resolve(class)?,
                values,
            },
            input_filename: None,
            reference_files_used: Vec::new(),
            services,
        };

        let pre_hooks = hooks::build_hooks(&core, HookKind::Pre)?;
        let post_hooks = hooks::build_hooks(&core, HookKind::Post)?;

        let mut children = IndexMap::new();
        let empty = ConfigFragment::new();
        let steps = validated.section("steps").unwrap_or(&empty);
        for def in class.step_defs {
            let section = steps.section(def.name).unwrap_or(&empty);
            let child = Step::build(
                def.class,
                def.name,
                Some(&core.qualified_name),
                config_file,
                section,
                core.services.clone(),
            )?;
            children.insert(def.name.to_string(), child);
        }

        debug!(step = %core.qualified_name, "Step {} created ({})", core.name, class.name);

        Ok(Step {
            core,
            behavior: class.instantiate(),
            children,
            pre_hooks,
            post_hooks,
            log_records: LogRecords::default(),
            phase: RunPhase::Created,
        })
    }

    pub fn core(&self) -> &StepCore {
        &self.core
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn children(&self) -> &IndexMap<String, Step> {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&Step> {
        self.children.get(name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Step> {
        self.children.get_mut(name)
    }

    pub fn pre_hook_steps(&self) -> &[Step] {
        &self.pre_hooks
    }

    pub fn post_hook_steps(&self) -> &[Step] {
        &self.post_hooks
    }

    /// Log records captured during the most recent run
    pub fn log_records(&self) -> Vec<LogRecord> {
        self.log_records.snapshot()
    }

    /// Parameter values keyed by name. With `full_spec`, parameters
    /// inherited from base classes are included.
    pub fn get_pars(&self, full_spec: bool) -> IndexMap<String, Value> {
        let own;
        let schema: &ParameterSchema = if full_spec {
            self.core.params.schema()
        } else {
            match schema::own_schema(self.core.class) {
                Ok(schema) => {
                    own = schema;
                    &own
                }
                Err(_) => return IndexMap::new(),
            }
        };

        let paths = PathContext::new("");
        let mut pars = IndexMap::new();
        for (key, spec) in schema.leaves() {
            if let Some(value) = self.core.params.get(key) {
                let coerced = spec
                    .coerce(key, &Tagged::new(Origin::Keyword, value.clone()), &paths)
                    .unwrap_or_else(|_| value.clone());
                pars.insert(key.clone(), coerced);
            }
        }

        if self.core.class.is_pipeline() {
            let steps = self
                .children
                .iter()
                .map(|(name, child)| (name.clone(), Value::Map(child.get_pars(full_spec))))
                .collect();
            pars.insert("steps".to_string(), Value::Map(steps));
        }
        pars
    }

    /// Assign known parameters, recursing into sub-steps through `steps`
    pub fn update_pars(&mut self, parameters: &IndexMap<String, Value>) -> Result<(), ValidationError> {
        let existing = self.get_pars(true);
        for (key, value) in parameters {
            if !existing.contains_key(key) {
                debug!(
                    step = %self.core.qualified_name,
                    "Parameter {} is not valid for step {}. Ignoring.",
                    key,
                    self.core.name
                );
                continue;
            }

            if key == "steps" {
                let Value::Map(steps) = value else {
                    debug!(step = %self.core.qualified_name, "Parameter steps must be a mapping. Ignoring.");
                    continue;
                };
                for (child_name, child_pars) in steps {
                    match (self.children.get_mut(child_name), child_pars) {
                        (Some(child), Value::Map(child_pars)) => child.update_pars(child_pars)?,
                        _ => debug!(
                            step = %self.core.qualified_name,
                            "Parameter steps.{} is not valid for step {}. Ignoring.",
                            child_name,
                            self.core.name
                        ),
                    }
                }
            } else {
                self.core.set_par(key, value.clone())?;
            }
        }
        Ok(())
    }

    /// Run `f`, then restore every parameter to its value from before
    pub fn with_preserved_pars<R>(
        &mut self,
        f: impl FnOnce(&mut Step) -> R,
    ) -> Result<R, ValidationError> {
        let saved = self.get_pars(true);
        let out = f(self);
        self.update_pars(&saved)?;
        Ok(out)
    }

    /// Record the primary input of a standalone step
    pub fn set_primary_input(&mut self, input: &StepData, exclusive: bool) {
        self.core.set_primary_input_in(input, exclusive, None);
    }

    pub fn make_input_path(&self, file_path: &str) -> PathBuf {
        Lineage::root(&self.core).make_input_path(file_path)
    }

    pub fn default_output_file(&self, input_file: Option<&str>) -> String {
        output::default_output_file(&Lineage::root(&self.core), input_file)
    }

    pub fn make_output_path(&self, request: &OutputPathRequest) -> Result<PathBuf, OutputPathError> {
        output::make_output_path(&Lineage::root(&self.core), request)
    }

    /// Keyword fragment that rebuilds this step's parameters
    pub fn to_fragment(&self) -> ConfigFragment {
        ConfigFragment::from_values(&self.get_pars(true), Origin::Keyword)
    }
}
