//! Execution context handed to step behaviors

use indexmap::IndexMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::class::{StepClass, StepRegistry};
use crate::core::data::{ModelOpener, NoOpener, StepData};
use crate::core::error::StepError;
use crate::core::output::{self, OutputPathError, OutputPathRequest};
use crate::core::step::{Lineage, Step, StepCore};
use crate::core::value::Value;
use crate::execution::results::{self, SaveOptions};
use crate::reference::{self, OfflineReferenceService, ReferenceFile, ReferenceService};

/// Collaborators shared by a step and everything it builds
#[derive(Clone)]
pub struct Services {
    pub registry: Arc<StepRegistry>,
    pub references: Arc<dyn ReferenceService>,
    pub models: Arc<dyn ModelOpener>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            registry: Arc::new(StepRegistry::with_builtins()),
            references: Arc::new(OfflineReferenceService),
            models: Arc::new(NoOpener),
        }
    }
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_references(mut self, references: impl ReferenceService + 'static) -> Self {
        self.references = Arc::new(references);
        self
    }

    pub fn with_models(mut self, models: impl ModelOpener + 'static) -> Self {
        self.models = Arc::new(models);
        self
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// What `process` sees of its step while it runs
pub struct StepContext<'a> {
    core: &'a mut StepCore,
    children: &'a mut IndexMap<String, Step>,
    parent: Option<&'a Lineage<'a>>,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        core: &'a mut StepCore,
        children: &'a mut IndexMap<String, Step>,
        parent: Option<&'a Lineage<'a>>,
    ) -> Self {
        Self {
            core,
            children,
            parent,
        }
    }

    pub fn core(&self) -> &StepCore {
        &*self.core
    }

    pub fn class(&self) -> &'static StepClass {
        self.core.class()
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn qualified_name(&self) -> &str {
        self.core.qualified_name()
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.core.get_par(key)
    }

    pub fn lineage(&self) -> Lineage<'_> {
        Lineage::new(&*self.core, self.parent)
    }

    pub fn is_outermost(&self) -> bool {
        self.parent.is_none()
    }

    /// First non-`None` value of a parameter on this step or an ancestor
    pub fn search_param(&self, key: &str) -> Option<Value> {
        self.lineage().search_param(key).cloned()
    }

    pub fn services(&self) -> &Services {
        self.core.services()
    }

    pub fn child_names(&self) -> Vec<String> {
        self.children.keys().cloned().collect()
    }

    /// Run a sub-step with this step as its parent
    pub fn run_child(&mut self, name: &str, args: Vec<StepData>) -> Result<Option<StepData>, StepError> {
        let frame = Lineage::new(&*self.core, self.parent);
        let child = self.children.get_mut(name).ok_or_else(|| StepError::UnknownSubstep {
            step: frame.core().qualified_name().to_string(),
            name: name.to_string(),
        })?;
        child.run_in(args, Some(&frame))
    }

    /// Resolve a reference file for `input`, honoring `override_<reftype>`
    pub fn get_reference_file(&mut self, input: &StepData, reftype: &str) -> Result<ReferenceFile, StepError> {
        reference::get_reference_file(self.core, input, reftype)
    }

    pub fn make_input_path(&self, file_path: &str) -> PathBuf {
        self.lineage().make_input_path(file_path)
    }

    pub fn make_output_path(&self, request: &OutputPathRequest) -> Result<PathBuf, OutputPathError> {
        output::make_output_path(&self.lineage(), request)
    }

    pub fn save_model(&self, data: &StepData, options: &SaveOptions) -> Result<Vec<PathBuf>, StepError> {
        results::save_model(&self.lineage(), data, options)
    }
}
