//! Static step class descriptors and the class registry
//!
//! A step class is declared once as a `static` [`StepClass`]. The descriptor
//! carries everything that is shared by all instances: the parameter schema
//! text, the base class, reference file types and, for pipelines, the
//! declared sub-steps. Per-instance behavior comes from the boxed
//! [`StepBehavior`] produced by the class factory.

use indexmap::IndexMap;
use std::fmt;

use crate::core::context::StepContext;
use crate::core::data::StepData;
use crate::core::error::StepError;
use crate::core::step::StepCore;
use crate::reference::ReferenceUse;

/// Behavior plugged into the run lifecycle
pub trait StepBehavior: Send {
    /// Exact number of positional arguments `process` expects, if it checks
    fn arity(&self) -> Option<usize> {
        None
    }

    fn process(
        &mut self,
        cx: &mut StepContext<'_>,
        args: Vec<StepData>,
    ) -> Result<Option<StepData>, StepError> {
        let _ = args;
        Err(StepError::NotImplemented {
            class: cx.class().name.to_string(),
        })
    }

    /// Fetch reference files ahead of `process`
    fn prefetch(&mut self, cx: &mut StepContext<'_>, input: &StepData) -> Result<(), StepError> {
        let _ = (cx, input);
        Ok(())
    }

    /// Record step status and reference files on a single result
    fn finalize_result(
        &mut self,
        step: &StepCore,
        result: &StepData,
        reference_files_used: &[ReferenceUse],
    ) {
        let _ = (step, result, reference_files_used);
    }

    /// Suffix used when neither the step nor an ancestor sets one
    fn default_suffix(&self, step_name: &str) -> String {
        step_name.to_lowercase()
    }
}

/// A declared sub-step of a pipeline class
#[derive(Debug, Clone, Copy)]
pub struct SubstepDef {
    pub name: &'static str,
    pub class: &'static StepClass,
}

/// Splits a known suffix off a file stem, returning the stem and the separator
pub type SuffixRemover = fn(&str) -> (String, String);

/// Static description of a step class
pub struct StepClass {
    pub name: &'static str,
    pub base: Option<&'static StepClass>,
    /// Parameter declarations, one `key = kind(args) # comment` per line
    pub spec: &'static str,
    pub class_alias: Option<&'static str>,
    pub reference_file_types: &'static [&'static str],
    pub prefetch_references: bool,
    pub step_defs: &'static [SubstepDef],
    pub remove_suffix: Option<SuffixRemover>,
    pub factory: fn() -> Box<dyn StepBehavior>,
}

impl StepClass {
    pub const fn new(
        name: &'static str,
        base: Option<&'static StepClass>,
        factory: fn() -> Box<dyn StepBehavior>,
    ) -> Self {
        Self {
            name,
            base,
            spec: "",
            class_alias: None,
            reference_file_types: &[],
            prefetch_references: true,
            step_defs: &[],
            remove_suffix: None,
            factory,
        }
    }

    pub const fn with_spec(self, spec: &'static str) -> Self {
        Self { spec, ..self }
    }

    pub const fn with_alias(self, alias: &'static str) -> Self {
        Self {
            class_alias: Some(alias),
            ..self
        }
    }

    pub const fn with_reference_types(self, types: &'static [&'static str]) -> Self {
        Self {
            reference_file_types: types,
            ..self
        }
    }

    pub const fn with_prefetch(self, prefetch_references: bool) -> Self {
        Self {
            prefetch_references,
            ..self
        }
    }

    pub const fn with_steps(self, step_defs: &'static [SubstepDef]) -> Self {
        Self { step_defs, ..self }
    }

    pub const fn with_suffix_remover(self, remover: SuffixRemover) -> Self {
        Self {
            remove_suffix: Some(remover),
            ..self
        }
    }

    /// The class chain from the most-base class down to this one
    pub fn lineage(&'static self) -> Vec<&'static StepClass> {
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(class) = current {
            chain.push(class);
            current = class.base;
        }
        chain.reverse();
        chain
    }

    pub fn is_subclass_of(&'static self, other: &'static StepClass) -> bool {
        self.lineage().iter().any(|class| std::ptr::eq(*class, other))
    }

    pub fn is_pipeline(&self) -> bool {
        !self.step_defs.is_empty()
    }

    /// Reference types declared by this class or inherited from the nearest base declaring any
    pub fn reference_types(&'static self) -> &'static [&'static str] {
        let mut current = Some(self);
        while let Some(class) = current {
            if !class.reference_file_types.is_empty() {
                return class.reference_file_types;
            }
            current = class.base;
        }
        &[]
    }

    /// Status alias of this class or the nearest base declaring one
    pub fn alias(&'static self) -> Option<&'static str> {
        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(alias) = class.class_alias {
                return Some(alias);
            }
            current = class.base;
        }
        None
    }

    /// The suffix remover of the nearest class in the chain that declares one
    pub fn suffix_remover(&'static self) -> SuffixRemover {
        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(remover) = class.remove_suffix {
                return remover;
            }
            current = class.base;
        }
        keep_suffix
    }

    /// Reference type under which this class's parameters are stored remotely
    pub fn config_reftype(&self) -> String {
        format!("pars-{}", self.name.to_lowercase())
    }

    pub fn substep(&self, name: &str) -> Option<&'static StepClass> {
        self.step_defs
            .iter()
            .find(|def| def.name == name)
            .map(|def| def.class)
    }

    pub fn instantiate(&self) -> Box<dyn StepBehavior> {
        (self.factory)()
    }
}

fn keep_suffix(name: &str) -> (String, String) {
    (name.to_string(), "_".to_string())
}

impl fmt::Debug for StepClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepClass")
            .field("name", &self.name)
            .field("base", &self.base.map(|b| b.name))
            .field("class_alias", &self.class_alias)
            .field("reference_file_types", &self.reference_file_types)
            .field("step_defs", &self.step_defs.iter().map(|d| d.name).collect::<Vec<_>>())
            .finish()
    }
}

impl PartialEq for StepClass {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for StepClass {}

/// Maps class names and aliases to step classes
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    classes: IndexMap<String, &'static StepClass>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the base classes shipped with the crate
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(&crate::core::step::STEP)
            .register(&crate::core::pipeline::PIPELINE)
            .register(&crate::execution::hooks::SYSTEM_CALL);
        registry
    }

    pub fn register(&mut self, class: &'static StepClass) -> &mut Self {
        self.classes.insert(class.name.to_string(), class);
        if let Some(alias) = class.class_alias {
            self.classes.entry(alias.to_string()).or_insert(class);
        }
        self
    }

    pub fn resolve(&self, identifier: &str) -> Option<&'static StepClass> {
        self.classes.get(identifier).copied().or_else(|| {
            // Accept dotted module paths by their last component
            identifier
                .rsplit('.')
                .next()
                .and_then(|short| self.classes.get(short).copied())
        })
    }

    /// Registered classes, each once, in registration order
    pub fn classes(&self) -> Vec<&'static StepClass> {
        let mut seen: Vec<&'static StepClass> = Vec::new();
        for class in self.classes.values() {
            if !seen.iter().any(|c| std::ptr::eq(*c, *class)) {
                seen.push(class);
            }
        }
        seen
    }
}
