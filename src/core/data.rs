//! Data-model capability interface
//!
//! Steps never inspect science data themselves; they see models through the
//! [`DataModel`] trait and open files through a [`ModelOpener`].

use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::core::step::StepCore;
use crate::core::value::Value;
use crate::reference::ReferenceUse;

/// Parameters used to select reference files for a dataset
pub type CrdsParameters = BTreeMap<String, String>;

/// Errors raised by data models and openers
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("cannot open {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("cannot save {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} exists and overwrite is not allowed")]
    Exists { path: PathBuf },

    #[error("model has no cal_step metadata slot")]
    NoStatusSlot,

    #[error("no model opener is configured to open {path}")]
    NoOpener { path: PathBuf },

    #[error("{0} cannot provide reference selection parameters")]
    NotADataModel(String),
}

/// Metadata every model exposes to the step machinery
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelMeta {
    pub filename: Option<String>,
    /// Per-step processing status. `None` means the model has no such slot.
    pub cal_step: Option<IndexMap<String, String>>,
    pub attributes: IndexMap<String, String>,
}

impl ModelMeta {
    pub fn set_step_status(&mut self, alias: &str, status: &str) -> Result<(), ModelError> {
        match self.cal_step.as_mut() {
            Some(cal_step) => {
                cal_step.insert(alias.to_string(), status.to_string());
                Ok(())
            }
            None => Err(ModelError::NoStatusSlot),
        }
    }
}

/// A scientific data model
pub trait DataModel: Send + fmt::Debug {
    fn meta(&self) -> &ModelMeta;

    fn meta_mut(&mut self) -> &mut ModelMeta;

    /// Write the model to `path`, returning the path actually written
    fn save(&mut self, path: &Path, overwrite: bool) -> Result<PathBuf, ModelError>;

    fn crds_parameters(&self) -> CrdsParameters {
        CrdsParameters::new()
    }

    fn crds_observatory(&self) -> String {
        String::new()
    }

    /// Identifier recorded when this model overrides a reference file
    fn override_handle(&self) -> String {
        format!(
            "override:{}",
            self.meta().filename.as_deref().unwrap_or("<unnamed>")
        )
    }
}

/// Shared handle to a data model
#[derive(Clone)]
pub struct Model(Arc<Mutex<dyn DataModel>>);

impl Model {
    pub fn new<M: DataModel + 'static>(model: M) -> Self {
        Model(Arc::new(Mutex::new(model)))
    }

    fn lock(&self) -> MutexGuard<'_, dyn DataModel + 'static> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn filename(&self) -> Option<String> {
        self.lock().meta().filename.clone()
    }

    pub fn meta(&self) -> ModelMeta {
        self.lock().meta().clone()
    }

    pub fn with_meta_mut<R>(&self, f: impl FnOnce(&mut ModelMeta) -> R) -> R {
        let mut guard = self.lock();
        f(guard.meta_mut())
    }

    pub fn set_step_status(&self, alias: &str, status: &str) -> Result<(), ModelError> {
        self.with_meta_mut(|meta| meta.set_step_status(alias, status))
    }

    pub fn save(&self, path: &Path, overwrite: bool) -> Result<PathBuf, ModelError> {
        self.lock().save(path, overwrite)
    }

    pub fn crds_parameters(&self) -> CrdsParameters {
        self.lock().crds_parameters()
    }

    pub fn crds_observatory(&self) -> String {
        self.lock().crds_observatory()
    }

    pub fn override_handle(&self) -> String {
        self.lock().override_handle()
    }

    /// Whether both handles point at the same model
    pub fn same_as(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Model").field(&self.filename()).finish()
    }
}

/// A lazily loaded collection of models with its own finalize contract
pub trait ModelLibrary: Send + Sync + fmt::Debug {
    fn members(&self) -> Vec<Model>;

    /// Name of the association table the library was built from
    fn table_name(&self) -> Option<String> {
        None
    }

    fn crds_parameters(&self) -> Option<(CrdsParameters, String)> {
        self.members()
            .first()
            .map(|model| (model.crds_parameters(), model.crds_observatory()))
    }

    fn finalize_result(&self, step: &StepCore, reference_files_used: &[ReferenceUse]);
}

/// Values flowing through `Step::run`
#[derive(Debug, Clone)]
pub enum StepData {
    Path(PathBuf),
    Model(Model),
    Sequence(Vec<StepData>),
    Library(Arc<dyn ModelLibrary>),
    Value(Value),
}

impl StepData {
    /// The file name this input was read from, when one is known
    pub fn filename(&self) -> Option<String> {
        match self {
            StepData::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            StepData::Model(model) => model.filename().map(|name| {
                Path::new(&name)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or(name)
            }),
            StepData::Sequence(items) => items.first().and_then(StepData::filename),
            StepData::Library(library) => library.table_name(),
            StepData::Value(_) => None,
        }
    }

    /// Every model reachable from this value, libraries included
    pub fn models(&self) -> Vec<Model> {
        match self {
            StepData::Model(model) => vec![model.clone()],
            StepData::Sequence(items) => items.iter().flat_map(StepData::models).collect(),
            StepData::Library(library) => library.members(),
            StepData::Path(_) | StepData::Value(_) => Vec::new(),
        }
    }

    pub fn as_model(&self) -> Option<&Model> {
        match self {
            StepData::Model(model) => Some(model),
            _ => None,
        }
    }
}

impl From<Model> for StepData {
    fn from(model: Model) -> Self {
        StepData::Model(model)
    }
}

impl From<PathBuf> for StepData {
    fn from(path: PathBuf) -> Self {
        StepData::Path(path)
    }
}

impl From<&str> for StepData {
    fn from(path: &str) -> Self {
        StepData::Path(PathBuf::from(path))
    }
}

impl From<Value> for StepData {
    fn from(value: Value) -> Self {
        StepData::Value(value)
    }
}

/// Hints passed to the opener, e.g. when only the first association member matters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenOptions {
    pub asn_n_members: Option<usize>,
    pub asn_exptypes: Vec<String>,
}

impl OpenOptions {
    /// Options used when a file is opened only to read reference selection parameters
    pub fn for_reference_lookup(path: &Path) -> Self {
        let is_association = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_association {
            Self {
                asn_n_members: Some(1),
                asn_exptypes: vec!["science".to_string()],
            }
        } else {
            Self::default()
        }
    }
}

/// Opens files into step data
pub trait ModelOpener: Send + Sync {
    fn open(&self, path: &Path, options: &OpenOptions) -> Result<StepData, ModelError>;
}

/// Opener used when none is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpener;

impl ModelOpener for NoOpener {
    fn open(&self, path: &Path, _options: &OpenOptions) -> Result<StepData, ModelError> {
        Err(ModelError::NoOpener {
            path: path.to_path_buf(),
        })
    }
}
