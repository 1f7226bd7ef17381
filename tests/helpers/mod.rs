//! Test utilities: in-memory data models, a recording reference service and
//! a handful of step classes

#![allow(dead_code)]

use anyhow::anyhow;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use stpipe::core::class::SubstepDef;
use stpipe::core::data::{CrdsParameters, DataModel, ModelError, ModelMeta, ModelOpener, OpenOptions};
use stpipe::core::pipeline::sequential;
use stpipe::reference::{CrdsError, ReferenceFile, ReferenceLookup, ReferenceUse};
use stpipe::{
    Model, ReferenceService, Services, StepBehavior, StepClass, StepContext, StepData, StepError,
    StepRegistry, Value, PIPELINE, STEP,
};

/// Data model that never touches the disk. Saves are recorded.
#[derive(Debug, Clone, Default)]
pub struct MemoryModel {
    pub meta: ModelMeta,
    pub crds: CrdsParameters,
    pub observatory: String,
    pub saved: Arc<Mutex<Vec<PathBuf>>>,
}

impl MemoryModel {
    pub fn new(filename: &str) -> Self {
        Self {
            meta: ModelMeta {
                filename: Some(filename.to_string()),
                cal_step: Some(IndexMap::new()),
                attributes: IndexMap::new(),
            },
            observatory: "jwst".to_string(),
            ..Self::default()
        }
    }

    /// A model without a `cal_step` slot
    pub fn without_status(filename: &str) -> Self {
        let mut model = Self::new(filename);
        model.meta.cal_step = None;
        model
    }

    pub fn with_crds(mut self, key: &str, value: &str) -> Self {
        self.crds.insert(key.to_string(), value.to_string());
        self
    }
}

impl DataModel for MemoryModel {
    fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ModelMeta {
        &mut self.meta
    }

    fn save(&mut self, path: &Path, overwrite: bool) -> Result<PathBuf, ModelError> {
        let mut saved = self.saved.lock().unwrap();
        if !overwrite && saved.iter().any(|p| p == path) {
            return Err(ModelError::Exists {
                path: path.to_path_buf(),
            });
        }
        saved.push(path.to_path_buf());
        Ok(path.to_path_buf())
    }

    fn crds_parameters(&self) -> CrdsParameters {
        self.crds.clone()
    }

    fn crds_observatory(&self) -> String {
        self.observatory.clone()
    }
}

/// Wrap a fresh in-memory model, returning the handle and its save log
pub fn memory_model(filename: &str) -> (Model, Arc<Mutex<Vec<PathBuf>>>) {
    let model = MemoryModel::new(filename);
    let saved = model.saved.clone();
    (Model::new(model), saved)
}

/// Opens any path as an in-memory model carrying `crds`
#[derive(Debug, Clone, Default)]
pub struct MemoryOpener {
    pub crds: CrdsParameters,
    pub opened: Arc<Mutex<Vec<(PathBuf, OpenOptions)>>>,
}

impl MemoryOpener {
    pub fn with_crds(mut self, key: &str, value: &str) -> Self {
        self.crds.insert(key.to_string(), value.to_string());
        self
    }
}

impl ModelOpener for MemoryOpener {
    fn open(&self, path: &Path, options: &OpenOptions) -> Result<StepData, ModelError> {
        self.opened.lock().unwrap().push((path.to_path_buf(), options.clone()));
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut model = MemoryModel::new(&filename);
        model.crds = self.crds.clone();
        Ok(StepData::Model(Model::new(model)))
    }
}

/// Reference service answering from a table and recording every query
#[derive(Debug, Clone, Default)]
pub struct RecordingReferences {
    pub answers: BTreeMap<String, String>,
    pub queries: Arc<Mutex<Vec<(String, CrdsParameters)>>>,
}

impl RecordingReferences {
    pub fn with_answer(mut self, reftype: &str, answer: impl Into<String>) -> Self {
        self.answers.insert(reftype.to_string(), answer.into());
        self
    }

    pub fn queried(&self) -> Vec<String> {
        self.queries.lock().unwrap().iter().map(|(reftype, _)| reftype.clone()).collect()
    }
}

impl ReferenceService for RecordingReferences {
    fn get_reference_file(
        &self,
        parameters: &CrdsParameters,
        reftype: &str,
        _observatory: &str,
    ) -> Result<ReferenceLookup, CrdsError> {
        self.queries
            .lock()
            .unwrap()
            .push((reftype.to_string(), parameters.clone()));
        match self.answers.get(reftype) {
            Some(answer) => Ok(ReferenceLookup::from_name(answer)),
            None => Err(CrdsError::NoMatch {
                reftype: reftype.to_string(),
                reason: "no rule".to_string(),
            }),
        }
    }
}

fn int_arg(args: &[StepData]) -> Option<i64> {
    match args.first() {
        Some(StepData::Value(value)) => value.as_int(),
        _ => None,
    }
}

/// Multiplies an integer argument by `factor`; models pass through
struct Scale;

impl StepBehavior for Scale {
    fn process(
        &mut self,
        cx: &mut StepContext<'_>,
        args: Vec<StepData>,
    ) -> Result<Option<StepData>, StepError> {
        let factor = cx.param("factor").and_then(Value::as_int).unwrap_or(1);
        match int_arg(&args) {
            Some(v) => Ok(Some(StepData::Value(Value::Int(v * factor)))),
            None => Ok(args.into_iter().next()),
        }
    }
}

fn scale() -> Box<dyn StepBehavior> {
    Box::new(Scale)
}

pub static SCALE: StepClass = StepClass::new("Scale", Some(&STEP), scale).with_spec(
    r#"
    factor = integer(default=1)  # Multiplier
    label = string(default='default')  # Free-form label
    "#,
);

/// Adds one to an integer argument, used as a hook
struct Increment;

impl StepBehavior for Increment {
    fn process(
        &mut self,
        _cx: &mut StepContext<'_>,
        args: Vec<StepData>,
    ) -> Result<Option<StepData>, StepError> {
        Ok(int_arg(&args).map(|v| StepData::Value(Value::Int(v + 1))))
    }
}

fn increment() -> Box<dyn StepBehavior> {
    Box::new(Increment)
}

pub static INCREMENT: StepClass = StepClass::new("Increment", Some(&STEP), increment);

/// Fails whenever `process` is reached
struct Refuse;

impl StepBehavior for Refuse {
    fn process(
        &mut self,
        cx: &mut StepContext<'_>,
        _args: Vec<StepData>,
    ) -> Result<Option<StepData>, StepError> {
        Err(StepError::Process(anyhow!("{} must not process", cx.name())))
    }
}

fn refuse() -> Box<dyn StepBehavior> {
    Box::new(Refuse)
}

pub static REFUSE: StepClass = StepClass::new("Refuse", Some(&STEP), refuse).with_alias("refuse");

/// Looks up the reference named by `reftype` and records what was used on
/// the result model
struct Calibrate;

impl StepBehavior for Calibrate {
    fn process(
        &mut self,
        cx: &mut StepContext<'_>,
        args: Vec<StepData>,
    ) -> Result<Option<StepData>, StepError> {
        let input = args.into_iter().next().ok_or_else(|| anyhow!("no input"))?;
        let reftype = cx.param("reftype").and_then(Value::as_str).unwrap_or("flat").to_string();
        let reference = cx.get_reference_file(&input, &reftype)?;
        tracing::info!(step = %cx.qualified_name(), "Calibrating with {:?}", reference_label(&reference));
        Ok(Some(input))
    }

    fn finalize_result(&mut self, _step: &stpipe::core::StepCore, result: &StepData, used: &[ReferenceUse]) {
        for model in result.models() {
            model.with_meta_mut(|meta| {
                for reference in used {
                    meta.attributes.insert(reference.reftype.clone(), reference.uri.clone());
                }
            });
        }
    }
}

fn reference_label(reference: &ReferenceFile) -> String {
    match reference {
        ReferenceFile::Path(path) => path.clone(),
        ReferenceFile::Model(model) => model.filename().unwrap_or_default(),
        ReferenceFile::NotApplicable => "N/A".to_string(),
        ReferenceFile::Empty => String::new(),
    }
}

fn calibrate() -> Box<dyn StepBehavior> {
    Box::new(Calibrate)
}

pub static CALIBRATE: StepClass = StepClass::new("Calibrate", Some(&STEP), calibrate)
    .with_spec("reftype = string(default='flat')  # Reference type to use")
    .with_alias("calibrate")
    .with_reference_types(&["flat", "dark"]);

static SCALE_TWICE_STEPS: [SubstepDef; 2] = [
    SubstepDef {
        name: "first",
        class: &SCALE,
    },
    SubstepDef {
        name: "second",
        class: &SCALE,
    },
];

/// Two scale steps in a row
pub static SCALE_TWICE: StepClass =
    StepClass::new("ScaleTwice", Some(&PIPELINE), sequential).with_steps(&SCALE_TWICE_STEPS);

static GATED_STEPS: [SubstepDef; 1] = [SubstepDef {
    name: "gate",
    class: &REFUSE,
}];

/// A pipeline whose only step refuses to process
pub static GATED: StepClass = StepClass::new("Gated", Some(&PIPELINE), sequential).with_steps(&GATED_STEPS);

/// Registry with the built-in classes plus the test classes
pub fn registry() -> StepRegistry {
    let mut registry = StepRegistry::with_builtins();
    registry
        .register(&SCALE)
        .register(&INCREMENT)
        .register(&REFUSE)
        .register(&CALIBRATE)
        .register(&SCALE_TWICE)
        .register(&GATED);
    registry
}

pub fn services() -> Services {
    Services::new().with_registry(registry())
}

pub fn keywords(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub fn int(v: i64) -> StepData {
    StepData::Value(Value::Int(v))
}

/// Write `content` to `dir/name`, returning the path
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
