//! Saving step results under the step's naming scheme

use indexmap::IndexMap;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::core::data::{Model, StepData};
use crate::core::error::StepError;
use crate::core::output::{self, OutputPathRequest, Suffix};
use crate::core::step::Lineage;

/// Options of [`save_model`]
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub suffix: Suffix,
    /// Index component, used when a step returns several results
    pub idx: Option<usize>,
    /// File name to use instead of the step's `output_file`
    pub output_file: Option<String>,
    /// Save even when neither `save_results` nor an output file asks for it
    pub force: bool,
    pub components: IndexMap<String, Option<String>>,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suffix(mut self, suffix: Suffix) -> Self {
        self.suffix = suffix;
        self
    }

    pub fn with_idx(mut self, idx: Option<usize>) -> Self {
        self.idx = idx;
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_component(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.components.insert(name.into(), value);
        self
    }
}

/// Save models in `data`, returning the paths written.
///
/// Nothing is written unless forced, `save_results` is set or an output
/// file is known. Library and sequence members are saved with their index.
pub fn save_model(
    lineage: &Lineage<'_>,
    data: &StepData,
    options: &SaveOptions,
) -> Result<Vec<PathBuf>, StepError> {
    let core = lineage.core();
    let output_file = options
        .output_file
        .clone()
        .filter(|file| !file.is_empty())
        .or_else(|| core.output_file().map(str::to_string));

    if !options.force && !core.save_results() && output_file.is_none() {
        return Ok(Vec::new());
    }

    match data {
        StepData::Model(model) => Ok(vec![save_single(lineage, model, options, output_file)?]),
        StepData::Library(library) => {
            let mut paths = Vec::new();
            for (i, member) in library.members().iter().enumerate() {
                let member_options = SaveOptions {
                    idx: Some(i),
                    output_file: None,
                    ..options.clone()
                };
                let member_file = core.output_file().map(str::to_string);
                paths.push(save_single(lineage, member, &member_options, member_file)?);
            }
            Ok(paths)
        }
        StepData::Sequence(items) => {
            let mut paths = Vec::new();
            for (i, item) in items.iter().enumerate() {
                let item_options = SaveOptions {
                    idx: Some(i),
                    output_file: output_file.clone(),
                    force: true,
                    ..options.clone()
                };
                paths.extend(save_model(lineage, item, &item_options)?);
            }
            Ok(paths)
        }
        StepData::Path(_) | StepData::Value(_) => {
            debug!(step = %core.qualified_name(), "Nothing to save in {:?}", data);
            Ok(Vec::new())
        }
    }
}

fn save_single(
    lineage: &Lineage<'_>,
    model: &Model,
    options: &SaveOptions,
    output_file: Option<String>,
) -> Result<PathBuf, StepError> {
    let core = lineage.core();
    let mut basepath = output_file;
    let mut idx = options.idx;
    if core.output_use_model() || (basepath.is_none() && !core.search_output_file()) {
        basepath = model.filename();
        idx = None;
    }

    let mut request = OutputPathRequest::default()
        .with_suffix(options.suffix.clone())
        .with_component("idx", idx.map(|i| i.to_string()));
    if let Some(basepath) = basepath {
        request = request.with_basepath(basepath);
    }
    for (name, value) in &options.components {
        request = request.with_component(name.clone(), value.clone());
    }

    let path = output::make_output_path(lineage, &request)?;
    let saved = model.save(&path, true)?;
    info!(step = %core.qualified_name(), "Saved model in {}", saved.display());
    Ok(saved)
}
