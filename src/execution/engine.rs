//! The step run lifecycle
//!
//! `run` moves a step through
//! `RUNNING → HOOKED_PRE → (SKIPPED | PROCESSING) → HOOKED_POST → FINALIZING → SAVING → DONE`,
//! ending in `FAILED` on the first error.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::context::StepContext;
use crate::core::data::{ModelError, StepData};
use crate::core::error::StepError;
use crate::core::state::RunPhase;
use crate::core::step::{Lineage, Step};
use crate::core::value::Value;
use crate::execution::results::{self, SaveOptions};
use crate::logging::LogCapture;

impl Step {
    /// Run the step on `args` as an outermost step
    pub fn run(&mut self, args: Vec<StepData>) -> Result<Option<StepData>, StepError> {
        self.run_in(args, None)
    }

    /// Run the step with `parent` as the enclosing step, if any
    pub(crate) fn run_in(
        &mut self,
        args: Vec<StepData>,
        parent: Option<&Lineage<'_>>,
    ) -> Result<Option<StepData>, StepError> {
        let _capture = LogCapture::begin(&self.log_records);
        let run_id = Uuid::new_v4();
        debug!(step = %self.core.qualified_name, "Run {} started", run_id);

        self.advance(RunPhase::Running);
        let result = self.run_phases(args, parent);
        match &result {
            Ok(_) => self.advance(RunPhase::Done),
            Err(err) => {
                debug!(step = %self.core.qualified_name, "Run {} failed: {}", run_id, err);
                self.advance(RunPhase::Failed);
            }
        }
        result
    }

    fn advance(&mut self, next: RunPhase) {
        if !self.phase.can_advance_to(next) {
            debug!(
                step = %self.core.qualified_name,
                "Unexpected phase change {} -> {}",
                self.phase,
                next
            );
        }
        self.phase = next;
    }

    fn parameters_dump(&self) -> String {
        let pars = Value::Map(self.get_pars(true)).to_yaml();
        let text = serde_yaml::to_string(&pars).unwrap_or_default();
        let lines: Vec<String> = text
            .trim()
            .lines()
            .map(|line| {
                line.replace(" false", " False")
                    .replace(" true", " True")
                    .replace(" null", " None")
            })
            .collect();
        format!("\n  {}", lines.join("\n  "))
    }

    fn run_phases(
        &mut self,
        args: Vec<StepData>,
        parent: Option<&Lineage<'_>>,
    ) -> Result<Option<StepData>, StepError> {
        let outermost = parent.is_none();
        info!(
            step = %self.core.qualified_name,
            "Step {} running with args {}.",
            self.core.name,
            describe_args(&args)
        );
        if outermost {
            info!(
                step = %self.core.qualified_name,
                "Step {} parameters are:{}",
                self.core.name,
                self.parameters_dump()
            );
        }

        if let Some(first) = args.first() {
            self.core.set_primary_input_in(first, true, parent);
        }
        if self.core.output_file().is_some() {
            self.core.set_save_results(true);
        }
        if self.core.suffix().is_none() {
            let suffix = self.behavior.default_suffix(&self.core.name);
            self.core.set_suffix(Some(&suffix));
        }

        let mut args = args;
        {
            let frame = Lineage::new(&self.core, parent);
            for hook in self.pre_hooks.iter_mut() {
                if let Some(result) = hook.run_in(args.clone(), Some(&frame))? {
                    args = vec![result];
                }
            }
        }
        self.advance(RunPhase::HookedPre);

        self.core.reference_files_used.clear();

        if outermost && self.core.skip() {
            info!(step = %self.core.qualified_name, "Step run as standalone, so skip set to False");
            self.core.set_skip(false);
        }

        let mut result = if self.core.skip() {
            self.advance(RunPhase::Skipped);
            info!(step = %self.core.qualified_name, "Step skipped.");
            if let (Some(alias), Some(first)) = (self.core.class.alias(), args.first()) {
                for model in first.models() {
                    match model.set_step_status(alias, "SKIPPED") {
                        Ok(()) => {}
                        Err(err @ ModelError::NoStatusSlot) => info!(
                            step = %self.core.qualified_name,
                            "Could not record skip into DataModel header: {}",
                            err
                        ),
                        Err(err) => return Err(err.into()),
                    }
                }
            }
            args.into_iter().next()
        } else {
            self.advance(RunPhase::Processing);
            let class = self.core.class;
            let expected = self.behavior.arity();
            let mut cx = StepContext::new(&mut self.core, &mut self.children, parent);
            if class.prefetch_references && !class.reference_types().is_empty() {
                if let Some(first) = args.first() {
                    self.behavior.prefetch(&mut cx, first)?;
                }
            }
            if let Some(expected) = expected {
                if expected != args.len() {
                    return Err(StepError::IncorrectArgumentCount {
                        step: cx.name().to_string(),
                        expected,
                        given: args.len(),
                    });
                }
            }
            self.behavior.process(&mut cx, args)?
        };

        {
            let frame = Lineage::new(&self.core, parent);
            for hook in self.post_hooks.iter_mut() {
                let hook_args = result.clone().into_iter().collect();
                if let Some(replacement) = hook.run_in(hook_args, Some(&frame))? {
                    result = Some(replacement);
                }
            }
        }
        self.advance(RunPhase::HookedPost);

        self.advance(RunPhase::Finalizing);
        let reference_files_used = std::mem::take(&mut self.core.reference_files_used);
        match &result {
            Some(StepData::Library(library)) => library.finalize_result(&self.core, &reference_files_used),
            Some(StepData::Sequence(items)) => {
                for item in items {
                    self.behavior.finalize_result(&self.core, item, &reference_files_used);
                }
            }
            Some(single) => self.behavior.finalize_result(&self.core, single, &reference_files_used),
            None => self
                .behavior
                .finalize_result(&self.core, &StepData::Value(Value::None), &reference_files_used),
        }

        if !self.core.skip() && self.core.save_results() {
            self.advance(RunPhase::Saving);
            self.save_outputs(parent, result.as_ref())?;
        }

        if !self.core.skip() {
            info!(step = %self.core.qualified_name, "Step {} done", self.core.name);
        }
        Ok(result)
    }

    fn save_outputs(&self, parent: Option<&Lineage<'_>>, result: Option<&StepData>) -> Result<(), StepError> {
        let to_save: Vec<&StepData> = match result {
            Some(StepData::Sequence(items)) => items.iter().collect(),
            Some(single) => vec![single],
            None => Vec::new(),
        };
        let frame = Lineage::new(&self.core, parent);
        let indexed = to_save.len() > 1;

        for (idx, item) in to_save.into_iter().enumerate() {
            match item {
                StepData::Model(_) | StepData::Library(_) => {
                    let options = SaveOptions::new().with_idx(indexed.then_some(idx));
                    match results::save_model(&frame, item, &options) {
                        Ok(_) => {}
                        Err(StepError::OutputPath(err)) => {
                            warn!(
                                step = %self.core.qualified_name,
                                "`save_results` has been requested, but cannot determine filename."
                            );
                            warn!(
                                step = %self.core.qualified_name,
                                "Specify an output file with `--output_file` or set `--save_results=false`"
                            );
                            debug!(step = %self.core.qualified_name, "{}", err);
                        }
                        Err(err) => return Err(err),
                    }
                }
                other => debug!(
                    step = %self.core.qualified_name,
                    "Result {} is not saveable: {}",
                    idx,
                    describe(other)
                ),
            }
        }
        Ok(())
    }
}

fn describe(data: &StepData) -> String {
    match data {
        StepData::Path(path) => format!("'{}'", path.display()),
        StepData::Model(model) => format!("<Model {}>", model.filename().unwrap_or_default()),
        StepData::Sequence(items) => format!("[{}]", items.iter().map(describe).collect::<Vec<_>>().join(", ")),
        StepData::Library(library) => format!("<Library {} members>", library.members().len()),
        StepData::Value(value) => value.to_string(),
    }
}

fn describe_args(args: &[StepData]) -> String {
    format!("({})", args.iter().map(describe).collect::<Vec<_>>().join(", "))
}
