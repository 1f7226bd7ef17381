//! Pipelines: steps that own and run sub-steps

use tracing::info;

use crate::core::class::{StepBehavior, StepClass};
use crate::core::context::StepContext;
use crate::core::data::StepData;
use crate::core::error::StepError;
use crate::core::step::STEP;

/// Runs every sub-step in declaration order, feeding each result to the next
#[derive(Debug, Default)]
pub struct SequentialPipeline;

impl StepBehavior for SequentialPipeline {
    fn process(
        &mut self,
        cx: &mut StepContext<'_>,
        args: Vec<StepData>,
    ) -> Result<Option<StepData>, StepError> {
        let mut current = args;
        let mut result = None;
        for name in cx.child_names() {
            info!(step = %cx.qualified_name(), "Running sub-step {}", name);
            result = cx.run_child(&name, current)?;
            current = result.clone().into_iter().collect();
        }
        Ok(result)
    }
}

/// Factory for pipeline classes that run their sub-steps in order
pub fn sequential() -> Box<dyn StepBehavior> {
    Box::new(SequentialPipeline)
}

/// The base pipeline class
pub static PIPELINE: StepClass = StepClass::new("Pipeline", Some(&STEP), sequential);
