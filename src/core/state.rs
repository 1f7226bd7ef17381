//! Run lifecycle state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a step's most recent run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Constructed, never run
    Created,
    /// Run started, primary input recorded
    Running,
    /// Pre-hooks have run
    HookedPre,
    /// Processing was skipped
    Skipped,
    /// `process` is running
    Processing,
    /// Post-hooks have run
    HookedPost,
    /// Results are being finalized
    Finalizing,
    /// Results are being saved
    Saving,
    /// Run completed
    Done,
    /// Run ended with an error
    Failed,
}

impl RunPhase {
    /// Check if the run has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }

    /// Whether `next` may follow this phase within one run
    pub fn can_advance_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (_, Failed) => true,
            (Created | Done | Failed, Running) => true,
            (Running, HookedPre) => true,
            (HookedPre, Skipped | Processing) => true,
            (Skipped | Processing, HookedPost) => true,
            (HookedPost, Finalizing) => true,
            (Finalizing, Saving | Done) => true,
            (Saving, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Created => "CREATED",
            RunPhase::Running => "RUNNING",
            RunPhase::HookedPre => "HOOKED_PRE",
            RunPhase::Skipped => "SKIPPED",
            RunPhase::Processing => "PROCESSING",
            RunPhase::HookedPost => "HOOKED_POST",
            RunPhase::Finalizing => "FINALIZING",
            RunPhase::Saving => "SAVING",
            RunPhase::Done => "DONE",
            RunPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}
