//! Scenario-based tests for stpipe

mod cmdline;
mod isolation;
mod output_paths;
mod parameters;
mod paths;
mod precedence;
mod references;
mod substeps;
