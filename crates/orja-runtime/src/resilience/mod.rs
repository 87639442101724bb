//! Resilience patterns for orja-runtime.
//!
//! Every pipeline stage runs through [`run_stage`], which times it and
//! turns an error into a named fallback value instead of aborting the
//! request.

mod fallback;

pub use fallback::{run_stage, StageOutcome};
