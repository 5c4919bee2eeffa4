mod driver;
mod orchestrator;
mod round;
mod task;

pub use driver::{ReductionDriver, RunOptions, RunOutcome};
pub use round::expected_rounds;
