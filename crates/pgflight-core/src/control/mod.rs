//! Self-protective control loop: circuit breaker, mode controller and the
//! precheck gates that decide whether a sampling cycle may run.

pub mod circuit_breaker;
pub mod gates;
pub mod mode;

pub use circuit_breaker::{BreakerDecision, should_skip};
pub use gates::{Observations, PrecheckInput, PrecheckOutcome, run_prechecks};
pub use mode::{ModeController, ModeInputs, ModeTransition};
