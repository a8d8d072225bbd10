//! pgflight-core: adaptive PostgreSQL activity recorder.
//!
//! Provides:
//! - `collector`: target surface abstraction, PostgreSQL and mock implementations
//! - `config`: flat key/value config provider and typed snapshots
//! - `control`: circuit breaker, mode controller, precheck gates
//! - `sampler`: one sampling cycle with per-section failure isolation
//! - `storage`: ring buffer (Tier 1), raw archive (Tier 1.5), aggregates (Tier 2), attempt log
//! - `jobs`: flush, archive and cleanup jobs, jittered scheduling
//! - `recorder`: facade wiring everything together

pub mod collector;
pub mod config;
pub mod control;
pub mod jobs;
pub mod rates;
pub mod recorder;
pub mod sampler;
pub mod storage;

pub use recorder::{Recorder, RecorderError, RecorderStatus};
