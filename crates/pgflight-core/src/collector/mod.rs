//! Access to the monitored PostgreSQL server.
//!
//! The sampler and the precheck gates only talk to a [`TargetSurface`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │          Sampler / precheck gates            │
//! └──────────────────────┬───────────────────────┘
//!                        │ SectionBudget per call
//!                 ┌──────▼────────┐
//!                 │ TargetSurface │ (trait)
//!                 └──────┬────────┘
//!              ┌─────────┴─────────┐
//!       ┌──────▼──────────┐ ┌──────▼──────┐
//!       │ PostgresSurface │ │ MockSurface │
//!       │ (pg_stat_*)     │ │ (scenarios) │
//!       └─────────────────┘ └─────────────┘
//! ```
//!
//! # Testing
//!
//! ```
//! use pgflight_core::collector::{MockSurface, SectionBudget, TargetSurface};
//! use std::time::Duration;
//!
//! let mut surface = MockSurface::typical();
//! let budget = SectionBudget::new(Duration::from_secs(1));
//! assert!(!surface.wait_events(&budget).unwrap().is_empty());
//! ```

pub mod mock;
mod pg_collector;
mod traits;

pub use mock::MockSurface;
pub use pg_collector::PostgresSurface;
pub use traits::{
    BlockedSession, BlockerDetail, ConnectionStats, HealthSignals, SectionBudget, ServerCounters,
    TargetSurface,
};

/// Error type for server access.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceError {
    /// Environment incomplete or connection failed.
    Connection(String),
    /// Query execution failed.
    Query(String),
    /// The call ran past its section budget.
    Timeout { section: String },
    /// Server version or configuration the recorder cannot read.
    Unsupported(String),
}

impl std::fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurfaceError::Connection(msg) => write!(f, "PostgreSQL: {}", msg),
            SurfaceError::Query(msg) => write!(f, "PostgreSQL query error: {}", msg),
            SurfaceError::Timeout { section } => write!(f, "{} exceeded its time budget", section),
            SurfaceError::Unsupported(msg) => write!(f, "unsupported server: {}", msg),
        }
    }
}

impl std::error::Error for SurfaceError {}
