//! Mode controller: hysteretic normal/light/emergency state machine.
//!
//! ```text
//!            pct >= warn                 skips >= trip
//!   normal ─────────────► light ───────────────────────► emergency
//!      ▲                   │  ▲                              │
//!      └───────────────────┘  └──────────────────────────────┘
//!        pct < 0.7 × warn              zero recent skips
//!
//!   any mode ── skips >= trip ──► emergency (immediately)
//! ```

use tracing::info;

use crate::config::{ConfigStore, ModeSettings, keys};
use crate::storage::model::Mode;

/// Fraction of the warning threshold below which light mode returns to normal.
pub const RECOVERY_FACTOR: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeInputs {
    pub current: Mode,
    /// Active connections as a percentage of `max_connections`.
    pub connection_pct: f64,
    /// Circuit-breaker skips in the trailing mode window.
    pub breaker_skips: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeTransition {
    pub from: Mode,
    pub to: Mode,
    pub inputs: ModeInputs,
}

pub struct ModeController;

impl ModeController {
    /// Next mode for `inputs`. Deterministic and side-effect free.
    pub fn evaluate(inputs: &ModeInputs, settings: &ModeSettings) -> Mode {
        if inputs.breaker_skips >= settings.trip_breaker_skips {
            return Mode::Emergency;
        }
        match inputs.current {
            Mode::Emergency if inputs.breaker_skips == 0 => Mode::Light,
            Mode::Emergency => Mode::Emergency,
            Mode::Normal if inputs.connection_pct >= settings.warning_connection_pct => Mode::Light,
            Mode::Normal => Mode::Normal,
            Mode::Light
                if inputs.connection_pct < settings.warning_connection_pct * RECOVERY_FACTOR =>
            {
                Mode::Normal
            }
            Mode::Light => Mode::Light,
        }
    }

    /// Evaluates and, on a change, writes `mode.current` to the store.
    ///
    /// The new mode is picked up by the next cycle's config snapshot. Nothing
    /// happens when automatic switching is disabled.
    pub fn apply(
        store: &ConfigStore,
        settings: &ModeSettings,
        inputs: ModeInputs,
    ) -> Option<ModeTransition> {
        if !settings.auto {
            return None;
        }
        let next = Self::evaluate(&inputs, settings);
        if next == inputs.current {
            return None;
        }

        store.set(keys::MODE_CURRENT, next.as_str());
        info!(
            from = %inputs.current,
            to = %next,
            connection_pct = inputs.connection_pct,
            breaker_skips = inputs.breaker_skips,
            interval_s = settings.interval_for(next).as_secs(),
            "mode changed"
        );
        Some(ModeTransition {
            from: inputs.current,
            to: next,
            inputs,
        })
    }
}
