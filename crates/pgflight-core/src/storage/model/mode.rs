//! Operating modes and the capture sections they enable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Independent capture sections of one sampling cycle.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum Section {
    WaitEvents,
    Sessions,
    Locks,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::WaitEvents, Section::Sessions, Section::Locks];

    pub fn name(&self) -> &'static str {
        match self {
            Section::WaitEvents => "wait_events",
            Section::Sessions => "sessions",
            Section::Locks => "locks",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Named operating profile of the recorder.
///
/// ```text
/// normal:    wait events, sessions, locks
/// light:     wait events, sessions
/// emergency: wait events only
/// ```
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Light,
    Emergency,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Light => "light",
            Mode::Emergency => "emergency",
        }
    }

    /// Sections captured in this mode, in capture order.
    pub fn sections(&self) -> &'static [Section] {
        match self {
            Mode::Normal => &Section::ALL,
            Mode::Light => &[Section::WaitEvents, Section::Sessions],
            Mode::Emergency => &[Section::WaitEvents],
        }
    }

    pub fn enables(&self, section: Section) -> bool {
        self.sections().contains(&section)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Mode::Normal),
            "light" => Ok(Mode::Light),
            "emergency" => Ok(Mode::Emergency),
            other => Err(format!(
                "unknown mode '{}', expected normal, light or emergency",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mode_is_case_insensitive() {
        assert_eq!("Light".parse::<Mode>(), Ok(Mode::Light));
        assert_eq!(" emergency ".parse::<Mode>(), Ok(Mode::Emergency));
        assert!("turbo".parse::<Mode>().is_err());
    }

    #[test]
    fn degraded_modes_drop_lock_capture() {
        assert!(Mode::Normal.enables(Section::Locks));
        assert!(!Mode::Light.enables(Section::Locks));
        assert_eq!(Mode::Emergency.sections(), &[Section::WaitEvents]);
    }
}
