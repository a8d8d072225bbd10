//! Flat key/value configuration provider.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::RwLock;

use ini::Ini;
use tracing::warn;

use super::ConfigError;
use super::settings::RecorderConfig;

/// Thread-safe flat settings map with typed defaults.
///
/// Readers go through [`ConfigStore::get`] (or take a whole
/// [`RecorderConfig`] snapshot); writers are the mode controller
/// (`mode.current`) and administrative operations.
#[derive(Debug, Default)]
pub struct ConfigStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from an INI file.
    ///
    /// Keys in the general section are used as-is; keys under `[section]`
    /// become `section.key`.
    pub fn load_ini(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_ini(&ini))
    }

    /// Parses settings from INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(Self::from_ini(&ini))
    }

    fn from_ini(ini: &Ini) -> Self {
        let mut values = BTreeMap::new();
        for (section, props) in ini.iter() {
            for (key, value) in props.iter() {
                let full_key = match section {
                    Some(section) => format!("{}.{}", section, key),
                    None => key.to_string(),
                };
                values.insert(full_key, value.trim().to_string());
            }
        }
        Self {
            values: RwLock::new(values),
        }
    }

    /// Returns the raw string value of `key`, if set.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Returns `key` parsed as `T`, or `default` when unset.
    ///
    /// An unparsable value is logged and replaced by the default.
    pub fn get<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.raw(key) {
            Some(raw) => match raw.parse::<T>() {
                Ok(v) => v,
                Err(_) => {
                    warn!(key, value = %raw, "unparsable setting, using default");
                    default
                }
            },
            None => default,
        }
    }

    /// Boolean lookup accepting `true/false`, `on/off`, `yes/no` and `1/0`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.raw(key) {
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                warn!(key, value = %raw, "unparsable boolean setting, using default");
                default
            }),
            None => default,
        }
    }

    pub fn set(&self, key: &str, value: impl ToString) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    /// Applies `key=value` overrides (from the command line).
    pub fn apply_overrides<S: AsRef<str>>(&self, overrides: &[S]) -> Result<(), ConfigError> {
        for item in overrides {
            let item = item.as_ref();
            let Some((key, value)) = item.split_once('=') else {
                return Err(ConfigError::InvalidValue {
                    key: item.to_string(),
                    value: String::new(),
                    reason: "expected key=value".to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: String::new(),
                    value: value.to_string(),
                    reason: "empty key".to_string(),
                });
            }
            self.set(key, value.trim());
        }
        Ok(())
    }

    /// Takes an immutable typed snapshot of the current settings.
    pub fn snapshot(&self) -> RecorderConfig {
        RecorderConfig::from_store(self)
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}
