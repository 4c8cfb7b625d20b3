//! Key/value configuration consulted when devices are created.

use std::collections::HashMap;

/// Source of string-valued configuration properties.
pub trait PropertySource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Properties held in memory. Used by tests and the CLI.
#[derive(Debug, Clone, Default)]
pub struct MapProperties {
    values: HashMap<String, String>,
}

impl MapProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }
}

impl PropertySource for MapProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Properties read from the process environment.
///
/// `debug.nn.sample.supported` is looked up as `DEBUG_NN_SAMPLE_SUPPORTED`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvProperties;

impl EnvProperties {
    pub fn variable_name(key: &str) -> String {
        key.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }
}

impl PropertySource for EnvProperties {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(Self::variable_name(key)).ok()
    }
}

/// Property key holding the coverage-simulation mode of `device_name`.
pub fn coverage_mode_key(device_name: &str) -> String {
    format!("debug.nn.{device_name}.supported")
}

const SAMPLE_PREFIX: &str = "sample";

/// Read the raw coverage-simulation mode of a device.
///
/// Devices named `sample*` fall back to the shared `debug.nn.sample.supported`
/// key. Absent or unparsable values read as 0.
pub fn coverage_mode_value(properties: &dyn PropertySource, device_name: &str) -> i64 {
    let raw = properties.get(&coverage_mode_key(device_name)).or_else(|| {
        device_name
            .starts_with(SAMPLE_PREFIX)
            .then(|| properties.get(&coverage_mode_key(SAMPLE_PREFIX)))
            .flatten()
    });
    match raw {
        None => 0,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(device = device_name, value = %raw, "Ignoring unparsable coverage mode");
            0
        }),
    }
}
