//! Reading a [`DeviceConfig`] from environment variables with fallbacks

use std::env::{self, VarError};

use tracing::info;

use super::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};

#[derive(Debug, Clone)]
enum Source {
    Env(String),
    Literal(String),
}

/// Builder that tries each source in order and parses the first one present
///
/// A present but malformed value fails the build; it does not fall through.
#[derive(Debug, Clone)]
pub struct EnvBuilder {
    sources: Vec<Source>,
    fallback: Option<DeviceConfig>,
}

impl EnvBuilder {
    pub(crate) fn from_env<K: ToString>(key: K) -> Self {
        Self {
            sources: vec![Source::Env(key.to_string())],
            fallback: None,
        }
    }

    /// Try another environment variable if the previous sources are absent
    pub fn or_env<K: ToString>(mut self, key: K) -> Self {
        self.sources.push(Source::Env(key.to_string()));
        self
    }

    /// Try a textual specifier, if one is given
    pub fn or_try<S: ToString>(mut self, item: Option<S>) -> Self {
        if let Some(item) = item {
            self.sources.push(Source::Literal(item.to_string()));
        }
        self
    }

    /// Use `fallback` when no source is present
    pub fn or(mut self, fallback: DeviceConfig) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Use [`DeviceConfig::default`] when no source is present
    pub fn or_default(self) -> Self {
        self.or(DeviceConfig::default())
    }

    pub fn build(self) -> DeviceResult<DeviceConfig> {
        for source in &self.sources {
            match source {
                Source::Env(key) => match env::var(key) {
                    Ok(value) => {
                        info!(key = %key, config = %value, "Using device config from environment");
                        return value.parse();
                    }
                    Err(VarError::NotPresent) => continue,
                    Err(VarError::NotUnicode(value)) => {
                        return Err(DeviceError::invalid_specifier(
                            value.to_string_lossy(),
                            format!("value of {} is not valid unicode", key),
                        ));
                    }
                },
                Source::Literal(value) => {
                    info!(config = %value, "Using device config literal");
                    return value.parse();
                }
            }
        }

        let fallback = self.fallback.ok_or_else(|| {
            let keys: Vec<&str> = self
                .sources
                .iter()
                .filter_map(|s| match s {
                    Source::Env(key) => Some(key.as_str()),
                    Source::Literal(_) => None,
                })
                .collect();
            DeviceError::invalid_specifier(
                "",
                format!("none of {} is set and no fallback was given", keys.join(", ")),
            )
        })?;
        fallback.validate()?;
        Ok(fallback)
    }
}
