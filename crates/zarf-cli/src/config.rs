//! Config-file and environment defaults
//!
//! `ZARF_CONFIG` names a YAML file of flag defaults; `ZARF_VAR_<NAME>`
//! environment variables override package variables. Precedence for
//! variables, lowest to highest: config file, environment, --set flags.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Prefix for variable-override environment variables
pub const ZARF_VAR_PREFIX: &str = "ZARF_VAR_";

/// Environment variable naming the defaults file
pub const ZARF_CONFIG_ENV: &str = "ZARF_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZarfConfig {
    /// Variable defaults applied to every verb
    #[serde(default)]
    pub set: BTreeMap<String, String>,

    #[serde(default)]
    pub flavor: Option<String>,

    #[serde(default)]
    pub components: Option<String>,

    #[serde(default)]
    pub registry_url: Option<String>,

    #[serde(default)]
    pub git_url: Option<String>,
}

impl ZarfConfig {
    /// Load the defaults file named by ZARF_CONFIG, if any
    pub fn load() -> Self {
        let Ok(path) = std::env::var(ZARF_CONFIG_ENV) else {
            return Self::default();
        };
        match std::fs::read(&path) {
            Ok(data) => serde_yaml::from_slice(&data).unwrap_or_else(|e| {
                tracing::warn!(path, error = %e, "unparseable ZARF_CONFIG, ignoring");
                Self::default()
            }),
            Err(e) => {
                tracing::warn!(path, error = %e, "unreadable ZARF_CONFIG, ignoring");
                Self::default()
            }
        }
    }
}

/// Collect `ZARF_VAR_<NAME>` overrides from the environment
pub fn env_variables() -> BTreeMap<String, String> {
    std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(ZARF_VAR_PREFIX)
                .map(|name| (name.to_string(), value))
        })
        .collect()
}

/// Merge variable overrides by precedence: config < env < flags
pub fn merge_variables(
    config: &ZarfConfig,
    flags: &[String],
) -> Result<BTreeMap<String, String>, String> {
    let mut merged = config.set.clone();
    merged.extend(env_variables());
    for pair in flags {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("--set {pair} is not KEY=VALUE"))?;
        merged.insert(key.to_string(), value.to_string());
    }
    Ok(merged)
}
