//! Per-page configuration
//!
//! Read once at page-load start from extension storage. There is no live
//! reconfiguration: a config change reloads the page.

use serde::Deserialize;

use crate::url::host_matches_any;

/// Failure reading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Config storage unavailable: {0}")]
    Unavailable(String),
}

/// Storage shape. Missing or `null` values take the defaults, and only an
/// explicit `false` disables protection.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredConfig {
    #[serde(default)]
    is_enabled: Option<bool>,
    #[serde(default)]
    whitelist: Option<Vec<String>>,
}

/// What the core needs from storage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "StoredConfig")]
pub struct PageConfig {
    pub enabled: bool,
    /// Hostname substrings. A page whose hostname contains any entry is left alone.
    pub whitelist: Vec<String>,
}

impl From<StoredConfig> for PageConfig {
    fn from(stored: StoredConfig) -> Self {
        Self {
            enabled: stored.is_enabled != Some(false),
            whitelist: stored.whitelist.unwrap_or_default(),
        }
    }
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            whitelist: Vec::new(),
        }
    }
}

impl PageConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Fall back to enabled with an empty whitelist when the read failed, so
    /// protection stays on.
    pub fn load_or_default(result: Result<Self, ConfigError>) -> Self {
        match result {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Using default config: {}", e);
                Self::default()
            }
        }
    }

    /// The first whitelist entry contained in `hostname`, if any.
    pub fn whitelist_entry_for(&self, hostname: &str) -> Option<&str> {
        self.whitelist
            .iter()
            .find(|entry| host_matches_any(hostname, std::slice::from_ref(entry)))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_keys_missing() {
        let config = PageConfig::from_json("{}").unwrap();
        assert!(config.enabled);
        assert!(config.whitelist.is_empty());
    }

    #[test]
    fn test_only_explicit_false_disables() {
        assert!(PageConfig::from_json(r#"{"isEnabled": null}"#).unwrap().enabled);
        assert!(PageConfig::from_json(r#"{"isEnabled": true}"#).unwrap().enabled);
        assert!(!PageConfig::from_json(r#"{"isEnabled": false}"#).unwrap().enabled);
    }

    #[test]
    fn test_whitelist_parse_and_match() {
        let config = PageConfig::from_json(r#"{"isEnabled": true, "whitelist": ["example.com", "news.org"]}"#)
            .unwrap();
        assert_eq!(config.whitelist_entry_for("shop.example.com"), Some("example.com"));
        assert_eq!(config.whitelist_entry_for("example.net"), None);
    }

    #[test]
    fn test_load_or_default_stays_enabled() {
        let config = PageConfig::load_or_default(PageConfig::from_json("not json"));
        assert_eq!(config, PageConfig::default());

        let config = PageConfig::load_or_default(Err(ConfigError::Unavailable("no storage".into())));
        assert!(config.enabled);
    }
}
