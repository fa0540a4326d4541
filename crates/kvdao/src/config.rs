//! Client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DaoError, Result};

/// Configuration for a [`StoreClient`](crate::StoreClient).
///
/// Every field has a default, so a JSON document only needs the fields it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaoConfig {
    /// Database name
    pub db_name: String,
    /// Target schema version
    pub version: u32,
    /// Store that exists in every properly provisioned database
    pub sentinel_store: String,
    /// Where to send the user after local data had to be wiped
    pub recovery_url: String,
    /// Delay before the recovery redirect, in milliseconds
    pub redirect_delay_ms: u64,
    /// Page size for scans that don't set one
    pub default_page_size: usize,
}

impl Default for DaoConfig {
    fn default() -> Self {
        Self {
            db_name: "localDb".to_string(),
            version: 2,
            sentinel_store: "inputIndex".to_string(),
            recovery_url: "/pos/index.html".to_string(),
            redirect_delay_ms: 5_000,
            default_page_size: 10,
        }
    }
}

impl DaoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DaoConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_name.is_empty() {
            return Err(DaoError::Config("db_name must not be empty".into()));
        }
        if self.version == 0 {
            return Err(DaoError::Config("version must be at least 1".into()));
        }
        if self.default_page_size == 0 {
            return Err(DaoError::Config(
                "default_page_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn sentinel_store(mut self, sentinel_store: impl Into<String>) -> Self {
        self.sentinel_store = sentinel_store.into();
        self
    }

    pub fn recovery_url(mut self, recovery_url: impl Into<String>) -> Self {
        self.recovery_url = recovery_url.into();
        self
    }

    /// Delays past `u64::MAX` milliseconds saturate.
    pub fn redirect_delay(mut self, delay: Duration) -> Self {
        self.redirect_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn default_page_size(mut self, default_page_size: usize) -> Self {
        self.default_page_size = default_page_size;
        self
    }

    pub fn redirect_delay_duration(&self) -> Duration {
        Duration::from_millis(self.redirect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_delay_saturates() {
        let config = DaoConfig::default().redirect_delay(Duration::MAX);
        assert_eq!(config.redirect_delay_ms, u64::MAX);

        let config = DaoConfig::default().redirect_delay(Duration::from_millis(250));
        assert_eq!(config.redirect_delay_duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_defaults() {
        let config = DaoConfig::default();
        assert_eq!(config.db_name, "localDb");
        assert_eq!(config.version, 2);
        assert_eq!(config.sentinel_store, "inputIndex");
        assert_eq!(config.redirect_delay_duration(), Duration::from_secs(5));
        assert_eq!(config.default_page_size, 10);
    }

    #[test]
    fn test_from_json_partial() {
        let config = DaoConfig::from_json(r#"{"db_name": "pos", "version": 7}"#).unwrap();
        assert_eq!(config.db_name, "pos");
        assert_eq!(config.version, 7);
        assert_eq!(config.sentinel_store, "inputIndex");
    }

    #[test]
    fn test_from_json_rejects_zero_version() {
        let err = DaoConfig::from_json(r#"{"version": 0}"#).unwrap_err();
        assert!(matches!(err, DaoError::Config(_)));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = DaoConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, DaoError::Json(_)));
    }
}
