//! Resolved refresh configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::effective::ConfigError;

/// Fully resolved configuration for one refresh cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshConfig {
    /// Connection to the bookkeeping (meta) database
    pub database: DatabaseConfig,

    /// Prefix shared by every store this refresh manages, e.g. `gtfs_vbb_`
    pub store_prefix: String,

    /// Target schema inside each store (transform default if unset)
    pub schema: Option<String>,

    /// Scratch directory shared with the collaborators
    pub tmp_dir: PathBuf,

    /// Ask collaborators for verbose output
    pub verbose: bool,

    /// Log and skip a failed store deletion instead of aborting the cycle
    pub continue_on_deletion_failure: bool,

    pub download: DownloadConfig,
    pub transform: TransformConfig,
    pub retention: RetentionConfig,
    pub descriptor: DescriptorConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Database holding the bookkeeping table
    pub meta_database: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadConfig {
    pub url: String,
    pub user_agent: String,
    pub script: PathBuf,
    /// Route the collaborator's stdout to ours (stderr is always inherited)
    pub show_output: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    pub script: PathBuf,
    pub show_output: bool,
    pub tidy_before_import: Option<bool>,
    /// Directory of SQL extensions run against the new store
    pub extensions_dir: Option<PathBuf>,
    pub preprocess_dir: Option<PathBuf>,
    pub postprocess_dir: Option<PathBuf>,
    /// Passed through to the transform verbatim, applied last
    pub extra_env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    pub keep: usize,
    pub keep_fallback: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep: 2,
            keep_fallback: true,
        }
    }
}

/// Connection descriptor written for downstream poolers after promotion.
///
/// Disabled unless `path` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DescriptorConfig {
    pub path: Option<PathBuf>,
    pub label: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

fn require(value: &str, field: &'static str, env: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing { field, env });
    }
    Ok(())
}

impl RefreshConfig {
    /// Values needed to read bookkeeping and the store catalog.
    pub fn validate_catalog(&self) -> Result<(), ConfigError> {
        require(&self.store_prefix, "store_prefix", "FEED_IMPORTER_DB_PREFIX")
    }

    /// Check everything a refresh cycle needs. Runs before any I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_catalog()?;
        require(&self.download.url, "download.url", "FEED_DOWNLOAD_URL")?;
        require(
            &self.download.user_agent,
            "download.user_agent",
            "FEED_DOWNLOAD_USER_AGENT",
        )?;

        if self.download.script.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "download.script must not be empty".to_string(),
            ));
        }
        if self.transform.script.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "transform.script must not be empty".to_string(),
            ));
        }
        if self.retention.keep == 0 {
            return Err(ConfigError::ValidationError(
                "retention.keep must be at least 1".to_string(),
            ));
        }
        if self.descriptor.path.is_some() && self.descriptor.label.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "descriptor.label must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Path of the artifact the download collaborator produces.
    pub fn artifact_path(&self) -> PathBuf {
        self.tmp_dir.join(crate::ARTIFACT_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RefreshConfig {
        RefreshConfig {
            store_prefix: "feed_".to_string(),
            tmp_dir: PathBuf::from("/tmp/feed"),
            download: DownloadConfig {
                url: "https://example.org/feed.zip".to_string(),
                user_agent: "feed-refresh-test".to_string(),
                script: PathBuf::from("download.sh"),
                show_output: false,
            },
            transform: TransformConfig {
                script: PathBuf::from("import.sh"),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        valid().validate().unwrap();
    }

    #[test]
    fn test_missing_prefix_names_env_var() {
        let mut config = valid();
        config.store_prefix = String::new();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("FEED_IMPORTER_DB_PREFIX"));
    }

    #[test]
    fn test_blank_url_rejected() {
        let mut config = valid();
        config.download.url = "  ".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("FEED_DOWNLOAD_URL"));
    }

    #[test]
    fn test_catalog_needs_only_prefix() {
        let config = RefreshConfig {
            store_prefix: "feed_".to_string(),
            ..Default::default()
        };
        config.validate_catalog().unwrap();
        assert!(config.validate().is_err());

        let err = RefreshConfig::default().validate_catalog().unwrap_err();
        assert!(err.to_string().contains("FEED_IMPORTER_DB_PREFIX"));
    }

    #[test]
    fn test_missing_user_agent() {
        let mut config = valid();
        config.download.user_agent = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_keep_rejected() {
        let mut config = valid();
        config.retention.keep = 0;
        assert!(config.validate().unwrap_err().to_string().contains("retention.keep"));
    }

    #[test]
    fn test_artifact_path() {
        assert_eq!(valid().artifact_path(), PathBuf::from("/tmp/feed/feed.zip"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let value = serde_json::json!({"store_prefx": "feed_"});
        assert!(serde_json::from_value::<RefreshConfig>(value).is_err());
    }
}
