//! Effective configuration with full provenance
//!
//! The effective config captures the merged configuration, where each layer
//! came from, and which keys were redacted before it can be displayed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use super::defaults::BuiltinDefaults;
use super::env::{env_layer, EnvSnapshot};
use super::merge::merge_layers;
use super::model::RefreshConfig;

/// Schema identifier
pub const SCHEMA_ID: &str = "feed-refresh/effective_config@1";

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Env,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// How much of the configuration a command relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    /// A full refresh cycle
    Refresh,
    /// Read-only bookkeeping queries: prefix and database settings only
    Catalog,
    /// Display only. Validation problems are recorded, never fatal.
    Inspect,
}

/// Effective configuration with full provenance
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub schema_id: String,

    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// The merged configuration object, secrets redacted
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,

    /// Redacted key paths
    pub redactions: Vec<String>,

    /// Validation failures tolerated under [`ConfigScope::Inspect`]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,

    #[serde(skip)]
    resolved: RefreshConfig,
}

/// Key fragments that mark a value as secret
const SECRET_KEYS: &[&str] = &["password", "token", "secret", "credential"];

const REDACTED: &str = "[REDACTED]";

impl EffectiveConfig {
    /// Merge all layers, then deserialize and validate the result for a
    /// refresh cycle.
    pub fn build(
        defaults: &BuiltinDefaults,
        config_path: Option<&Path>,
        env: &EnvSnapshot,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        Self::build_for(ConfigScope::Refresh, defaults, config_path, env, cli_overrides)
    }

    /// Like [`EffectiveConfig::build`], validating only what `scope` needs.
    pub fn build_for(
        scope: ConfigScope,
        defaults: &BuiltinDefaults,
        config_path: Option<&Path>,
        env: &EnvSnapshot,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![defaults.to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = config_path {
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        let env_value = env_layer(env)?;
        if env_value.as_object().is_some_and(|m| !m.is_empty()) {
            layers.push(env_value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Env,
                path: None,
                digest: None,
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let mut merged = merge_layers(layers);

        let resolved: RefreshConfig = serde_json::from_value(merged.clone())
            .map_err(|e| ConfigError::ParseError(format!("invalid configuration: {}", e)))?;
        let mut problems = Vec::new();
        match scope {
            ConfigScope::Refresh => resolved.validate()?,
            ConfigScope::Catalog => resolved.validate_catalog()?,
            ConfigScope::Inspect => {
                if let Err(e) = resolved.validate() {
                    problems.push(e.to_string());
                }
            }
        }

        let redactions = Self::redact_secrets(&mut merged);

        Ok(Self {
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
            redactions,
            problems,
            resolved,
        })
    }

    /// The resolved configuration, secrets intact. Validated as far as the
    /// build scope required.
    pub fn refresh_config(&self) -> &RefreshConfig {
        &self.resolved
    }

    pub fn into_refresh_config(self) -> RefreshConfig {
        self.resolved
    }

    /// Read the file layer. Returns it as JSON plus the SHA-256 of the raw
    /// bytes.
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        let digest = hex::encode(Sha256::digest(&bytes));

        let text = std::str::from_utf8(&bytes).map_err(|e| {
            ConfigError::ParseError(format!("{} is not UTF-8: {}", path.display(), e))
        })?;
        let layer: Value = toml::from_str(text)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

        Ok((layer, digest))
    }

    /// Replace every secret-looking scalar with a marker. Returns the dotted
    /// paths that were replaced.
    fn redact_secrets(value: &mut Value) -> Vec<String> {
        fn walk(value: &mut Value, prefix: &str, out: &mut Vec<String>) {
            let Value::Object(map) = value else {
                return;
            };
            for (key, child) in map.iter_mut() {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                let lower = key.to_lowercase();
                let secret = SECRET_KEYS.iter().any(|marker| lower.contains(marker));

                match child {
                    Value::Object(_) => walk(child, &path, out),
                    Value::Null => {}
                    _ if secret => {
                        *child = Value::String(REDACTED.to_string());
                        out.push(path);
                    }
                    _ => {}
                }
            }
        }

        let mut redacted = Vec::new();
        walk(value, "", &mut redacted);
        redacted
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get a (redacted) config value by dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing/empty {field} (set ${env})")]
    Missing {
        field: &'static str,
        env: &'static str,
    },

    #[error("invalid ${key}: {reason}")]
    InvalidEnv { key: &'static str, reason: String },

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn required_env() -> EnvSnapshot {
        [
            ("FEED_IMPORTER_DB_PREFIX", "gtfs_vbb"),
            ("FEED_DOWNLOAD_URL", "https://example.org/gtfs.zip"),
            ("FEED_DOWNLOAD_USER_AGENT", "feed-refresh-test"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_build_from_env() {
        let config =
            EffectiveConfig::build(&BuiltinDefaults::default(), None, &required_env(), None)
                .unwrap();

        let resolved = config.refresh_config();
        assert_eq!(resolved.store_prefix, "gtfs_vbb_");
        assert_eq!(resolved.download.url, "https://example.org/gtfs.zip");
        assert_eq!(resolved.retention.keep, 2);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[1].origin, ConfigOrigin::Env);
    }

    #[test]
    fn test_missing_required_env() {
        let err = EffectiveConfig::build(
            &BuiltinDefaults::default(),
            None,
            &EnvSnapshot::new(),
            None,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Missing { .. }));
    }

    #[test]
    fn test_catalog_scope_needs_only_prefix() {
        let env: EnvSnapshot = [("FEED_IMPORTER_DB_PREFIX", "gtfs")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let config = EffectiveConfig::build_for(
            ConfigScope::Catalog,
            &BuiltinDefaults::default(),
            None,
            &env,
            None,
        )
        .unwrap();
        assert_eq!(config.refresh_config().store_prefix, "gtfs_");
        assert!(config.problems.is_empty());

        let err = EffectiveConfig::build(&BuiltinDefaults::default(), None, &env, None)
            .unwrap_err();
        assert!(err.to_string().contains("FEED_DOWNLOAD_URL"));
    }

    #[test]
    fn test_catalog_scope_still_requires_prefix() {
        let err = EffectiveConfig::build_for(
            ConfigScope::Catalog,
            &BuiltinDefaults::default(),
            None,
            &EnvSnapshot::new(),
            None,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Missing {
                env: "FEED_IMPORTER_DB_PREFIX",
                ..
            }
        ));
    }

    #[test]
    fn test_inspect_scope_reports_problems() {
        let mut env = EnvSnapshot::new();
        env.insert("PGPASSWORD".to_string(), "hunter2".to_string());

        let config = EffectiveConfig::build_for(
            ConfigScope::Inspect,
            &BuiltinDefaults::default(),
            None,
            &env,
            None,
        )
        .unwrap();

        assert_eq!(config.problems.len(), 1);
        assert!(config.problems[0].contains("FEED_IMPORTER_DB_PREFIX"));
        assert_eq!(config.get_str("database.password"), Some("[REDACTED]"));

        let json = config.to_json().unwrap();
        assert!(json.contains("\"problems\""));
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_cli_overrides_env() {
        let cli = serde_json::json!({
            "retention": {"keep": 5},
            "continue_on_deletion_failure": true
        });

        let config = EffectiveConfig::build(
            &BuiltinDefaults::default(),
            None,
            &required_env(),
            Some(cli),
        )
        .unwrap();

        let resolved = config.refresh_config();
        assert_eq!(resolved.retention.keep, 5);
        assert!(resolved.retention.keep_fallback);
        assert!(resolved.continue_on_deletion_failure);
    }

    #[test]
    fn test_load_toml_file() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "store_prefix = \"feed_\"").unwrap();
        writeln!(temp, "tmp_dir = \"/var/tmp/feed\"").unwrap();
        writeln!(temp, "[download]").unwrap();
        writeln!(temp, "url = \"https://example.org/feed.zip\"").unwrap();
        writeln!(temp, "user_agent = \"ops@example.org\"").unwrap();
        writeln!(temp, "[retention]").unwrap();
        writeln!(temp, "keep = 3").unwrap();

        let config = EffectiveConfig::build(
            &BuiltinDefaults::default(),
            Some(temp.path()),
            &EnvSnapshot::new(),
            None,
        )
        .unwrap();

        let resolved = config.refresh_config();
        assert_eq!(resolved.store_prefix, "feed_");
        assert_eq!(resolved.retention.keep, 3);
        assert_eq!(resolved.tmp_dir, std::path::PathBuf::from("/var/tmp/feed"));
        assert_eq!(config.sources[1].origin, ConfigOrigin::File);
        assert_eq!(config.sources[1].digest.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "store_prefix = \"from_file_\"").unwrap();

        let config = EffectiveConfig::build(
            &BuiltinDefaults::default(),
            Some(temp.path()),
            &required_env(),
            None,
        )
        .unwrap();

        assert_eq!(config.refresh_config().store_prefix, "gtfs_vbb_");
    }

    #[test]
    fn test_missing_config_file() {
        let err = EffectiveConfig::build(
            &BuiltinDefaults::default(),
            Some(Path::new("/nonexistent/feed-refresh.toml")),
            &required_env(),
            None,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_secret_redaction() {
        let mut env = required_env();
        env.insert("PGPASSWORD".to_string(), "hunter2".to_string());
        env.insert("DESCRIPTOR_PASSWORD".to_string(), "s3cret".to_string());

        let config =
            EffectiveConfig::build(&BuiltinDefaults::default(), None, &env, None).unwrap();

        assert_eq!(config.get_str("database.password"), Some("[REDACTED]"));
        assert_eq!(config.get_str("descriptor.password"), Some("[REDACTED]"));
        assert!(config.redactions.contains(&"database.password".to_string()));
        assert_eq!(
            config.refresh_config().database.password.as_deref(),
            Some("hunter2")
        );
        assert!(!config.to_json().unwrap().contains("hunter2"));
    }
}
