//! Environment layer (layer 3)
//!
//! The process environment is captured once by the binary into an
//! [`EnvSnapshot`]; [`env_layer`] turns that snapshot into a config layer
//! without touching the real environment. Empty values count as unset.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use super::effective::ConfigError;

/// Captured process environment.
pub type EnvSnapshot = BTreeMap<String, String>;

/// Capture the current process environment.
pub fn capture_env() -> EnvSnapshot {
    std::env::vars().collect()
}

fn lookup<'a>(env: &'a EnvSnapshot, key: &str) -> Option<&'a str> {
    env.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

fn parse_port(key: &'static str, raw: &str) -> Result<u16, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidEnv {
        key,
        reason: format!("expected a TCP port, got {raw:?}"),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key,
            reason: format!("expected true or false, got {raw:?}"),
        }),
    }
}

fn set(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    match path {
        [] => {}
        [leaf] => {
            root.insert((*leaf).to_string(), value);
        }
        [head, rest @ ..] => {
            let child = root
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                set(map, rest, value);
            }
        }
    }
}

/// Build the environment config layer from a snapshot.
pub fn env_layer(env: &EnvSnapshot) -> Result<Value, ConfigError> {
    let mut root = Map::new();

    if let Some(prefix) = lookup(env, "FEED_IMPORTER_DB_PREFIX") {
        set(&mut root, &["store_prefix"], json!(format!("{prefix}_")));
    }
    if let Some(url) = lookup(env, "FEED_DOWNLOAD_URL") {
        set(&mut root, &["download", "url"], json!(url));
    }
    if let Some(agent) = lookup(env, "FEED_DOWNLOAD_USER_AGENT") {
        set(&mut root, &["download", "user_agent"], json!(agent));
    }
    if let Some(schema) = lookup(env, "FEED_IMPORTER_SCHEMA") {
        set(&mut root, &["schema"], json!(schema));
    }
    if let Some(dir) = lookup(env, "FEED_TMP_DIR") {
        set(&mut root, &["tmp_dir"], json!(dir));
    }
    if let Some(raw) = lookup(env, "FEED_TIDY_BEFORE_IMPORT") {
        let tidy = parse_bool("FEED_TIDY_BEFORE_IMPORT", raw)?;
        set(&mut root, &["transform", "tidy_before_import"], json!(tidy));
    }
    if let Some(dir) = lookup(env, "FEED_SQL_D_PATH") {
        set(&mut root, &["transform", "extensions_dir"], json!(dir));
    }
    if let Some(path) = lookup(env, "FEED_IMPORTER_DSN_FILE") {
        set(&mut root, &["descriptor", "path"], json!(path));
    }

    if let Some(host) = lookup(env, "PGHOST") {
        set(&mut root, &["database", "host"], json!(host));
        set(&mut root, &["descriptor", "host"], json!(host));
    }
    if let Some(raw) = lookup(env, "PGPORT") {
        let port = parse_port("PGPORT", raw)?;
        set(&mut root, &["database", "port"], json!(port));
        set(&mut root, &["descriptor", "port"], json!(port));
    }
    if let Some(user) = lookup(env, "PGUSER") {
        set(&mut root, &["database", "user"], json!(user));
    }
    if let Some(password) = lookup(env, "PGPASSWORD") {
        set(&mut root, &["database", "password"], json!(password));
    }
    if let Some(db) = lookup(env, "PGDATABASE") {
        set(&mut root, &["database", "meta_database"], json!(db));
    }
    if let Some(user) = lookup(env, "DESCRIPTOR_USER") {
        set(&mut root, &["descriptor", "user"], json!(user));
    }
    if let Some(password) = lookup(env, "DESCRIPTOR_PASSWORD") {
        set(&mut root, &["descriptor", "password"], json!(password));
    }

    Ok(Value::Object(root))
}
