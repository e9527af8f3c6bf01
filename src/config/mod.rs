//! Refresh configuration
//!
//! Configuration is resolved once, at process start, from four layers
//! merged in order of increasing precedence:
//! 1. Built-in defaults
//! 2. Config file (`--config`, TOML)
//! 3. Environment snapshot (captured by the binary, never read here)
//! 4. CLI flags

mod defaults;
mod effective;
mod env;
mod merge;
mod model;

pub use defaults::{BuiltinDefaults, DEFAULT_DOWNLOAD_SCRIPT, DEFAULT_TRANSFORM_SCRIPT};
pub use effective::{ConfigError, ConfigOrigin, ConfigScope, ConfigSource, EffectiveConfig};
pub use env::{capture_env, env_layer, EnvSnapshot};
pub use merge::{deep_merge, merge_layers};
pub use model::{
    DatabaseConfig, DescriptorConfig, DownloadConfig, RefreshConfig, RetentionConfig,
    TransformConfig,
};
