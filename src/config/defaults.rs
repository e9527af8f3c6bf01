//! Built-in defaults (layer 1)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// File name of the download collaborator, looked up next to the executable.
pub const DEFAULT_DOWNLOAD_SCRIPT: &str = "download.sh";

/// File name of the transform collaborator, looked up next to the executable.
pub const DEFAULT_TRANSFORM_SCRIPT: &str = "import.sh";

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Download collaborator (default: `download.sh` next to the binary)
    pub download_script: PathBuf,

    /// Transform collaborator (default: `import.sh` next to the binary)
    pub transform_script: PathBuf,

    /// Scratch directory shared with both collaborators
    pub tmp_dir: PathBuf,

    /// Number of most recent imports to retain (default: 2)
    pub retention_keep: usize,

    /// Also retain the import before the most recent one (default: true)
    pub retention_keep_fallback: bool,

    /// Route collaborator stdout to ours (default: true)
    pub show_collaborator_output: bool,

    /// Keep going when dropping a stale store fails (default: false)
    pub continue_on_deletion_failure: bool,

    /// Label of the connection descriptor line (default: "feed")
    pub descriptor_label: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self::co_located(Path::new("."))
    }
}

impl BuiltinDefaults {
    /// Defaults for collaborator scripts installed in `dir`.
    pub fn co_located(dir: &Path) -> Self {
        Self {
            download_script: dir.join(DEFAULT_DOWNLOAD_SCRIPT),
            transform_script: dir.join(DEFAULT_TRANSFORM_SCRIPT),
            tmp_dir: PathBuf::from("/tmp/feed-refresh"),
            retention_keep: 2,
            retention_keep_fallback: true,
            show_collaborator_output: true,
            continue_on_deletion_failure: false,
            descriptor_label: "feed".to_string(),
        }
    }

    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "tmp_dir": self.tmp_dir,
            "continue_on_deletion_failure": self.continue_on_deletion_failure,
            "download": {
                "script": self.download_script,
                "show_output": self.show_collaborator_output,
            },
            "transform": {
                "script": self.transform_script,
                "show_output": self.show_collaborator_output,
            },
            "retention": {
                "keep": self.retention_keep,
                "keep_fallback": self.retention_keep_fallback,
            },
            "descriptor": {
                "label": self.descriptor_label,
            }
        })
    }
}
