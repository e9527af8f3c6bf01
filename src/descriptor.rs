//! Connection descriptor for downstream connection poolers.
//!
//! One line, `<label>=host=<H> port=<P> dbname=<NAME> user=<U> password=<PW>`,
//! written after the new store has been recorded and before the
//! bookkeeping transaction commits.

use std::fmt;
use std::path::Path;

use crate::config::DescriptorConfig;
use crate::error::{RefreshError, Result};

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub label: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

fn required<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(RefreshError::Descriptor(format!("missing/empty {what}"))),
    }
}

impl ConnectionDescriptor {
    /// Descriptor pointing at `dbname`. Host, port, user and password must
    /// all be configured.
    pub fn from_config(cfg: &DescriptorConfig, dbname: &str) -> Result<Self> {
        let host = required(&cfg.host, "descriptor host ($PGHOST)")?;
        let port = cfg
            .port
            .ok_or_else(|| RefreshError::Descriptor("missing descriptor port ($PGPORT)".into()))?;
        let user = required(&cfg.user, "descriptor user ($DESCRIPTOR_USER)")?;
        let password = required(&cfg.password, "descriptor password ($DESCRIPTOR_PASSWORD)")?;

        Ok(Self {
            label: cfg.label.clone(),
            host: host.to_string(),
            port,
            dbname: dbname.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    fn render_with(&self, password: &str) -> String {
        format!(
            "{}=host={} port={} dbname={} user={} password={}",
            self.label, self.host, self.port, self.dbname, self.user, password
        )
    }

    pub fn render(&self) -> String {
        self.render_with(&self.password)
    }

    /// Rendering safe for logs: only the first and last two characters of
    /// the password survive.
    pub fn redacted(&self) -> String {
        let chars: Vec<char> = self.password.chars().collect();
        let masked = if chars.len() <= 4 {
            "…".to_string()
        } else {
            let head: String = chars[..2].iter().collect();
            let tail: String = chars[chars.len() - 2..].iter().collect();
            format!("{head}…{tail}")
        };
        self.render_with(&masked)
    }

    /// Replace the file at `path` with the rendered descriptor.
    pub async fn write(&self, path: &Path) -> Result<()> {
        tracing::debug!(path = %path.display(), descriptor = %self.redacted(), "writing connection descriptor");

        // Readers never see a half-written file.
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        let write_err = |e: std::io::Error| {
            RefreshError::Descriptor(format!("failed to write {}: {e}", path.display()))
        };
        tokio::fs::write(&tmp, self.render()).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
        Ok(())
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}
