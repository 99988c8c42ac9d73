//! Push the active credential list into the proxy's own config file.
//!
//! The proxy reads its accepted passwords from `auth.config` in its JSON
//! config and only picks up changes after a restart, so a sync is a rewrite
//! of that array followed by an optional reload command.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::{errors::Error, Result};

#[derive(Clone, Debug)]
pub struct AuthSync {
    config_path: PathBuf,
    reload_command: Vec<String>,
}

impl AuthSync {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            reload_command: Vec::new(),
        }
    }

    /// Command run after the config changed, e.g. `systemctl restart zivpn`.
    pub fn with_reload_command(mut self, command: Vec<String>) -> Self {
        self.reload_command = command;
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Write `secrets` into `auth.config`, keeping every other key.
    ///
    /// Returns `false` when the file already listed exactly these secrets, in
    /// which case nothing is written and the proxy is not reloaded.
    pub async fn apply(&self, secrets: &[String]) -> Result<bool> {
        let raw = tokio::fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| Error::InvalidPath {
                path: self.config_path.clone(),
                reason: format!("cannot read proxy config: {e}"),
            })?;

        let mut doc: Value = if raw.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&raw)?
        };
        let Some(root) = doc.as_object_mut() else {
            return Err(Error::InvalidPath {
                path: self.config_path.clone(),
                reason: "proxy config is not a JSON object".to_string(),
            });
        };

        let auth = root.entry("auth").or_insert_with(|| json!({}));
        if !auth.is_object() {
            *auth = json!({});
        }

        let wanted = Value::from(secrets.to_vec());
        if auth.get("config") == Some(&wanted) {
            debug!(path = %self.config_path.display(), "proxy auth list unchanged");
            return Ok(false);
        }
        auth["config"] = wanted;

        let txt = serde_json::to_string_pretty(&doc)?;
        write_atomic(&self.config_path, txt.as_bytes()).await?;
        info!(
            path = %self.config_path.display(),
            count = secrets.len(),
            "proxy auth list updated"
        );

        self.reload().await?;
        Ok(true)
    }

    async fn reload(&self) -> Result<()> {
        let Some((program, args)) = self.reload_command.split_first() else {
            return Ok(());
        };

        let status = tokio::process::Command::new(program)
            .args(args)
            .status()
            .await
            .map_err(|e| Error::External(format!("failed to run {program}: {e}")))?;

        if !status.success() {
            return Err(Error::External(format!(
                "reload command `{}` exited with {status}",
                self.reload_command.join(" ")
            )));
        }
        info!(command = %self.reload_command.join(" "), "proxy reloaded");
        Ok(())
    }
}

/// Write to a sibling temp file, flush it to disk, then rename over `path`.
///
/// The fsync comes before the rename so a crash never leaves `path` pointing
/// at an empty or partial file.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await
}
