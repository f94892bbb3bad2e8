//! Staging and transferring dropped files and pasted images.
//!
//! Each item is written to a local staging file, sent to the remote host by
//! an [`Uploader`], and the remote path it landed at is returned so the
//! caller can paste it into the session as a bracketed frame.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{SshConfig, TransferConfig};
use crate::error::UploadError;

/// A file dropped onto the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// An image item from a paste event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PastedImage {
    /// MIME type such as `image/png`.
    pub mime: String,
    pub data: Vec<u8>,
}

/// A staged local copy waiting to be transferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadArtifact {
    pub name: String,
    pub local_path: PathBuf,
}

/// Copies a staged file to the remote side.
pub trait Uploader: Send + Sync {
    /// Transfer `local` and return the remote path it was written to.
    fn upload(&self, local: &Path, remote_name: &str) -> Result<String, UploadError>;
}

/// Uploads with `scp` to the same host the sessions connect to.
#[derive(Debug, Clone)]
pub struct ScpUploader {
    program: String,
    host: String,
    remote_dir: String,
    connect_timeout_secs: Option<u32>,
}

impl ScpUploader {
    pub fn new(ssh: &SshConfig, transfer: &TransferConfig) -> Self {
        Self {
            program: transfer.scp_program.clone(),
            host: ssh.host.clone(),
            remote_dir: transfer.remote_dir.trim_end_matches('/').to_string(),
            connect_timeout_secs: ssh.connect_timeout_secs,
        }
    }

    pub fn remote_path(&self, remote_name: &str) -> String {
        format!("{}/{remote_name}", self.remote_dir)
    }

    fn command(&self, local: &Path, remote_path: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-q").arg("-B");
        if let Some(secs) = self.connect_timeout_secs {
            cmd.arg("-o").arg(format!("ConnectTimeout={secs}"));
        }
        cmd.arg(local).arg(format!("{}:{remote_path}", self.host));
        cmd
    }
}

impl Uploader for ScpUploader {
    fn upload(&self, local: &Path, remote_name: &str) -> Result<String, UploadError> {
        let remote_path = self.remote_path(remote_name);
        let output = self
            .command(local, &remote_path)
            .output()
            .map_err(|source| UploadError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(UploadError::Transfer {
                path: local.to_path_buf(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        log::info!("uploaded {} to {}:{remote_path}", local.display(), self.host);
        Ok(remote_path)
    }
}

/// Stages items locally and hands them to an [`Uploader`].
pub struct TransferService {
    uploader: Arc<dyn Uploader>,
    staging_dir: PathBuf,
}

impl TransferService {
    pub fn new(uploader: Arc<dyn Uploader>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploader,
            staging_dir: staging_dir.into(),
        }
    }

    /// Upload dropped files, returning their remote paths in order.
    pub async fn upload_files(&self, files: Vec<DroppedFile>) -> Result<Vec<String>, UploadError> {
        let stamp = unix_millis();
        let items = files
            .into_iter()
            .enumerate()
            .map(|(index, file)| (artifact_name(&file.name, stamp, index), file.data))
            .collect();
        self.transfer(items).await
    }

    /// Upload pasted images, skipping empty items.
    pub async fn upload_images(
        &self,
        images: Vec<PastedImage>,
    ) -> Result<Vec<String>, UploadError> {
        let stamp = unix_millis();
        let items = images
            .into_iter()
            .filter(|image| !image.data.is_empty())
            .enumerate()
            .map(|(index, image)| (image_name(&image.mime, stamp, index), image.data))
            .collect();
        self.transfer(items).await
    }

    async fn transfer(&self, items: Vec<(String, Vec<u8>)>) -> Result<Vec<String>, UploadError> {
        let uploader = Arc::clone(&self.uploader);
        let staging_dir = self.staging_dir.clone();

        // Staging and scp both block; keep them off the async workers.
        let result = tokio::task::spawn_blocking(move || -> Result<Vec<String>, UploadError> {
            let mut remote_paths = Vec::with_capacity(items.len());
            for (name, data) in items {
                let artifact = stage(&staging_dir, &name, &data)?;
                remote_paths.push(uploader.upload(&artifact.local_path, &artifact.name)?);
            }
            Ok(remote_paths)
        })
        .await
        .map_err(|e| UploadError::Aborted(e.to_string()))?;

        if let Err(e) = &result {
            log::warn!("upload failed: {e}");
        }
        result
    }
}

/// Write `data` to a fresh staging file named `name`.
pub fn stage(staging_dir: &Path, name: &str, data: &[u8]) -> Result<UploadArtifact, UploadError> {
    let local_path = staging_dir.join(name);
    std::fs::create_dir_all(staging_dir)
        .and_then(|()| std::fs::write(&local_path, data))
        .map_err(|source| UploadError::Stage {
            path: local_path.clone(),
            source,
        })?;
    Ok(UploadArtifact {
        name: name.to_string(),
        local_path,
    })
}

/// `<millis>-<index>-<sanitized name>`. The index keeps names distinct
/// within one drop even when they sanitize to the same string.
pub fn artifact_name(original: &str, unix_millis: u128, index: usize) -> String {
    format!("{unix_millis}-{index}-{}", sanitize_file_name(original))
}

/// `pasted-image-<millis>-<index>.<ext>`, the extension taken from the MIME
/// subtype.
pub fn image_name(mime: &str, unix_millis: u128, index: usize) -> String {
    let extension = mime
        .split_once('/')
        .map(|(_, subtype)| sanitize_file_name(subtype))
        .filter(|subtype| !subtype.is_empty())
        .unwrap_or_else(|| "png".to_string());
    format!("pasted-image-{unix_millis}-{index}.{extension}")
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
