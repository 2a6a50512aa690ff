//! Download one image reference to disk

use anyhow::{Context, Result};
use reqwest::header::ACCEPT;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

use crate::error::AssetError;
use crate::filename::local_filename;
use crate::resolve::resolve_reference;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// A reference that now lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub filename: String,
    pub path: PathBuf,
    /// Path written into the HTML (`imagedir` + filename)
    pub relative_path: String,
    /// False when the file was already present and no request was made
    pub downloaded: bool,
}

/// Local image directory for `imagedir` under `storage_root`.
///
/// `imagedir` is usually site-absolute (`/content/uploads/`), so leading
/// slashes are dropped before joining.
pub fn image_dir(storage_root: &Path, imagedir: &str) -> PathBuf {
    let trimmed = imagedir.trim_matches('/');
    if trimmed.is_empty() {
        storage_root.to_path_buf()
    } else {
        storage_root.join(trimmed)
    }
}

pub fn build_client(user_agent: &str, timeout: Option<Duration>) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder().user_agent(user_agent);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("Failed to build HTTP client")
}

pub struct AssetFetcher {
    client: reqwest::blocking::Client,
    hostname: String,
    imagedir: String,
    dir: PathBuf,
}

impl AssetFetcher {
    pub fn new(
        client: reqwest::blocking::Client,
        hostname: &str,
        imagedir: &str,
        storage_root: &Path,
    ) -> Self {
        Self {
            client,
            hostname: hostname.to_string(),
            imagedir: imagedir.to_string(),
            dir: image_dir(storage_root, imagedir),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the image directory. Called once per batch, before any fetch.
    pub fn prepare(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Resolve, name and download `reference`. A file that already exists
    /// at the target path counts as success without touching the network.
    ///
    /// Each call streams into its own staging file, so two references that
    /// resolve to the same URL never write through each other.
    pub fn fetch(&self, reference: &str) -> Result<ResolvedAsset, AssetError> {
        let url = resolve_reference(reference, &self.hostname)?;
        let filename = local_filename(&url)?;
        let path = self.dir.join(&filename);
        let relative_path = format!("{}{}", self.imagedir, filename);

        if path.exists() {
            tracing::debug!(path = %path.display(), "file already exists");
            return Ok(ResolvedAsset {
                filename,
                path,
                relative_path,
                downloaded: false,
            });
        }

        // Dropped staging files delete themselves on every error path
        let mut staging = tempfile::Builder::new()
            .prefix(&format!(".{}.", filename))
            .suffix(".part")
            .tempfile_in(&self.dir)?;
        self.download(&url, &mut staging)?;

        if let Err(e) = staging.persist(&path) {
            if !path.exists() {
                return Err(AssetError::Io(e.error));
            }
            tracing::debug!(path = %path.display(), "published by a concurrent fetch");
        }

        tracing::debug!(path = %path.display(), %url, "downloaded image");
        Ok(ResolvedAsset {
            filename,
            path,
            relative_path,
            downloaded: true,
        })
    }

    fn download(&self, url: &str, out: &mut NamedTempFile) -> Result<(), AssetError> {
        let mut response = self.client.get(url).header(ACCEPT, "*/*").send()?;

        if !response.status().is_success() {
            return Err(AssetError::Status(response.status()));
        }

        let expected = response.content_length();
        let written = response.copy_to(out)?;
        out.as_file().sync_all()?;

        match expected {
            Some(expected) if expected > 0 && expected != written => Err(AssetError::SizeMismatch {
                expected,
                actual: written,
            }),
            _ => Ok(()),
        }
    }
}
