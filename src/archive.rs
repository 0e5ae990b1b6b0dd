//! Fetching and unpacking the postcode archive.
//!
//! An [`ArchiveSource`] writes the compressed archive to a local path.
//! [`HttpArchiveSource`] downloads it with a request timeout.
//! [`LocalArchiveSource`] copies an archive already on disk, for offline
//! runs and tests. [`extract`] unzips the archive and selects the data files
//! by glob.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::error::{IngestError, TransportError};

/// Origin of the compressed postcode archive.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Where the archive comes from, for logs.
    fn describe(&self) -> String;

    /// Write the full archive to `dest`, returning the byte count.
    ///
    /// A partially transferred archive is never left at `dest`.
    async fn fetch(&self, dest: &Path) -> Result<u64, IngestError>;
}

/// Downloads the archive over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpArchiveSource {
    client: reqwest::Client,
    url: String,
}

impl HttpArchiveSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, IngestError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("postcode-locator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| TransportError::from_reqwest(err, &url))?;
        Ok(Self { client, url })
    }

    pub fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        Self::new(
            config.source_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self, dest: &Path) -> Result<u64, IngestError> {
        let url = self.url.as_str();
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| TransportError::from_reqwest(err, url))?
            .error_for_status()
            .map_err(|err| TransportError::from_reqwest(err, url))?;

        let partial = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| IngestError::io(&partial, e))?;

        let mut written = 0u64;
        let transfer: Result<(), IngestError> = async {
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|err| TransportError::from_reqwest(err, url))?
            {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| IngestError::io(&partial, e))?;
                written += chunk.len() as u64;
            }
            file.flush().await.map_err(|e| IngestError::io(&partial, e))
        }
        .await;

        if let Err(err) = transfer {
            drop(file);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err);
        }

        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|e| IngestError::io(dest, e))?;
        Ok(written)
    }
}

/// Copies an archive from the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalArchiveSource {
    path: PathBuf,
}

impl LocalArchiveSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ArchiveSource for LocalArchiveSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self, dest: &Path) -> Result<u64, IngestError> {
        tokio::fs::copy(&self.path, dest)
            .await
            .map_err(|e| IngestError::io(&self.path, e))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, IngestError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .case_insensitive(true)
            .build()
            .map_err(|source| IngestError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| IngestError::Pattern {
        pattern: patterns.join(", "),
        source,
    })
}

/// Unzip `archive` into `dest_dir` (replacing anything already there) and
/// return the extracted files matching `patterns`, sorted by relative path.
pub fn extract(
    archive: &Path,
    dest_dir: &Path,
    patterns: &[String],
) -> Result<Vec<PathBuf>, IngestError> {
    let include = build_globset(patterns)?;

    if dest_dir.exists() {
        std::fs::remove_dir_all(dest_dir).map_err(|e| IngestError::io(dest_dir, e))?;
    }
    std::fs::create_dir_all(dest_dir).map_err(|e| IngestError::io(dest_dir, e))?;

    let file = std::fs::File::open(archive).map_err(|e| IngestError::io(archive, e))?;
    let malformed = |source| IngestError::MalformedArchive {
        path: archive.to_path_buf(),
        source,
    };
    let mut zip = zip::ZipArchive::new(file).map_err(malformed)?;
    zip.extract(dest_dir).map_err(|err| match err {
        zip::result::ZipError::Io(e) => IngestError::io(dest_dir, e),
        other => malformed(other),
    })?;

    let mut files = Vec::new();
    for entry in WalkDir::new(dest_dir) {
        let entry = entry.map_err(|e| IngestError::io(dest_dir, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(dest_dir).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");
        if include.is_match(&rel_str) {
            files.push(path.to_path_buf());
        }
    }

    if files.is_empty() {
        return Err(IngestError::NoDataFiles {
            path: archive.to_path_buf(),
            patterns: patterns.to_vec(),
        });
    }

    files.sort();
    Ok(files)
}
