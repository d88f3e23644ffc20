//! Local filesystem storage implementation.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── raw_data.json
//! ├── cleaned_data.json
//! ├── listing_refs.json
//! ├── raw.zip
//! └── cleaned.zip
//! ```
//!
//! Every file is written to a temporary sibling first and renamed into
//! place, so readers never see a half-written dataset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{CleanedAd, OutputConfig, RawAd};
use crate::storage::{AdStorage, CleanedSnapshot, RawSnapshot, RefCheckpoint, SaveReport};

pub const RAW_FILE: &str = "raw_data.json";
pub const CLEANED_FILE: &str = "cleaned_data.json";
pub const CHECKPOINT_FILE: &str = "listing_refs.json";
pub const RAW_ARCHIVE: &str = "raw.zip";
pub const CLEANED_ARCHIVE: &str = "cleaned.zip";

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    output: OutputConfig,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            output: OutputConfig::default(),
        }
    }

    /// Choose which files `save` writes.
    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.output = output;
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write a dataset and, if asked, its zip archive.
    async fn write_dataset<T: Serialize>(
        &self,
        key: &str,
        archive_key: &str,
        value: &T,
        zip: bool,
        report: &mut SaveReport,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await?;
        report.written.push(key.to_string());

        if zip {
            self.write_archive(archive_key, key, &bytes, report).await?;
        }
        Ok(())
    }

    #[cfg(feature = "archive")]
    async fn write_archive(
        &self,
        archive_key: &str,
        entry_name: &str,
        bytes: &[u8],
        report: &mut SaveReport,
    ) -> Result<()> {
        let archive = zip_single(entry_name, bytes)?;
        self.write_bytes(archive_key, &archive).await?;
        report.written.push(archive_key.to_string());
        Ok(())
    }

    #[cfg(not(feature = "archive"))]
    async fn write_archive(
        &self,
        archive_key: &str,
        _entry_name: &str,
        _bytes: &[u8],
        _report: &mut SaveReport,
    ) -> Result<()> {
        log::warn!("Built without the `archive` feature, skipping {archive_key}");
        Ok(())
    }
}

/// Deflate-compressed zip holding one file.
#[cfg(feature = "archive")]
fn zip_single(entry_name: &str, bytes: &[u8]) -> Result<Vec<u8>> {
    use std::io::{Cursor, Write};

    use zip::CompressionMethod;
    use zip::write::SimpleFileOptions;

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file(entry_name, options)?;
    writer.write_all(bytes)?;
    Ok(writer.finish()?.into_inner())
}

#[async_trait]
impl AdStorage for LocalStorage {
    async fn load_raw_if_fresh(&self, max_age: Duration) -> Result<Option<RawSnapshot>> {
        let Some(snapshot) = self.load_raw().await? else {
            log::info!("No {} found, fetching fresh data", RAW_FILE);
            return Ok(None);
        };

        if !snapshot.complete {
            log::info!("{} was written by an interrupted run, ignoring it", RAW_FILE);
            return Ok(None);
        }
        if !snapshot.is_fresh(max_age, Utc::now()) {
            log::info!(
                "{} is older than {}h, fetching fresh data",
                RAW_FILE,
                max_age.as_secs() / 3600
            );
            return Ok(None);
        }

        log::info!(
            "Reusing {} ads from {} written at {}",
            snapshot.count,
            RAW_FILE,
            snapshot.updated_at
        );
        Ok(Some(snapshot))
    }

    async fn load_raw(&self) -> Result<Option<RawSnapshot>> {
        self.read_json(RAW_FILE).await
    }

    async fn load_cleaned(&self) -> Result<Option<CleanedSnapshot>> {
        self.read_json(CLEANED_FILE).await
    }

    async fn save(
        &self,
        raw: Option<&[RawAd]>,
        cleaned: &[CleanedAd],
        complete: bool,
    ) -> Result<SaveReport> {
        let mut report = SaveReport::default();

        if let Some(raw) = raw.filter(|_| self.output.save_raw) {
            let snapshot = RawSnapshot::new(raw.to_vec(), complete);
            self.write_dataset(RAW_FILE, RAW_ARCHIVE, &snapshot, self.output.zip_raw, &mut report)
                .await?;
            log::info!("Raw data: {} ads written to {}", snapshot.count, RAW_FILE);
        }

        if self.output.save_cleaned {
            let snapshot = CleanedSnapshot::new(cleaned.to_vec());
            self.write_dataset(
                CLEANED_FILE,
                CLEANED_ARCHIVE,
                &snapshot,
                self.output.zip_cleaned,
                &mut report,
            )
            .await?;
            log::info!(
                "Cleaned data: {} ads written to {}",
                snapshot.count,
                CLEANED_FILE
            );
        }

        Ok(report)
    }

    async fn load_checkpoint(&self, max_age: Duration) -> Result<Option<RefCheckpoint>> {
        let Some(checkpoint) = self.read_json::<RefCheckpoint>(CHECKPOINT_FILE).await? else {
            return Ok(None);
        };
        if !checkpoint.is_fresh(max_age, Utc::now()) {
            log::info!("{} is stale, discovering listings again", CHECKPOINT_FILE);
            return Ok(None);
        }

        log::info!(
            "Resuming with {} refs from {} written at {}",
            checkpoint.count,
            CHECKPOINT_FILE,
            checkpoint.updated_at
        );
        Ok(Some(checkpoint))
    }

    async fn save_checkpoint(&self, checkpoint: &RefCheckpoint) -> Result<()> {
        let bytes = serde_json::to_vec(checkpoint)?;
        self.write_bytes(CHECKPOINT_FILE, &bytes).await?;
        log::debug!("Checkpointed {} refs to {}", checkpoint.count, CHECKPOINT_FILE);
        Ok(())
    }

    async fn clear_checkpoint(&self) -> Result<()> {
        match tokio::fs::remove_file(self.path(CHECKPOINT_FILE)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}
