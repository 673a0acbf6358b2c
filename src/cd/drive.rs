//! CD drive detection and TOC reading

use crate::cd::toc::{parse_paranoia_query, RawToc, TocError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CdDriveError {
    #[error("No CD drive found")]
    NoDrive,
    #[error("No disc in drive")]
    NoDisc,
    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
    #[error(transparent)]
    Toc(#[from] TocError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Drive access error: {0}")]
    Access(String),
}

/// Represents a CD drive
#[derive(Debug, Clone)]
pub struct CdDrive {
    pub device_path: PathBuf,
    pub name: String,
}

const CANDIDATE_DEVICES: &[&str] = &["/dev/cdrom", "/dev/sr0", "/dev/sr1", "/dev/dvd"];

impl CdDrive {
    pub fn new(device_path: PathBuf) -> Self {
        let name = device_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| device_path.display().to_string());
        Self { device_path, name }
    }

    /// Detect available CD drives
    pub fn detect_drives() -> Result<Vec<CdDrive>, CdDriveError> {
        let drives: Vec<CdDrive> = CANDIDATE_DEVICES
            .iter()
            .map(Path::new)
            .filter(|p| p.exists())
            .map(|p| CdDrive::new(p.to_path_buf()))
            .collect();
        if drives.is_empty() {
            return Err(CdDriveError::NoDrive);
        }
        Ok(drives)
    }

    /// Read the TOC with `cd-paranoia -Q`, optionally merging pre-gaps and
    /// ISRCs from a `cdrdao read-toc` pass.
    pub async fn read_toc(
        &self,
        timeout: Duration,
        gap_detection: bool,
    ) -> Result<RawToc, CdDriveError> {
        info!("Reading TOC from {}", self.device_path.display());

        let output = tokio::time::timeout(
            timeout,
            Command::new("cd-paranoia")
                .arg("-Q")
                .arg("-d")
                .arg(&self.device_path)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| CdDriveError::Timeout("TOC read", timeout))??;

        // cd-paranoia prints the table to stderr
        let text = String::from_utf8_lossy(&output.stderr);
        if text.contains("No medium") || text.contains("no disc") {
            return Err(CdDriveError::NoDisc);
        }
        let mut toc = parse_paranoia_query(&text)?;

        if gap_detection {
            match self.read_cdrdao_toc(timeout).await {
                Ok(cdrdao) => toc.merge_cdrdao(&cdrdao),
                Err(e) => warn!("Gap detection skipped: {}", e),
            }
        }

        Ok(toc)
    }

    async fn read_cdrdao_toc(&self, timeout: Duration) -> Result<String, CdDriveError> {
        let dir = std::env::temp_dir().join(format!("autorip-toc-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await?;
        let toc_file = dir.join("disc.toc");

        let result = tokio::time::timeout(
            timeout,
            Command::new("cdrdao")
                .arg("read-toc")
                .arg("--device")
                .arg(&self.device_path)
                .arg(&toc_file)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let contents = match result {
            Err(_) => Err(CdDriveError::Timeout("cdrdao read-toc", timeout)),
            Ok(Err(e)) => Err(CdDriveError::Io(e)),
            Ok(Ok(output)) if !output.status.success() => Err(CdDriveError::Access(format!(
                "cdrdao exited with {:?}",
                output.status.code()
            ))),
            Ok(Ok(_)) => tokio::fs::read_to_string(&toc_file)
                .await
                .map_err(CdDriveError::Io),
        };
        let _ = tokio::fs::remove_dir_all(&dir).await;
        debug!("cdrdao TOC read finished: {}", contents.is_ok());
        contents
    }

    /// Eject the disc
    pub async fn eject(&self, timeout: Duration) -> Result<(), CdDriveError> {
        let status = tokio::time::timeout(
            timeout,
            Command::new("eject")
                .arg(&self.device_path)
                .kill_on_drop(true)
                .status(),
        )
        .await
        .map_err(|_| CdDriveError::Timeout("eject", timeout))??;

        if !status.success() {
            return Err(CdDriveError::Access(format!(
                "eject exited with {:?}",
                status.code()
            )));
        }
        info!("Ejected {}", self.device_path.display());
        Ok(())
    }
}
