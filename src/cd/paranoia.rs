//! Audio extraction through the cd-paranoia command line tool
//!
//! The drive is read by an external cd-paranoia process writing raw PCM to
//! stdout. Fast extraction disables paranoia and re-runs the read on
//! failure; thorough extraction runs full paranoia with a bounded number of
//! never-skip retries per sector.

use crate::cd::audio::{PcmAudio, SampleSpan, SAMPLES_PER_SECTOR};
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// High-speed read without extensive error correction
    Fast,
    /// Slow, retry-heavy read
    Thorough,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionMethod::Fast => write!(f, "fast"),
            ExtractionMethod::Thorough => write!(f, "thorough"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    /// Sectors stayed unreadable after the retry budget was spent
    #[error("Sector read error: {0}")]
    SectorRead(String),
    #[error("Extraction cancelled")]
    Cancelled,
    #[error("Extractor unavailable: {0}")]
    Unavailable(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One extraction call against the drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractRequest {
    /// Track number, 0 for the hidden track
    pub track: u8,
    /// Offset-corrected span to read
    pub span: SampleSpan,
    pub method: ExtractionMethod,
    pub retry_budget: u32,
}

#[derive(Debug, Clone)]
pub struct ExtractedAudio {
    pub audio: PcmAudio,
    /// Retries spent on this track
    pub retries: u32,
}

/// Extraction capability
///
/// Implementations must return promptly with [`ExtractError::Cancelled`]
/// once `cancel` fires, releasing the drive.
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<ExtractedAudio, ExtractError>;
}

/// cd-paranoia backed extractor
pub struct ParanoiaExtractor {
    binary: String,
    device: PathBuf,
    read_offset: i32,
}

impl ParanoiaExtractor {
    pub fn new(device: PathBuf, read_offset: i32) -> Self {
        Self {
            binary: "cd-paranoia".to_string(),
            device,
            read_offset,
        }
    }

    /// Use a different binary, e.g. `cdparanoia`
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Arguments for one read. cd-paranoia applies the read offset itself,
    /// so the span is translated back to nominal sectors.
    pub fn arguments(&self, request: &ExtractRequest) -> Vec<String> {
        let nominal_start = request.span.start - self.read_offset as i64;
        let first_sector = nominal_start.div_euclid(SAMPLES_PER_SECTOR as i64).max(0);
        let sectors = request
            .span
            .frames
            .div_ceil(SAMPLES_PER_SECTOR as u64)
            .max(1) as i64;

        let mut args = vec![
            "-d".to_string(),
            self.device.display().to_string(),
            "-O".to_string(),
            self.read_offset.to_string(),
        ];
        match request.method {
            ExtractionMethod::Fast => args.push("-Z".to_string()),
            ExtractionMethod::Thorough => {
                args.push(format!("--never-skip={}", request.retry_budget.max(1)))
            }
        }
        args.push("-r".to_string());
        args.push(format!(
            "[.{}]-[.{}]",
            first_sector,
            first_sector + sectors - 1
        ));
        args.push("-".to_string());
        args
    }

    async fn run_once(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<Result<PcmAudio, String>, ExtractError> {
        let args = self.arguments(request);
        debug!(track = request.track, "Running {} {}", self.binary, args.join(" "));

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ExtractError::Unavailable(format!("{} not found", self.binary))
                } else {
                    ExtractError::Io(e)
                }
            })?;

        // Dropping the wait future kills the child, freeing the drive
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => {
                info!(track = request.track, "Extraction cancelled, cd-paranoia killed");
                return Err(ExtractError::Cancelled);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(Err(format!(
                "exit code {:?}: {}",
                output.status.code(),
                stderr.lines().last().unwrap_or("").trim()
            )));
        }

        // cd-paranoia reads whole sectors, so a longer read is trimmed. A
        // short one is a failed attempt and never padded.
        let mut audio = PcmAudio::new(output.stdout);
        if audio.frame_count() < request.span.frames {
            return Ok(Err(format!(
                "short read: {} of {} frames",
                audio.frame_count(),
                request.span.frames
            )));
        }
        if audio.frame_count() > request.span.frames {
            debug!(
                track = request.track,
                "Read {} frames, trimming to {}",
                audio.frame_count(),
                request.span.frames
            );
            audio.fit_to(request.span.frames);
        }
        Ok(Ok(audio))
    }
}

#[async_trait::async_trait]
impl Extractor for ParanoiaExtractor {
    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<ExtractedAudio, ExtractError> {
        info!(
            "Extracting track {} ({} method, {} frames)",
            request.track, request.method, request.span.frames
        );

        // Thorough mode retries per sector inside cd-paranoia; fast mode
        // retries the whole read.
        let attempts = match request.method {
            ExtractionMethod::Fast => request.retry_budget + 1,
            ExtractionMethod::Thorough => 1,
        };

        let mut last_error = String::new();
        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            match self.run_once(request, cancel).await? {
                Ok(audio) => {
                    return Ok(ExtractedAudio {
                        audio,
                        retries: attempt,
                    })
                }
                Err(message) => {
                    warn!(
                        "Track {} read attempt {}/{} failed: {}",
                        request.track,
                        attempt + 1,
                        attempts,
                        message
                    );
                    last_error = message;
                }
            }
        }

        Err(ExtractError::SectorRead(format!(
            "track {} unreadable after {} attempt(s): {}",
            request.track, attempts, last_error
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: ExtractionMethod) -> ExtractRequest {
        ExtractRequest {
            track: 2,
            span: SampleSpan::from_sectors(1000, 500, 6),
            method,
            retry_budget: 20,
        }
    }

    #[test]
    fn test_fast_arguments_disable_paranoia() {
        let extractor = ParanoiaExtractor::new(PathBuf::from("/dev/sr0"), 6);
        let args = extractor.arguments(&request(ExtractionMethod::Fast));
        assert_eq!(
            args,
            vec!["-d", "/dev/sr0", "-O", "6", "-Z", "-r", "[.1000]-[.1499]", "-"]
        );
    }

    #[test]
    fn test_thorough_arguments_bound_retries() {
        let extractor = ParanoiaExtractor::new(PathBuf::from("/dev/sr0"), 6);
        let args = extractor.arguments(&request(ExtractionMethod::Thorough));
        assert!(args.contains(&"--never-skip=20".to_string()));
        assert!(!args.contains(&"-Z".to_string()));
    }

    /// Executable shell script standing in for cd-paranoia. Every run
    /// appends a line to `runs` next to it.
    #[cfg(unix)]
    fn stub_paranoia(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("cd-paranoia");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "echo run >> \"$(dirname \"$0\")/runs\"").unwrap();
        writeln!(file, "{}", body).unwrap();
        file.sync_all().unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn one_sector_request() -> ExtractRequest {
        ExtractRequest {
            track: 1,
            span: SampleSpan::from_sectors(0, 1, 0),
            method: ExtractionMethod::Fast,
            retry_budget: 2,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_short_read_is_a_failed_attempt() {
        let dir = tempfile::TempDir::new().unwrap();
        let binary = stub_paranoia(dir.path(), "head -c 400 /dev/zero");
        let extractor =
            ParanoiaExtractor::new(PathBuf::from("/dev/null"), 0).with_binary(binary.display().to_string());

        let result = extractor
            .extract(&one_sector_request(), &CancellationToken::new())
            .await;

        match result {
            Err(ExtractError::SectorRead(message)) => assert!(message.contains("short read")),
            other => panic!("expected a sector read error, got {:?}", other.map(|a| a.retries)),
        }
        let runs = std::fs::read_to_string(dir.path().join("runs")).unwrap();
        assert_eq!(runs.lines().count(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_full_sector_read_succeeds() {
        let dir = tempfile::TempDir::new().unwrap();
        let binary = stub_paranoia(dir.path(), "head -c 2352 /dev/zero");
        let extractor =
            ParanoiaExtractor::new(PathBuf::from("/dev/null"), 0).with_binary(binary.display().to_string());

        let extracted = extractor
            .extract(&one_sector_request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(extracted.audio.frame_count(), SAMPLES_PER_SECTOR as u64);
        assert_eq!(extracted.retries, 0);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let extractor = ParanoiaExtractor::new(PathBuf::from("/dev/null"), 0)
            .with_binary("autorip-no-such-paranoia-binary");
        let result = extractor
            .extract(&request(ExtractionMethod::Fast), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ExtractError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let extractor = ParanoiaExtractor::new(PathBuf::from("/dev/null"), 0)
            .with_binary("autorip-no-such-paranoia-binary");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = extractor
            .extract(&request(ExtractionMethod::Fast), &cancel)
            .await;
        assert!(matches!(result, Err(ExtractError::Cancelled)));
    }
}
