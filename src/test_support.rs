// Test support utilities for both unit and integration tests

use crate::accuraterip::{
    checksum_track, ChecksumDatabase, DatabaseEntry, LookupError, RemoteTrack, TrackPosition,
};
use crate::cd::audio::PcmAudio;
use crate::cd::disc_id::AccurateRipIds;
use crate::cd::encoder::{EncodeError, Encoder};
use crate::cd::paranoia::{ExtractError, ExtractRequest, ExtractedAudio, ExtractionMethod, Extractor};
use crate::cd::toc::{analyze, AnalyzerSettings, Disc, RawToc, RawTocEntry};
use crate::musicbrainz::{AlbumMetadata, MetadataProvider, MusicBrainzError};
use crate::rip::orchestrator::{RipSettings, StageTimeouts};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Deterministic audio for `track`, distinct per track
pub fn synthetic_audio(track: u8, frames: u64) -> PcmAudio {
    let mut bytes = Vec::with_capacity(frames as usize * 4);
    for i in 0..frames {
        let frame = (i as u32)
            .wrapping_mul(2_654_435_761)
            .wrapping_add((track as u32) << 20);
        bytes.extend_from_slice(&frame.to_le_bytes());
    }
    PcmAudio::new(bytes)
}

/// Same length as [`synthetic_audio`] with a damaged frame at a quarter and
/// at three quarters of the track, so the damage stays inside the checked
/// window of a first or last track as well
pub fn damaged_audio(track: u8, frames: u64) -> PcmAudio {
    let mut bytes = synthetic_audio(track, frames).into_bytes();
    for frame in [frames / 4, frames * 3 / 4] {
        if let Some(byte) = bytes.get_mut(frame as usize * 4) {
            *byte ^= 0x5A;
        }
    }
    PcmAudio::new(bytes)
}

/// An all-audio disc of `tracks` tracks of `sectors` sectors each,
/// starting at sector `first_start`
pub fn synthetic_disc_at(tracks: u8, sectors: u32, first_start: u32) -> Disc {
    let entries = (0..tracks)
        .map(|i| RawTocEntry {
            number: i + 1,
            start_sector: first_start + i as u32 * sectors,
            index0_sector: None,
            audio: true,
            isrc: None,
        })
        .collect();
    let raw = RawToc {
        entries,
        leadout_sector: first_start + tracks as u32 * sectors,
        catalog: None,
    };
    analyze(&raw, &AnalyzerSettings::default()).expect("synthetic TOC is valid")
}

pub fn synthetic_disc(tracks: u8, sectors: u32) -> Disc {
    synthetic_disc_at(tracks, sectors, 0)
}

/// Database entry matching the clean synthetic audio of every audio track
pub fn reference_entry(disc: &Disc, confidence: u8) -> DatabaseEntry {
    let (first, last) = disc.audio_bounds().unwrap_or((1, 1));
    let tracks = disc
        .audio_tracks()
        .map(|t| {
            let audio = synthetic_audio(t.number, t.span.frames);
            let sums = checksum_track(&audio, TrackPosition::of(t.number, first, last));
            RemoteTrack {
                confidence,
                crc: sums.v2,
                frame450_crc: 0,
            }
        })
        .collect();
    DatabaseEntry {
        track_count: disc.accuraterip.track_count,
        id1: disc.accuraterip.id1,
        id2: disc.accuraterip.id2,
        cddb: disc.accuraterip.cddb,
        tracks,
    }
}

/// Settings with short timeouts writing into `dir`
pub fn test_settings(dir: &Path) -> RipSettings {
    RipSettings {
        verify: true,
        reextract: true,
        fast_retry_budget: 2,
        thorough_retry_budget: 10,
        preserve_hidden_track: true,
        compression_level: 5,
        output_dir: dir.join("output"),
        scratch_dir: dir.join("scratch"),
        keep_scratch: false,
        create_cue: true,
        create_log: true,
        drive_name: "mock".to_string(),
        timeouts: StageTimeouts {
            fast_extraction: Duration::from_secs(5),
            thorough_extraction: Duration::from_secs(5),
            encode: Duration::from_secs(5),
            lookup: Duration::from_secs(1),
            metadata: Duration::from_secs(1),
        },
    }
}

/// Mock extraction capability
///
/// Returns [`synthetic_audio`] unless configured otherwise for a track and
/// method. Every call is recorded.
#[derive(Default)]
pub struct MockExtractor {
    damaged: HashSet<(u8, ExtractionMethod)>,
    unreadable: HashSet<(u8, ExtractionMethod)>,
    io_errors: HashSet<(u8, ExtractionMethod)>,
    hanging: HashSet<(u8, ExtractionMethod)>,
    cancel_after: Option<usize>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(u8, ExtractionMethod)>>,
    overlapping: AtomicUsize,
    max_overlap: AtomicUsize,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads of `track` with `method` return damaged audio
    pub fn damaged(mut self, track: u8, method: ExtractionMethod) -> Self {
        self.damaged.insert((track, method));
        self
    }

    /// Reads of `track` with `method` exhaust their retry budget
    pub fn unreadable(mut self, track: u8, method: ExtractionMethod) -> Self {
        self.unreadable.insert((track, method));
        self
    }

    /// Reads of `track` with `method` fail with a local IO error
    pub fn io_error(mut self, track: u8, method: ExtractionMethod) -> Self {
        self.io_errors.insert((track, method));
        self
    }

    /// Reads of `track` with `method` never finish unless cancelled
    pub fn hang(mut self, track: u8, method: ExtractionMethod) -> Self {
        self.hanging.insert((track, method));
        self
    }

    /// Fire the job's cancellation token after `calls` completed reads
    pub fn cancel_after(mut self, calls: usize) -> Self {
        self.cancel_after = Some(calls);
        self
    }

    /// Make every read take `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(u8, ExtractionMethod)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_with(&self, method: ExtractionMethod) -> Vec<u8> {
        self.calls()
            .into_iter()
            .filter(|(_, m)| *m == method)
            .map(|(t, _)| t)
            .collect()
    }

    /// Highest number of reads ever in flight at once
    pub fn max_overlap(&self) -> usize {
        self.max_overlap.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Extractor for MockExtractor {
    async fn extract(
        &self,
        request: &ExtractRequest,
        cancel: &CancellationToken,
    ) -> Result<ExtractedAudio, ExtractError> {
        let in_flight = self.overlapping.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_overlap.fetch_max(in_flight, Ordering::SeqCst);

        let result = async {
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
                }
            }

            let key = (request.track, request.method);
            let calls = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(key);
                calls.len()
            };
            if self.cancel_after == Some(calls) {
                cancel.cancel();
            }

            if self.hanging.contains(&key) {
                cancel.cancelled().await;
                return Err(ExtractError::Cancelled);
            }
            if self.io_errors.contains(&key) {
                return Err(ExtractError::Io(std::io::Error::other(
                    "no space left on device",
                )));
            }
            if self.unreadable.contains(&key) {
                return Err(ExtractError::SectorRead(format!(
                    "track {}: read error at sector {}",
                    request.track, request.span.start
                )));
            }
            let audio = if self.damaged.contains(&key) {
                damaged_audio(request.track, request.span.frames)
            } else {
                synthetic_audio(request.track, request.span.frames)
            };
            let retries = match request.method {
                ExtractionMethod::Fast => 0,
                ExtractionMethod::Thorough => 1,
            };
            Ok(ExtractedAudio { audio, retries })
        }
        .await;

        self.overlapping.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Mock encoding capability: writes the raw PCM to the target and records it
#[derive(Default)]
pub struct MockEncoder {
    failure: Option<String>,
    delay: Option<Duration>,
    encoded: Mutex<BTreeMap<PathBuf, PcmAudio>>,
}

impl MockEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn encoded(&self) -> BTreeMap<PathBuf, PcmAudio> {
        self.encoded.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Encoder for MockEncoder {
    async fn encode(
        &self,
        audio: &PcmAudio,
        target: &Path,
        _compression_level: u8,
    ) -> Result<(), EncodeError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(EncodeError::Flac(message.clone()));
        }
        tokio::fs::write(target, audio.as_bytes()).await?;
        self.encoded
            .lock()
            .unwrap()
            .insert(target.to_path_buf(), audio.clone());
        Ok(())
    }
}

/// Mock checksum database returning a fixed result
pub struct MockChecksumDb {
    result: Result<Vec<DatabaseEntry>, LookupError>,
    delay: Option<Duration>,
    lookups: AtomicUsize,
}

impl MockChecksumDb {
    pub fn new(result: Result<Vec<DatabaseEntry>, LookupError>) -> Self {
        Self {
            result,
            delay: None,
            lookups: AtomicUsize::new(0),
        }
    }

    /// A database holding one pressing that matches the clean audio
    pub fn matching(disc: &Disc) -> Self {
        Self::new(Ok(vec![reference_entry(disc, 5)]))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChecksumDatabase for MockChecksumDb {
    async fn lookup(&self, _ids: &AccurateRipIds) -> Result<Vec<DatabaseEntry>, LookupError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

/// Mock metadata capability
pub struct MockMetadata {
    metadata: Option<AlbumMetadata>,
}

impl MockMetadata {
    pub fn new(metadata: AlbumMetadata) -> Self {
        Self {
            metadata: Some(metadata),
        }
    }

    pub fn not_found() -> Self {
        Self { metadata: None }
    }
}

#[async_trait::async_trait]
impl MetadataProvider for MockMetadata {
    async fn lookup(&self, disc: &Disc) -> Result<AlbumMetadata, MusicBrainzError> {
        self.metadata
            .clone()
            .ok_or_else(|| MusicBrainzError::NotFound(disc.id.clone()))
    }
}
