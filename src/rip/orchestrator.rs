//! Executes rip commands against the drive, the checksum database and the
//! encoder, feeding results back into the state machine.

use crate::accuraterip::{
    self, checksum, ChecksumDatabase, LookupError, MismatchReason, TrackChecksum,
    TrackPosition, UnavailableReason, VerificationOutcome,
};
use crate::cd::audio::PcmAudio;
use crate::cd::cue_generator::CueGenerator;
use crate::cd::encoder::{EncodeError, Encoder};
use crate::cd::log_generator::LogGenerator;
use crate::cd::paranoia::{ExtractError, ExtractRequest, ExtractionMethod, Extractor};
use crate::cd::toc::Disc;
use crate::musicbrainz::{AlbumMetadata, MetadataProvider};
use crate::rip::drive_token::DriveToken;
use crate::rip::error::{RipError, Stage};
use crate::rip::job::{RipJob, TrackResult};
use crate::rip::state::{transition, RipCommand, RipEvent, RipPlan, RipState};
use crate::rip::status::StatusPublisher;
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Timeouts for every external call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTimeouts {
    pub fast_extraction: Duration,
    pub thorough_extraction: Duration,
    pub encode: Duration,
    pub lookup: Duration,
    pub metadata: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            fast_extraction: Duration::from_secs(15 * 60),
            thorough_extraction: Duration::from_secs(60 * 60),
            encode: Duration::from_secs(5 * 60),
            lookup: Duration::from_secs(30),
            metadata: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RipSettings {
    pub verify: bool,
    pub reextract: bool,
    pub fast_retry_budget: u32,
    pub thorough_retry_budget: u32,
    pub preserve_hidden_track: bool,
    pub compression_level: u8,
    pub output_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub keep_scratch: bool,
    pub create_cue: bool,
    pub create_log: bool,
    pub drive_name: String,
    pub timeouts: StageTimeouts,
}

/// Drives one rip job at a time through the state machine
pub struct RipOrchestrator {
    extractor: Arc<dyn Extractor>,
    encoder: Arc<dyn Encoder>,
    database: Option<Arc<dyn ChecksumDatabase>>,
    metadata: Option<Arc<dyn MetadataProvider>>,
    drive: DriveToken,
    settings: RipSettings,
}

/// Per-run context threaded through command execution
struct RunContext<'a> {
    disc: &'a Disc,
    plan: &'a RipPlan,
    cancel: &'a CancellationToken,
    status: &'a StatusPublisher,
    scratch: PathBuf,
}

/// Keep only characters that are safe in file names on common filesystems
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '/' | '\\' | '|' => out.push('-'),
            ':' => out.push_str(" -"),
            '*' | '?' => {}
            '"' => out.push('\''),
            '<' => out.push('('),
            '>' => out.push(')'),
            c => out.push(c),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl RipOrchestrator {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        encoder: Arc<dyn Encoder>,
        drive: DriveToken,
        settings: RipSettings,
    ) -> Self {
        Self {
            extractor,
            encoder,
            database: None,
            metadata: None,
            drive,
            settings,
        }
    }

    pub fn with_database(mut self, database: Arc<dyn ChecksumDatabase>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn settings(&self) -> &RipSettings {
        &self.settings
    }

    /// Tracks to rip and the policy flags for `disc`
    pub fn plan(&self, disc: &Disc) -> RipPlan {
        let mut tracks = Vec::new();
        let mut unverifiable = Vec::new();
        if self.settings.preserve_hidden_track && disc.has_hidden_track() {
            tracks.push(0);
            unverifiable.push(0);
        }
        tracks.extend(disc.audio_tracks().map(|t| t.number));

        RipPlan {
            tracks,
            unverifiable,
            verify: self.settings.verify && self.database.is_some(),
            reextract: self.settings.reextract,
        }
    }

    /// Run `job` for `disc` to a terminal state
    pub async fn run(
        &self,
        mut job: RipJob,
        disc: Arc<Disc>,
        cancel: CancellationToken,
        status: StatusPublisher,
    ) -> RipJob {
        let plan = self.plan(&disc);
        info!(
            job_id = %job.id,
            "Starting rip of disc {} ({} track(s), verify={}, reextract={})",
            disc.id,
            plan.tracks.len(),
            plan.verify,
            plan.reextract
        );

        let ctx = RunContext {
            disc: disc.as_ref(),
            plan: &plan,
            cancel: &cancel,
            status: &status,
            scratch: self.settings.scratch_dir.join(job.id.to_string()),
        };

        let mut queue: VecDeque<RipCommand> = match tokio::fs::create_dir_all(&ctx.scratch).await {
            Ok(()) => apply(&mut job, RipEvent::Accepted, &ctx).into(),
            Err(e) => {
                let error = RipError::Storage {
                    stage: Stage::FastExtraction,
                    track: None,
                    message: format!("cannot create scratch directory: {}", e),
                };
                apply(&mut job, RipEvent::Failed(error), &ctx).into()
            }
        };

        while !job.state.is_terminal() {
            let event = if cancel.is_cancelled() {
                RipEvent::CancelRequested
            } else {
                match queue.pop_front() {
                    Some(command) => self.execute(command, &mut job, &ctx).await,
                    None => RipEvent::Failed(RipError::Internal {
                        message: format!("no pending command in state {}", job.state.name()),
                    }),
                }
            };
            queue.extend(apply(&mut job, event, &ctx));
        }

        if !self.settings.keep_scratch {
            if let Err(e) = tokio::fs::remove_dir_all(&ctx.scratch).await {
                debug!("Scratch cleanup failed: {}", e);
            }
        }

        match &job.state {
            RipState::Completed {
                residual_mismatches,
            } => info!(
                job_id = %job.id,
                "Rip completed, {} re-extraction(s), {} residual mismatch(es)",
                job.reextracted.len(),
                residual_mismatches
            ),
            RipState::Cancelled => info!(job_id = %job.id, "Rip cancelled"),
            RipState::Failed { error } => error!(job_id = %job.id, "Rip failed: {}", error),
            _ => {}
        }
        job
    }

    async fn execute(&self, command: RipCommand, job: &mut RipJob, ctx: &RunContext<'_>) -> RipEvent {
        match command {
            RipCommand::Extract { track, method } => self.extract(track, method, job, ctx).await,
            RipCommand::Verify { tracks } => self.verify(&tracks, job, ctx).await,
            RipCommand::Finalize => self.finalize(job, ctx).await,
        }
    }

    async fn extract(
        &self,
        track: u8,
        method: ExtractionMethod,
        job: &mut RipJob,
        ctx: &RunContext<'_>,
    ) -> RipEvent {
        let (stage, budget, timeout) = match method {
            ExtractionMethod::Fast => (
                Stage::FastExtraction,
                self.settings.fast_retry_budget,
                self.settings.timeouts.fast_extraction,
            ),
            ExtractionMethod::Thorough => (
                Stage::ThoroughExtraction,
                self.settings.thorough_retry_budget,
                self.settings.timeouts.thorough_extraction,
            ),
        };

        let span = if track == 0 {
            ctx.disc.hidden_track.as_ref().map(|h| h.span)
        } else {
            ctx.disc.track(track).map(|t| t.span)
        };
        let Some(span) = span else {
            return RipEvent::Failed(RipError::Internal {
                message: format!("track {} is not on the disc", track),
            });
        };
        let request = ExtractRequest {
            track,
            span,
            method,
            retry_budget: budget,
        };

        let Some(permit) = self.drive.acquire().await else {
            return RipEvent::Failed(RipError::Internal {
                message: "drive token closed".to_string(),
            });
        };
        let result =
            tokio::time::timeout(timeout, self.extractor.extract(&request, ctx.cancel)).await;
        drop(permit);

        let returned = matches!(&result, Ok(r) if !matches!(r, Err(ExtractError::Cancelled)));
        if method == ExtractionMethod::Thorough && returned {
            job.reextracted.push(track);
        }

        let extracted = match result {
            Err(_) => {
                return RipEvent::Failed(RipError::StageTimeout {
                    stage,
                    track: Some(track),
                    timeout,
                })
            }
            Ok(Err(ExtractError::Cancelled)) => return RipEvent::CancelRequested,
            Ok(Err(ExtractError::SectorRead(message))) => {
                warn!("Track {} unreadable with {} method: {}", track, method, message);
                let result = job
                    .tracks
                    .entry(track)
                    .or_insert_with(|| TrackResult::new(track, method));
                result.retries += budget;
                result.outcome = VerificationOutcome::Mismatch(MismatchReason::ExtractionFailed);
                result.read_error = Some(message.clone());
                note(job, RipError::SectorRead { track, message });
                return RipEvent::Extracted {
                    track,
                    readable: false,
                };
            }
            Ok(Err(ExtractError::Unavailable(message))) => {
                return RipEvent::Failed(RipError::ExtractorUnavailable { stage, message })
            }
            Ok(Err(ExtractError::Io(e))) => {
                return RipEvent::Failed(RipError::Storage {
                    stage,
                    track: Some(track),
                    message: e.to_string(),
                })
            }
            Ok(Ok(extracted)) => extracted,
        };

        let artifact = ctx.scratch.join(format!("track{:02}.{}.pcm", track, method));
        if let Err(e) = tokio::fs::write(&artifact, extracted.audio.as_bytes()).await {
            return RipEvent::Failed(RipError::Storage {
                stage,
                track: Some(track),
                message: e.to_string(),
            });
        }

        let outcome = if ctx.plan.unverifiable.contains(&track) {
            VerificationOutcome::Unavailable(UnavailableReason::NotCovered)
        } else {
            VerificationOutcome::NotChecked
        };
        let mut result = TrackResult::new(track, method);
        result.artifact = Some(artifact);
        result.retries = job.tracks.get(&track).map_or(0, |r| r.retries) + extracted.retries;
        result.copy_crc = Some(checksum::copy_crc(&extracted.audio));
        result.outcome = outcome;
        job.tracks.insert(track, result);

        debug!(
            "Track {} extracted ({} method, {} retries)",
            track, method, extracted.retries
        );
        RipEvent::Extracted {
            track,
            readable: true,
        }
    }

    async fn verify(&self, tracks: &[u8], job: &mut RipJob, ctx: &RunContext<'_>) -> RipEvent {
        let stage = match job.state {
            RipState::ReVerifying { .. } => Stage::ReVerification,
            _ => Stage::Verification,
        };
        let Some(database) = self.database.clone() else {
            return RipEvent::Failed(RipError::Internal {
                message: "verification requested without a checksum database".to_string(),
            });
        };
        let Some((first_audio, last_audio)) = ctx.disc.audio_bounds() else {
            return RipEvent::Failed(RipError::Internal {
                message: "disc has no audio tracks".to_string(),
            });
        };

        let mut inputs = Vec::with_capacity(tracks.len());
        for &track in tracks {
            let index = ctx.disc.audio_tracks().position(|t| t.number == track);
            let artifact = job.tracks.get(&track).and_then(|r| r.artifact.clone());
            match (index, artifact) {
                (Some(index), Some(artifact)) => inputs.push((track, index, artifact)),
                _ => {
                    return RipEvent::Failed(RipError::Internal {
                        message: format!("track {} has no artifact to verify", track),
                    })
                }
            }
        }

        // Checksums are computed while the lookup is in flight
        let checksums = async {
            let mut handles = Vec::with_capacity(inputs.len());
            for (track, index, artifact) in inputs {
                let position = TrackPosition::of(track, first_audio, last_audio);
                handles.push(tokio::spawn(async move {
                    let bytes = tokio::fs::read(&artifact).await?;
                    let sums = tokio::task::spawn_blocking(move || {
                        accuraterip::checksum_track(&PcmAudio::new(bytes), position)
                    })
                    .await
                    .map_err(std::io::Error::other)?;
                    Ok::<_, std::io::Error>(TrackChecksum { track, index, sums })
                }));
            }
            let mut local = Vec::with_capacity(handles.len());
            for handle in handles {
                let checksum = handle.await.map_err(std::io::Error::other)??;
                local.push(checksum);
            }
            Ok::<_, std::io::Error>(local)
        };
        let lookup = async {
            match tokio::time::timeout(
                self.settings.timeouts.lookup,
                database.lookup(&ctx.disc.accuraterip),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "AccurateRip lookup timed out after {:?}",
                        self.settings.timeouts.lookup
                    );
                    Err(LookupError::Timeout)
                }
            }
        };
        let (local, remote) = tokio::join!(checksums, lookup);

        let local = match local {
            Ok(local) => local,
            Err(e) => {
                return RipEvent::Failed(RipError::Storage {
                    stage,
                    track: None,
                    message: e.to_string(),
                })
            }
        };

        let track_count = ctx.disc.audio_track_count();
        let outcomes = accuraterip::compare(track_count, &local, &remote);

        match &remote {
            Err(e) => note(
                job,
                RipError::VerificationUnavailable {
                    message: e.to_string(),
                },
            ),
            Ok(entries)
                if !entries.is_empty()
                    && entries.iter().all(|e| e.track_count as usize != track_count) =>
            {
                note(
                    job,
                    RipError::TrackCountMismatch {
                        remote: entries[0].track_count as usize,
                        local: track_count,
                    },
                )
            }
            Ok(_) => {}
        }

        for checksum in &local {
            if let Some(result) = job.tracks.get_mut(&checksum.track) {
                result.checksums = Some(checksum.sums);
            }
        }
        for (track, outcome) in &outcomes {
            if let Some(result) = job.tracks.get_mut(track) {
                result.outcome = *outcome;
            }
        }
        let matched = outcomes.iter().filter(|(_, o)| o.is_match()).count();
        info!(
            "{}: {}/{} track(s) matched",
            stage,
            matched,
            outcomes.len()
        );

        RipEvent::Verified { outcomes }
    }

    async fn finalize(&self, job: &mut RipJob, ctx: &RunContext<'_>) -> RipEvent {
        let metadata = self.lookup_metadata(ctx.disc).await;

        let mut album_dir_name = format!("{} - {}", metadata.artist, metadata.album);
        if let Some(year) = metadata.date.as_deref().and_then(|d| d.get(..4)) {
            album_dir_name = format!("{} - {}", year, album_dir_name);
        }
        let album_dir = self
            .settings
            .output_dir
            .join(sanitize_filename(&album_dir_name));
        if let Err(e) = tokio::fs::create_dir_all(&album_dir).await {
            return RipEvent::Failed(RipError::Storage {
                stage: Stage::Encoding,
                track: None,
                message: format!("cannot create {}: {}", album_dir.display(), e),
            });
        }

        let mut files = BTreeMap::new();
        let numbers: Vec<u8> = job.tracks.keys().copied().collect();
        for track in numbers {
            if ctx.cancel.is_cancelled() {
                return RipEvent::CancelRequested;
            }
            let Some(artifact) = job.tracks.get(&track).and_then(|r| r.artifact.clone()) else {
                warn!("Track {} has no readable audio, not encoded", track);
                continue;
            };

            let file_name = format!(
                "{:02} - {}.flac",
                track,
                sanitize_filename(&metadata.track_title(track))
            );
            let target = album_dir.join(&file_name);
            if let Err(event) = self.encode_track(track, &artifact, &target).await {
                return event;
            }

            if let Some(result) = job.tracks.get_mut(&track) {
                result.encoded = Some(target);
            }
            files.insert(track, file_name);
            ctx.status.publish(job);
        }

        if self.settings.create_cue {
            let cue = CueGenerator::generate_cue_sheet(ctx.disc, &metadata, &files);
            let path = album_dir.join(format!("{}.cue", sanitize_filename(&metadata.album)));
            if let Err(e) = CueGenerator::write_cue_file(&cue, &path) {
                return RipEvent::Failed(RipError::Storage {
                    stage: Stage::CueWriting,
                    track: None,
                    message: e.to_string(),
                });
            }
        }

        if self.settings.create_log {
            let path = album_dir.join("rip.log");
            if let Err(e) = LogGenerator::write_log_file(
                ctx.disc,
                job,
                &self.settings.drive_name,
                &album_dir_name,
                &path,
            ) {
                return RipEvent::Failed(RipError::Storage {
                    stage: Stage::LogWriting,
                    track: None,
                    message: e.to_string(),
                });
            }
        }

        info!("Finalized into {}", album_dir.display());
        RipEvent::Finalized
    }

    async fn encode_track(&self, track: u8, artifact: &Path, target: &Path) -> Result<(), RipEvent> {
        let storage = |message: String| {
            RipEvent::Failed(RipError::Storage {
                stage: Stage::Encoding,
                track: Some(track),
                message,
            })
        };

        let bytes = tokio::fs::read(artifact)
            .await
            .map_err(|e| storage(e.to_string()))?;
        let audio = PcmAudio::new(bytes);

        let timeout = self.settings.timeouts.encode;
        match tokio::time::timeout(
            timeout,
            self.encoder
                .encode(&audio, target, self.settings.compression_level),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(EncodeError::Io(e))) => Err(storage(e.to_string())),
            Ok(Err(EncodeError::Flac(message))) => {
                Err(RipEvent::Failed(RipError::Encode { track, message }))
            }
            Err(_) => Err(RipEvent::Failed(RipError::StageTimeout {
                stage: Stage::Encoding,
                track: Some(track),
                timeout,
            })),
        }
    }

    /// Metadata never fails the job: any miss falls back to placeholders
    async fn lookup_metadata(&self, disc: &Disc) -> AlbumMetadata {
        let Some(provider) = &self.metadata else {
            return AlbumMetadata::unknown(disc);
        };
        match tokio::time::timeout(self.settings.timeouts.metadata, provider.lookup(disc)).await {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(e)) => {
                info!("No metadata for disc {}: {}", disc.id, e);
                AlbumMetadata::unknown(disc)
            }
            Err(_) => {
                warn!("Metadata lookup timed out");
                AlbumMetadata::unknown(disc)
            }
        }
    }
}

/// Record a non-fatal error for the status surface
fn note(job: &mut RipJob, error: RipError) {
    if job.error.as_ref().map_or(true, |e| !e.is_fatal()) {
        job.error = Some(error);
    }
}

/// Feed an event to the state machine and publish the new snapshot
fn apply(job: &mut RipJob, event: RipEvent, ctx: &RunContext<'_>) -> Vec<RipCommand> {
    let from = job.state.name();
    let (state, commands) = match transition(&job.state, event, ctx.plan) {
        Ok(next) => next,
        Err(e) => {
            error!("{}", e);
            (
                RipState::Failed {
                    error: RipError::Internal {
                        message: e.to_string(),
                    },
                },
                vec![],
            )
        }
    };

    match &state {
        RipState::Failed { error } => job.error = Some(error.clone()),
        RipState::Cancelled => job.cancel_requested = true,
        _ => {}
    }
    if state.is_terminal() {
        job.finished_at = Some(Utc::now());
    }
    if from != state.name() {
        info!(job_id = %job.id, "{} -> {}", from, state.name());
    }
    job.state = state;
    ctx.status.publish(job);
    commands
}
