mod support;

use autorip::accuraterip::{LookupError, UnavailableReason, VerificationOutcome};
use autorip::cd::ExtractionMethod;
use autorip::rip::{RipService, RipState};
use autorip::test_support::{
    synthetic_audio, synthetic_disc, test_settings, MockChecksumDb, MockExtractor,
};
use std::time::Duration;
use support::{tracing_init, Harness};
use tempfile::TempDir;

const TRACKS: u8 = 10;
const SECTORS: u32 = 10;

#[tokio::test]
async fn test_all_tracks_match_first_pass() {
    tracing_init();
    let dir = TempDir::new().unwrap();
    let disc = synthetic_disc(TRACKS, SECTORS);
    let harness = Harness::new(
        MockExtractor::new(),
        Some(MockChecksumDb::matching(&disc)),
        test_settings(dir.path()),
    );

    let (job, status) = harness.rip(disc).await;

    assert_eq!(job.state, RipState::Completed { residual_mismatches: 0 });
    assert!(job.reextracted.is_empty());
    assert_eq!(
        harness.extractor.calls_with(ExtractionMethod::Fast),
        (1..=TRACKS).collect::<Vec<_>>()
    );
    assert!(harness.extractor.calls_with(ExtractionMethod::Thorough).is_empty());
    assert_eq!(harness.extractor.max_overlap(), 1);
    for result in job.tracks.values() {
        assert_eq!(result.outcome, VerificationOutcome::Match { confidence: 5 });
        assert!(result.copy_crc.is_some());
    }

    let album = dir.path().join("output").join("Unknown Artist - Unknown Album");
    assert!(album.join("01 - Track 01.flac").exists());
    assert!(album.join("10 - Track 10.flac").exists());
    assert!(album.join("Unknown Album.cue").exists());
    let log = std::fs::read_to_string(album.join("rip.log")).unwrap();
    assert!(log.contains("10 of 10 track(s) accurately ripped"));
    assert!(log.contains("No errors occurred"));

    let status = status.snapshot();
    assert_eq!(status.state, "Completed");
    assert_eq!(status.progress, 1.0);
    assert!(!status.cancellable);
    assert!(status.error.is_none());

    // Raw artifacts are removed once the job ends
    assert!(!dir.path().join("scratch").join(job.id.to_string()).exists());
}

#[tokio::test]
async fn test_only_mismatching_track_is_reextracted() {
    tracing_init();
    let dir = TempDir::new().unwrap();
    let disc = synthetic_disc(TRACKS, SECTORS);
    let harness = Harness::new(
        MockExtractor::new().damaged(7, ExtractionMethod::Fast),
        Some(MockChecksumDb::matching(&disc)),
        test_settings(dir.path()),
    );
    let frames: Vec<u64> = disc.audio_tracks().map(|t| t.span.frames).collect();

    let (job, _) = harness.rip(disc).await;

    assert_eq!(job.state, RipState::Completed { residual_mismatches: 0 });
    assert_eq!(harness.extractor.calls_with(ExtractionMethod::Thorough), vec![7]);
    assert_eq!(job.reextracted, vec![7]);
    assert_eq!(harness.database.as_ref().unwrap().lookups(), 2);

    let track7 = &job.tracks[&7];
    assert_eq!(track7.method, ExtractionMethod::Thorough);
    assert!(track7.outcome.is_match());

    // Every other track is encoded from its first-pass read
    let encoded = harness.encoder.encoded();
    assert_eq!(encoded.len(), TRACKS as usize);
    for (track, result) in &job.tracks {
        if *track != 7 {
            assert_eq!(result.method, ExtractionMethod::Fast);
        }
        let path = result.encoded.as_ref().unwrap();
        let expected = synthetic_audio(*track, frames[*track as usize - 1]);
        assert_eq!(encoded[path], expected);
    }
}

#[tokio::test]
async fn test_lookup_timeout_skips_reextraction() {
    tracing_init();
    let dir = TempDir::new().unwrap();
    let disc = synthetic_disc(TRACKS, SECTORS);
    let mut settings = test_settings(dir.path());
    settings.timeouts.lookup = Duration::from_millis(100);
    let harness = Harness::new(
        MockExtractor::new().damaged(3, ExtractionMethod::Fast),
        Some(MockChecksumDb::matching(&disc).with_delay(Duration::from_secs(5))),
        settings,
    );

    let (job, status) = harness.rip(disc).await;

    assert_eq!(job.state, RipState::Completed { residual_mismatches: 0 });
    assert!(harness.extractor.calls_with(ExtractionMethod::Thorough).is_empty());
    assert_eq!(job.tracks.len(), TRACKS as usize);
    for result in job.tracks.values() {
        assert_eq!(
            result.outcome,
            VerificationOutcome::Unavailable(UnavailableReason::Timeout)
        );
        assert!(result.encoded.is_some());
    }

    let error = status.snapshot().error.unwrap();
    assert_eq!(error.kind, "VerificationUnavailable");
    assert!(error.message.contains(&LookupError::Timeout.to_string()));
}

#[tokio::test]
async fn test_cancel_during_fast_pass() {
    tracing_init();
    let dir = TempDir::new().unwrap();
    let disc = synthetic_disc(TRACKS, SECTORS);
    let harness = Harness::new(
        MockExtractor::new().cancel_after(3),
        Some(MockChecksumDb::matching(&disc)),
        test_settings(dir.path()),
    );

    let (job, status) = harness.rip(disc).await;

    assert_eq!(job.state, RipState::Cancelled);
    assert!(job.cancel_requested);
    assert_eq!(job.tracks.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(harness.extractor.calls_with(ExtractionMethod::Thorough).is_empty());
    assert_eq!(harness.database.as_ref().unwrap().lookups(), 0);
    assert!(harness.encoder.encoded().is_empty());

    let status = status.snapshot();
    assert_eq!(status.state, "Cancelled");
    assert!(!status.cancellable);
    assert!(status.error.is_none());
}

#[tokio::test]
async fn test_service_cancel_stops_running_job() {
    tracing_init();
    let dir = TempDir::new().unwrap();
    let disc = synthetic_disc(TRACKS, SECTORS);
    let harness = Harness::new(
        MockExtractor::new().with_delay(Duration::from_millis(50)),
        Some(MockChecksumDb::matching(&disc)),
        test_settings(dir.path()),
    );
    let service = RipService::new(harness.orchestrator());

    let handle = service.accept(disc).unwrap();
    let mut updates = handle.subscribe();
    while let Some(status) = updates.changed().await {
        if status.tracks.len() >= 2 {
            break;
        }
    }
    assert!(service.cancel());

    let job = handle.wait().await.unwrap();
    assert_eq!(job.state, RipState::Cancelled);
    assert!(job.tracks.len() < TRACKS as usize);
    assert!(harness.extractor.calls_with(ExtractionMethod::Thorough).is_empty());
    assert!(!service.is_busy());
    assert_eq!(service.status().state, "Cancelled");
}
