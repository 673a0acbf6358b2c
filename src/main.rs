use autorip::accuraterip::{AccurateRipClient, LookupError};
use autorip::cd::drive::CdDriveError;
use autorip::cd::{analyze, AnalyzerSettings, CdDrive, FlacEncoder, ParanoiaExtractor};
use autorip::config::{Config, ConfigError};
use autorip::musicbrainz::{MusicBrainzClient, MusicBrainzError};
use autorip::rip::{DriveToken, RipError, RipOrchestrator, RipService, RipState, ServiceError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal;
use tracing::{error, info, warn};

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
/// Completed, but some tracks still mismatch the database
const EXIT_MISMATCHES: i32 = 2;
const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Drive(#[from] CdDriveError),
    #[error(transparent)]
    Rip(#[from] RipError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Metadata(#[from] MusicBrainzError),
    #[error("{0}")]
    Usage(String),
}

struct Args {
    device: Option<PathBuf>,
    toc_only: bool,
}

fn parse_args() -> Result<Args, AppError> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        device: None,
        toc_only: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--device" => {
                let path = args
                    .get(i + 1)
                    .ok_or_else(|| AppError::Usage("--device requires a path".to_string()))?;
                parsed.device = Some(PathBuf::from(path));
                i += 2;
            }
            "--toc-only" => {
                parsed.toc_only = true;
                i += 1;
            }
            other => return Err(AppError::Usage(format!("Unknown argument: {}", other))),
        }
    }
    Ok(parsed)
}

fn print_usage() {
    eprintln!("Usage: autorip [--device <path>] [--toc-only]");
    eprintln!();
    eprintln!("Rips the inserted CD to FLAC, verifies it against AccurateRip and");
    eprintln!("re-reads only the tracks that fail verification.");
    eprintln!();
    eprintln!("Settings are read from AUTORIP_* environment variables.");
}

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let code = match run().await {
        Ok(code) => code,
        Err(AppError::Usage(message)) => {
            error!("{}", message);
            print_usage();
            EXIT_FAILED
        }
        Err(e) => {
            error!("{}", e);
            EXIT_FAILED
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32, AppError> {
    let args = parse_args()?;
    let config = Config::load()?;

    let drive = match args.device.or_else(|| config.drive.device.clone()) {
        Some(device) => CdDrive::new(device),
        None => CdDrive::detect_drives()?.remove(0),
    };
    info!("Using drive {}", drive.device_path.display());

    let raw = drive
        .read_toc(config.timeouts.toc_read, config.ripping.gap_detection)
        .await?;
    let settings = AnalyzerSettings {
        read_offset: config.drive.read_offset,
        hidden_track_min_sectors: config.ripping.hidden_track_min_sectors,
    };
    let disc = analyze(&raw, &settings).map_err(|e| RipError::TocUnreadable {
        message: e.to_string(),
    })?;

    info!(
        "Disc {} ({} audio track(s), AccurateRip {})",
        disc.id,
        disc.audio_track_count(),
        disc.accuraterip.url_path()
    );
    if let Some(hidden) = &disc.hidden_track {
        info!("Hidden track before track 1: {} sectors", hidden.length_sectors);
    }
    if args.toc_only {
        for track in &disc.tracks {
            info!(
                "Track {:2}: start {:6}, length {:6}, pregap {:4}, {:?}",
                track.number,
                track.start_sector,
                track.length_sectors,
                track.pregap_sectors,
                track.kind
            );
        }
        return Ok(EXIT_OK);
    }

    let extractor = ParanoiaExtractor::new(drive.device_path.clone(), config.drive.read_offset);
    let mut orchestrator = RipOrchestrator::new(
        Arc::new(extractor),
        Arc::new(FlacEncoder),
        DriveToken::new(),
        config.to_rip_settings(&drive.name),
    );
    if config.ripping.accuraterip {
        let client = AccurateRipClient::new(
            &config.ripping.accuraterip_url,
            config.timeouts.stages.lookup,
            &config.metadata.user_agent,
        )?;
        orchestrator = orchestrator.with_database(Arc::new(client));
    }
    if config.metadata.enabled {
        let client = MusicBrainzClient::new(
            &config.metadata.server,
            &config.metadata.user_agent,
            config.timeouts.stages.metadata,
        )?;
        orchestrator = orchestrator.with_metadata(Arc::new(client));
    }

    let service = RipService::new(orchestrator).with_archive_dir(config.archive_dir());
    let handle = service.accept(disc)?;

    let mut updates = handle.subscribe();
    let reporter = tokio::spawn(async move {
        let mut last_state = String::new();
        while let Some(status) = updates.changed().await {
            if status.state != last_state {
                info!("{} ({:.0}%)", status.state, status.progress * 100.0);
                last_state = status.state.clone();
            }
        }
    });

    let cancel_service = service.clone();
    let signals = tokio::spawn(async move {
        shutdown_signal().await;
        cancel_service.cancel();
    });

    let job = handle.wait().await?;
    signals.abort();
    reporter.abort();

    let code = match &job.state {
        RipState::Completed {
            residual_mismatches: 0,
        } => EXIT_OK,
        RipState::Completed {
            residual_mismatches,
        } => {
            warn!("{} track(s) could not be verified as accurate", residual_mismatches);
            EXIT_MISMATCHES
        }
        RipState::Cancelled => EXIT_CANCELLED,
        RipState::Failed { error } => {
            error!(
                "{} (stage: {:?}, track: {:?})",
                error.kind(),
                error.stage(),
                error.track()
            );
            EXIT_FAILED
        }
        _ => EXIT_FAILED,
    };

    if config.drive.eject_after_rip && matches!(job.state, RipState::Completed { .. }) {
        if let Err(e) = drive.eject(Duration::from_secs(30)).await {
            warn!("Eject failed: {}", e);
        }
    }
    Ok(code)
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling rip");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling rip");
        },
    }
}
