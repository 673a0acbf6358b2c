//! Log file generation (EAC-style)

use crate::accuraterip::{MismatchReason, UnavailableReason, VerificationOutcome};
use crate::cd::toc::{format_msf, Disc};
use crate::rip::job::RipJob;
use std::fmt::Write as _;
use std::path::Path;

/// Generates EAC-style log files documenting the ripping process
pub struct LogGenerator;

impl LogGenerator {
    /// Render the log for a finished rip
    pub fn render(disc: &Disc, job: &RipJob, drive_name: &str, album: &str) -> String {
        let mut log = String::new();
        // Writing into a String cannot fail
        let _ = Self::write(&mut log, disc, job, drive_name, album);
        log
    }

    fn write(
        log: &mut String,
        disc: &Disc,
        job: &RipJob,
        drive_name: &str,
        album: &str,
    ) -> std::fmt::Result {
        writeln!(log, "autorip {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(log)?;
        writeln!(
            log,
            "Extraction logfile from {}",
            chrono::Local::now().format("%d. %B %Y, %H:%M:%S")
        )?;
        writeln!(log)?;
        writeln!(log, "{}", album)?;
        writeln!(log)?;
        writeln!(log, "Used drive  : {}", drive_name)?;
        writeln!(log, "Read offset correction                      : {}", disc.read_offset)?;
        writeln!(log, "Fast read mode                              : cd-paranoia, paranoia disabled")?;
        writeln!(log, "Thorough read mode                          : cd-paranoia, full paranoia")?;
        writeln!(log, "MusicBrainz Disc ID                         : {}", disc.id)?;
        writeln!(log, "FreeDB Disc ID                              : {:08x}", disc.freedb_id)?;
        writeln!(log)?;
        writeln!(log, "TOC of the extracted CD")?;
        writeln!(log)?;
        writeln!(log, "     Track |   Start  |  Length  | Start sector | End sector")?;
        writeln!(log, "    ---------------------------------------------------------")?;
        for track in &disc.tracks {
            writeln!(
                log,
                "     {:4}  | {} | {} |     {:6} |   {:6}",
                track.number,
                format_msf(track.start_sector),
                format_msf(track.length_sectors),
                track.start_sector,
                track.end_sector().saturating_sub(1)
            )?;
        }
        writeln!(log)?;

        if let Some(hidden) = &disc.hidden_track {
            writeln!(
                log,
                "Hidden track before track 1: {} ({} sectors)",
                format_msf(hidden.length_sectors),
                hidden.length_sectors
            )?;
            writeln!(log)?;
        }

        for result in job.tracks.values() {
            writeln!(log, "Track {:2}", result.track)?;
            writeln!(log)?;
            if let Some(path) = &result.encoded {
                writeln!(log, "     Filename {}", path.display())?;
                writeln!(log)?;
            }
            if let Some(track) = disc.track(result.track) {
                writeln!(log, "     Pre-gap length  {}", format_msf(track.pregap_sectors))?;
                writeln!(log)?;
            }
            writeln!(log, "     Extraction method {}", result.method)?;
            writeln!(log, "     Retries           {}", result.retries)?;
            if let Some(crc) = result.copy_crc {
                writeln!(log, "     Copy CRC {:08X}", crc)?;
            }
            if let Some(sums) = result.checksums {
                writeln!(log, "     AccurateRip v1 {:08X}, v2 {:08X}", sums.v1, sums.v2)?;
            }
            writeln!(log, "     {}", describe(&result.outcome))?;
            if let Some(error) = &result.read_error {
                writeln!(log, "     Read error: {}", error)?;
            }
            writeln!(log)?;
        }

        let verified = job.tracks.values().filter(|t| t.outcome.is_match()).count();
        writeln!(log, "{} of {} track(s) accurately ripped", verified, job.tracks.len())?;
        if !job.reextracted.is_empty() {
            let list: Vec<String> = job.reextracted.iter().map(|t| t.to_string()).collect();
            writeln!(log, "Re-extracted in thorough mode: {}", list.join(", "))?;
        }
        let residual = job.residual_mismatches();
        if residual == 0 {
            writeln!(log, "No errors occurred")?;
        } else {
            writeln!(log, "There were errors: {} track(s) still mismatching", residual)?;
        }
        writeln!(log)?;
        writeln!(log, "End of status report")?;
        Ok(())
    }

    /// Generate and write a log file
    pub fn write_log_file(
        disc: &Disc,
        job: &RipJob,
        drive_name: &str,
        album: &str,
        output_path: &Path,
    ) -> Result<(), std::io::Error> {
        std::fs::write(output_path, Self::render(disc, job, drive_name, album))
    }
}

fn describe(outcome: &VerificationOutcome) -> String {
    match outcome {
        VerificationOutcome::Match { confidence } => {
            format!("Accurately ripped (confidence {})", confidence)
        }
        VerificationOutcome::Mismatch(MismatchReason::Checksum) => {
            "Not accurately ripped (checksum mismatch)".to_string()
        }
        VerificationOutcome::Mismatch(MismatchReason::ExtractionFailed) => {
            "Not accurately ripped (unreadable sectors)".to_string()
        }
        VerificationOutcome::Unavailable(reason) => {
            let reason = match reason {
                UnavailableReason::NotInDatabase => "disc not present in database",
                UnavailableReason::TrackCountMismatch => "database track count differs",
                UnavailableReason::LookupFailed => "database lookup failed",
                UnavailableReason::Timeout => "database lookup timed out",
                UnavailableReason::NotCovered => "not covered by database",
            };
            format!("Cannot be verified ({})", reason)
        }
        VerificationOutcome::NotChecked => "Not verified".to_string(),
    }
}
