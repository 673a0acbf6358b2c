//! CUE sheet generation for a finished rip (one file per track, gaps
//! appended to the previous track)

use crate::cd::toc::{format_msf, Disc};
use crate::musicbrainz::AlbumMetadata;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

/// Generates CUE sheets from the analyzed disc and the encoded files
pub struct CueGenerator;

fn quote(value: &str) -> String {
    value.replace('"', "'")
}

impl CueGenerator {
    /// Render the sheet. `files` maps track numbers to encoded file names;
    /// an entry for track 0 means the hidden track was ripped.
    pub fn generate_cue_sheet(
        disc: &Disc,
        metadata: &AlbumMetadata,
        files: &BTreeMap<u8, String>,
    ) -> String {
        let mut cue = String::new();
        // Writing into a String cannot fail
        let _ = Self::render(&mut cue, disc, metadata, files);
        cue
    }

    fn render(
        cue: &mut String,
        disc: &Disc,
        metadata: &AlbumMetadata,
        files: &BTreeMap<u8, String>,
    ) -> std::fmt::Result {
        if let Some(date) = &metadata.date {
            writeln!(cue, "REM DATE \"{}\"", quote(date))?;
        }
        writeln!(cue, "REM DISCID {:08X}", disc.freedb_id)?;
        writeln!(cue, "REM MUSICBRAINZ_DISCID {}", disc.id)?;
        if let Some(catalog) = &disc.catalog {
            writeln!(cue, "CATALOG {}", catalog)?;
        }
        writeln!(cue, "PERFORMER \"{}\"", quote(&metadata.artist))?;
        writeln!(cue, "TITLE \"{}\"", quote(&metadata.album))?;

        let hidden_file = files.get(&0);
        if let Some(name) = hidden_file {
            writeln!(cue, "FILE \"{}\" WAVE", quote(name))?;
        }

        let mut previous_length: Option<u32> = None;
        for track in disc.audio_tracks() {
            let Some(name) = files.get(&track.number) else {
                continue;
            };

            let gap_in_previous_file = match previous_length {
                Some(_) => track.pregap_sectors > 0,
                None => hidden_file.is_some(),
            };
            if !gap_in_previous_file {
                writeln!(cue, "FILE \"{}\" WAVE", quote(name))?;
            }

            writeln!(cue, "  TRACK {:02} AUDIO", track.number)?;
            writeln!(cue, "    TITLE \"{}\"", quote(&metadata.track_title(track.number)))?;
            writeln!(
                cue,
                "    PERFORMER \"{}\"",
                quote(metadata.track_artist(track.number))
            )?;
            if let Some(isrc) = &track.isrc {
                writeln!(cue, "    ISRC {}", isrc)?;
            }

            match previous_length {
                Some(length) if gap_in_previous_file => {
                    let index0 = length.saturating_sub(track.pregap_sectors);
                    writeln!(cue, "    INDEX 00 {}", format_msf(index0))?;
                    writeln!(cue, "FILE \"{}\" WAVE", quote(name))?;
                }
                None if gap_in_previous_file => {
                    writeln!(cue, "    INDEX 00 00:00:00")?;
                    writeln!(cue, "FILE \"{}\" WAVE", quote(name))?;
                }
                None if track.pregap_sectors > 0 => {
                    writeln!(cue, "    PREGAP {}", format_msf(track.pregap_sectors))?;
                }
                _ => {}
            }
            writeln!(cue, "    INDEX 01 00:00:00")?;

            previous_length = Some(track.length_sectors);
        }

        Ok(())
    }

    /// Write CUE sheet to file
    pub fn write_cue_file(cue_sheet: &str, output_path: &Path) -> Result<(), std::io::Error> {
        std::fs::write(output_path, cue_sheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cd::toc::{analyze, AnalyzerSettings, RawToc, RawTocEntry};

    fn disc(starts: &[u32], index0: &[Option<u32>], leadout: u32) -> Disc {
        let entries = starts
            .iter()
            .zip(index0)
            .enumerate()
            .map(|(i, (start, index0))| RawTocEntry {
                number: i as u8 + 1,
                start_sector: *start,
                index0_sector: *index0,
                audio: true,
                isrc: (i == 0).then(|| "GBAYE9200070".to_string()),
            })
            .collect();
        let raw = RawToc {
            entries,
            leadout_sector: leadout,
            catalog: Some("0724384260958".to_string()),
        };
        analyze(&raw, &AnalyzerSettings::default()).unwrap()
    }

    fn files(numbers: &[u8]) -> BTreeMap<u8, String> {
        numbers
            .iter()
            .map(|n| (*n, format!("{:02} - Track {:02}.flac", n, n)))
            .collect()
    }

    #[test]
    fn test_gap_is_indexed_in_previous_file() {
        let disc = disc(&[0, 16503], &[None, Some(16353)], 30000);
        let metadata = AlbumMetadata::unknown(&disc);
        let cue = CueGenerator::generate_cue_sheet(&disc, &metadata, &files(&[1, 2]));

        let expected = "\
FILE \"01 - Track 01.flac\" WAVE
  TRACK 01 AUDIO
    TITLE \"Track 01\"
    PERFORMER \"Unknown Artist\"
    ISRC GBAYE9200070
    INDEX 01 00:00:00
  TRACK 02 AUDIO
    TITLE \"Track 02\"
    PERFORMER \"Unknown Artist\"
    INDEX 00 03:38:03
FILE \"02 - Track 02.flac\" WAVE
    INDEX 01 00:00:00
";
        assert!(cue.contains("CATALOG 0724384260958"));
        assert!(cue.contains(&format!("REM MUSICBRAINZ_DISCID {}", disc.id)));
        assert!(cue.ends_with(expected));
    }

    #[test]
    fn test_hidden_track_file_holds_track_one_gap() {
        let disc = disc(&[3000, 20000], &[None, None], 30000);
        let metadata = AlbumMetadata::unknown(&disc);
        let cue = CueGenerator::generate_cue_sheet(&disc, &metadata, &files(&[0, 1, 2]));
        let hidden = cue.find("FILE \"00 - Track 00.flac\" WAVE").unwrap();
        let index0 = cue.find("    INDEX 00 00:00:00").unwrap();
        let track1 = cue.find("FILE \"01 - Track 01.flac\" WAVE").unwrap();
        assert!(hidden < index0 && index0 < track1);
        assert!(!cue.contains("PREGAP"));
    }

    #[test]
    fn test_unripped_pregap_becomes_pregap_command() {
        let disc = disc(&[3000, 20000], &[None, None], 30000);
        let metadata = AlbumMetadata::unknown(&disc);
        let cue = CueGenerator::generate_cue_sheet(&disc, &metadata, &files(&[1, 2]));
        assert!(cue.contains("    PREGAP 00:40:00"));
    }
}
