//! TOC and gap analysis
//!
//! Turns the raw track listing reported by the drive into a [`Disc`]: track
//! boundaries, pre-gaps, a possible hidden track before track 1, disc
//! identifiers and offset-corrected sample spans for extraction.

use crate::cd::audio::{SampleSpan, SECTORS_PER_SECOND};
use crate::cd::disc_id::{self, AccurateRipIds};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Gap between the audio session and a trailing data session on an
/// enhanced CD (lead-out, lead-in and pre-gap of the second session)
pub const SESSION_GAP_SECTORS: u32 = 11_400;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TocError {
    #[error("TOC unreadable: {0}")]
    Unreadable(String),
}

/// One track as listed by the drive, before analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTocEntry {
    pub number: u8,
    /// LBA of index 01
    pub start_sector: u32,
    /// LBA of index 00 when the drive reported a pre-gap
    pub index0_sector: Option<u32>,
    pub audio: bool,
    pub isrc: Option<String>,
}

/// Raw disc layout as read from the drive
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawToc {
    pub entries: Vec<RawTocEntry>,
    pub leadout_sector: u32,
    pub catalog: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackKind {
    Audio,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Track {
    /// 1-based; 0 is reserved for the hidden track
    pub number: u8,
    pub start_sector: u32,
    pub length_sectors: u32,
    pub pregap_sectors: u32,
    pub isrc: Option<String>,
    pub kind: TrackKind,
    /// Extraction span with the drive read offset applied
    pub span: SampleSpan,
}

impl Track {
    pub fn is_audio(&self) -> bool {
        self.kind == TrackKind::Audio
    }

    pub fn end_sector(&self) -> u32 {
        self.start_sector + self.length_sectors
    }
}

/// Audio before track 1 index 01 (track 0)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HiddenTrack {
    pub start_sector: u32,
    pub length_sectors: u32,
    pub span: SampleSpan,
}

/// Analyzed disc; immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disc {
    /// MusicBrainz Disc ID
    pub id: String,
    pub tracks: Vec<Track>,
    pub total_sectors: u32,
    pub hidden_track: Option<HiddenTrack>,
    pub catalog: Option<String>,
    /// Read offset applied to every span, in sample frames
    pub read_offset: i32,
    pub accuraterip: AccurateRipIds,
    pub freedb_id: u32,
}

impl Disc {
    pub fn audio_tracks(&self) -> impl Iterator<Item = &Track> + '_ {
        self.tracks.iter().filter(|t| t.is_audio())
    }

    pub fn audio_track_count(&self) -> usize {
        self.audio_tracks().count()
    }

    pub fn track(&self, number: u8) -> Option<&Track> {
        self.tracks.iter().find(|t| t.number == number)
    }

    pub fn has_hidden_track(&self) -> bool {
        self.hidden_track.is_some()
    }

    /// First and last audio track numbers
    pub fn audio_bounds(&self) -> Option<(u8, u8)> {
        let first = self.audio_tracks().next()?.number;
        let last = self.audio_tracks().last()?.number;
        Some((first, last))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnalyzerSettings {
    /// Drive read offset in sample frames
    pub read_offset: i32,
    /// Track 1 pre-gaps longer than this are reported as a hidden track
    pub hidden_track_min_sectors: u32,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            read_offset: 0,
            hidden_track_min_sectors: SECTORS_PER_SECOND,
        }
    }
}

/// Analyze a raw TOC into a [`Disc`]
pub fn analyze(raw: &RawToc, settings: &AnalyzerSettings) -> Result<Disc, TocError> {
    if raw.entries.is_empty() {
        return Err(TocError::Unreadable("drive reported no tracks".to_string()));
    }

    for pair in raw.entries.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if prev.number.checked_add(1) != Some(next.number) {
            return Err(TocError::Unreadable(format!(
                "track numbers not consecutive: {} followed by {}",
                prev.number, next.number
            )));
        }
        if next.start_sector <= prev.start_sector {
            return Err(TocError::Unreadable(format!(
                "track {} starts at {} which is not after track {} at {}",
                next.number, next.start_sector, prev.number, prev.start_sector
            )));
        }
    }

    let last = &raw.entries[raw.entries.len() - 1];
    if raw.leadout_sector <= last.start_sector {
        return Err(TocError::Unreadable(format!(
            "lead-out {} is not after last track start {}",
            raw.leadout_sector, last.start_sector
        )));
    }

    let mut tracks = Vec::with_capacity(raw.entries.len());
    for (idx, entry) in raw.entries.iter().enumerate() {
        let next = raw.entries.get(idx + 1);
        let end = match next {
            // Enhanced CD: the data session starts after the session gap
            Some(n) if entry.audio && !n.audio && idx + 2 == raw.entries.len() => n
                .start_sector
                .checked_sub(SESSION_GAP_SECTORS)
                .filter(|end| *end > entry.start_sector)
                .ok_or_else(|| {
                    TocError::Unreadable(format!(
                        "data track {} leaves no room for audio track {}",
                        n.number, entry.number
                    ))
                })?,
            Some(n) => n.start_sector,
            None => raw.leadout_sector,
        };

        let prev_start = if idx == 0 {
            0
        } else {
            raw.entries[idx - 1].start_sector
        };
        let pregap_sectors = match entry.index0_sector {
            Some(index0) if index0 > entry.start_sector || index0 < prev_start => {
                return Err(TocError::Unreadable(format!(
                    "track {} index 00 at {} is outside its gap",
                    entry.number, index0
                )));
            }
            Some(index0) => entry.start_sector - index0,
            None if idx == 0 => entry.start_sector,
            None => 0,
        };

        let length_sectors = end - entry.start_sector;
        tracks.push(Track {
            number: entry.number,
            start_sector: entry.start_sector,
            length_sectors,
            pregap_sectors,
            isrc: entry.isrc.clone(),
            kind: if entry.audio {
                TrackKind::Audio
            } else {
                TrackKind::Data
            },
            span: SampleSpan::from_sectors(entry.start_sector, length_sectors, settings.read_offset),
        });
    }

    let audio: Vec<&Track> = tracks.iter().filter(|t| t.is_audio()).collect();
    let (first_audio, last_audio) = match (audio.first(), audio.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => {
            return Err(TocError::Unreadable(
                "disc has no audio tracks".to_string(),
            ))
        }
    };

    let hidden_track = match tracks.first() {
        Some(first)
            if first.is_audio()
                && first.number == 1
                && first.pregap_sectors > settings.hidden_track_min_sectors =>
        {
            let start_sector = first.start_sector - first.pregap_sectors;
            info!(
                "Hidden track detected before track 1: {} sectors",
                first.pregap_sectors
            );
            Some(HiddenTrack {
                start_sector,
                length_sectors: first.pregap_sectors,
                span: SampleSpan::from_sectors(
                    start_sector,
                    first.pregap_sectors,
                    settings.read_offset,
                ),
            })
        }
        _ => None,
    };

    let offsets: Vec<u32> = tracks.iter().map(|t| t.start_sector).collect();
    let audio_offsets: Vec<u32> = audio.iter().map(|t| t.start_sector).collect();
    let id = disc_id::musicbrainz_disc_id(
        first_audio.number,
        last_audio.number,
        last_audio.end_sector(),
        &audio_offsets,
    );
    let accuraterip = AccurateRipIds::compute(&offsets, raw.leadout_sector, audio.len() as u8);

    let disc = Disc {
        id,
        total_sectors: raw.leadout_sector,
        hidden_track,
        catalog: raw.catalog.clone(),
        read_offset: settings.read_offset,
        freedb_id: accuraterip.cddb,
        accuraterip,
        tracks,
    };

    info!(
        "TOC analyzed: {} track(s), {} sectors, disc id {}",
        disc.tracks.len(),
        disc.total_sectors,
        disc.id
    );
    Ok(disc)
}

fn paranoia_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\.\s+(\d+)\s+\[[^\]]*\]\s+(\d+)\s+\[[^\]]*\]").expect("valid regex")
    })
}

/// Parse the track table printed by `cd-paranoia -Q`:
///
/// ```text
///   1.    16503 [03:40.03]        0 [00:00.00]    no   no  2
/// ```
///
/// cd-paranoia only lists audio tracks; the lead-out is the end of the
/// last one.
pub fn parse_paranoia_query(output: &str) -> Result<RawToc, TocError> {
    let mut entries = Vec::new();
    let mut leadout = 0u32;

    for line in output.lines() {
        let Some(caps) = paranoia_line_re().captures(line) else {
            continue;
        };
        let parse = |i: usize| -> Result<u32, TocError> {
            caps[i]
                .parse::<u32>()
                .map_err(|e| TocError::Unreadable(format!("bad TOC line '{}': {}", line.trim(), e)))
        };
        let number = parse(1)?;
        let length = parse(2)?;
        let begin = parse(3)?;
        let number = u8::try_from(number)
            .map_err(|_| TocError::Unreadable(format!("track number {} out of range", number)))?;

        leadout = begin + length;
        entries.push(RawTocEntry {
            number,
            start_sector: begin,
            index0_sector: None,
            audio: true,
            isrc: None,
        });
    }

    if entries.is_empty() {
        return Err(TocError::Unreadable(
            "no tracks in cd-paranoia query output".to_string(),
        ));
    }
    debug!("Parsed {} track(s) from cd-paranoia, lead-out {}", entries.len(), leadout);

    Ok(RawToc {
        entries,
        leadout_sector: leadout,
        catalog: None,
    })
}

/// Parse `mm:ss:ff` into sectors
pub fn parse_msf(msf: &str) -> Option<u32> {
    let mut parts = msf.trim().split(':');
    let m: u32 = parts.next()?.parse().ok()?;
    let s: u32 = parts.next()?.parse().ok()?;
    let f: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || s >= 60 || f >= SECTORS_PER_SECOND {
        return None;
    }
    Some((m * 60 + s) * SECTORS_PER_SECOND + f)
}

/// Format sectors as `mm:ss:ff`
pub fn format_msf(sectors: u32) -> String {
    let frames = sectors % SECTORS_PER_SECOND;
    let seconds = sectors / SECTORS_PER_SECOND;
    format!("{:02}:{:02}:{:02}", seconds / 60, seconds % 60, frames)
}

/// A data track block found in a cdrdao TOC with no matching entry
struct DataBlock {
    number: u8,
    length: Option<u32>,
}

impl RawToc {
    /// Merge pre-gaps, ISRCs, the catalog number and data tracks from a TOC
    /// file written by `cdrdao read-toc`.
    ///
    /// cdrdao numbers its track blocks from 1, so blocks are matched to
    /// entries by track number. Data tracks, which cd-paranoia never lists,
    /// are added: a leading data track starts at sector 0, a trailing one
    /// after the session gap that follows the audio lead-out.
    pub fn merge_cdrdao(&mut self, toc_file: &str) {
        let mut number: u8 = 0;
        let mut current: Option<usize> = None;
        let mut data_blocks: Vec<DataBlock> = Vec::new();

        for line in toc_file.lines() {
            let line = line.split("//").next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if let Some(mode) = line.strip_prefix("TRACK ") {
                number = number.saturating_add(1);
                current = self.entries.iter().position(|e| e.number == number);
                if current.is_none() && !mode.trim().starts_with("AUDIO") {
                    data_blocks.push(DataBlock {
                        number,
                        length: None,
                    });
                }
                continue;
            }
            if let Some(catalog) = quoted_value(line, "CATALOG") {
                self.catalog = Some(catalog);
                continue;
            }

            if let Some(rest) = line.strip_prefix("DATAFILE ") {
                if let Some(block) = data_blocks.last_mut().filter(|b| b.number == number) {
                    let length = rest.split_whitespace().last().and_then(parse_msf);
                    block.length = block.length.or(length);
                }
                continue;
            }

            let Some(entry) = current.and_then(|i| self.entries.get_mut(i)) else {
                continue;
            };
            if let Some(isrc) = quoted_value(line, "ISRC") {
                entry.isrc = Some(isrc);
            } else if let Some(rest) = line
                .strip_prefix("START ")
                .or_else(|| line.strip_prefix("PREGAP "))
            {
                if let Some(pregap) = parse_msf(rest) {
                    entry.index0_sector = Some(entry.start_sector.saturating_sub(pregap));
                }
            }
        }

        self.add_data_tracks(data_blocks);
    }

    fn add_data_tracks(&mut self, blocks: Vec<DataBlock>) {
        let (Some(first), Some(last)) = (
            self.entries.first().map(|e| e.number),
            self.entries.last().map(|e| e.number),
        ) else {
            return;
        };

        let mut leading_start = 0u32;
        let mut trailing_start = self.leadout_sector + SESSION_GAP_SECTORS;
        for block in blocks {
            let start_sector = if block.number < first {
                let start = leading_start;
                leading_start += block.length.unwrap_or(0);
                start
            } else if block.number > last {
                let Some(length) = block.length else {
                    warn!(
                        "cdrdao data track {} has no length, lead-out unknown; ignoring it",
                        block.number
                    );
                    continue;
                };
                let start = trailing_start;
                trailing_start += length;
                self.leadout_sector = trailing_start;
                start
            } else {
                continue;
            };

            debug!("Data track {} from cdrdao at sector {}", block.number, start_sector);
            self.entries.push(RawTocEntry {
                number: block.number,
                start_sector,
                index0_sector: None,
                audio: false,
                isrc: None,
            });
        }
        self.entries.sort_by_key(|e| e.number);
    }
}

fn quoted_value(line: &str, keyword: &str) -> Option<String> {
    let rest = line.strip_prefix(keyword)?.trim();
    let value = rest.strip_prefix('"')?.strip_suffix('"')?;
    Some(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cd::audio::SAMPLES_PER_SECTOR;

    fn entry(number: u8, start: u32) -> RawTocEntry {
        RawTocEntry {
            number,
            start_sector: start,
            index0_sector: None,
            audio: true,
            isrc: None,
        }
    }

    fn raw(starts: &[u32], leadout: u32) -> RawToc {
        RawToc {
            entries: starts
                .iter()
                .enumerate()
                .map(|(i, s)| entry(i as u8 + 1, *s))
                .collect(),
            leadout_sector: leadout,
            catalog: None,
        }
    }

    #[test]
    fn test_lengths_from_start_differences() {
        let disc = analyze(&raw(&[0, 1000, 2500], 4000), &AnalyzerSettings::default()).unwrap();
        let lengths: Vec<u32> = disc.tracks.iter().map(|t| t.length_sectors).collect();
        assert_eq!(lengths, vec![1000, 1500, 1500]);
        assert_eq!(disc.total_sectors, 4000);
        assert!(!disc.has_hidden_track());
        assert_eq!(disc.accuraterip.track_count, 3);
    }

    #[test]
    fn test_track_ranges_never_overlap() {
        let settings = AnalyzerSettings {
            read_offset: 667,
            hidden_track_min_sectors: 75,
        };
        let disc = analyze(&raw(&[33, 17000, 17001, 40000, 52123], 60000), &settings).unwrap();
        for a in &disc.tracks {
            for b in &disc.tracks {
                if a.number == b.number {
                    continue;
                }
                assert!(a.end_sector() <= b.start_sector || b.end_sector() <= a.start_sector);
                assert!(!a.span.overlaps(&b.span));
            }
        }
    }

    #[test]
    fn test_read_offset_shifts_every_boundary() {
        let settings = AnalyzerSettings {
            read_offset: -30,
            ..Default::default()
        };
        let disc = analyze(&raw(&[0, 1000], 2000), &settings).unwrap();
        assert_eq!(disc.tracks[0].span.start, -30);
        assert_eq!(disc.tracks[1].span.start, 1000 * SAMPLES_PER_SECTOR as i64 - 30);
        assert_eq!(disc.read_offset, -30);
    }

    #[test]
    fn test_hidden_track_above_threshold() {
        let disc = analyze(&raw(&[3000, 20000], 30000), &AnalyzerSettings::default()).unwrap();
        let hidden = disc.hidden_track.as_ref().unwrap();
        assert_eq!(hidden.start_sector, 0);
        assert_eq!(hidden.length_sectors, 3000);
        assert_eq!(disc.tracks[0].pregap_sectors, 3000);

        let short_gap = analyze(&raw(&[32, 20000], 30000), &AnalyzerSettings::default()).unwrap();
        assert!(short_gap.hidden_track.is_none());
    }

    #[test]
    fn test_empty_toc_is_unreadable() {
        let err = analyze(&RawToc::default(), &AnalyzerSettings::default()).unwrap_err();
        assert!(matches!(err, TocError::Unreadable(_)));
    }

    #[test]
    fn test_non_monotonic_starts_are_unreadable() {
        let err = analyze(&raw(&[0, 5000, 4000], 9000), &AnalyzerSettings::default());
        assert!(err.is_err());

        let err = analyze(&raw(&[0, 5000], 5000), &AnalyzerSettings::default());
        assert!(err.is_err(), "lead-out must be after the last start");
    }

    #[test]
    fn test_enhanced_cd_trims_audio_session() {
        let mut toc = raw(&[0, 10000, 40000], 50000);
        toc.entries[2].audio = false;
        let disc = analyze(&toc, &AnalyzerSettings::default()).unwrap();
        assert_eq!(disc.audio_track_count(), 2);
        assert_eq!(disc.tracks[1].length_sectors, 40000 - SESSION_GAP_SECTORS - 10000);
        assert_eq!(disc.accuraterip.track_count, 2);
        assert_eq!(disc.audio_bounds(), Some((1, 2)));
    }

    #[test]
    fn test_parse_paranoia_query() {
        let output = "\
cdparanoia III release 10.2 (September 11, 2008)

Table of contents (audio tracks only):
track        length               begin        copy pre ch
===========================================================
  1.    16503 [03:40.03]        0 [00:00.00]    no   no  2
  2.    18270 [04:03.45]    16503 [03:40.03]    no   no  2
  3.    20127 [04:28.27]    34773 [07:43.48]    no   no  2
TOTAL   54900 [12:12.00]    (audio only)
";
        let toc = parse_paranoia_query(output).unwrap();
        assert_eq!(toc.entries.len(), 3);
        assert_eq!(toc.entries[1].start_sector, 16503);
        assert_eq!(toc.leadout_sector, 54900);
    }

    #[test]
    fn test_parse_paranoia_query_without_tracks() {
        assert!(parse_paranoia_query("Unable to open disc.").is_err());
    }

    #[test]
    fn test_merge_cdrdao_gaps_and_codes() {
        let mut toc = raw(&[0, 16503, 34773], 54900);
        let cdrdao = r#"
CD_DA
CATALOG "0724384260958"

// Track 1
TRACK AUDIO
ISRC "GBAYE9200070"
FILE "data.wav" 0 03:40:03

// Track 2
TRACK AUDIO
FILE "data.wav" 03:40:03 04:03:45
START 00:02:00

// Track 3
TRACK AUDIO
ISRC "GBAYE9200072"
FILE "data.wav" 07:43:48 04:28:27
"#;
        toc.merge_cdrdao(cdrdao);
        assert_eq!(toc.catalog.as_deref(), Some("0724384260958"));
        assert_eq!(toc.entries[0].isrc.as_deref(), Some("GBAYE9200070"));
        assert_eq!(toc.entries[1].index0_sector, Some(16503 - 150));
        assert_eq!(toc.entries[2].isrc.as_deref(), Some("GBAYE9200072"));

        let disc = analyze(&toc, &AnalyzerSettings::default()).unwrap();
        assert_eq!(disc.tracks[1].pregap_sectors, 150);
        assert_eq!(disc.tracks[2].pregap_sectors, 0);
    }

    #[test]
    fn test_enhanced_cd_data_track_from_cdrdao() {
        let output = "\
Table of contents (audio tracks only):
track        length               begin        copy pre ch
===========================================================
  1.    10000 [02:13.25]        0 [00:00.00]    no   no  2
  2.    15000 [03:20.00]    10000 [02:13.25]    no   no  2
TOTAL   25000 [05:33.25]    (audio only)
";
        let cdrdao = r#"
CD_ROM_XA

// Track 1
TRACK AUDIO
FILE "data.wav" 0 02:13:25

// Track 2
TRACK AUDIO
FILE "data.wav" 02:13:25 03:20:00

// Track 3
TRACK MODE2_FORM1
DATAFILE "data_3.bin" 10:00:00 // length in bytes: 105840000
"#;
        let mut toc = parse_paranoia_query(output).unwrap();
        toc.merge_cdrdao(cdrdao);
        assert_eq!(toc.entries.len(), 3);
        assert!(!toc.entries[2].audio);
        assert_eq!(toc.entries[2].start_sector, 25000 + SESSION_GAP_SECTORS);
        assert_eq!(toc.leadout_sector, 25000 + SESSION_GAP_SECTORS + 45000);

        let disc = analyze(&toc, &AnalyzerSettings::default()).unwrap();
        assert_eq!(disc.tracks.len(), 3);
        assert_eq!(disc.tracks.iter().filter(|t| !t.is_audio()).count(), 1);
        assert_eq!(disc.audio_track_count(), 2);
        assert_eq!(disc.tracks[1].length_sectors, 15000);
        assert_eq!(
            disc.accuraterip,
            AccurateRipIds::compute(&[0, 10000, 36400], 81400, 2)
        );
        assert_eq!(disc.id, disc_id::musicbrainz_disc_id(1, 2, 25000, &[0, 10000]));
    }

    #[test]
    fn test_leading_data_track_from_cdrdao() {
        let output = "  2.    15000 [03:20.00]    20000 [04:26.50]    no   no  2\n";
        let cdrdao = r#"
TRACK MODE1
DATAFILE "data_1.bin" 04:26:50
TRACK AUDIO
FILE "data.wav" 0 03:20:00
"#;
        let mut toc = parse_paranoia_query(output).unwrap();
        toc.merge_cdrdao(cdrdao);
        assert_eq!(toc.entries[0].number, 1);
        assert_eq!(toc.entries[0].start_sector, 0);
        assert_eq!(toc.leadout_sector, 35000);

        let disc = analyze(&toc, &AnalyzerSettings::default()).unwrap();
        assert_eq!(disc.tracks[0].kind, TrackKind::Data);
        assert_eq!(disc.tracks[0].length_sectors, 20000);
        assert_eq!(disc.audio_bounds(), Some((2, 2)));
        assert!(disc.hidden_track.is_none());
    }

    #[test]
    fn test_track_number_past_255_is_unreadable() {
        let mut toc = raw(&[0, 1000], 2000);
        toc.entries[0].number = 255;
        toc.entries[1].number = 0;
        let err = analyze(&toc, &AnalyzerSettings::default()).unwrap_err();
        assert!(matches!(err, TocError::Unreadable(_)));
    }

    #[test]
    fn test_msf_round_trip_values() {
        assert_eq!(parse_msf("03:40:03"), Some(16503));
        assert_eq!(format_msf(16503), "03:40:03");
        assert_eq!(parse_msf("00:61:00"), None);
    }
}
