use crate::cd::toc::Disc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_SERVER: &str = "https://musicbrainz.org";

/// Album and track titles for one disc
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumMetadata {
    pub release_id: Option<String>,
    pub artist: String,
    pub album: String,
    pub date: Option<String>,
    /// Indexed by track number - 1
    pub tracks: Vec<TrackMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: Option<String>,
}

impl AlbumMetadata {
    /// Placeholder used when no lookup result is available
    pub fn unknown(disc: &Disc) -> Self {
        Self {
            release_id: None,
            artist: "Unknown Artist".to_string(),
            album: "Unknown Album".to_string(),
            date: None,
            tracks: disc
                .audio_tracks()
                .map(|t| TrackMetadata {
                    title: format!("Track {:02}", t.number),
                    artist: None,
                })
                .collect(),
        }
    }

    pub fn track_title(&self, number: u8) -> String {
        if number == 0 {
            return "Hidden Track".to_string();
        }
        self.tracks
            .get(number as usize - 1)
            .map(|t| t.title.clone())
            .unwrap_or_else(|| format!("Track {:02}", number))
    }

    pub fn track_artist(&self, number: u8) -> &str {
        number
            .checked_sub(1)
            .and_then(|i| self.tracks.get(i as usize))
            .and_then(|t| t.artist.as_deref())
            .unwrap_or(&self.artist)
    }
}

#[derive(Debug, Error)]
pub enum MusicBrainzError {
    #[error("MusicBrainz API error: {0}")]
    Api(String),
    #[error("No release found for DISCID: {0}")]
    NotFound(String),
}

/// Metadata capability, consumed only while finalizing
#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn lookup(&self, disc: &Disc) -> Result<AlbumMetadata, MusicBrainzError>;
}

/// MusicBrainz web service client
pub struct MusicBrainzClient {
    client: reqwest::Client,
    server: String,
}

impl MusicBrainzClient {
    pub fn new(server: &str, user_agent: &str, timeout: Duration) -> Result<Self, MusicBrainzError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| MusicBrainzError::Api(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl MetadataProvider for MusicBrainzClient {
    async fn lookup(&self, disc: &Disc) -> Result<AlbumMetadata, MusicBrainzError> {
        info!("MusicBrainz: Looking up DiscID '{}'", disc.id);

        let base_url = reqwest::Url::parse(&format!("{}/ws/2/discid/", self.server))
            .map_err(|e| MusicBrainzError::Api(format!("Failed to parse base URL: {}", e)))?;
        let mut url = base_url
            .join(&disc.id)
            .map_err(|e| MusicBrainzError::Api(format!("Failed to construct DiscID URL: {}", e)))?;
        url.set_query(Some("inc=recordings+artist-credits&fmt=json"));
        debug!("MusicBrainz API request: {}", url);

        let response = self
            .client
            .get(url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| MusicBrainzError::Api(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == 404 {
            return Err(MusicBrainzError::NotFound(disc.id.clone()));
        }
        if !status.is_success() {
            warn!("MusicBrainz API error response ({})", status);
            return Err(MusicBrainzError::Api(format!(
                "MusicBrainz API returned status {}",
                status
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MusicBrainzError::Api(format!("Failed to parse JSON: {}", e)))?;

        parse_discid_response(&json, &disc.id)
    }
}

fn artist_credit(value: &serde_json::Value) -> Option<String> {
    let credits = value.get("artist-credit")?.as_array()?;
    let mut name = String::new();
    for credit in credits {
        name.push_str(credit.get("name")?.as_str()?);
        if let Some(join) = credit.get("joinphrase").and_then(|j| j.as_str()) {
            name.push_str(join);
        }
    }
    (!name.is_empty()).then_some(name)
}

/// Pick the first release and the medium carrying `discid`
pub fn parse_discid_response(
    json: &serde_json::Value,
    discid: &str,
) -> Result<AlbumMetadata, MusicBrainzError> {
    let release = json
        .get("releases")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
        .ok_or_else(|| MusicBrainzError::NotFound(discid.to_string()))?;

    let media = release
        .get("media")
        .and_then(|m| m.as_array())
        .cloned()
        .unwrap_or_default();
    let medium = media
        .iter()
        .find(|m| {
            m.get("discs")
                .and_then(|d| d.as_array())
                .is_some_and(|discs| {
                    discs
                        .iter()
                        .any(|d| d.get("id").and_then(|i| i.as_str()) == Some(discid))
                })
        })
        .or_else(|| media.first());

    let tracks = medium
        .and_then(|m| m.get("tracks"))
        .and_then(|t| t.as_array())
        .map(|tracks| {
            tracks
                .iter()
                .map(|t| TrackMetadata {
                    title: t
                        .get("title")
                        .and_then(|v| v.as_str())
                        .unwrap_or("Unknown Track")
                        .to_string(),
                    artist: artist_credit(t),
                })
                .collect()
        })
        .unwrap_or_default();

    let metadata = AlbumMetadata {
        release_id: release.get("id").and_then(|v| v.as_str()).map(String::from),
        artist: artist_credit(release).unwrap_or_else(|| "Unknown Artist".to_string()),
        album: release
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown Album")
            .to_string(),
        date: release
            .get("date")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from),
        tracks,
    };
    info!(
        "MusicBrainz: {} - {} ({} tracks)",
        metadata.artist,
        metadata.album,
        metadata.tracks.len()
    );
    Ok(metadata)
}
