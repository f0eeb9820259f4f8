use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    media::{Media, MediaKind},
    parser::{self, ParsedData},
    user_config::ServiceTag,
};

/// Debrid provider tag used in availability annotations and playback queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderTag {
    #[serde(rename = "RD")]
    RealDebrid,
    #[serde(rename = "AD")]
    AllDebrid,
    #[serde(rename = "TB")]
    Torbox,
    #[serde(rename = "PM")]
    Premiumize,
}

impl ProviderTag {
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderTag::RealDebrid => "RealDebrid",
            ProviderTag::AllDebrid => "AllDebrid",
            ProviderTag::Torbox => "TorBox",
            ProviderTag::Premiumize => "Premiumize",
        }
    }
}

impl Display for ProviderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderTag::RealDebrid => write!(f, "RD"),
            ProviderTag::AllDebrid => write!(f, "AD"),
            ProviderTag::Torbox => write!(f, "TB"),
            ProviderTag::Premiumize => write!(f, "PM"),
        }
    }
}

impl FromStr for ProviderTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RD" => Ok(ProviderTag::RealDebrid),
            "AD" => Ok(ProviderTag::AllDebrid),
            "TB" => Ok(ProviderTag::Torbox),
            "PM" => Ok(ProviderTag::Premiumize),
            rest => Err(anyhow::anyhow!("unknown provider tag: {rest}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Public,
    Private,
}

/// A file row straight out of the `.torrent` file table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentFileEntry {
    pub path: String,
    pub length: u64,
}

/// One video file of a multi-file torrent with its parsed identity, kept for
/// late episode matching when the initial file selection found nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFileEntry {
    /// 1-based index into the torrent file table.
    pub file_index: usize,
    pub file_name: String,
    pub size: u64,
    pub seasons: Vec<u32>,
    pub episodes: Vec<u32>,
}

/// Normalised search result. Created by the indexer adapters, refined by the
/// torrent post-processor and the smart container, frozen once it lands in
/// the stream cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentItem {
    pub raw_title: String,
    /// Size in bytes. Downgraded to the selected file's size once an episode
    /// file is chosen inside a season pack.
    pub size: u64,
    pub magnet: Option<String>,
    /// 40 lowercase hex chars when known.
    pub info_hash: Option<String>,
    /// Source-specific `.torrent` download URL, or the magnet itself.
    pub link: Option<String>,
    pub seeders: u32,
    pub languages: Vec<String>,
    pub indexer: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub privacy: Privacy,
    #[serde(default)]
    pub trackers: Vec<String>,
    #[serde(default)]
    pub files: Option<Vec<TorrentFileEntry>>,
    #[serde(default)]
    pub torrent_download: Option<String>,
    #[serde(default)]
    pub file_index: Option<usize>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub full_index: Option<Vec<VideoFileEntry>>,
    #[serde(default)]
    pub availability: Option<ProviderTag>,
    pub parsed_data: ParsedData,
}

impl TorrentItem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        raw_title: String,
        size: u64,
        info_hash: Option<String>,
        link: Option<String>,
        seeders: u32,
        indexer: String,
        kind: MediaKind,
        privacy: Privacy,
    ) -> Self {
        let parsed_data = parser::parse_release(&raw_title);
        let languages = parser::detect_languages(&raw_title);
        Self {
            raw_title,
            size,
            magnet: None,
            info_hash: info_hash.map(|h| h.to_lowercase()),
            link,
            seeders,
            languages,
            indexer,
            kind,
            privacy,
            trackers: Vec::new(),
            files: None,
            torrent_download: None,
            file_index: None,
            file_name: None,
            full_index: None,
            availability: None,
            parsed_data,
        }
    }

    /// Synthetic durable id derived from the raw row. Stable across
    /// searches even before the info hash is known, which is what lets a
    /// stored row stand in for a `.torrent` fetch.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}|{}|{}", self.raw_title, self.size, self.indexer));
        digest_prefix(&hasher.finalize())
    }

    /// Availability only moves forward: the first provider to claim an item
    /// keeps it.
    pub fn mark_available(&mut self, provider: ProviderTag) {
        if self.availability.is_none() {
            self.availability = Some(provider);
        }
    }

    pub fn is_available(&self) -> bool {
        self.availability.is_some()
    }

    pub fn to_stream_query(&self, media: &Media, service: ServiceTag) -> StreamQuery {
        StreamQuery {
            magnet: self.magnet.clone(),
            kind: self.kind,
            file_index: self.file_index,
            season: media.season.clone(),
            episode: media.episode.clone(),
            torrent_download: self.torrent_download.clone(),
            service,
        }
    }
}

/// Per-playback-request query object, carried base64-JSON-encoded inside the
/// stream URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamQuery {
    pub magnet: Option<String>,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    #[serde(default)]
    pub file_index: Option<usize>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub episode: Option<String>,
    #[serde(default)]
    pub torrent_download: Option<String>,
    pub service: ServiceTag,
}

impl StreamQuery {
    pub fn season_number(&self) -> Option<u32> {
        strip_tag(self.season.as_deref()?, 'S')
    }

    pub fn episode_number(&self) -> Option<u32> {
        strip_tag(self.episode.as_deref()?, 'E')
    }

    pub fn info_hash(&self) -> Option<String> {
        torrent::MagnetLink::from_str(self.magnet.as_deref()?)
            .ok()
            .map(|m| m.info_hash)
    }
}

fn strip_tag(tag: &str, prefix: char) -> Option<u32> {
    tag.trim_start_matches(prefix)
        .trim_start_matches(prefix.to_ascii_lowercase())
        .parse()
        .ok()
}

/// First 16 hex chars of a digest, the shape every cache key and synthetic id
/// in the system uses.
pub fn digest_prefix(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().take(8).fold(String::with_capacity(16), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> TorrentItem {
        let mut item = TorrentItem::new(
            "Inception.2010.MULTi.1080p.BluRay.x264-Group".to_string(),
            8_000_000_000,
            Some("A".repeat(40)),
            Some("magnet:?xt=urn:btih:aaaa".to_string()),
            42,
            "Jackett".to_string(),
            MediaKind::Movie,
            Privacy::Public,
        );
        item.trackers = vec!["udp://tracker.example:1337".to_string()];
        item.file_index = Some(1);
        item
    }

    #[test]
    fn info_hash_is_lowercased() {
        let item = item();
        assert_eq!(item.info_hash.as_deref(), Some("a".repeat(40).as_str()));
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let mut item = item();
        item.mark_available(ProviderTag::RealDebrid);
        item.full_index = Some(vec![VideoFileEntry {
            file_index: 3,
            file_name: "Show.S01E03.mkv".to_string(),
            size: 700,
            seasons: vec![1],
            episodes: vec![3],
        }]);
        let encoded = serde_json::to_string(&item).unwrap();
        let decoded: TorrentItem = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.raw_title, item.raw_title);
        assert_eq!(decoded.size, item.size);
        assert_eq!(decoded.info_hash, item.info_hash);
        assert_eq!(decoded.seeders, item.seeders);
        assert_eq!(decoded.trackers, item.trackers);
        assert_eq!(decoded.file_index, item.file_index);
        assert_eq!(decoded.full_index, item.full_index);
        assert_eq!(decoded.availability, Some(ProviderTag::RealDebrid));
        assert_eq!(decoded.parsed_data, item.parsed_data);
        // Parsed data can always be re-derived from the raw title.
        assert_eq!(
            crate::parser::parse_release(&decoded.raw_title),
            decoded.parsed_data
        );
    }

    #[test]
    fn synthetic_id_for_hashless_items() {
        let mut item = item();
        item.info_hash = None;
        let id = item.id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, item.id());
    }

    #[test]
    fn availability_never_regresses() {
        let mut item = item();
        item.mark_available(ProviderTag::AllDebrid);
        item.mark_available(ProviderTag::RealDebrid);
        assert_eq!(item.availability, Some(ProviderTag::AllDebrid));
    }
}
