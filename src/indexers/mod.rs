use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

use crate::{app_state::AppError, config::Settings, media::Media, torrent_item::TorrentItem};

pub mod dmm;
pub mod jackett;
pub mod public_cache;
pub mod sharewood;
pub mod yggflix;

pub use dmm::{DmmAdapter, DmmApi};
pub use jackett::{JackettAdapter, JackettApi};
pub use public_cache::{PublicCacheAdapter, PublicCacheApi};
pub use sharewood::{SharewoodAdapter, SharewoodApi};
pub use yggflix::{YggflixAdapter, YggflixApi};

/// One torrent source. A failing adapter logs and contributes an empty list;
/// it never aborts the aggregate search.
#[async_trait]
pub trait IndexerAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, media: &Media) -> Result<Vec<TorrentItem>, AppError>;
}

/// Process-wide indexer HTTP clients. Built once at startup so rate limits
/// hold across concurrent searches; per-request adapters borrow from here.
#[derive(Debug, Default)]
pub struct IndexerClients {
    pub public_cache: Option<PublicCacheApi>,
    pub dmm: Option<DmmApi>,
    pub yggflix: Option<YggflixApi>,
    pub sharewood: Option<SharewoodApi>,
    pub jackett: Option<JackettApi>,
}

impl IndexerClients {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            public_cache: settings
                .public_cache_url
                .as_deref()
                .and_then(|url| PublicCacheApi::new(url).ok()),
            dmm: settings.dmm_url.as_deref().and_then(|url| DmmApi::new(url).ok()),
            yggflix: settings
                .yggflix_url
                .as_deref()
                .and_then(|url| YggflixApi::new(url).ok()),
            sharewood: settings
                .sharewood_url
                .as_deref()
                .and_then(|url| SharewoodApi::new(url).ok()),
            jackett: match (&settings.jackett_url, &settings.jackett_api_key) {
                (Some(url), Some(key)) => JackettApi::new(url, key.clone()).ok(),
                _ => None,
            },
        }
    }
}

/// Results with fewer seeders than the cutoff are dead weight for a debrid
/// download; drop them at the source.
pub fn apply_seeder_cutoff(items: Vec<TorrentItem>, min_seeders: u32) -> Vec<TorrentItem> {
    items
        .into_iter()
        .filter(|item| item.seeders >= min_seeders)
        .collect()
}

/// Accepts `123`, `"123"` and missing values; indexer APIs disagree on how
/// to spell a size.
pub fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        Float(f64),
        String(String),
    }
    Ok(match NumberOrString::deserialize(deserializer) {
        Ok(NumberOrString::Number(n)) => n,
        Ok(NumberOrString::Float(f)) if f.is_finite() && f >= 0.0 => f as u64,
        Ok(NumberOrString::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

pub fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_u64(deserializer).map(|n| n.min(u64::from(u32::MAX)) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use crate::torrent_item::{Privacy, TorrentItem};

    fn with_seeders(seeders: u32) -> TorrentItem {
        TorrentItem::new(
            format!("Movie.2020.1080p.{seeders}"),
            100,
            None,
            None,
            seeders,
            "Jackett".to_string(),
            MediaKind::Movie,
            Privacy::Public,
        )
    }

    #[test]
    fn seeder_cutoff_drops_below_threshold() {
        let kept = apply_seeder_cutoff(vec![with_seeders(4), with_seeders(5)], 5);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].seeders, 5);
    }

    #[test]
    fn lenient_numbers_accept_strings() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(deserialize_with = "lenient_u64", default)]
            size: u64,
        }
        let from_number: Row = serde_json::from_str(r#"{"size": 42}"#).unwrap();
        let from_string: Row = serde_json::from_str(r#"{"size": "42"}"#).unwrap();
        let from_garbage: Row = serde_json::from_str(r#"{"size": "n/a"}"#).unwrap();
        assert_eq!(from_number.size, 42);
        assert_eq!(from_string.size, 42);
        assert_eq!(from_garbage.size, 0);
    }
}
