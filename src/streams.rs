use serde::{Deserialize, Serialize};

use crate::{
    config::Settings,
    media::{Media, MediaKind},
    parser,
    torrent_item::TorrentItem,
    user_config::{ServiceTag, UserConfig, encode_b64},
};

const INSTANTLY_AVAILABLE: &str = "⚡";
const DOWNLOAD_REQUIRED: &str = "⬇️";
const DIRECT_TORRENT: &str = "🏴\u{200d}☠️";

/// One row of the player's stream list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRow {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "infoHash", skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
    #[serde(rename = "fileIdx", skip_serializing_if = "Option::is_none")]
    pub file_idx: Option<usize>,
    #[serde(rename = "behaviorHints")]
    pub behavior_hints: BehaviorHints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorHints {
    /// Same-group rows binge-play without re-prompting the user.
    #[serde(rename = "bingeGroup")]
    pub binge_group: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub streams: Vec<StreamRow>,
}

fn language_emoji(language: &str) -> &'static str {
    match language {
        "fr" => "🇫🇷 FR",
        "en" => "🇬🇧 EN",
        "es" => "🇪🇸 ES",
        "de" => "🇩🇪 DE",
        "it" => "🇮🇹 IT",
        "pt" => "🇵🇹 PT",
        "ru" => "🇷🇺 RU",
        "in" => "🇮🇳 IN",
        "nl" => "🇳🇱 NL",
        "hu" => "🇭🇺 HU",
        "la" => "🇲🇽 LA",
        "multi" => "🌍 MULTi",
        _ => "🌐",
    }
}

fn size_in_gib(size: u64) -> String {
    format!("{:.2}", size as f64 / 1024.0 / 1024.0 / 1024.0)
}

/// Builds the player rows for the final result list: one debrid row per
/// item, plus a direct-torrent row when public torrenting is enabled.
/// Instant rows sort first, direct-torrent rows last.
pub fn build_stream_rows(
    items: &[TorrentItem],
    config: &UserConfig,
    media: &Media,
    settings: &Settings,
) -> Vec<StreamRow> {
    let config_b64 = config.encode();
    let mut rows = Vec::new();
    for item in items.iter().take(config.max_results.max(1)) {
        rows.push(debrid_row(item, config, media, settings, &config_b64));
        if config.torrenting
            && item.privacy == crate::torrent_item::Privacy::Public
            && item.info_hash.is_some()
        {
            rows.push(direct_torrent_row(item));
        }
    }
    // Stable: instant first, direct-torrent rows at the very end.
    rows.sort_by_key(|row| {
        (
            row.name.starts_with(DIRECT_TORRENT),
            !row.name.starts_with(INSTANTLY_AVAILABLE),
        )
    });
    rows
}

fn playback_service(item: &TorrentItem, config: &UserConfig, settings: &Settings) -> ServiceTag {
    match item.availability.map(ServiceTag::from) {
        Some(service) => service,
        None => match config.service {
            ServiceTag::Download => settings.download_service,
            service => service,
        },
    }
}

fn debrid_row(
    item: &TorrentItem,
    config: &UserConfig,
    media: &Media,
    settings: &Settings,
    config_b64: &str,
) -> StreamRow {
    let resolution = item
        .parsed_data
        .resolution
        .as_deref()
        .unwrap_or("Unknown");
    let service = playback_service(item, config, settings);
    let name = match item.availability {
        Some(provider) => format!(
            "{INSTANTLY_AVAILABLE}{}\ninstant\n({resolution})",
            provider.display_name()
        ),
        None => format!(
            "{DOWNLOAD_REQUIRED}{}\ndownload\n({resolution})",
            service
                .provider()
                .map(|p| p.display_name())
                .unwrap_or("debrid")
        ),
    };

    let query = item.to_stream_query(media, service);
    let query_b64 = encode_b64(&serde_json::to_string(&query).expect("query serializes"));
    StreamRow {
        name,
        description: description(item, media),
        url: Some(format!(
            "{}/playback/{config_b64}/{query_b64}",
            config.addon_host.trim_end_matches('/')
        )),
        info_hash: None,
        file_idx: None,
        behavior_hints: behavior_hints(item),
    }
}

fn direct_torrent_row(item: &TorrentItem) -> StreamRow {
    let resolution = item
        .parsed_data
        .resolution
        .as_deref()
        .unwrap_or("Unknown");
    StreamRow {
        name: format!("{DIRECT_TORRENT}\ntorrent\n({resolution})"),
        description: description_base(item),
        url: None,
        info_hash: item.info_hash.clone(),
        file_idx: item.file_index,
        behavior_hints: behavior_hints(item),
    }
}

fn behavior_hints(item: &TorrentItem) -> BehaviorHints {
    BehaviorHints {
        binge_group: format!(
            "stream-relay-{}",
            item.info_hash.as_deref().unwrap_or("unhashed")
        ),
        filename: item
            .file_name
            .clone()
            .unwrap_or_else(|| item.raw_title.clone()),
    }
}

fn description(item: &TorrentItem, media: &Media) -> String {
    let mut description = format!("{}\n", item.raw_title);
    if media.kind == MediaKind::Series {
        if let Some(file_name) = &item.file_name {
            description.push_str(file_name);
            description.push('\n');
        }
    }
    description.push_str(&description_tail(item));
    description
}

fn description_base(item: &TorrentItem) -> String {
    format!("{}\n{}", item.raw_title, description_tail(item))
}

fn description_tail(item: &TorrentItem) -> String {
    let mut tail = String::new();

    let languages = if item.languages.is_empty() {
        "🌐".to_string()
    } else {
        item.languages
            .iter()
            .map(|language| language_emoji(language))
            .collect::<Vec<_>>()
            .join("/")
    };
    tail.push_str(&languages);
    if let Some(dub) = parser::detect_french_dub(&item.raw_title, &item.languages) {
        tail.push_str(&format!("  ✔ {dub}"));
    }
    if let Some(group) = &item.parsed_data.group {
        tail.push_str(&format!("  ☠ {group}"));
    }
    tail.push('\n');

    tail.push_str(&format!(
        "🔍 {} 💾 {}GB 👥 {}\n",
        item.indexer,
        size_in_gib(item.size),
        item.seeders
    ));

    let parsed = &item.parsed_data;
    let mut media_info = Vec::new();
    if let Some(codec) = &parsed.codec {
        media_info.push(format!("🎥 {codec}"));
    }
    if let Some(resolution) = &parsed.resolution {
        media_info.push(format!("📺 {resolution}"));
    }
    if let Some(quality) = &parsed.quality {
        media_info.push(format!("🎞 {quality}"));
    }
    if !parsed.hdr.is_empty() {
        media_info.push(parsed.hdr.join("."));
    }
    if !parsed.audio.is_empty() {
        media_info.push(format!("🎧 {}", parsed.audio.join(" | ")));
    }
    if !media_info.is_empty() {
        tail.push_str(&media_info.join(" "));
        tail.push('\n');
    }
    tail.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent_item::{Privacy, ProviderTag};

    fn movie_media() -> Media {
        Media {
            kind: MediaKind::Movie,
            imdb_id: "tt1375666".to_string(),
            tmdb_id: None,
            titles: vec!["Inception".to_string()],
            year: Some("2010".to_string()),
            season: None,
            episode: None,
            languages: vec!["fr".to_string(), "en".to_string()],
        }
    }

    fn cached_movie_item() -> TorrentItem {
        let mut item = TorrentItem::new(
            "Inception.2010.MULTi.1080p.BluRay.x264-Group".to_string(),
            8_000_000_000,
            Some("a".repeat(40)),
            None,
            42,
            "Jackett".to_string(),
            MediaKind::Movie,
            Privacy::Public,
        );
        item.magnet = Some(format!("magnet:?xt=urn:btih:{}", "a".repeat(40)));
        item.file_index = Some(1);
        item.file_name = Some("Inception.2010.1080p.mkv".to_string());
        item.mark_available(ProviderTag::RealDebrid);
        item
    }

    fn config() -> UserConfig {
        UserConfig {
            api_key: "11111111-2222-4333-8444-555555555555".to_string(),
            addon_host: "https://addon.example".to_string(),
            ..UserConfig::default()
        }
    }

    #[test]
    fn cached_movie_produces_an_instant_row() {
        let settings = Settings::default();
        let rows = build_stream_rows(&[cached_movie_item()], &config(), &movie_media(), &settings);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert!(row.name.starts_with("⚡RealDebrid"));
        assert!(row.name.contains("(1080p)"));
        assert!(row.description.contains("👥 42"));
        assert!(row.description.contains("💾 7.45GB"));
        assert!(row.description.contains("📺 1080p"));
        let url = row.url.as_deref().unwrap();
        assert!(url.starts_with("https://addon.example/playback/"));
        assert!(!url.contains('='));
        assert_eq!(
            row.behavior_hints.filename.as_str(),
            "Inception.2010.1080p.mkv"
        );
    }

    #[test]
    fn torrenting_adds_direct_rows_after_debrid_rows() {
        let settings = Settings::default();
        let mut config = config();
        config.torrenting = true;
        let rows = build_stream_rows(&[cached_movie_item()], &config, &movie_media(), &settings);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].name.starts_with("⚡"));
        assert!(rows[1].name.starts_with(DIRECT_TORRENT));
        assert_eq!(rows[1].info_hash.as_deref(), Some(&*"a".repeat(40)));
        assert_eq!(rows[1].file_idx, Some(1));
    }

    #[test]
    fn uncached_items_offer_the_download_path() {
        let settings = Settings::default();
        let mut item = cached_movie_item();
        item.availability = None;
        let rows = build_stream_rows(&[item], &config(), &movie_media(), &settings);
        assert!(rows[0].name.starts_with("⬇️"));
        assert!(rows[0].name.contains("download"));
    }

    #[test]
    fn max_results_caps_the_row_count() {
        let settings = Settings::default();
        let mut config = config();
        config.max_results = 1;
        let items = vec![cached_movie_item(), cached_movie_item()];
        let rows = build_stream_rows(&items, &config, &movie_media(), &settings);
        assert_eq!(rows.len(), 1);
    }
}
