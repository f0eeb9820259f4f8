use std::{str::FromStr, sync::Arc, time::Duration};

use reqwest::{Client, StatusCode, header, redirect::Policy};
use tokio::{sync::Semaphore, task::JoinSet};
use torrent::{MagnetLink, Metainfo, metainfo::MetaFile};

use crate::{
    media::{Media, MediaKind},
    parser,
    rate_limit::SlidingWindow,
    torrent_item::{TorrentFileEntry, TorrentItem, VideoFileEntry},
};

/// Turns raw indexer rows into canonical torrent items: fetches `.torrent`
/// bodies where needed, computes infohashes, picks the right file and builds
/// magnets. Items that cannot be decoded are dropped.
#[derive(Debug)]
pub struct TorrentProcessor {
    client: Client,
    global_window: SlidingWindow,
    download_window: SlidingWindow,
    width: usize,
}

impl TorrentProcessor {
    pub fn new(width: usize) -> Self {
        // Redirects stay manual: a 302 from an indexer is how it hands out
        // a magnet instead of a file.
        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .expect("client to build");
        Self {
            client,
            global_window: SlidingWindow::per_minute_250(),
            download_window: SlidingWindow::per_second_1(),
            width,
        }
    }

    pub async fn process_all(
        self: &Arc<Self>,
        items: Vec<TorrentItem>,
        media: &Media,
    ) -> Vec<TorrentItem> {
        let mut join_set: JoinSet<Option<TorrentItem>> = JoinSet::new();
        let slots = Arc::new(Semaphore::new(self.width.max(1)));
        for item in items {
            let this = self.clone();
            let slots = slots.clone();
            let media = media.clone();
            join_set.spawn(async move {
                let _permit = slots.acquire().await.expect("semaphore never closes");
                this.process(item, &media).await
            });
        }
        let mut processed = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(item)) => processed.push(item),
                Ok(None) => {}
                Err(e) => tracing::error!("Torrent processing task panicked: {e}"),
            }
        }
        processed
    }

    async fn process(&self, item: TorrentItem, media: &Media) -> Option<TorrentItem> {
        let link = match item.link.clone() {
            Some(link) => link,
            None => return Some(process_magnet(item)),
        };
        if link.starts_with("magnet:") {
            return Some(process_magnet(item));
        }
        self.fetch_and_decode(item, &link, media).await
    }

    async fn fetch_and_decode(
        &self,
        mut item: TorrentItem,
        link: &str,
        media: &Media,
    ) -> Option<TorrentItem> {
        self.global_window.acquire().await;
        self.download_window.acquire().await;

        let timeout = match item.indexer.as_str() {
            "Sharewood" => Duration::from_secs(5),
            "Yggflix" => Duration::from_secs(10),
            _ => Duration::from_secs(40),
        };
        let response = match self.client.get(link).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(link, "Error while fetching torrent file: {e}");
                return Some(item);
            }
        };
        match response.status() {
            StatusCode::OK => {}
            StatusCode::FOUND => {
                // The source redirects straight to a magnet.
                match response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                {
                    Some(location) => {
                        item.magnet = Some(location.to_string());
                        return Some(process_magnet(item));
                    }
                    None => {
                        tracing::error!(link, "302 without a Location header");
                        return Some(item);
                    }
                }
            }
            StatusCode::UNPROCESSABLE_ENTITY if item.indexer == "Yggflix" => {
                tracing::debug!(link, "Yggflix marks this torrent unavailable");
                return Some(item);
            }
            status => {
                tracing::error!(link, status = status.as_u16(), "Torrent fetch failed");
                return Some(item);
            }
        }
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(link, "Error while reading torrent body: {e}");
                return Some(item);
            }
        };
        let meta = match Metainfo::from_bytes(&body) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::error!(link, "Dropping undecodable torrent: {e}");
                return None;
            }
        };
        Some(apply_metainfo(item, link, &meta, media))
    }
}

/// Fills identity fields from a magnet link: infohash, trackers and the
/// magnet itself.
pub fn process_magnet(mut item: TorrentItem) -> TorrentItem {
    if item.magnet.is_none() {
        item.magnet = item.link.clone();
    }
    let Some(magnet) = item.magnet.as_deref() else {
        return item;
    };
    match MagnetLink::from_str(magnet) {
        Ok(parsed) => {
            if item.info_hash.is_none() {
                item.info_hash = Some(parsed.info_hash);
            }
            if item.trackers.is_empty() {
                item.trackers = parsed.trackers;
            }
        }
        Err(e) => tracing::warn!("Unparsable magnet on {}: {e}", item.raw_title),
    }
    item
}

/// Applies a decoded `.torrent` to an item: identity, canonical magnet and
/// file selection for the requested media.
pub fn apply_metainfo(
    mut item: TorrentItem,
    link: &str,
    meta: &Metainfo,
    media: &Media,
) -> TorrentItem {
    item.torrent_download = Some(link.to_string());
    item.trackers = meta.trackers.clone();
    item.info_hash = Some(meta.info_hash.clone());
    item.magnet = Some(
        MagnetLink::new(
            meta.info_hash.clone(),
            Some(meta.name.clone()),
            meta.trackers.iter().cloned(),
        )
        .to_string(),
    );

    if meta.is_single_file() {
        item.file_index = Some(1);
        return item;
    }
    item.files = Some(
        meta.files()
            .iter()
            .map(|file| TorrentFileEntry {
                path: file.path.clone(),
                length: file.length,
            })
            .collect(),
    );

    match item.kind {
        MediaKind::Series => {
            let selected = match (media.season_number(), media.episode_number()) {
                (Some(season), Some(episode)) => {
                    select_episode_file(meta.files(), season, episode)
                }
                _ => None,
            };
            if let Some((index, file)) = selected {
                item.file_index = Some(index);
                item.file_name = Some(file.path.clone());
                item.size = file.length;
            } else {
                item.full_index = Some(video_full_index(meta.files()));
            }
        }
        MediaKind::Movie => {
            item.file_index = Some(meta.largest_file_index());
        }
    }
    item
}

/// Largest file whose parsed name covers the requested episode. Returns the
/// 1-based index into the file table.
fn select_episode_file(files: &[MetaFile], season: u32, episode: u32) -> Option<(usize, &MetaFile)> {
    files
        .iter()
        .enumerate()
        .filter(|(_, file)| parser::season_episode_in_filename(&file.path, season, episode))
        .max_by_key(|(_, file)| file.length)
        .map(|(index, file)| (index + 1, file))
}

/// Every video file with its parsed seasons and episodes, for late matching
/// in the smart container.
fn video_full_index(files: &[MetaFile]) -> Vec<VideoFileEntry> {
    files
        .iter()
        .enumerate()
        .filter(|(_, file)| parser::is_video_file(&file.path))
        .map(|(index, file)| {
            let parsed = parser::parse_release(&file.path);
            VideoFileEntry {
                file_index: index + 1,
                file_name: file.path.clone(),
                size: file.length,
                seasons: parsed.seasons,
                episodes: parsed.episodes,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use crate::torrent_item::Privacy;

    fn raw_item(raw_title: &str, kind: MediaKind) -> TorrentItem {
        TorrentItem::new(
            raw_title.to_string(),
            1000,
            None,
            None,
            10,
            "Jackett".to_string(),
            kind,
            Privacy::Public,
        )
    }

    fn series_media() -> Media {
        Media {
            kind: MediaKind::Series,
            imdb_id: "tt0903747".to_string(),
            tmdb_id: None,
            titles: vec!["Breaking Bad".to_string()],
            year: None,
            season: Some("S03".to_string()),
            episode: Some("E07".to_string()),
            languages: vec!["en".to_string()],
        }
    }

    fn meta_files(entries: &[(&str, u64)]) -> Vec<MetaFile> {
        entries
            .iter()
            .map(|(path, length)| MetaFile {
                path: path.to_string(),
                length: *length,
            })
            .collect()
    }

    #[test]
    fn magnet_links_fill_identity() {
        let mut item = raw_item("Some.Movie.2020.1080p", MediaKind::Movie);
        item.link = Some(
            "magnet:?xt=urn:btih:BE2D7CD9F6B0FDFC035EDFEE4EBD567003EBC254&tr=udp%3A%2F%2Ft.example%3A80"
                .to_string(),
        );
        let item = process_magnet(item);
        assert_eq!(
            item.info_hash.as_deref(),
            Some("be2d7cd9f6b0fdfc035edfee4ebd567003ebc254")
        );
        assert_eq!(item.trackers, vec!["udp://t.example:80"]);
        assert!(item.magnet.unwrap().starts_with("magnet:"));
    }

    #[test]
    fn episode_selection_prefers_largest_match() {
        let files = meta_files(&[
            ("Breaking.Bad.S03E07.480p.mkv", 300),
            ("Breaking.Bad.S03E07.1080p.mkv", 900),
            ("Breaking.Bad.S03E08.1080p.mkv", 950),
        ]);
        let (index, file) = select_episode_file(&files, 3, 7).unwrap();
        assert_eq!(index, 2);
        assert_eq!(file.path, "Breaking.Bad.S03E07.1080p.mkv");
    }

    #[test]
    fn no_match_builds_a_video_index() {
        let files = meta_files(&[
            ("Breaking.Bad.S03E01.mkv", 700),
            ("Breaking.Bad.S03E02.mkv", 800),
            ("extras/sample.nfo", 1),
        ]);
        assert!(select_episode_file(&files, 4, 1).is_none());
        let index = video_full_index(&files);
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].file_index, 1);
        assert_eq!(index[0].seasons, vec![3]);
        assert_eq!(index[0].episodes, vec![1]);
    }

    #[test]
    fn movie_gets_largest_file() {
        let bytes = series_pack_torrent();
        let meta = Metainfo::from_bytes(&bytes).unwrap();
        let item = raw_item("Some.Movie.2020.1080p", MediaKind::Movie);
        let item = apply_metainfo(item, "https://example/file.torrent", &meta, &series_media());
        assert_eq!(item.file_index, Some(2));
        assert!(item.magnet.unwrap().contains(&meta.info_hash));
    }

    #[test]
    fn series_pack_selects_episode_and_rewrites_size() {
        let bytes = series_pack_torrent();
        let meta = Metainfo::from_bytes(&bytes).unwrap();
        let item = raw_item("Show.S01.COMPLETE.1080p", MediaKind::Series);
        let media = Media {
            season: Some("S01".to_string()),
            episode: Some("E01".to_string()),
            ..series_media()
        };
        let item = apply_metainfo(item, "https://example/file.torrent", &meta, &media);
        assert_eq!(item.file_index, Some(1));
        assert_eq!(item.file_name.as_deref(), Some("Show.S01E01.mkv"));
        assert_eq!(item.size, 700);
        assert_eq!(item.torrent_download.as_deref(), Some("https://example/file.torrent"));
    }

    fn series_pack_torrent() -> Vec<u8> {
        let info = b"d5:filesld6:lengthi700e4:pathl15:Show.S01E01.mkveed6:lengthi900e4:pathl15:Show.S01E02.mkveee4:name8:Show.S0112:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaae";
        let mut torrent = Vec::new();
        torrent.extend_from_slice(b"d8:announce17:udp://tracker/one4:info");
        torrent.extend_from_slice(info);
        torrent.push(b'e');
        torrent
    }
}
