use std::collections::HashMap;

use crate::{
    debrid::{AvailabilityResponse, alldebrid::AdFileNode},
    indexers::PublicCacheApi,
    media::{Media, MediaKind},
    parser,
    torrent_item::{ProviderTag, TorrentItem, VideoFileEntry},
};

/// A candidate file inside a provider-cached torrent.
#[derive(Debug, Clone, PartialEq)]
struct FileCandidate {
    file_index: usize,
    file_name: String,
    size: u64,
}

/// In-memory view of a search's results keyed by infohash. Deduplicates on
/// first insertion, absorbs availability manifests from every configured
/// debrid, and yields the directly playable subset.
#[derive(Debug)]
pub struct SmartContainer {
    order: Vec<String>,
    items: HashMap<String, TorrentItem>,
    media: Media,
}

impl SmartContainer {
    pub fn new(items: Vec<TorrentItem>, media: Media) -> Self {
        let mut order = Vec::new();
        let mut by_hash = HashMap::new();
        for item in items {
            let Some(hash) = item.info_hash.clone() else {
                continue;
            };
            if by_hash.contains_key(&hash) {
                tracing::debug!(hash, "Skipping duplicate info hash");
                continue;
            }
            order.push(hash.clone());
            by_hash.insert(hash, item);
        }
        tracing::info!("Container holds {} unique torrents", order.len());
        Self {
            order,
            items: by_hash,
            media,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Hashes still lacking an availability claim, in insertion order.
    pub fn unavailable_hashes(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|hash| {
                self.items
                    .get(*hash)
                    .is_some_and(|item| !item.is_available())
            })
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<TorrentItem> {
        self.order
            .iter()
            .filter_map(|hash| self.items.get(hash))
            .cloned()
            .collect()
    }

    /// Items that can be handed to the player right now: a selected file, a
    /// late full-index hit, or a bare magnet the debrid will sort out. A
    /// fetched torrent with no episode match stays out.
    pub fn best_matching(&mut self) -> Vec<TorrentItem> {
        let season = self.media.season_number();
        let episode = self.media.episode_number();
        let mut matching = Vec::new();
        for hash in &self.order {
            let Some(item) = self.items.get_mut(hash) else {
                continue;
            };
            if item.torrent_download.is_none() {
                matching.push(item.clone());
                continue;
            }
            if item.file_index.is_some() {
                matching.push(item.clone());
                continue;
            }
            let late_hit = match (season, episode, item.full_index.as_deref()) {
                (Some(season), Some(episode), Some(full_index)) => {
                    find_matching_video(full_index, season, episode)
                }
                _ => None,
            };
            if let Some(entry) = late_hit {
                item.file_index = Some(entry.file_index);
                item.file_name = Some(entry.file_name.clone());
                item.size = entry.size;
                matching.push(item.clone());
            }
        }
        tracing::info!("{} of {} torrents are playable", matching.len(), self.order.len());
        matching
    }

    /// Applies one provider's availability manifest. Dispatch is by response
    /// shape; an item claimed by an earlier provider is never overwritten.
    pub fn update_availability(&mut self, response: AvailabilityResponse) {
        match response {
            AvailabilityResponse::RealDebrid(entries) => self.update_realdebrid(entries),
            AvailabilityResponse::AllDebrid(magnets) => self.update_alldebrid(magnets),
            AvailabilityResponse::Torbox(entries) => self.update_torbox(entries),
            AvailabilityResponse::Premiumize { hashes, cached } => {
                self.update_premiumize(&hashes, &cached)
            }
        }
    }

    fn update_realdebrid(
        &mut self,
        entries: HashMap<String, crate::debrid::realdebrid::RdHashEntry>,
    ) {
        let media = self.media.clone();
        for (hash, entry) in entries {
            let Some(item) = self.items.get_mut(&hash.to_lowercase()) else {
                continue;
            };
            let mut candidates = Vec::new();
            for variant in &entry.rd {
                match item.kind {
                    MediaKind::Series => {
                        let (Some(season), Some(episode)) =
                            (media.season_number(), media.episode_number())
                        else {
                            continue;
                        };
                        // First variant carrying the episode wins.
                        let hit = variant.iter().find(|(_, file)| {
                            parser::season_episode_in_filename(&file.filename, season, episode)
                        });
                        if let Some((index, file)) = hit {
                            candidates.push(FileCandidate {
                                file_index: index.parse().unwrap_or(1),
                                file_name: file.filename.clone(),
                                size: file.filesize,
                            });
                            break;
                        }
                    }
                    MediaKind::Movie => {
                        candidates.extend(variant.iter().map(|(index, file)| FileCandidate {
                            file_index: index.parse().unwrap_or(1),
                            file_name: file.filename.clone(),
                            size: file.filesize,
                        }));
                    }
                }
            }
            update_file_details(item, candidates, ProviderTag::RealDebrid);
        }
    }

    fn update_alldebrid(&mut self, magnets: Vec<crate::debrid::alldebrid::AdMagnet>) {
        let media = self.media.clone();
        for magnet in magnets {
            if !magnet.instant {
                continue;
            }
            let Some(item) = self.items.get_mut(&magnet.hash.to_lowercase()) else {
                continue;
            };
            let mut candidates = Vec::new();
            let mut next_index = 1;
            explore_folders(
                &magnet.files,
                item.kind,
                &media,
                &mut next_index,
                &mut candidates,
            );
            update_file_details(item, candidates, ProviderTag::AllDebrid);
        }
    }

    fn update_torbox(&mut self, entries: HashMap<String, crate::debrid::torbox::TbCachedEntry>) {
        let media = self.media.clone();
        for (hash, entry) in entries {
            let Some(item) = self.items.get_mut(&hash.to_lowercase()) else {
                continue;
            };
            let candidates: Vec<FileCandidate> = entry
                .files
                .iter()
                .enumerate()
                .filter(|(_, file)| match item.kind {
                    MediaKind::Series => {
                        match (media.season_number(), media.episode_number()) {
                            (Some(season), Some(episode)) => {
                                parser::season_episode_in_filename(&file.name, season, episode)
                            }
                            _ => false,
                        }
                    }
                    MediaKind::Movie => true,
                })
                .map(|(position, file)| FileCandidate {
                    file_index: position + 1,
                    file_name: file.name.clone(),
                    size: file.size,
                })
                .collect();
            update_file_details(item, candidates, ProviderTag::Torbox);
        }
    }

    fn update_premiumize(&mut self, hashes: &[String], cached: &[bool]) {
        for (hash, is_cached) in hashes.iter().zip(cached) {
            if !is_cached {
                continue;
            }
            if let Some(item) = self.items.get_mut(&hash.to_lowercase()) {
                item.mark_available(ProviderTag::Premiumize);
            }
        }
    }

    /// Best-effort write-back of public results to the community cache.
    /// Fire-and-forget: the response does not wait for it.
    pub fn cache_container_items(&self, api: &'static PublicCacheApi) {
        let items = self.snapshot();
        let media = self.media.clone();
        tokio::spawn(async move {
            api.push_results(&items, &media).await;
        });
    }
}

/// Picks the largest candidate and stamps the claim onto the item. Items
/// already claimed by an earlier provider keep their claim; availability
/// never regresses.
fn update_file_details(
    item: &mut TorrentItem,
    candidates: Vec<FileCandidate>,
    provider: ProviderTag,
) {
    if item.is_available() {
        return;
    }
    let Some(best) = candidates.into_iter().max_by_key(|candidate| candidate.size) else {
        return;
    };
    item.mark_available(provider);
    item.file_index = Some(best.file_index);
    item.file_name = Some(best.file_name);
    item.size = best.size;
}

/// Walks an AllDebrid folder tree in traversal order, numbering leaves from
/// `next_index`, collecting candidate files for the media.
fn explore_folders(
    nodes: &[AdFileNode],
    kind: MediaKind,
    media: &Media,
    next_index: &mut usize,
    candidates: &mut Vec<FileCandidate>,
) {
    for node in nodes {
        if let Some(children) = &node.e {
            explore_folders(children, kind, media, next_index, candidates);
            continue;
        }
        let wanted = match kind {
            MediaKind::Series => match (media.season_number(), media.episode_number()) {
                (Some(season), Some(episode)) => {
                    parser::season_episode_in_filename(&node.n, season, episode)
                }
                _ => false,
            },
            MediaKind::Movie => true,
        };
        if wanted {
            candidates.push(FileCandidate {
                file_index: *next_index,
                file_name: node.n.clone(),
                size: node.s.unwrap_or(0),
            });
        }
        *next_index += 1;
    }
}

fn find_matching_video(
    full_index: &[VideoFileEntry],
    season: u32,
    episode: u32,
) -> Option<&VideoFileEntry> {
    full_index
        .iter()
        .filter(|entry| entry.seasons.contains(&season) && entry.episodes.contains(&episode))
        .max_by_key(|entry| entry.size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debrid::alldebrid::AdMagnet;
    use crate::debrid::realdebrid::{RdHashEntry, RdVariantFile};
    use crate::torrent_item::Privacy;

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

    fn item_with_hash(raw_title: &str, hash: &str, kind: MediaKind) -> TorrentItem {
        let mut item = TorrentItem::new(
            raw_title.to_string(),
            8_000_000_000,
            Some(hash.to_string()),
            None,
            42,
            "Jackett".to_string(),
            kind,
            Privacy::Public,
        );
        item.magnet = Some(format!("magnet:?xt=urn:btih:{hash}"));
        item
    }

    #[test]
    fn deduplicates_on_first_insertion() {
        let media = movie_media();
        let hash = "a".repeat(40);
        let first = item_with_hash("Inception.2010.1080p", &hash, MediaKind::Movie);
        let second = item_with_hash("Inception.2010.1080p.DUP", &hash, MediaKind::Movie);
        let container = SmartContainer::new(vec![first, second], media);
        assert_eq!(container.len(), 1);
        assert_eq!(container.snapshot()[0].raw_title, "Inception.2010.1080p");
    }

    #[test]
    fn realdebrid_manifest_marks_movie_available() {
        let media = movie_media();
        let hash = "a".repeat(40);
        let item = item_with_hash(
            "Inception.2010.MULTi.1080p.BluRay.x264-Group",
            &hash,
            MediaKind::Movie,
        );
        let mut container = SmartContainer::new(vec![item], media);

        let mut variant = HashMap::new();
        variant.insert(
            "1".to_string(),
            RdVariantFile {
                filename: "Inception.2010.1080p.mkv".to_string(),
                filesize: 8_000_000_000,
            },
        );
        let mut entries = HashMap::new();
        entries.insert(hash.clone(), RdHashEntry { rd: vec![variant] });

        container.update_availability(AvailabilityResponse::RealDebrid(entries));

        let items = container.snapshot();
        assert_eq!(items[0].availability, Some(ProviderTag::RealDebrid));
        assert_eq!(items[0].file_index, Some(1));
        assert_eq!(items[0].file_name.as_deref(), Some("Inception.2010.1080p.mkv"));
        assert!(container.unavailable_hashes().is_empty());
    }

    #[test]
    fn alldebrid_folder_tree_finds_episode() {
        let media = series_media();
        let hash = "b".repeat(40);
        let item = item_with_hash("Breaking.Bad.S03.COMPLETE.1080p", &hash, MediaKind::Series);
        let mut container = SmartContainer::new(vec![item], media);

        let tree = vec![AdFileNode {
            n: "Breaking.Bad.S03".to_string(),
            s: None,
            e: Some(vec![
                AdFileNode {
                    n: "Breaking.Bad.S03E06.mkv".to_string(),
                    s: Some(700),
                    e: None,
                },
                AdFileNode {
                    n: "Breaking.Bad.S03E07.mkv".to_string(),
                    s: Some(800),
                    e: None,
                },
                AdFileNode {
                    n: "Breaking.Bad.S03E07.PROPER.mkv".to_string(),
                    s: Some(900),
                    e: None,
                },
            ]),
        }];
        let magnets = vec![AdMagnet {
            hash: hash.clone(),
            instant: true,
            files: tree,
        }];
        container.update_availability(AvailabilityResponse::AllDebrid(magnets));

        let items = container.snapshot();
        assert_eq!(items[0].availability, Some(ProviderTag::AllDebrid));
        // Largest of the two matching files, numbered in traversal order.
        assert_eq!(items[0].file_name.as_deref(), Some("Breaking.Bad.S03E07.PROPER.mkv"));
        assert_eq!(items[0].file_index, Some(3));
        assert_eq!(items[0].size, 900);
    }

    #[test]
    fn premiumize_booleans_map_positionally() {
        let media = movie_media();
        let hash_a = "a".repeat(40);
        let hash_b = "b".repeat(40);
        let items = vec![
            item_with_hash("Movie.A.2010.1080p", &hash_a, MediaKind::Movie),
            item_with_hash("Movie.B.2010.1080p", &hash_b, MediaKind::Movie),
        ];
        let mut container = SmartContainer::new(items, media);
        container.update_availability(AvailabilityResponse::Premiumize {
            hashes: vec![hash_a.clone(), hash_b.clone()],
            cached: vec![false, true],
        });
        assert_eq!(container.unavailable_hashes(), vec![hash_a]);
    }

    #[test]
    fn availability_does_not_regress_across_providers() {
        let media = movie_media();
        let hash = "c".repeat(40);
        let item = item_with_hash("Movie.C.2010.1080p", &hash, MediaKind::Movie);
        let mut container = SmartContainer::new(vec![item], media);

        container.update_availability(AvailabilityResponse::Premiumize {
            hashes: vec![hash.clone()],
            cached: vec![true],
        });
        let mut entries = HashMap::new();
        let mut variant = HashMap::new();
        variant.insert(
            "1".to_string(),
            RdVariantFile {
                filename: "Movie.C.mkv".to_string(),
                filesize: 1,
            },
        );
        entries.insert(hash.clone(), RdHashEntry { rd: vec![variant] });
        container.update_availability(AvailabilityResponse::RealDebrid(entries));

        assert_eq!(
            container.snapshot()[0].availability,
            Some(ProviderTag::Premiumize)
        );
    }

    #[test]
    fn best_matching_excludes_unmatched_fetched_torrents() {
        let media = series_media();

        // Bare magnet: usable as-is.
        let magnet_only = item_with_hash("Breaking.Bad.S03E07.720p", &"d".repeat(40), MediaKind::Series);

        // Fetched torrent with a selected file: usable.
        let mut with_file = item_with_hash("Breaking.Bad.S03E07.1080p", &"e".repeat(40), MediaKind::Series);
        with_file.torrent_download = Some("https://example/1.torrent".to_string());
        with_file.file_index = Some(2);

        // Fetched season pack whose full index covers the episode: resolved late.
        let mut pack = item_with_hash("Breaking.Bad.S03.COMPLETE", &"f".repeat(40), MediaKind::Series);
        pack.torrent_download = Some("https://example/2.torrent".to_string());
        pack.full_index = Some(vec![VideoFileEntry {
            file_index: 7,
            file_name: "Breaking.Bad.S03E07.mkv".to_string(),
            size: 900,
            seasons: vec![3],
            episodes: vec![7],
        }]);

        // Fetched torrent with neither a file nor a matching index: excluded.
        let mut miss = item_with_hash("Breaking.Bad.S04.COMPLETE", &"1".repeat(40), MediaKind::Series);
        miss.torrent_download = Some("https://example/3.torrent".to_string());
        miss.full_index = Some(vec![VideoFileEntry {
            file_index: 1,
            file_name: "Breaking.Bad.S04E01.mkv".to_string(),
            size: 900,
            seasons: vec![4],
            episodes: vec![1],
        }]);

        let mut container =
            SmartContainer::new(vec![magnet_only, with_file, pack, miss], media);
        let matching = container.best_matching();
        let titles: Vec<_> = matching.iter().map(|item| item.raw_title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Breaking.Bad.S03E07.720p",
                "Breaking.Bad.S03E07.1080p",
                "Breaking.Bad.S03.COMPLETE"
            ]
        );
        let pack = matching
            .iter()
            .find(|item| item.raw_title == "Breaking.Bad.S03.COMPLETE")
            .unwrap();
        assert_eq!(pack.file_index, Some(7));
        assert_eq!(pack.size, 900);
    }
}
