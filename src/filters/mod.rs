use std::collections::HashMap;

use crate::{
    media::{Media, MediaKind},
    torrent_item::TorrentItem,
    user_config::{SortOrder, UserConfig},
};

pub mod language;
pub mod max_size;
pub mod quality_exclusion;
pub mod results_per_quality;
pub mod title_exclusion;

pub use language::LanguageFilter;
pub use max_size::MaxSizeFilter;
pub use quality_exclusion::QualityExclusionFilter;
pub use results_per_quality::ResultsPerQualityFilter;
pub use title_exclusion::TitleExclusionFilter;

/// A configured predicate over a result list. Filters compose in a fixed
/// order at the end of the search pipeline and are idempotent.
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_enabled(&self) -> bool {
        true
    }
    fn apply(&self, items: Vec<TorrentItem>) -> Vec<TorrentItem>;
}

/// Runs the full §filter pipeline: media matching, title matching, then the
/// configured filters in order.
pub fn filter_items(items: Vec<TorrentItem>, media: &Media, config: &UserConfig) -> Vec<TorrentItem> {
    let mut items = match media.kind {
        MediaKind::Series => filter_out_non_matching_series(
            items,
            media.season_number().unwrap_or(0),
            media.episode_number().unwrap_or(0),
        ),
        MediaKind::Movie => filter_out_non_matching_movies(items, media.year.as_deref()),
    };
    tracing::debug!("{} items after media matching", items.len());

    items = remove_non_matching_titles(items, &media.titles);
    tracing::debug!("{} items after title matching", items.len());

    let filters: Vec<Box<dyn Filter>> = vec![
        Box::new(LanguageFilter::new(config)),
        Box::new(MaxSizeFilter::new(config, media.kind)),
        Box::new(TitleExclusionFilter::new(config)),
        Box::new(QualityExclusionFilter::new(config)),
        Box::new(ResultsPerQualityFilter::new(config)),
    ];
    for filter in filters {
        if !filter.is_enabled() {
            continue;
        }
        let before = items.len();
        items = filter.apply(items);
        tracing::debug!(filter = filter.name(), before, after = items.len(), "Applied filter");
    }
    items
}

/// Series results must cover the requested episode: an exact (season,
/// episode) hit, or a season hit with no episode markers (a pack).
pub fn filter_out_non_matching_series(
    items: Vec<TorrentItem>,
    season: u32,
    episode: u32,
) -> Vec<TorrentItem> {
    items
        .into_iter()
        .filter(|item| {
            let parsed = &item.parsed_data;
            if parsed.seasons.is_empty() && parsed.episodes.is_empty() {
                return false;
            }
            if parsed.episodes.is_empty() {
                return parsed.seasons.contains(&season);
            }
            parsed.seasons.contains(&season) && parsed.episodes.contains(&episode)
        })
        .collect()
}

/// Movie results must name the release year somewhere in the raw title.
pub fn filter_out_non_matching_movies(
    items: Vec<TorrentItem>,
    year: Option<&str>,
) -> Vec<TorrentItem> {
    let Some(year) = year.filter(|y| !y.is_empty()) else {
        return items;
    };
    items
        .into_iter()
        .filter(|item| {
            item.raw_title
                .match_indices(year)
                .any(|(idx, matched)| {
                    let before = item.raw_title[..idx].chars().next_back();
                    let after = item.raw_title[idx + matched.len()..].chars().next();
                    !before.is_some_and(|c| c.is_ascii_alphanumeric())
                        && !after.is_some_and(|c| c.is_ascii_alphanumeric())
                })
        })
        .collect()
}

const TITLE_STOP_WORDS: &[&str] = &["integrale", "complete", "complet", "integral"];

fn title_words(title: &str) -> Vec<String> {
    title
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|word| !TITLE_STOP_WORDS.contains(word))
        .map(str::to_string)
        .collect()
}

fn is_ordered_subset(needle: &[String], haystack: &[String]) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut position = 0;
    for word in needle {
        match haystack[position..].iter().position(|h| h == word) {
            Some(offset) => position += offset + 1,
            None => return false,
        }
    }
    true
}

/// Accepts a parsed title when it and a media title agree in either
/// direction, or when they collapse to the same string once punctuation is
/// gone (`S.W.A.T` vs `SWAT`).
pub fn titles_match(media_title: &str, parsed_title: &str) -> bool {
    let media_words = title_words(media_title);
    let parsed_words = title_words(parsed_title);
    if is_ordered_subset(&media_words, &parsed_words)
        || is_ordered_subset(&parsed_words, &media_words)
    {
        return true;
    }
    let collapse = |words: &[String]| words.concat();
    !media_words.is_empty() && collapse(&media_words) == collapse(&parsed_words)
}

pub fn remove_non_matching_titles(items: Vec<TorrentItem>, titles: &[String]) -> Vec<TorrentItem> {
    items
        .into_iter()
        .filter(|item| {
            titles
                .iter()
                .any(|title| titles_match(title, &item.parsed_data.parsed_title))
        })
        .collect()
}

/// Merges cached and freshly searched results. Keyed by `(raw_title, size)`;
/// a collision keeps the entry with more seeders. Associative, idempotent,
/// and commutative modulo that tiebreak.
pub fn merge_items(cache_items: Vec<TorrentItem>, search_items: Vec<TorrentItem>) -> Vec<TorrentItem> {
    let mut order: Vec<(String, u64)> = Vec::new();
    let mut merged: HashMap<(String, u64), TorrentItem> = HashMap::new();
    for item in cache_items.into_iter().chain(search_items) {
        let key = (item.raw_title.clone(), item.size);
        match merged.get(&key) {
            Some(existing) if existing.seeders >= item.seeders => {}
            Some(_) => {
                merged.insert(key, item);
            }
            None => {
                order.push(key.clone());
                merged.insert(key, item);
            }
        }
    }
    order
        .into_iter()
        .map(|key| merged.remove(&key).expect("key tracked on insert"))
        .collect()
}

fn quality_rank(item: &TorrentItem) -> u32 {
    match item.parsed_data.resolution.as_deref() {
        Some("2160p") => 0,
        Some("1080p") => 1,
        Some("720p") => 2,
        Some("480p") => 3,
        _ => u32::MAX,
    }
}

/// Final result ordering. All variants are stable with respect to the input.
pub fn sort_items(items: &mut [TorrentItem], sort: SortOrder) {
    match sort {
        SortOrder::Quality => items.sort_by_key(quality_rank),
        SortOrder::SizeAsc => items.sort_by_key(|item| item.size),
        SortOrder::SizeDesc => items.sort_by_key(|item| std::cmp::Reverse(item.size)),
        SortOrder::QualityThenSize => {
            items.sort_by_key(|item| (quality_rank(item), std::cmp::Reverse(item.size)))
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::media::MediaKind;
    use crate::torrent_item::{Privacy, TorrentItem};

    pub fn item(raw_title: &str, size: u64, seeders: u32) -> TorrentItem {
        TorrentItem::new(
            raw_title.to_string(),
            size,
            Some(format!("{:040x}", size ^ u64::from(seeders))),
            None,
            seeders,
            "Jackett".to_string(),
            MediaKind::Movie,
            Privacy::Public,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::item;
    use super::*;

    #[test]
    fn series_matching_keeps_exact_and_pack_hits() {
        let mut episode = item("Breaking.Bad.S03E07.720p", 700, 10);
        episode.kind = MediaKind::Series;
        let mut pack = item("Breaking.Bad.S03.COMPLETE.1080p", 9000, 10);
        pack.kind = MediaKind::Series;
        let mut wrong = item("Breaking.Bad.S02E07.720p", 700, 10);
        wrong.kind = MediaKind::Series;
        let mut unmarked = item("Breaking.Bad.720p", 700, 10);
        unmarked.kind = MediaKind::Series;

        let kept = filter_out_non_matching_series(vec![episode, pack, wrong, unmarked], 3, 7);
        let titles: Vec<_> = kept.iter().map(|i| i.raw_title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Breaking.Bad.S03E07.720p",
                "Breaking.Bad.S03.COMPLETE.1080p"
            ]
        );
    }

    #[test]
    fn movie_matching_requires_year() {
        let right = item("Inception.2010.1080p.BluRay", 8_000, 10);
        let wrong = item("Inception.2012.Parody.1080p", 8_000, 10);
        let kept = filter_out_non_matching_movies(vec![right, wrong], Some("2010"));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].raw_title, "Inception.2010.1080p.BluRay");
    }

    #[test]
    fn title_match_directions_and_fuzzy() {
        assert!(titles_match("Breaking Bad", "Breaking Bad"));
        // Ordered subset in either direction.
        assert!(titles_match("Dune", "Dune Part One"));
        assert!(titles_match("Dune Part One", "Dune"));
        // Stop words from season packs do not break the match.
        assert!(titles_match("The Wire", "The Wire INTEGRALE"));
        // Punctuation collapse.
        assert!(titles_match("S.W.A.T.", "SWAT"));
        // Disjoint titles stay out.
        assert!(!titles_match("Breaking Bad", "Better Call Saul"));
        assert!(!titles_match("", "Anything"));
    }

    #[test]
    fn merge_prefers_higher_seeders() {
        let low = item("Movie.2020.1080p", 1000, 3);
        let high = item("Movie.2020.1080p", 1000, 9);
        let other = item("Movie.2020.720p", 500, 1);

        let merged = merge_items(vec![low.clone()], vec![high.clone(), other.clone()]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].seeders, 9);

        // Commutative as a multiset, modulo the seeders tiebreak.
        let flipped = merge_items(vec![high, other], vec![low]);
        assert_eq!(flipped.len(), 2);
        assert!(flipped.iter().any(|i| i.seeders == 9));

        // Idempotent.
        let again = merge_items(merged.clone(), merged.clone());
        assert_eq!(again.len(), merged.len());
    }

    #[test]
    fn sort_orders() {
        let mut items = vec![
            item("A.720p", 10, 0),
            item("B.2160p", 30, 0),
            item("C.1080p", 20, 0),
            item("D.NoRes", 40, 0),
        ];
        sort_items(&mut items, SortOrder::Quality);
        let resolutions: Vec<_> = items
            .iter()
            .map(|i| i.parsed_data.resolution.clone())
            .collect();
        assert_eq!(
            resolutions,
            vec![
                Some("2160p".to_string()),
                Some("1080p".to_string()),
                Some("720p".to_string()),
                None
            ]
        );

        sort_items(&mut items, SortOrder::SizeAsc);
        assert_eq!(items[0].size, 10);
        sort_items(&mut items, SortOrder::SizeDesc);
        assert_eq!(items[0].size, 40);
    }

    #[test]
    fn quality_then_size_breaks_ties_by_size() {
        let mut items = vec![
            item("A.1080p", 10, 0),
            item("B.1080p", 50, 0),
            item("C.2160p", 5, 0),
        ];
        sort_items(&mut items, SortOrder::QualityThenSize);
        let titles: Vec<_> = items.iter().map(|i| i.raw_title.as_str()).collect();
        assert_eq!(titles, vec!["C.2160p", "B.1080p", "A.1080p"]);
    }
}
