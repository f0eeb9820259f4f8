use super::Filter;
use crate::{media::MediaKind, torrent_item::TorrentItem, user_config::UserConfig};

const GIB: u64 = 1024 * 1024 * 1024;

/// Drops movies larger than the configured cap. Series are exempt because a
/// season pack's size says nothing about the single episode inside it.
#[derive(Debug)]
pub struct MaxSizeFilter {
    max_size_bytes: u64,
    kind: MediaKind,
}

impl MaxSizeFilter {
    pub fn new(config: &UserConfig, kind: MediaKind) -> Self {
        Self {
            max_size_bytes: config.max_size * GIB,
            kind,
        }
    }
}

impl Filter for MaxSizeFilter {
    fn name(&self) -> &'static str {
        "maxSize"
    }

    fn is_enabled(&self) -> bool {
        self.max_size_bytes > 0 && self.kind == MediaKind::Movie
    }

    fn apply(&self, items: Vec<TorrentItem>) -> Vec<TorrentItem> {
        items
            .into_iter()
            .filter(|item| item.size <= self.max_size_bytes)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::item;

    #[test]
    fn drops_oversized_movies() {
        let config = UserConfig {
            max_size: 2,
            ..UserConfig::default()
        };
        let filter = MaxSizeFilter::new(&config, MediaKind::Movie);
        assert!(filter.is_enabled());

        let small = item("Movie.2020.1080p", GIB, 5);
        let exact = item("Movie.2020.2160p", 2 * GIB, 5);
        let large = item("Movie.2020.REMUX", 3 * GIB, 5);
        let kept = filter.apply(vec![small, exact, large]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn disabled_for_series_and_zero_cap() {
        let config = UserConfig {
            max_size: 2,
            ..UserConfig::default()
        };
        assert!(!MaxSizeFilter::new(&config, MediaKind::Series).is_enabled());

        let config = UserConfig::default();
        assert!(!MaxSizeFilter::new(&config, MediaKind::Movie).is_enabled());
    }
}
