use std::collections::HashMap;

use super::Filter;
use crate::{torrent_item::TorrentItem, user_config::UserConfig};

/// Caps how many items each resolution bucket may contribute, preserving the
/// input order inside every bucket.
#[derive(Debug)]
pub struct ResultsPerQualityFilter {
    max_per_quality: usize,
}

impl ResultsPerQualityFilter {
    pub fn new(config: &UserConfig) -> Self {
        Self {
            max_per_quality: config.results_per_quality,
        }
    }
}

impl Filter for ResultsPerQualityFilter {
    fn name(&self) -> &'static str {
        "resultsPerQuality"
    }

    fn is_enabled(&self) -> bool {
        self.max_per_quality > 0
    }

    fn apply(&self, items: Vec<TorrentItem>) -> Vec<TorrentItem> {
        let mut per_bucket: HashMap<String, usize> = HashMap::new();
        items
            .into_iter()
            .filter(|item| {
                let bucket = item
                    .parsed_data
                    .resolution
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                let count = per_bucket.entry(bucket).or_insert(0);
                *count += 1;
                *count <= self.max_per_quality
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::item;

    #[test]
    fn caps_each_resolution_bucket_in_order() {
        let config = UserConfig {
            results_per_quality: 2,
            ..UserConfig::default()
        };
        let filter = ResultsPerQualityFilter::new(&config);
        let items = vec![
            item("A.1080p", 1, 0),
            item("B.1080p", 2, 0),
            item("C.1080p", 3, 0),
            item("D.720p", 4, 0),
            item("E.NoRes", 5, 0),
            item("F.NoRes", 6, 0),
            item("G.NoRes", 7, 0),
        ];
        let kept = filter.apply(items);
        let titles: Vec<_> = kept.iter().map(|i| i.raw_title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["A.1080p", "B.1080p", "D.720p", "E.NoRes", "F.NoRes"]
        );
    }

    #[test]
    fn idempotent_under_reapplication() {
        let config = UserConfig {
            results_per_quality: 1,
            ..UserConfig::default()
        };
        let filter = ResultsPerQualityFilter::new(&config);
        let once = filter.apply(vec![item("A.1080p", 1, 0), item("B.1080p", 2, 0)]);
        let twice = filter.apply(once.clone());
        assert_eq!(once.len(), twice.len());
    }
}
