use super::Filter;
use crate::{torrent_item::TorrentItem, user_config::UserConfig};

/// Drops items whose raw title contains any configured keyword, compared
/// uppercased.
#[derive(Debug)]
pub struct TitleExclusionFilter {
    keywords: Vec<String>,
}

impl TitleExclusionFilter {
    pub fn new(config: &UserConfig) -> Self {
        Self {
            keywords: config
                .exclusion_keywords
                .iter()
                .map(|keyword| keyword.to_uppercase())
                .collect(),
        }
    }
}

impl Filter for TitleExclusionFilter {
    fn name(&self) -> &'static str {
        "exclusionKeywords"
    }

    fn is_enabled(&self) -> bool {
        !self.keywords.is_empty()
    }

    fn apply(&self, items: Vec<TorrentItem>) -> Vec<TorrentItem> {
        items
            .into_iter()
            .filter(|item| {
                let title = item.raw_title.to_uppercase();
                !self.keywords.iter().any(|keyword| title.contains(keyword))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::item;

    #[test]
    fn excludes_by_substring_case_insensitively() {
        let config = UserConfig {
            exclusion_keywords: vec!["3d".to_string(), "EXTENDED".to_string()],
            ..UserConfig::default()
        };
        let filter = TitleExclusionFilter::new(&config);
        let flat = item("Movie.2020.1080p", 100, 5);
        let three_d = item("Movie.2020.3D.1080p", 100, 5);
        let extended = item("Movie.2020.Extended.Cut.1080p", 100, 5);
        let kept = filter.apply(vec![flat, three_d, extended]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].raw_title, "Movie.2020.1080p");
    }
}
