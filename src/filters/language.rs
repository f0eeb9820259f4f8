use super::Filter;
use crate::{parser, torrent_item::TorrentItem, user_config::UserConfig};

/// Keeps items carrying `multi` or any of the user's preferred languages.
///
/// DMM corpus rows are a special case: their language markers are guesses, so
/// a claimed French or multi dub only counts when a known French release
/// group signs the title.
#[derive(Debug)]
pub struct LanguageFilter {
    languages: Vec<String>,
}

impl LanguageFilter {
    pub fn new(config: &UserConfig) -> Self {
        Self {
            languages: config.languages.clone(),
        }
    }
}

impl Filter for LanguageFilter {
    fn name(&self) -> &'static str {
        "languages"
    }

    fn is_enabled(&self) -> bool {
        !self.languages.is_empty()
    }

    fn apply(&self, items: Vec<TorrentItem>) -> Vec<TorrentItem> {
        items
            .into_iter()
            .filter_map(|mut item| {
                if item.languages.is_empty() {
                    return None;
                }
                let mut languages = item.languages.clone();
                if item.indexer == "DMM" {
                    for claimed in ["multi", "fr"] {
                        if languages.iter().any(|l| l == claimed)
                            && !parser::is_french_release_group(&item.raw_title)
                        {
                            languages.retain(|l| l != claimed);
                        }
                    }
                }
                let keep = languages.iter().any(|l| l == "multi")
                    || languages.iter().any(|l| self.languages.contains(l));
                if keep {
                    item.languages = languages;
                    Some(item)
                } else {
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::item;

    fn config_with(languages: &[&str]) -> UserConfig {
        UserConfig {
            languages: languages.iter().map(|l| l.to_string()).collect(),
            ..UserConfig::default()
        }
    }

    #[test]
    fn keeps_preferred_and_multi() {
        let filter = LanguageFilter::new(&config_with(&["fr"]));
        let french = item("Film.2020.FRENCH.1080p", 100, 5);
        let multi = item("Movie.2020.MULTI.1080p", 100, 5);
        let english = item("Movie.2020.ENGLISH.1080p", 100, 5);
        let kept = filter.apply(vec![french, multi, english]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn dmm_multi_requires_french_group() {
        let filter = LanguageFilter::new(&config_with(&["fr"]));
        let mut unsigned = item("Film.2020.MULTI.1080p.WEB.H264", 100, 5);
        unsigned.indexer = "DMM".to_string();
        let mut signed = item("Film.2020.MULTI.1080p.WEB.H264-FW", 100, 5);
        signed.indexer = "DMM".to_string();

        let kept = filter.apply(vec![unsigned, signed]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].raw_title, "Film.2020.MULTI.1080p.WEB.H264-FW");
    }

    #[test]
    fn filter_is_idempotent() {
        let filter = LanguageFilter::new(&config_with(&["en"]));
        let items = vec![
            item("Movie.2020.ENGLISH.1080p", 100, 5),
            item("Film.2020.FRENCH.1080p", 100, 5),
        ];
        let once = filter.apply(items);
        let twice = filter.apply(once.clone());
        assert_eq!(
            once.iter().map(|i| &i.raw_title).collect::<Vec<_>>(),
            twice.iter().map(|i| &i.raw_title).collect::<Vec<_>>()
        );
    }
}
