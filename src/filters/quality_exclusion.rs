use std::collections::HashSet;

use super::Filter;
use crate::{torrent_item::TorrentItem, user_config::UserConfig};

const RIPS: &[&str] = &["HDRIP", "BRRIP", "BDRIP", "WEBRIP", "TVRIP", "VODRIP"];
const CAMS: &[&str] = &[
    "CAM", "TS", "TC", "R5", "DVDSCR", "HDTV", "PDTV", "DSR", "WORKPRINT", "VHSRIP", "HDCAM",
];

/// Drops items whose resolution or source quality is on the exclusion list.
/// `RIPS` and `CAM` expand to their category groups, `HEVC` targets the
/// codec.
#[derive(Debug)]
pub struct QualityExclusionFilter {
    excluded: HashSet<String>,
    exclude_rips: bool,
    exclude_cams: bool,
    exclude_hevc: bool,
}

impl QualityExclusionFilter {
    pub fn new(config: &UserConfig) -> Self {
        let excluded: HashSet<String> = config
            .exclusion
            .iter()
            .map(|token| token.to_uppercase())
            .collect();
        Self {
            exclude_rips: excluded.contains("RIPS"),
            exclude_cams: excluded.contains("CAM"),
            exclude_hevc: excluded.contains("HEVC"),
            excluded,
        }
    }

    fn is_allowed(&self, item: &TorrentItem) -> bool {
        let parsed = &item.parsed_data;
        for marker in [parsed.resolution.as_deref(), parsed.quality.as_deref()] {
            let Some(marker) = marker.map(str::to_uppercase) else {
                continue;
            };
            if self.excluded.contains(&marker) {
                return false;
            }
            if self.exclude_rips && RIPS.contains(&marker.as_str()) {
                return false;
            }
            if self.exclude_cams && CAMS.contains(&marker.as_str()) {
                return false;
            }
        }
        if self.exclude_hevc {
            if let Some(codec) = parsed.codec.as_deref() {
                if codec.eq_ignore_ascii_case("HEVC") {
                    return false;
                }
            }
        }
        true
    }
}

impl Filter for QualityExclusionFilter {
    fn name(&self) -> &'static str {
        "exclusion"
    }

    fn is_enabled(&self) -> bool {
        !self.excluded.is_empty()
    }

    fn apply(&self, items: Vec<TorrentItem>) -> Vec<TorrentItem> {
        items
            .into_iter()
            .filter(|item| self.is_allowed(item))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::test_support::item;

    fn filter_with(exclusion: &[&str]) -> QualityExclusionFilter {
        let config = UserConfig {
            exclusion: exclusion.iter().map(|t| t.to_string()).collect(),
            ..UserConfig::default()
        };
        QualityExclusionFilter::new(&config)
    }

    #[test]
    fn cam_and_hevc_exclusion() {
        let filter = filter_with(&["CAM", "HEVC"]);
        let cam = item("Movie.2024.HDCAM.XviD", 100, 5);
        let hevc = item("Movie.2024.1080p.WEB.x265", 100, 5);
        let clean = item("Movie.2024.1080p.WEB.x264", 100, 5);

        let kept = filter.apply(vec![cam, hevc, clean]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].raw_title, "Movie.2024.1080p.WEB.x264");
    }

    #[test]
    fn rips_group_expands() {
        let filter = filter_with(&["RIPS"]);
        let webrip = item("Movie.2024.1080p.WEBRip.x264", 100, 5);
        let webdl = item("Movie.2024.1080p.WEB-DL.x264", 100, 5);
        let kept = filter.apply(vec![webrip, webdl]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].raw_title, "Movie.2024.1080p.WEB-DL.x264");
    }

    #[test]
    fn resolution_tokens_exclude_directly() {
        let filter = filter_with(&["2160p"]);
        let uhd = item("Movie.2024.2160p.WEB.x264", 100, 5);
        let fhd = item("Movie.2024.1080p.WEB.x264", 100, 5);
        let kept = filter.apply(vec![uhd, fhd]);
        assert_eq!(kept.len(), 1);
        assert_eq!(
            kept[0].parsed_data.resolution.as_deref(),
            Some("1080p")
        );
    }

    #[test]
    fn disabled_without_configuration() {
        assert!(!filter_with(&[]).is_enabled());
    }
}
