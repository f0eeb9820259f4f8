use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Series,
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Movie => write!(f, "movie"),
            MediaKind::Series => write!(f, "series"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaKind::Movie),
            "series" => Ok(MediaKind::Series),
            rest => Err(anyhow::anyhow!("unknown media kind: {rest}")),
        }
    }
}

/// The media a search is about, derived from the metadata provider response.
/// Immutable within a request. Season and episode carry the player's
/// zero-padded tags (`S03` / `E07`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub kind: MediaKind,
    pub imdb_id: String,
    pub tmdb_id: Option<u64>,
    /// Localised titles, user-preferred language first.
    pub titles: Vec<String>,
    pub year: Option<String>,
    pub season: Option<String>,
    pub episode: Option<String>,
    /// Preferred language codes, in order.
    pub languages: Vec<String>,
}

impl Media {
    pub fn primary_title(&self) -> &str {
        self.titles.first().map(String::as_str).unwrap_or_default()
    }

    pub fn primary_language(&self) -> &str {
        self.languages.first().map(String::as_str).unwrap_or("en")
    }

    pub fn season_number(&self) -> Option<u32> {
        parse_tag(self.season.as_deref()?, 'S')
    }

    pub fn episode_number(&self) -> Option<u32> {
        parse_tag(self.episode.as_deref()?, 'E')
    }

    pub fn season_tag(number: u32) -> String {
        format!("S{:02}", number)
    }

    pub fn episode_tag(number: u32) -> String {
        format!("E{:02}", number)
    }
}

fn parse_tag(tag: &str, prefix: char) -> Option<u32> {
    tag.trim_start_matches(prefix)
        .trim_start_matches(prefix.to_ascii_lowercase())
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series() -> Media {
        Media {
            kind: MediaKind::Series,
            imdb_id: "tt0903747".to_string(),
            tmdb_id: Some(1396),
            titles: vec!["Breaking Bad".to_string()],
            year: None,
            season: Some("S03".to_string()),
            episode: Some("E07".to_string()),
            languages: vec!["en".to_string()],
        }
    }

    #[test]
    fn season_episode_tags_roundtrip() {
        let media = series();
        assert_eq!(media.season_number(), Some(3));
        assert_eq!(media.episode_number(), Some(7));
        assert_eq!(Media::season_tag(3), "S03");
        assert_eq!(Media::episode_tag(7), "E07");
    }

    #[test]
    fn media_kind_parses() {
        assert_eq!(MediaKind::from_str("movie").unwrap(), MediaKind::Movie);
        assert_eq!(MediaKind::from_str("series").unwrap(), MediaKind::Series);
        assert!(MediaKind::from_str("music").is_err());
    }
}
