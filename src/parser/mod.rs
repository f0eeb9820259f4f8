use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

pub mod languages;

pub use languages::{
    detect_french_dub, detect_hdr, detect_languages, extract_french_release_group,
    is_french_release_group,
};

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "wmv", "ts", "webm", "flv", "mpg", "mpeg",
];

/// Everything the service can tell about a release from its title alone.
/// Parsing is total: any string produces a value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedData {
    pub parsed_title: String,
    pub seasons: Vec<u32>,
    pub episodes: Vec<u32>,
    pub resolution: Option<String>,
    pub quality: Option<String>,
    pub codec: Option<String>,
    pub audio: Vec<String>,
    pub hdr: Vec<String>,
    pub group: Option<String>,
    pub languages: Vec<String>,
    pub year: Option<u32>,
}

fn insensitive(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("parser pattern compiles")
}

static RESOLUTION: LazyLock<Regex> =
    LazyLock::new(|| insensitive(r"\b(2160p|4k|1440p|1080p|720p|576p|480p|360p)\b"));

/// Ordered source-quality table; the first hit wins so `WEB-DL` is tried
/// before the bare `WEB` and `BluRay` before the rip variants.
static QUALITY_TABLE: &[(&str, &str)] = &[
    ("REMUX", r"\bREMUX\b"),
    ("BluRay", r"\bBLU[-. ]?RAY\b"),
    ("BDRip", r"\bBDRIP\b"),
    ("BRRip", r"\bBRRIP\b"),
    ("WEB-DL", r"\bWEB[-. ]?DL\b"),
    ("WEBRip", r"\bWEB[-. ]?RIP\b"),
    ("HDRip", r"\bHDRIP\b"),
    ("DVDRip", r"\bDVDRIP\b"),
    ("TVRip", r"\bTVRIP\b"),
    ("VODRip", r"\bVODRIP\b"),
    ("VHSRip", r"\bVHSRIP\b"),
    ("DVDSCR", r"\bDVDSCR(?:EENER)?\b"),
    ("WORKPRINT", r"\bWORKPRINT\b"),
    ("HDCAM", r"\bHD[-. ]?CAM\b"),
    ("CAM", r"\bCAM(?:RIP)?\b"),
    ("TS", r"\b(?:TS|TELESYNC)\b"),
    ("TC", r"\b(?:TC|TELECINE)\b"),
    ("R5", r"\bR5\b"),
    ("HDTV", r"\bHDTV\b"),
    ("PDTV", r"\bPDTV\b"),
    ("DSR", r"\bDSR(?:IP)?\b"),
    ("WEB", r"\bWEB\b"),
];

static QUALITY_REGEXES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    QUALITY_TABLE
        .iter()
        .map(|(tag, pattern)| (*tag, insensitive(pattern)))
        .collect()
});

static CODEC_TABLE: &[(&str, &str)] = &[
    ("HEVC", r"\b(?:HEVC|[xh][-. ]?265)\b"),
    ("AVC", r"\b(?:AVC|[xh][-. ]?264)\b"),
    ("AV1", r"\bAV1\b"),
    ("XviD", r"\bXVID\b"),
    ("MPEG2", r"\bMPEG-?2\b"),
];

static CODEC_REGEXES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    CODEC_TABLE
        .iter()
        .map(|(tag, pattern)| (*tag, insensitive(pattern)))
        .collect()
});

static AUDIO_TABLE: &[(&str, &str)] = &[
    ("Atmos", r"\bATMOS\b"),
    ("TrueHD", r"\bTRUE[-. ]?HD\b"),
    ("DTS-HD", r"\bDTS[-. ]?HD(?:[-. ]?MA)?\b"),
    ("DTS", r"\bDTS\b"),
    ("DDP5.1", r"\bDDP[-. ]?5[-. ]1\b"),
    ("DDP", r"\bDD[P+]\b"),
    ("DD5.1", r"\bDD[-. ]?5[-. ]1\b"),
    ("EAC3", r"\bE[-. ]?AC-?3\b"),
    ("AC3", r"\bAC-?3\b"),
    ("AAC", r"\bAAC(?:[-. ]?2[-. ]0)?\b"),
    ("FLAC", r"\bFLAC\b"),
    ("OPUS", r"\bOPUS\b"),
    ("MP3", r"\bMP3\b"),
    ("5.1", r"\b5[-. ]1\b"),
    ("7.1", r"\b7[-. ]1\b"),
];

static AUDIO_REGEXES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    AUDIO_TABLE
        .iter()
        .map(|(tag, pattern)| (*tag, insensitive(pattern)))
        .collect()
});

static SEASON_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| insensitive(r"\bS(\d{1,2})[-. ]?E(\d{1,3})(?:[-. ]?E?(\d{1,3}))?\b"));
static SEASON_RANGE: LazyLock<Regex> =
    LazyLock::new(|| insensitive(r"\bS(\d{1,2})[-. ]?S(\d{1,2})\b"));
static SEASON_ONLY: LazyLock<Regex> = LazyLock::new(|| insensitive(r"\bS(\d{1,2})\b"));
static SEASON_WORD: LazyLock<Regex> =
    LazyLock::new(|| insensitive(r"\b(?:SEASON|SAISON)[-. ]?(\d{1,2})\b"));
static CROSS_FORMAT: LazyLock<Regex> = LazyLock::new(|| insensitive(r"\b(\d{1,2})x(\d{2,3})\b"));
static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap());
static TRAILING_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-([A-Za-z0-9]+)(?:\[[^\]]*\])?$").unwrap());
static LEADING_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[[^\]]*\][-. ]*").unwrap());

/// Parses a raw release title. Never fails; unknown fields stay empty.
pub fn parse_release(raw_title: &str) -> ParsedData {
    fn observe(start: usize, title_end: &mut usize) {
        if start < *title_end {
            *title_end = start;
        }
    }

    let mut seasons: Vec<u32> = Vec::new();
    let mut episodes: Vec<u32> = Vec::new();
    // The earliest marker position delimits the title part of the string.
    let mut title_end = raw_title.len();

    for caps in SEASON_EPISODE.captures_iter(raw_title) {
        observe(caps.get(0).unwrap().start(), &mut title_end);
        if let Some(season) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
            seasons.push(season);
        }
        let first: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
        let last: Option<u32> = caps.get(3).and_then(|m| m.as_str().parse().ok());
        match (first, last) {
            (Some(first), Some(last)) if first < last && last - first < 50 => {
                episodes.extend(first..=last);
            }
            (Some(first), _) => episodes.push(first),
            _ => {}
        }
    }
    if seasons.is_empty() {
        for caps in SEASON_RANGE.captures_iter(raw_title) {
            observe(caps.get(0).unwrap().start(), &mut title_end);
            let first: Option<u32> = caps.get(1).and_then(|m| m.as_str().parse().ok());
            let last: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
            if let (Some(first), Some(last)) = (first, last) {
                if first <= last && last - first < 50 {
                    seasons.extend(first..=last);
                }
            }
        }
    }
    if seasons.is_empty() && episodes.is_empty() {
        for caps in CROSS_FORMAT.captures_iter(raw_title) {
            observe(caps.get(0).unwrap().start(), &mut title_end);
            if let Some(season) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                seasons.push(season);
            }
            if let Some(episode) = caps.get(2).and_then(|m| m.as_str().parse().ok()) {
                episodes.push(episode);
            }
        }
    }
    if seasons.is_empty() {
        for caps in SEASON_WORD
            .captures_iter(raw_title)
            .chain(SEASON_ONLY.captures_iter(raw_title))
        {
            observe(caps.get(0).unwrap().start(), &mut title_end);
            if let Some(season) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                seasons.push(season);
            }
        }
    }
    seasons.sort_unstable();
    seasons.dedup();
    episodes.sort_unstable();
    episodes.dedup();

    let year = YEAR.captures(raw_title).and_then(|caps| {
        observe(caps.get(0).unwrap().start(), &mut title_end);
        caps.get(1)?.as_str().parse().ok()
    });

    let resolution = RESOLUTION.captures(raw_title).map(|caps| {
        observe(caps.get(0).unwrap().start(), &mut title_end);
        let matched = caps.get(1).unwrap().as_str().to_lowercase();
        if matched == "4k" {
            "2160p".to_string()
        } else {
            matched
        }
    });

    let quality = QUALITY_REGEXES.iter().find_map(|(tag, regex)| {
        regex.find(raw_title).map(|m| {
            observe(m.start(), &mut title_end);
            tag.to_string()
        })
    });

    let codec = CODEC_REGEXES.iter().find_map(|(tag, regex)| {
        regex.find(raw_title).map(|m| {
            observe(m.start(), &mut title_end);
            tag.to_string()
        })
    });

    let mut audio = Vec::new();
    for (tag, regex) in AUDIO_REGEXES.iter() {
        if let Some(m) = regex.find(raw_title) {
            observe(m.start(), &mut title_end);
            // Skip subset tags already covered by a richer match.
            let covered = match *tag {
                "DTS" => audio.contains(&"DTS-HD".to_string()),
                "DD5.1" | "DDP" => audio.contains(&"DDP5.1".to_string()),
                "5.1" => audio.iter().any(|a: &String| a.contains("5.1")),
                _ => false,
            };
            if !covered {
                audio.push(tag.to_string());
            }
        }
    }

    let languages = detect_languages(raw_title);
    let hdr = detect_hdr(raw_title);

    let group = extract_french_release_group(raw_title).or_else(|| {
        TRAILING_GROUP
            .captures(raw_title)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    });

    let parsed_title = clean_title(&raw_title[..title_end], raw_title);

    ParsedData {
        parsed_title,
        seasons,
        episodes,
        resolution,
        quality,
        codec,
        audio,
        hdr,
        group,
        languages,
        year,
    }
}

fn clean_title(prefix: &str, raw_title: &str) -> String {
    let source = if prefix.trim().is_empty() {
        raw_title
    } else {
        prefix
    };
    let source = LEADING_TAG.replace(source, "");
    let cleaned: String = source
        .chars()
        .map(|c| match c {
            '.' | '_' | '(' | ')' | '[' | ']' | '{' | '}' => ' ',
            c => c,
        })
        .collect();
    cleaned
        .split_whitespace()
        .map(|word| word.trim_matches('-'))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when the parsed file name covers the requested season and episode.
pub fn season_episode_in_filename(file_name: &str, season: u32, episode: u32) -> bool {
    let parsed = parse_release(file_name);
    parsed.seasons.contains(&season) && parsed.episodes.contains(&episode)
}

pub fn is_video_file(file_name: &str) -> bool {
    file_name
        .rsplit('.')
        .next()
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_movie_release() {
        let parsed = parse_release("Inception.2010.MULTi.1080p.BluRay.x264-Group");
        assert_eq!(parsed.parsed_title, "Inception");
        assert_eq!(parsed.year, Some(2010));
        assert_eq!(parsed.resolution.as_deref(), Some("1080p"));
        assert_eq!(parsed.quality.as_deref(), Some("BluRay"));
        assert_eq!(parsed.codec.as_deref(), Some("AVC"));
        assert_eq!(parsed.group.as_deref(), Some("Group"));
        assert!(parsed.languages.contains(&"multi".to_string()));
        assert!(parsed.seasons.is_empty());
        assert!(parsed.episodes.is_empty());
    }

    #[test]
    fn parses_episode_release() {
        let parsed = parse_release("Breaking.Bad.S03E07.720p.HDTV.x264-CTU");
        assert_eq!(parsed.parsed_title, "Breaking Bad");
        assert_eq!(parsed.seasons, vec![3]);
        assert_eq!(parsed.episodes, vec![7]);
        assert_eq!(parsed.resolution.as_deref(), Some("720p"));
        assert_eq!(parsed.quality.as_deref(), Some("HDTV"));
    }

    #[test]
    fn parses_season_pack() {
        let parsed = parse_release("Breaking.Bad.S03.COMPLETE.1080p.BluRay.x265");
        assert_eq!(parsed.seasons, vec![3]);
        assert!(parsed.episodes.is_empty());
        assert_eq!(parsed.codec.as_deref(), Some("HEVC"));
    }

    #[test]
    fn parses_cross_format_and_episode_ranges() {
        let parsed = parse_release("The.Show.1x05.WEBRip");
        assert_eq!(parsed.seasons, vec![1]);
        assert_eq!(parsed.episodes, vec![5]);

        let parsed = parse_release("The.Show.S02E01-E03.1080p");
        assert_eq!(parsed.seasons, vec![2]);
        assert_eq!(parsed.episodes, vec![1, 2, 3]);
    }

    #[test]
    fn parses_season_range() {
        let parsed = parse_release("The.Wire.S01-S05.INTEGRALE.1080p");
        assert_eq!(parsed.seasons, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn parse_is_total_and_deterministic() {
        for title in ["", "???", "a", "S99", "2160p"] {
            assert_eq!(parse_release(title), parse_release(title));
        }
    }

    #[test]
    fn season_episode_filename_match() {
        assert!(season_episode_in_filename(
            "Breaking.Bad.S03E07.1080p.mkv",
            3,
            7
        ));
        assert!(!season_episode_in_filename(
            "Breaking.Bad.S03E08.1080p.mkv",
            3,
            7
        ));
    }

    #[test]
    fn video_file_extensions() {
        assert!(is_video_file("episode.mkv"));
        assert!(is_video_file("movie.MP4"));
        assert!(!is_video_file("sample.nfo"));
        assert!(!is_video_file("no_extension"));
    }
}
