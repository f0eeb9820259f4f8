use std::{fmt::Display, str::FromStr};

use anyhow::Context;
use reqwest::Url;

/// Parsed `magnet:?xt=urn:btih:…` link.
///
/// The info hash is kept as 40 lowercase hex characters regardless of how the
/// source spelled it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    pub info_hash: String,
    pub name: Option<String>,
    pub trackers: Vec<String>,
}

impl MagnetLink {
    pub fn new(
        info_hash: impl Into<String>,
        name: Option<String>,
        trackers: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            info_hash: info_hash.into().to_lowercase(),
            name,
            trackers: trackers.into_iter().collect(),
        }
    }

    pub fn hash_bytes(&self) -> anyhow::Result<[u8; 20]> {
        let bytes = hex::decode(&self.info_hash).context("info hash is not hex")?;
        bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("info hash is not 20 bytes"))
    }
}

impl Display for MagnetLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        let mut url = Url::parse(&format!("magnet:?xt=urn:btih:{}", self.info_hash)).unwrap();
        {
            let mut query = url.query_pairs_mut();
            if let Some(name) = &self.name {
                query.append_pair("dn", name);
            }
            for tracker in &self.trackers {
                query.append_pair("tr", tracker);
            }
            query.finish();
        }
        write!(f, "{}", url)
    }
}

impl FromStr for MagnetLink {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::from_str(s)?;
        anyhow::ensure!(url.scheme() == "magnet", "not a magnet uri");
        let mut info_hash = None;
        let mut name = None;
        let mut trackers = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    let mut split = value.splitn(3, ':');
                    let urn = split.next().context("xt is missing urn prefix")?;
                    let kind = split.next().context("xt is missing hash kind")?;
                    anyhow::ensure!(urn == "urn", "xt does not carry a urn");
                    anyhow::ensure!(kind == "btih", "only btih hashes are supported");
                    let hash = split.next().context("xt does not carry a hash")?;
                    anyhow::ensure!(hash.len() == 40, "info hash must be 40 hex chars");
                    info_hash = Some(hash.to_lowercase());
                }
                "dn" => {
                    name = Some(value.to_string());
                }
                "tr" => {
                    if Url::from_str(&value).is_ok() {
                        trackers.push(value.to_string());
                    } else {
                        tracing::warn!("Skipping malformed magnet tracker: {}", value);
                    }
                }
                _ => {}
            }
        }
        Ok(Self {
            info_hash: info_hash.context("magnet link does not contain an info hash")?,
            name,
            trackers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::MagnetLink;

    use std::str::FromStr;

    #[test]
    fn parse_magnet_link() {
        let contents = "magnet:?xt=urn:btih:BE2D7CD9F6B0FDFC035EDFEE4EBD567003EBC254&dn=Rick.and.Morty.S07E01.1080p.WEB.H264-NHTFS%5BTGx%5D&tr=udp%3A%2F%2Ftracker.opentrackr.org%3A1337&tr=udp%3A%2F%2Fopen.stealth.si%3A80%2Fannounce";
        let magnet = MagnetLink::from_str(contents).unwrap();
        assert_eq!(
            magnet.info_hash,
            "be2d7cd9f6b0fdfc035edfee4ebd567003ebc254"
        );
        assert_eq!(
            magnet.name.as_deref(),
            Some("Rick.and.Morty.S07E01.1080p.WEB.H264-NHTFS[TGx]")
        );
        assert_eq!(
            magnet.trackers,
            vec![
                "udp://tracker.opentrackr.org:1337",
                "udp://open.stealth.si:80/announce",
            ]
        );
    }

    #[test]
    fn build_magnet_link() {
        let magnet = MagnetLink::new(
            "BE2D7CD9F6B0FDFC035EDFEE4EBD567003EBC254",
            Some("Some.Movie.2010.1080p".to_string()),
            ["udp://tracker.opentrackr.org:1337".to_string()],
        );
        let rendered = magnet.to_string();
        assert!(rendered.starts_with("magnet:?xt=urn:btih:be2d7cd9f6b0fdfc035edfee4ebd567003ebc254"));
        assert_eq!(rendered.matches("&tr=").count(), 1);
        let reparsed = MagnetLink::from_str(&rendered).unwrap();
        assert_eq!(reparsed, magnet);
    }

    #[test]
    fn rejects_non_magnet() {
        assert!(MagnetLink::from_str("https://example.com/file.torrent").is_err());
    }
}
