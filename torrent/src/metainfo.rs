use anyhow::Context;
use serde::Deserialize;
use sha1::{Digest, Sha1};

/// A single file inside a torrent. `path` is the joined relative path, the
/// way trackers render it (`dir/sub/file.mkv`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaFile {
    pub path: String,
    pub length: u64,
}

/// Decoded `.torrent` metadata. Only the fields the service needs survive
/// decoding: identity, name, trackers and the file table.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// 40 lowercase hex chars, `sha1(bencode(info))`.
    pub info_hash: String,
    pub name: String,
    pub trackers: Vec<String>,
    files: Vec<MetaFile>,
    single_file: bool,
}

#[derive(Debug, Deserialize)]
struct RawTorrent {
    info: RawInfo,
    announce: Option<String>,
    #[serde(rename = "announce-list")]
    announce_list: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    name: String,
    length: Option<u64>,
    files: Option<Vec<RawFile>>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    length: u64,
    path: Vec<String>,
}

impl Metainfo {
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let raw: RawTorrent =
            serde_bencode::from_bytes(bytes).context("decode torrent metainfo")?;
        let info_span = info_dict_span(bytes).context("locate info dictionary")?;
        let mut hasher = Sha1::new();
        hasher.update(info_span);
        let info_hash = hex::encode(hasher.finalize());

        let mut trackers = Vec::new();
        if let Some(announce) = raw.announce {
            trackers.push(announce);
        }
        for tier in raw.announce_list.unwrap_or_default() {
            for tracker in tier {
                if !trackers.contains(&tracker) {
                    trackers.push(tracker);
                }
            }
        }

        let single_file = raw.info.files.is_none();
        let files = match raw.info.files {
            Some(files) => files
                .into_iter()
                .map(|f| MetaFile {
                    path: f.path.join("/"),
                    length: f.length,
                })
                .collect(),
            None => vec![MetaFile {
                path: raw.info.name.clone(),
                length: raw.info.length.unwrap_or(0),
            }],
        };

        Ok(Self {
            info_hash,
            name: raw.info.name,
            trackers,
            files,
            single_file,
        })
    }

    /// True when the torrent carries exactly one file (no `files` table).
    pub fn is_single_file(&self) -> bool {
        self.single_file
    }

    pub fn files(&self) -> &[MetaFile] {
        &self.files
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }

    /// 1-based index of the largest file.
    pub fn largest_file_index(&self) -> usize {
        self.files
            .iter()
            .enumerate()
            .max_by_key(|(_, f)| f.length)
            .map(|(i, _)| i + 1)
            .unwrap_or(1)
    }
}

/// Returns the exact byte span of the `info` value inside a bencoded torrent.
///
/// The hash must be computed over the bytes as they appear on the wire;
/// re-encoding a decoded structure would lose unknown fields and ordering.
fn info_dict_span(buf: &[u8]) -> anyhow::Result<&[u8]> {
    anyhow::ensure!(buf.first() == Some(&b'd'), "torrent is not a dictionary");
    let mut pos = 1;
    while pos < buf.len() && buf[pos] != b'e' {
        let (key, key_end) = read_string(buf, pos)?;
        let value_end = skip_value(buf, key_end)?;
        if key == b"info" {
            return Ok(&buf[key_end..value_end]);
        }
        pos = value_end;
    }
    anyhow::bail!("torrent has no info dictionary")
}

fn read_string(buf: &[u8], pos: usize) -> anyhow::Result<(&[u8], usize)> {
    let colon = buf[pos..]
        .iter()
        .position(|&b| b == b':')
        .map(|i| pos + i)
        .context("string length delimiter not found")?;
    let len: usize = std::str::from_utf8(&buf[pos..colon])?
        .parse()
        .context("invalid string length")?;
    let end = colon + 1 + len;
    anyhow::ensure!(end <= buf.len(), "string runs past end of input");
    Ok((&buf[colon + 1..end], end))
}

fn skip_value(buf: &[u8], pos: usize) -> anyhow::Result<usize> {
    match buf.get(pos) {
        Some(b'i') => {
            let end = buf[pos..]
                .iter()
                .position(|&b| b == b'e')
                .map(|i| pos + i)
                .context("unterminated integer")?;
            Ok(end + 1)
        }
        Some(b'l') | Some(b'd') => {
            let mut cursor = pos + 1;
            while *buf.get(cursor).context("unterminated container")? != b'e' {
                cursor = skip_value(buf, cursor)?;
            }
            Ok(cursor + 1)
        }
        Some(b'0'..=b'9') => {
            let (_, end) = read_string(buf, pos)?;
            Ok(end)
        }
        _ => anyhow::bail!("unexpected byte in bencode stream"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multi_file_torrent() -> Vec<u8> {
        // Two files under "Show.S01", plus announce and an announce-list tier.
        let info = b"d5:filesld6:lengthi700e4:pathl10:S01E01.mkveed6:lengthi900e4:pathl10:S01E02.mkveee4:name8:Show.S0112:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaae";
        let mut torrent = Vec::new();
        torrent.extend_from_slice(b"d8:announce17:udp://tracker/one13:announce-listll17:udp://tracker/one17:udp://tracker/twoee4:info");
        torrent.extend_from_slice(info);
        torrent.push(b'e');
        torrent
    }

    #[test]
    fn decodes_multi_file_torrent() {
        let bytes = multi_file_torrent();
        let meta = Metainfo::from_bytes(&bytes).unwrap();
        assert_eq!(meta.name, "Show.S01");
        assert!(!meta.is_single_file());
        assert_eq!(
            meta.files(),
            &[
                MetaFile {
                    path: "S01E01.mkv".into(),
                    length: 700
                },
                MetaFile {
                    path: "S01E02.mkv".into(),
                    length: 900
                },
            ]
        );
        assert_eq!(meta.largest_file_index(), 2);
        assert_eq!(meta.total_size(), 1600);
        // Trackers deduplicate across announce and announce-list.
        assert_eq!(
            meta.trackers,
            vec!["udp://tracker/one", "udp://tracker/two"]
        );
    }

    #[test]
    fn info_hash_covers_exact_info_span() {
        let bytes = multi_file_torrent();
        let meta = Metainfo::from_bytes(&bytes).unwrap();

        let start = bytes.windows(7).position(|w| w == b"4:infod").unwrap() + 6;
        let end = bytes.len() - 1;
        let mut hasher = Sha1::new();
        hasher.update(&bytes[start..end]);
        let expected = hex::encode(hasher.finalize());

        assert_eq!(meta.info_hash, expected);
        assert_eq!(meta.info_hash.len(), 40);
        assert_eq!(meta.info_hash, meta.info_hash.to_lowercase());
    }

    #[test]
    fn decodes_single_file_torrent() {
        let bytes = b"d8:announce17:udp://tracker/one4:infod6:lengthi5000e4:name9:Movie.mkv12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaaee";
        let meta = Metainfo::from_bytes(bytes).unwrap();
        assert!(meta.is_single_file());
        assert_eq!(meta.files().len(), 1);
        assert_eq!(meta.files()[0].path, "Movie.mkv");
        assert_eq!(meta.files()[0].length, 5000);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Metainfo::from_bytes(b"not a torrent").is_err());
        assert!(Metainfo::from_bytes(b"d4:spam4:eggse").is_err());
    }
}
