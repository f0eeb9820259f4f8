use std::{fmt::Display, str::FromStr};

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{app_state::AppError, torrent_item::ProviderTag};

/// Debrid service selector carried in configs and playback queries. `DL`
/// marks a pre-caching download request rather than a playback provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceTag {
    #[serde(rename = "RD")]
    Rd,
    #[serde(rename = "AD")]
    Ad,
    #[serde(rename = "TB")]
    Tb,
    #[serde(rename = "PM")]
    Pm,
    #[serde(rename = "DL")]
    Download,
}

impl ServiceTag {
    pub fn provider(&self) -> Option<ProviderTag> {
        match self {
            ServiceTag::Rd => Some(ProviderTag::RealDebrid),
            ServiceTag::Ad => Some(ProviderTag::AllDebrid),
            ServiceTag::Tb => Some(ProviderTag::Torbox),
            ServiceTag::Pm => Some(ProviderTag::Premiumize),
            ServiceTag::Download => None,
        }
    }
}

impl From<ProviderTag> for ServiceTag {
    fn from(provider: ProviderTag) -> Self {
        match provider {
            ProviderTag::RealDebrid => ServiceTag::Rd,
            ProviderTag::AllDebrid => ServiceTag::Ad,
            ProviderTag::Torbox => ServiceTag::Tb,
            ProviderTag::Premiumize => ServiceTag::Pm,
        }
    }
}

impl Display for ServiceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceTag::Rd => write!(f, "RD"),
            ServiceTag::Ad => write!(f, "AD"),
            ServiceTag::Tb => write!(f, "TB"),
            ServiceTag::Pm => write!(f, "PM"),
            ServiceTag::Download => write!(f, "DL"),
        }
    }
}

impl FromStr for ServiceTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RD" => Ok(ServiceTag::Rd),
            "AD" => Ok(ServiceTag::Ad),
            "TB" => Ok(ServiceTag::Tb),
            "PM" => Ok(ServiceTag::Pm),
            "DL" => Ok(ServiceTag::Download),
            rest => Err(anyhow::anyhow!("unknown service tag: {rest}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    #[serde(rename = "quality")]
    Quality,
    #[serde(rename = "sizeasc")]
    SizeAsc,
    #[serde(rename = "sizedesc")]
    SizeDesc,
    #[serde(rename = "qualitythensize")]
    QualityThenSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataProviderKind {
    Cinemeta,
    Tmdb,
}

/// RealDebrid OAuth credentials, carried per user when the deployment does
/// not use a shared account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdOauthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

/// Per-request configuration, decoded from the base64 segment of the request
/// path. Unknown fields are ignored so old player installs keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    pub languages: Vec<String>,
    /// Backward compatibility: pre-multilanguage configs carried a single
    /// `language` value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Movie size cap in GiB. Zero disables the filter.
    #[serde(rename = "maxSize")]
    pub max_size: u64,
    pub exclusion: Vec<String>,
    #[serde(rename = "exclusionKeywords")]
    pub exclusion_keywords: Vec<String>,
    #[serde(rename = "resultsPerQuality")]
    pub results_per_quality: usize,
    #[serde(rename = "maxResults")]
    pub max_results: usize,
    #[serde(rename = "minCachedResults")]
    pub min_cached_results: usize,
    pub sort: SortOrder,
    pub cache: bool,
    pub zilean: bool,
    pub yggflix: bool,
    pub sharewood: bool,
    pub jackett: bool,
    pub debrid: bool,
    pub torrenting: bool,
    pub service: ServiceTag,
    #[serde(rename = "metadataProvider")]
    pub metadata_provider: MetadataProviderKind,
    #[serde(rename = "addonHost")]
    pub addon_host: String,
    #[serde(rename = "RDToken", skip_serializing_if = "Option::is_none")]
    pub rd_token: Option<RdOauthConfig>,
    #[serde(rename = "ADToken", skip_serializing_if = "Option::is_none")]
    pub ad_token: Option<String>,
    #[serde(rename = "TBToken", skip_serializing_if = "Option::is_none")]
    pub tb_token: Option<String>,
    #[serde(rename = "yggPasskey", skip_serializing_if = "Option::is_none")]
    pub ygg_passkey: Option<String>,
    #[serde(rename = "sharewoodPasskey", skip_serializing_if = "Option::is_none")]
    pub sharewood_passkey: Option<String>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            languages: vec!["en".to_string()],
            language: None,
            max_size: 0,
            exclusion: Vec::new(),
            exclusion_keywords: Vec::new(),
            results_per_quality: 5,
            max_results: 30,
            min_cached_results: 5,
            sort: SortOrder::Quality,
            cache: true,
            zilean: true,
            yggflix: false,
            sharewood: false,
            jackett: false,
            debrid: true,
            torrenting: false,
            service: ServiceTag::Rd,
            metadata_provider: MetadataProviderKind::Cinemeta,
            addon_host: String::new(),
            rd_token: None,
            ad_token: None,
            tb_token: None,
            ygg_passkey: None,
            sharewood_passkey: None,
        }
    }
}

impl UserConfig {
    /// Decodes the base64 path segment into a config, lifting the legacy
    /// single-language field into `languages`.
    pub fn parse(encoded: &str) -> Result<Self, AppError> {
        let bytes = decode_b64(encoded)
            .map_err(|_| AppError::bad_request("configuration is not valid base64"))?;
        let mut config: UserConfig = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::bad_request(format!("configuration is not valid json: {e}")))?;
        if let Some(language) = config.language.take() {
            if config.languages.is_empty() || config.languages == vec!["en".to_string()] {
                config.languages = vec![language];
            }
        }
        if config.api_key.is_empty() {
            return Err(AppError::unauthorized("API key not found in config"));
        }
        Ok(config)
    }

    /// Re-encodes the config the way stream URLs embed it, with `=` padding
    /// escaped for path safety.
    pub fn encode(&self) -> String {
        encode_b64(&serde_json::to_string(self).expect("config serializes"))
    }
}

pub fn encode_b64(payload: &str) -> String {
    base64::engine::general_purpose::STANDARD
        .encode(payload)
        .replace('=', "%3D")
}

pub fn decode_b64(encoded: &str) -> anyhow::Result<Vec<u8>> {
    let unescaped = encoded.replace("%3D", "=");
    Ok(base64::engine::general_purpose::STANDARD.decode(unescaped)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_base64_round_trip_is_identity() {
        let mut config = UserConfig::default();
        config.api_key = "a3c9e8b1-0000-4000-8000-000000000000".to_string();
        config.languages = vec!["fr".to_string(), "en".to_string()];
        config.exclusion = vec!["CAM".to_string(), "HEVC".to_string()];
        config.max_size = 15;
        config.sort = SortOrder::QualityThenSize;
        config.service = ServiceTag::Ad;
        config.addon_host = "https://addon.example".to_string();
        config.sharewood_passkey = Some("0123456789abcdef0123456789abcdef".to_string());

        let parsed = UserConfig::parse(&config.encode()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn legacy_language_field_is_lifted() {
        let raw = r#"{"apiKey":"key","language":"fr"}"#;
        let encoded = encode_b64(raw);
        let parsed = UserConfig::parse(&encoded).unwrap();
        assert_eq!(parsed.languages, vec!["fr"]);
        assert_eq!(parsed.language, None);
    }

    #[test]
    fn missing_api_key_is_unauthorized() {
        let encoded = encode_b64("{}");
        let err = UserConfig::parse(&encoded).unwrap_err();
        assert_eq!(err.kind, crate::app_state::AppErrorKind::Unauthorized);
    }

    #[test]
    fn garbage_is_a_bad_request() {
        assert!(UserConfig::parse("!!!not-base64!!!").is_err());
    }

    #[test]
    fn padding_is_path_safe() {
        let encoded = encode_b64(r#"{"apiKey":"k"}"#);
        assert!(!encoded.contains('='));
        assert!(encoded.contains("%3D") || encoded.len() % 4 == 0);
    }
}
