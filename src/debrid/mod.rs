use std::{collections::HashMap, net::IpAddr, sync::Arc};

use async_trait::async_trait;

use crate::{
    app_state::AppError,
    config::Settings,
    kv::KvCache,
    torrent_item::{ProviderTag, StreamQuery},
    user_config::{ServiceTag, UserConfig},
};

pub mod alldebrid;
pub mod client;
pub mod premiumize;
pub mod realdebrid;
pub mod token_manager;
pub mod torbox;

pub use alldebrid::AllDebrid;
pub use client::DebridHttp;
pub use premiumize::Premiumize;
pub use realdebrid::RealDebrid;
pub use torbox::Torbox;

/// Per-provider availability manifests, tagged so the smart container can
/// dispatch on shape.
#[derive(Debug)]
pub enum AvailabilityResponse {
    RealDebrid(HashMap<String, realdebrid::RdHashEntry>),
    AllDebrid(Vec<alldebrid::AdMagnet>),
    Torbox(HashMap<String, torbox::TbCachedEntry>),
    Premiumize {
        hashes: Vec<String>,
        cached: Vec<bool>,
    },
}

/// Common provider contract. `bulk_availability` is idempotent and returns
/// an empty manifest for empty input; `get_stream_link` returns the
/// not-cached sentinel URL instead of erroring while a torrent warms up.
#[async_trait]
pub trait DebridProvider: Send + Sync {
    fn tag(&self) -> ProviderTag;

    async fn bulk_availability(
        &self,
        hashes: &[String],
        ip: Option<IpAddr>,
    ) -> Result<AvailabilityResponse, AppError>;

    /// Adds the torrent and selects its files without waiting for a link.
    /// Used by the `DL` pre-caching path.
    async fn add_magnet_or_torrent_and_select(
        &self,
        query: &StreamQuery,
        ip: Option<IpAddr>,
    ) -> Result<(), AppError>;

    async fn get_stream_link(
        &self,
        query: &StreamQuery,
        ip: Option<IpAddr>,
    ) -> Result<String, AppError>;
}

/// Builds the provider for a service tag from the user's tokens (or the
/// deployment's shared account). `DL` resolves to the configured default
/// download provider.
pub fn get_debrid_service(
    settings: &'static Settings,
    http: &'static DebridHttp,
    kv: &KvCache,
    config: &UserConfig,
    service: ServiceTag,
) -> Result<Arc<dyn DebridProvider>, AppError> {
    let service = match service {
        ServiceTag::Download => settings.download_service,
        service => service,
    };
    match service {
        ServiceTag::Rd => Ok(Arc::new(RealDebrid::new(settings, http, kv.clone(), config)?)),
        ServiceTag::Ad => Ok(Arc::new(AllDebrid::new(settings, http, config)?)),
        ServiceTag::Tb => Ok(Arc::new(Torbox::new(settings, http, config)?)),
        ServiceTag::Pm => Err(AppError::bad_request(
            "Premiumize playback resolution is not supported",
        )),
        ServiceTag::Download => Err(AppError::internal_error(
            "download service resolves to itself",
        )),
    }
}

/// Every provider the user has credentials for, in availability-check order.
pub fn configured_providers(
    settings: &'static Settings,
    http: &'static DebridHttp,
    kv: &KvCache,
    config: &UserConfig,
) -> Vec<Arc<dyn DebridProvider>> {
    let mut providers: Vec<Arc<dyn DebridProvider>> = Vec::new();
    if config.rd_token.is_some() || settings.rd_unique_token.is_some() {
        match RealDebrid::new(settings, http, kv.clone(), config) {
            Ok(provider) => providers.push(Arc::new(provider)),
            Err(e) => tracing::warn!("RealDebrid is configured but unusable: {e}"),
        }
    }
    if config.ad_token.is_some() || settings.ad_unique_token.is_some() {
        match AllDebrid::new(settings, http, config) {
            Ok(provider) => providers.push(Arc::new(provider)),
            Err(e) => tracing::warn!("AllDebrid is configured but unusable: {e}"),
        }
    }
    if config.tb_token.is_some() || settings.tb_unique_token.is_some() {
        match Torbox::new(settings, http, config) {
            Ok(provider) => providers.push(Arc::new(provider)),
            Err(e) => tracing::warn!("Torbox is configured but unusable: {e}"),
        }
    }
    if let Some(api_key) = &settings.pm_api_key {
        providers.push(Arc::new(Premiumize::new(http, api_key.clone())));
    }
    providers
}

/// Shared-account deployments must keep the playback proxy on; otherwise
/// every player would stream straight off one account and get it banned.
pub(crate) fn ensure_proxied(settings: &Settings, provider: &'static str) -> Result<(), AppError> {
    if !settings.proxied_link {
        tracing::warn!("{provider}: shared account is enabled but the playback proxy is off");
        return Err(AppError::internal_error(format!(
            "{provider}: proxied playback is required for the shared account"
        )));
    }
    Ok(())
}
