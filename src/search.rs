use std::{net::IpAddr, time::Duration};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    app_state::{AppError, AppState},
    container::SmartContainer,
    debrid,
    filters::{filter_items, merge_items, sort_items},
    indexers::{
        DmmAdapter, IndexerAdapter, JackettAdapter, PublicCacheAdapter, SharewoodAdapter,
        YggflixAdapter,
    },
    kv::cache_key,
    media::{Media, MediaKind},
    metadata::StreamId,
    streams::{StreamRow, build_stream_rows},
    torrent_item::TorrentItem,
    user_config::{MetadataProviderKind, UserConfig},
};

const METADATA_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Key of the per-user filtered stream cache. Includes the api key: two
/// users with different filters must not see each other's rows.
fn stream_cache_key(config: &UserConfig, media: &Media) -> String {
    let scope = match media.kind {
        MediaKind::Movie => media.year.clone().unwrap_or_default(),
        MediaKind::Series => format!(
            "{}{}",
            media.season.as_deref().unwrap_or_default(),
            media.episode.as_deref().unwrap_or_default()
        ),
    };
    cache_key(
        "stream",
        &[
            &config.api_key,
            &media.kind.to_string(),
            media.primary_title(),
            &scope,
            media.primary_language(),
        ],
    )
}

/// Key of the shareable unfiltered search cache. No api key in it: raw
/// results are the same for everyone asking for this media.
fn search_cache_key(media: &Media) -> String {
    let scope = match media.kind {
        MediaKind::Movie => media.year.clone().unwrap_or_default(),
        MediaKind::Series => media.season.clone().unwrap_or_default(),
    };
    cache_key(
        "media",
        &[
            &media.kind.to_string(),
            media.primary_title(),
            &scope,
            media.primary_language(),
        ],
    )
}

/// The search pipeline: auth, metadata, two cache tiers, adapter fan-out,
/// post-processing, filters, debrid correlation, ranking, stream rows.
pub async fn search(
    state: &AppState,
    config: &UserConfig,
    kind: MediaKind,
    raw_stream_id: &str,
    client_ip: Option<IpAddr>,
) -> Result<Vec<StreamRow>, AppError> {
    state.db.check_key(&config.api_key).await?;

    let stream_id = StreamId::parse(raw_stream_id)?;
    let media = lookup_metadata(state, config, kind, &stream_id).await?;
    tracing::info!(titles = ?media.titles, "Resolved media metadata");

    let stream_key = stream_cache_key(config, &media);
    if let Some(rows) = state.kv.get::<Vec<StreamRow>>(&stream_key).await {
        tracing::info!("Returning cached stream rows");
        return Ok(rows);
    }

    let search_key = search_cache_key(&media);
    let items = match state.kv.get::<Vec<TorrentItem>>(&search_key).await {
        Some(cached) => {
            tracing::info!("Found {} unfiltered results in cache", cached.len());
            let filtered = filter_items(cached.clone(), &media, config);
            if filtered.len() < config.min_cached_results {
                // The shared cache can satisfy one user's filters and starve
                // another's; a fresh fan-out refills it.
                tracing::info!(
                    "Only {} results after filtering, refreshing the search cache",
                    filtered.len()
                );
                state.kv.delete(&search_key).await;
                let fresh = fresh_search(state, config, &media, &search_key).await;
                filter_items(fresh, &media, config)
            } else {
                filtered
            }
        }
        None => {
            let fresh = fresh_search(state, config, &media, &search_key).await;
            filter_items(fresh, &media, config)
        }
    };
    tracing::info!("{} results after filtering", items.len());

    let mut container = SmartContainer::new(items, media.clone());
    if config.debrid {
        let providers = debrid::configured_providers(
            state.settings,
            state.debrid_http,
            &state.kv,
            config,
        );
        for provider in providers {
            let hashes = container.unavailable_hashes();
            if hashes.is_empty() {
                break;
            }
            match provider.bulk_availability(&hashes, client_ip).await {
                Ok(response) => container.update_availability(response),
                Err(e) => {
                    tracing::error!(provider = %provider.tag(), "Availability check failed: {e}")
                }
            }
        }
    }

    if config.cache {
        if let Some(public_cache) = &state.indexer_clients.public_cache {
            container.cache_container_items(public_cache);
        }
    }

    let mut best = container.best_matching();
    sort_items(&mut best, config.sort);

    let rows = build_stream_rows(&best, config, &media, state.settings);
    state
        .kv
        .set(&stream_key, &rows, Some(state.settings.stream_cache_ttl))
        .await;
    Ok(rows)
}

async fn lookup_metadata(
    state: &AppState,
    config: &UserConfig,
    kind: MediaKind,
    stream_id: &StreamId,
) -> Result<Media, AppError> {
    let provider = state.providers_stack.provider(config.metadata_provider)?;
    let key = cache_key(
        "metadata",
        &[
            &stream_id.imdb_id,
            &stream_id.season.map(|s| s.to_string()).unwrap_or_default(),
            &stream_id.episode.map(|e| e.to_string()).unwrap_or_default(),
            &kind.to_string(),
            provider.identifier(),
        ],
    );
    state
        .kv
        .get_or_set(&key, Some(METADATA_TTL), || async {
            provider.metadata(stream_id, kind, &config.languages).await
        })
        .await
}

/// Adapter fan-out, post-processing, and the unfiltered-cache write. The
/// cache is only written when every adapter ran to completion, so a cached
/// entry always represents a full successful fan-out.
async fn fresh_search(
    state: &AppState,
    config: &UserConfig,
    media: &Media,
    search_key: &str,
) -> Vec<TorrentItem> {
    let (raw_results, complete) = run_adapter_fan_out(state, config, media).await;
    tracing::info!(
        "Fan-out yielded {} raw results (complete: {complete})",
        raw_results.len()
    );
    let raw_results = hydrate_from_store(state, raw_results).await;
    let processed = state
        .torrent_processor
        .process_all(raw_results, media)
        .await;
    tracing::info!("{} results after torrent processing", processed.len());

    if complete && !processed.is_empty() {
        state
            .kv
            .set(search_key, &processed, Some(state.settings.search_cache_ttl))
            .await;
    }
    persist_items(state, &processed);
    processed
}

/// Swaps raw rows for their durable counterparts where one exists, so known
/// torrents skip the `.torrent` fetch entirely.
async fn hydrate_from_store(state: &AppState, items: Vec<TorrentItem>) -> Vec<TorrentItem> {
    let mut hydrated = Vec::with_capacity(items.len());
    for item in items {
        if item.info_hash.is_some() {
            hydrated.push(item);
            continue;
        }
        match state.db.torrent_item_by_id(&item.id()).await {
            Ok(Some(stored)) if stored.info_hash.is_some() => {
                tracing::debug!("Reusing stored torrent row for {}", item.raw_title);
                let mut stored = stored;
                stored.seeders = stored.seeders.max(item.seeders);
                hydrated.push(stored);
            }
            Ok(_) => hydrated.push(item),
            Err(e) => {
                tracing::error!("Torrent row lookup failed: {e}");
                hydrated.push(item);
            }
        }
    }
    hydrated
}

/// Write-behind persistence of resolved items; the response never waits on
/// the database.
fn persist_items(state: &AppState, items: &[TorrentItem]) {
    let db = state.db.clone();
    let items = items.to_vec();
    tokio::spawn(async move {
        for item in &items {
            if let Err(e) = db.upsert_torrent_item(item).await {
                tracing::error!("Failed to persist torrent row: {e}");
            }
        }
    });
}

fn build_adapters(
    state: &AppState,
    config: &UserConfig,
) -> Vec<Box<dyn IndexerAdapter>> {
    let clients = state.indexer_clients;
    let min_seeders = state.settings.min_seeders;
    let mut adapters: Vec<Box<dyn IndexerAdapter>> = Vec::new();

    if config.cache {
        if let Some(api) = &clients.public_cache {
            adapters.push(Box::new(PublicCacheAdapter { api }));
        }
    }
    if config.zilean {
        if let Some(api) = &clients.dmm {
            adapters.push(Box::new(DmmAdapter {
                api,
                pool_width: state.settings.worker_pool_width,
            }));
        }
    }
    if config.yggflix && config.metadata_provider == MetadataProviderKind::Tmdb {
        if let Some(api) = &clients.yggflix {
            adapters.push(Box::new(YggflixAdapter { api, min_seeders }));
        }
    }
    if config.sharewood {
        if let (Some(api), Some(passkey)) = (&clients.sharewood, &config.sharewood_passkey) {
            match SharewoodAdapter::new(api, passkey.clone(), min_seeders) {
                Ok(adapter) => adapters.push(Box::new(adapter)),
                Err(e) => tracing::warn!("Sharewood is configured but unusable: {e}"),
            }
        }
    }
    if config.jackett {
        if let Some(api) = &clients.jackett {
            adapters.push(Box::new(JackettAdapter { api, min_seeders }));
        }
    }
    adapters
}

/// Runs every enabled adapter concurrently. Once the merged total reaches
/// `min_cached_results` the stragglers are cancelled; the second return
/// value says whether every adapter finished.
async fn run_adapter_fan_out(
    state: &AppState,
    config: &UserConfig,
    media: &Media,
) -> (Vec<TorrentItem>, bool) {
    let adapters = build_adapters(state, config);
    if adapters.is_empty() {
        tracing::warn!("No indexers are enabled for this request");
        return (Vec::new(), true);
    }

    let cancellation_token: CancellationToken = state.cancellation_token.child_token();
    let mut join_set: JoinSet<(&'static str, Vec<TorrentItem>)> = JoinSet::new();
    for adapter in adapters {
        let media = media.clone();
        let cancellation_token = cancellation_token.clone();
        join_set.spawn(async move {
            let name = adapter.name();
            tokio::select! {
                _ = cancellation_token.cancelled() => (name, Vec::new()),
                result = adapter.search(&media) => match result {
                    Ok(items) => {
                        tracing::info!("Found {} results on {name}", items.len());
                        (name, items)
                    }
                    Err(e) => {
                        tracing::error!("{name} search failed: {e}");
                        (name, Vec::new())
                    }
                },
            }
        });
    }

    let mut merged: Vec<TorrentItem> = Vec::new();
    let mut complete = true;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((name, items)) => {
                merged = merge_items(merged, items);
                if merged.len() >= config.min_cached_results && !join_set.is_empty() {
                    tracing::info!(
                        "Reached {} results after {name}, short-circuiting the fan-out",
                        merged.len()
                    );
                    cancellation_token.cancel();
                    join_set.abort_all();
                    complete = false;
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::error!("Indexer task panicked: {e}"),
        }
    }
    (merged, complete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_config::UserConfig;

    fn media(kind: MediaKind) -> Media {
        Media {
            kind,
            imdb_id: "tt1375666".to_string(),
            tmdb_id: None,
            titles: vec!["Inception".to_string()],
            year: Some("2010".to_string()),
            season: Some("S03".to_string()),
            episode: Some("E07".to_string()),
            languages: vec!["fr".to_string()],
        }
    }

    #[test]
    fn stream_cache_key_depends_on_api_key() {
        let media = media(MediaKind::Movie);
        let mut config_a = UserConfig::default();
        config_a.api_key = "user-a".to_string();
        let mut config_b = UserConfig::default();
        config_b.api_key = "user-b".to_string();
        assert_ne!(
            stream_cache_key(&config_a, &media),
            stream_cache_key(&config_b, &media)
        );
    }

    #[test]
    fn search_cache_key_is_shared_across_users() {
        let media = media(MediaKind::Series);
        let key = search_cache_key(&media);
        assert_eq!(key.len(), 16);
        // No api key in the input tuple: same media, same key.
        assert_eq!(key, search_cache_key(&media));
    }

    #[test]
    fn series_and_movie_scopes_differ() {
        assert_ne!(
            search_cache_key(&media(MediaKind::Movie)),
            search_cache_key(&media(MediaKind::Series))
        );
    }
}
