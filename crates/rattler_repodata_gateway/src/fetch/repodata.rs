//! This module provides functionality to download and cache `repodata.json`
//! from a remote location.

use std::{path::PathBuf, sync::Arc, time::SystemTime};

use cache_control::{Cachability, CacheControl};
use rattler_networking::{retry_policies::default_retry_policy, LazyClient};
use reqwest::StatusCode;
use retry_policies::RetryPolicy;
use tracing::instrument;
use url::Url;

use super::{
    cache::{CacheHeaders, RepoDataState},
    no_cache::{self, FetchRepoDataOptions as NoCacheOptions},
    CacheAction, FetchRepoDataError, RepoDataNotFoundError, Variant,
};
use crate::{
    utils::{url_to_cache_filename, LockedFile},
    Reporter,
};

/// Additional knobs that allow you to tweak the behavior of
/// [`fetch_repo_data`].
#[derive(Clone)]
pub struct FetchRepoDataOptions {
    /// Determines which variant to download. See [`Variant`] for more
    /// information.
    pub variant: Variant,

    /// When enabled, the zstd variant will be used if available.
    pub zstd_enabled: bool,

    /// When enabled, the bz2 variant will be used if available.
    pub bz2_enabled: bool,

    /// Describes how fetching repodata should interact with the on-disk
    /// cache.
    pub cache_action: CacheAction,

    /// Retry policy to use when streaming the response is interrupted. If
    /// this is `None` the default retry policy is used.
    pub retry_policy: Option<Arc<dyn RetryPolicy + Send + Sync>>,
}

impl Default for FetchRepoDataOptions {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            zstd_enabled: true,
            bz2_enabled: true,
            cache_action: CacheAction::default(),
            retry_policy: None,
        }
    }
}

/// The outcome of consulting the on-disk cache before (and sometimes after)
/// talking to the remote.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CacheResult {
    /// There was no cache entry at all, the file was freshly downloaded.
    CacheNotPresent,

    /// The cache entry was still within its `max-age` window, nothing was
    /// fetched.
    CacheHit,

    /// The cache entry was expired, but a conditional request confirmed it
    /// was still up to date (a 304 response).
    CacheHitAfterFetch,

    /// The cache entry was expired and a new body was downloaded.
    CacheOutdated,
}

/// The result of a successful call to [`fetch_repo_data`].
pub struct CachedData {
    /// The path to the (decompressed) `repodata.json` on disk.
    pub repo_data_json_path: PathBuf,

    /// The cache metadata that is now associated with the file at
    /// [`Self::repo_data_json_path`].
    pub cache_state: RepoDataState,

    /// Describes how the result was obtained.
    pub cache_result: CacheResult,
}

/// Ensures a subdirectory URL always has a trailing slash, so joining a
/// filename onto it never clobbers the last path segment.
pub(crate) fn normalize_subdir_url(mut url: Url) -> Url {
    let path = url.path();
    if !path.ends_with('/') {
        url.set_path(&format!("{path}/"));
    }
    url
}

/// Parses the `max-age` directive (in seconds) from a `Cache-Control` header
/// value, if present.
fn max_age_from_cache_control(cache_control: Option<&str>) -> Option<std::time::Duration> {
    let cache_control = CacheControl::from_value(cache_control?)?;
    match cache_control {
        CacheControl {
            cachability: Some(Cachability::NoCache | Cachability::NoStore),
            ..
        } => Some(std::time::Duration::ZERO),
        CacheControl {
            max_age: Some(duration),
            ..
        } => Some(duration),
        _ => None,
    }
}

/// Default amount of time a cached `repodata.json` is considered fresh when
/// the server didn't send any cache-control information.
const DEFAULT_MAX_AGE: std::time::Duration = std::time::Duration::from_secs(3600);

/// Fetch the repodata.json file for the given subdirectory. The result is
/// cached on disk using the HTTP cache headers returned from the server.
///
/// This method implements several different strategies to download the
/// repodata.json file from the remote:
///
/// * If a `repodata.json.zst` file is available in the same directory that
///   file is downloaded and decompressed.
/// * If a `repodata.json.bz2` file is available in the same directory that
///   file is downloaded and decompressed.
/// * Otherwise the regular `repodata.json` file is downloaded.
///
/// Before issuing a request, any existing cache entry is consulted. If it is
/// still within its `max-age` the cached file is returned unchanged. If it
/// has expired, a conditional request (`If-None-Match`/`If-Modified-Since`)
/// is issued so the server can reply with `304 Not Modified` without
/// resending the body.
#[instrument(err, skip_all, fields(subdir_url, cache_dir = %cache_dir.display()))]
pub async fn fetch_repo_data(
    subdir_url: Url,
    client: LazyClient,
    cache_dir: PathBuf,
    options: FetchRepoDataOptions,
    reporter: Option<Arc<dyn Reporter>>,
) -> Result<CachedData, FetchRepoDataError> {
    let subdir_url = normalize_subdir_url(subdir_url);
    let repo_data_url = subdir_url
        .join(options.variant.file_name())
        .expect("variant file name is always a valid relative url");

    let cache_key = url_to_cache_filename(&repo_data_url);
    let cache_repo_data_path = cache_dir.join(format!("{cache_key}.json"));
    let cache_state_path = cache_dir.join(format!("{cache_key}.info.json"));
    let cache_lock_path = cache_dir.join(format!("{cache_key}.lock"));

    // Acquire an exclusive lock for the duration of the fetch, to serialize
    // concurrent readers/writers of the same cache entry across processes.
    let lock_msg = format!("waiting for repodata cache lock ({cache_key})");
    let _lock = tokio::task::spawn_blocking(move || LockedFile::open_rw(&cache_lock_path, &lock_msg))
        .await
        .expect("locking task panicked")
        .map_err(FetchRepoDataError::FailedToAcquireLock)?;

    let existing_state = RepoDataState::from_path(&cache_state_path).ok();
    let existing_state = existing_state.filter(|state| {
        // The cached metadata is only valid if it still matches the file on
        // disk; otherwise someone else clobbered the cache out from under us.
        std::fs::metadata(&cache_repo_data_path)
            .ok()
            .is_some_and(|metadata| {
                metadata.len() == state.cache_size
                    && metadata
                        .modified()
                        .ok()
                        .is_some_and(|mtime| mtime == state.cache_last_modified)
            })
    });

    if options.cache_action == CacheAction::ForceCacheOnly {
        return match existing_state {
            Some(cache_state) => Ok(CachedData {
                repo_data_json_path: cache_repo_data_path,
                cache_state,
                cache_result: CacheResult::CacheHit,
            }),
            None => Err(FetchRepoDataError::NoCacheAvailable),
        };
    }

    if let Some(cache_state) = &existing_state {
        let max_age = max_age_from_cache_control(cache_state.cache_headers.cache_control.as_deref())
            .unwrap_or(DEFAULT_MAX_AGE);
        let age = SystemTime::now()
            .duration_since(cache_state.cache_last_modified)
            .unwrap_or_default();
        if age <= max_age {
            return Ok(CachedData {
                repo_data_json_path: cache_repo_data_path,
                cache_state: cache_state.clone(),
                cache_result: CacheResult::CacheHit,
            });
        }
    }

    if options.cache_action == CacheAction::UseCacheOnly {
        return match existing_state {
            Some(cache_state) => Ok(CachedData {
                repo_data_json_path: cache_repo_data_path,
                cache_state,
                cache_result: CacheResult::CacheHit,
            }),
            None => Err(FetchRepoDataError::NoCacheAvailable),
        };
    }

    if options.cache_action == CacheAction::NoCache {
        return download_and_replace(
            &cache_repo_data_path,
            &cache_state_path,
            &subdir_url,
            &client,
            &options,
            reporter,
            CacheResult::CacheNotPresent,
        )
        .await;
    }

    // We have an (expired or absent) cache entry, try a conditional request.
    let Some(cache_state) = existing_state else {
        return download_and_replace(
            &cache_repo_data_path,
            &cache_state_path,
            &subdir_url,
            &client,
            &options,
            reporter,
            CacheResult::CacheNotPresent,
        )
        .await;
    };

    let mut request = client
        .client()
        .get(cache_state.url.clone())
        .build()
        .map_err(reqwest_middleware::Error::from)?;
    cache_state.cache_headers.add_to_request(request.headers_mut());

    let response = client
        .client()
        .execute(request)
        .await
        .map_err(FetchRepoDataError::from)?;

    if response.status() == StatusCode::NOT_MODIFIED {
        let new_headers = CacheHeaders::from(&response);
        let mut new_state = cache_state;
        new_state.cache_headers = new_headers;
        new_state.cache_last_modified = SystemTime::now();
        filetime::set_file_mtime(
            &cache_repo_data_path,
            filetime::FileTime::from_system_time(new_state.cache_last_modified),
        )
        .map_err(FetchRepoDataError::FailedToGetMetadata)?;
        new_state
            .to_path(&cache_state_path)
            .map_err(FetchRepoDataError::FailedToWriteCacheState)?;

        return Ok(CachedData {
            repo_data_json_path: cache_repo_data_path,
            cache_state: new_state,
            cache_result: CacheResult::CacheHitAfterFetch,
        });
    }

    if response.status() == StatusCode::NOT_FOUND {
        return Err(FetchRepoDataError::NotFound(
            RepoDataNotFoundError::HttpError(response.error_for_status().unwrap_err()),
        ));
    }

    // The server sent us a fresh body even though we asked conditionally;
    // fall through to a full download using the already-open response.
    download_and_replace(
        &cache_repo_data_path,
        &cache_state_path,
        &subdir_url,
        &client,
        &options,
        reporter,
        CacheResult::CacheOutdated,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn download_and_replace(
    cache_repo_data_path: &std::path::Path,
    cache_state_path: &std::path::Path,
    subdir_url: &Url,
    client: &LazyClient,
    options: &FetchRepoDataOptions,
    reporter: Option<Arc<dyn Reporter>>,
    cache_result: CacheResult,
) -> Result<CachedData, FetchRepoDataError> {
    let no_cache_options = NoCacheOptions {
        variant: options.variant,
        zstd_enabled: options.zstd_enabled,
        bz2_enabled: options.bz2_enabled,
        retry_policy: options
            .retry_policy
            .clone()
            .or_else(|| Some(Arc::new(default_retry_policy()))),
    };

    let (bytes, response_cache_headers) = no_cache::fetch_repo_data_with_headers(
        subdir_url.clone(),
        client.client().clone(),
        no_cache_options,
        reporter,
    )
    .await?;

    let cache_dir = cache_repo_data_path
        .parent()
        .expect("cache path always has a parent");
    std::fs::create_dir_all(cache_dir).map_err(FetchRepoDataError::IoError)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(cache_dir)
        .map_err(FetchRepoDataError::FailedToCreateTemporaryFile)?;
    std::io::Write::write_all(&mut temp_file, &bytes).map_err(FetchRepoDataError::IoError)?;
    let blake2_hash = rattler_digest::compute_bytes_digest::<rattler_digest::Blake2b256>(&bytes);
    temp_file
        .persist(cache_repo_data_path)
        .map_err(FetchRepoDataError::FailedToPersistTemporaryFile)?;

    let metadata =
        std::fs::metadata(cache_repo_data_path).map_err(FetchRepoDataError::FailedToGetMetadata)?;

    let repo_data_url = subdir_url
        .join(options.variant.file_name())
        .expect("variant file name is always a valid relative url");
    let cache_state = RepoDataState {
        url: repo_data_url,
        cache_headers: response_cache_headers,
        cache_last_modified: metadata
            .modified()
            .map_err(FetchRepoDataError::FailedToGetMetadata)?,
        cache_size: metadata.len(),
        blake2_hash: Some(blake2_hash),
        blake2_hash_nominal: None,
        has_zst: None,
        has_bz2: None,
        has_jlap: None,
        jlap: None,
    };
    cache_state
        .to_path(cache_state_path)
        .map_err(FetchRepoDataError::FailedToWriteCacheState)?;

    Ok(CachedData {
        repo_data_json_path: cache_repo_data_path.to_path_buf(),
        cache_state,
        cache_result,
    })
}
