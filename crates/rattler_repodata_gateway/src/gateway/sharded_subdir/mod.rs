use std::borrow::Cow;

use rattler_conda_types::{RepoDataRecord, Shard};
use simple_spawn_blocking::tokio::run_blocking_task;
use url::Url;

use crate::{fetch::FetchRepoDataError, GatewayError};

cfg_if::cfg_if! {
    if #[cfg(target_arch = "wasm32")] {
        mod wasm;
        pub use wasm::ShardedSubdir;
    } else {
        mod tokio;
        pub use self::tokio::{ShardedSubdir, REPODATA_SHARDS_FILENAME, SHARDS_CACHE_SUFFIX};
    }
}

async fn decode_zst_bytes_async<R: AsRef<[u8]> + Send + 'static>(
    bytes: R,
) -> Result<Vec<u8>, GatewayError> {
    run_blocking_task(move || match zstd::decode_all(bytes.as_ref()) {
        Ok(decoded) => Ok(decoded),
        Err(err) => Err(GatewayError::IoError(
            "failed to decode zstd shard".to_string(),
            err,
        )),
    })
    .await
}

/// Parses the packages contained in a shard into [`RepoDataRecord`]s.
///
/// `channel_base_url` identifies the owning channel (stored verbatim on each
/// record); `package_base_url` is the url that package file names are
/// resolved against.
async fn parse_records<R: AsRef<[u8]> + Send + 'static>(
    bytes: R,
    channel_base_url: Url,
    package_base_url: Url,
) -> Result<Vec<RepoDataRecord>, GatewayError> {
    run_blocking_task(move || {
        let shard = rmp_serde::from_slice::<Shard>(bytes.as_ref())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
            .map_err(FetchRepoDataError::IoError)?;
        let packages =
            itertools::chain(shard.packages.into_iter(), shard.conda_packages.into_iter())
                .filter(|(name, _record)| !shard.removed.contains(name));
        let channel = channel_base_url.to_string();
        let package_base_url = add_trailing_slash(&package_base_url);
        Ok(packages
            .map(|(file_name, package_record)| RepoDataRecord {
                url: package_base_url
                    .join(&file_name)
                    .expect("filename is not a valid url"),
                channel: channel.clone(),
                package_record,
                file_name,
            })
            .collect())
    })
    .await
}

/// Returns the URL with a trailing slash if it doesn't already have one.
fn add_trailing_slash(url: &Url) -> Cow<'_, Url> {
    let path = url.path();
    if path.ends_with('/') {
        Cow::Borrowed(url)
    } else {
        let mut url = url.clone();
        url.set_path(&format!("{path}/"));
        Cow::Owned(url)
    }
}
