//! Functionality to stream and extract packages directly from a [`reqwest::Url`] within a [`tokio`]
//! async context.

use crate::{DownloadReporter, ExtractError, ExtractResult};
use futures_util::stream::TryStreamExt;
use rattler_conda_types::package::ArchiveType;
use rattler_digest::Sha256Hash;
use reqwest::IntoUrl;
use reqwest_middleware::ClientWithMiddleware;
use std::path::Path;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::io::StreamReader;

fn verify_sha256(result: &ExtractResult, expected: Option<Sha256Hash>) -> Result<(), ExtractError> {
    match expected {
        Some(expected) if expected != result.sha256 => Err(ExtractError::Sha256Mismatch),
        _ => Ok(()),
    }
}

/// Extracts the contents a `.tar.bz2` package archive from the specified remote location.
///
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// # use std::path::Path;
/// use rattler_package_streaming::reqwest::tokio::extract_tar_bz2;
/// # use reqwest_middleware::ClientWithMiddleware;
/// let _ = extract_tar_bz2(
///     ClientWithMiddleware::from(reqwest::Client::default()),
///     "https://conda.anaconda.org/conda-forge/win-64/python-3.11.0-hcf16a7b_0_cpython.tar.bz2",
///     Path::new("/tmp"),
///     None,
///     None)
///     .await
///     .unwrap();
/// # }
/// ```
pub async fn extract_tar_bz2(
    client: ClientWithMiddleware,
    url: impl IntoUrl,
    destination: &Path,
    expected_sha256: Option<Sha256Hash>,
    reporter: Option<Arc<dyn DownloadReporter>>,
) -> Result<ExtractResult, ExtractError> {
    extract_with_type(
        client,
        url,
        destination,
        ArchiveType::TarBz2,
        expected_sha256,
        reporter,
    )
    .await
}

/// Extracts the contents a `.conda` package archive from the specified remote location.
///
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// # use std::path::Path;
/// use rattler_package_streaming::reqwest::tokio::extract_conda;
/// # use reqwest_middleware::ClientWithMiddleware;
/// let _ = extract_conda(
///     ClientWithMiddleware::from(reqwest::Client::default()),
///     "https://conda.anaconda.org/conda-forge/linux-64/python-3.10.8-h4a9ceb5_0_cpython.conda",
///     Path::new("/tmp"),
///     None,
///     None)
///     .await
///     .unwrap();
/// # }
/// ```
pub async fn extract_conda(
    client: ClientWithMiddleware,
    url: impl IntoUrl,
    destination: &Path,
    expected_sha256: Option<Sha256Hash>,
    reporter: Option<Arc<dyn DownloadReporter>>,
) -> Result<ExtractResult, ExtractError> {
    extract_with_type(
        client,
        url,
        destination,
        ArchiveType::Conda,
        expected_sha256,
        reporter,
    )
    .await
}

/// Extracts the contents a package archive from the specified remote location. The type of package
/// is determined based on the path of the url.
///
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// # use std::path::Path;
/// use rattler_package_streaming::reqwest::tokio::extract;
/// # use reqwest_middleware::ClientWithMiddleware;
/// let _ = extract(
///     ClientWithMiddleware::from(reqwest::Client::default()),
///     "https://conda.anaconda.org/conda-forge/linux-64/python-3.10.8-h4a9ceb5_0_cpython.conda",
///     Path::new("/tmp"),
///     None,
///     None)
///     .await
///     .unwrap();
/// # }
/// ```
pub async fn extract(
    client: ClientWithMiddleware,
    url: impl IntoUrl,
    destination: &Path,
    expected_sha256: Option<Sha256Hash>,
    reporter: Option<Arc<dyn DownloadReporter>>,
) -> Result<ExtractResult, ExtractError> {
    let url = url
        .into_url()
        .map_err(reqwest::Error::from)
        .map_err(ExtractError::ReqwestError)?;
    let archive_type = ArchiveType::try_from(Path::new(url.path()))
        .ok_or(ExtractError::UnsupportedArchiveType)?;
    extract_with_type(
        client,
        url,
        destination,
        archive_type,
        expected_sha256,
        reporter,
    )
    .await
}

async fn extract_with_type(
    client: ClientWithMiddleware,
    url: impl IntoUrl,
    destination: &Path,
    archive_type: ArchiveType,
    expected_sha256: Option<Sha256Hash>,
    reporter: Option<Arc<dyn DownloadReporter>>,
) -> Result<ExtractResult, ExtractError> {
    let url = url
        .into_url()
        .map_err(reqwest::Error::from)
        .map_err(ExtractError::ReqwestError)?;

    let result = if url.scheme() == "file" {
        let file = tokio::fs::File::open(url.to_file_path().expect("not a valid file url"))
            .await
            .map_err(ExtractError::IoError)?;

        let stream_reader = BufReader::new(file);

        match archive_type {
            ArchiveType::TarBz2 => {
                crate::tokio::async_read::extract_tar_bz2(stream_reader, destination).await?
            }
            ArchiveType::Conda => {
                crate::tokio::async_read::extract_conda(stream_reader, destination).await?
            }
        }
    } else {
        if let Some(reporter) = &reporter {
            reporter.on_download_start();
        }

        // Send the request for the file
        let response = client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()
            .map_err(ExtractError::ReqwestError)?;

        let total_bytes = response.content_length();
        let mut bytes_received = 0u64;
        let progress_reporter = reporter.clone();

        // Get the response as a stream, reporting progress as chunks arrive.
        let reader = StreamReader::new(
            response
                .bytes_stream()
                .inspect_ok(move |chunk| {
                    if let Some(reporter) = &progress_reporter {
                        bytes_received += chunk.len() as u64;
                        reporter.on_download_progress(bytes_received, total_bytes);
                    }
                })
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err)),
        );

        let result = match archive_type {
            ArchiveType::TarBz2 => crate::tokio::async_read::extract_tar_bz2(reader, destination).await?,
            ArchiveType::Conda => crate::tokio::async_read::extract_conda(reader, destination).await?,
        };

        if let Some(reporter) = &reporter {
            reporter.on_download_complete();
        }

        result
    };

    verify_sha256(&result, expected_sha256)?;
    Ok(result)
}
