#![deny(missing_docs)]

//! This crate provides the ability to extract a Conda package archive or specific parts of it.

pub mod read;
pub mod seek;

#[cfg(feature = "reqwest")]
pub mod reqwest;

pub mod fs;
#[cfg(feature = "tokio")]
pub mod tokio;
pub mod transmute;
pub mod write;

/// The outcome of successfully extracting a package archive: the hashes and
/// total size of the archive as it was read off the wire or disk, computed
/// on the fly while streaming into the destination directory.
#[derive(Debug, Clone)]
pub struct ExtractResult {
    /// The `SHA256` hash of the archive.
    pub sha256: rattler_digest::Sha256Hash,
    /// The `MD5` hash of the archive.
    pub md5: rattler_digest::Md5Hash,
    /// The total size in bytes of the archive.
    pub total_size: u64,
}

/// A trait that enables being notified of the progress of downloading a
/// single package archive.
pub trait DownloadReporter: Send + Sync {
    /// Called when the download starts.
    fn on_download_start(&self) {}

    /// Called when the download makes any progress. `total_bytes` is `None`
    /// if the total size of the download is unknown.
    fn on_download_progress(&self, _bytes_downloaded: u64, _total_bytes: Option<u64>) {}

    /// Called when the download finished.
    fn on_download_complete(&self) {}
}

/// An error that can occur when extracting a package archive.
#[derive(thiserror::Error, Debug)]
#[allow(missing_docs)]
pub enum ExtractError {
    #[error("an io error occurred")]
    IoError(#[from] std::io::Error),

    #[error("could not create the destination path")]
    CouldNotCreateDestination(#[source] std::io::Error),

    #[error("invalid zip archive")]
    ZipError(#[from] zip::result::ZipError),

    #[error("a component is missing from the Conda archive")]
    MissingComponent,

    #[error("unsupported compression method")]
    UnsupportedCompressionMethod,

    #[cfg(feature = "reqwest")]
    #[error(transparent)]
    ReqwestError(::reqwest::Error),

    #[cfg(feature = "reqwest")]
    #[error(transparent)]
    ReqwestMiddlewareError(#[from] ::reqwest_middleware::Error),

    #[error("unsupported package archive format")]
    UnsupportedArchiveType,

    #[error("archive entry '{0}' would extract outside of the destination directory")]
    UnsafeArchive(String),

    #[error("the sha256 hash of the downloaded package does not match the expected hash")]
    Sha256Mismatch,

    #[error("the task was cancelled")]
    Cancelled,
}
