use std::path::PathBuf;

use crate::install::driver::PostProcessingError;
use crate::install::link_script::PrePostLinkError;
use crate::install::unlink::UnlinkError;
use crate::install::{InstallError, TransactionError};
use crate::package_cache::PackageCacheError;
use simple_spawn_blocking::Cancelled;

/// An error returned by the installer
#[derive(Debug, thiserror::Error)]
pub enum InstallerError {
    /// Failed to create the target prefix directory.
    #[error("failed to create prefix directory {0}")]
    FailedToCreatePrefix(PathBuf, #[source] std::io::Error),

    /// Failed to determine the currently installed packages.
    #[error("failed to determine the currently installed packages")]
    FailedToDetectInstalledPackages(#[source] std::io::Error),

    /// Failed to construct a transaction
    #[error("failed to construct a transaction")]
    FailedToConstructTransaction(#[from] TransactionError),

    /// The target platform is `NoArch` but some of the packages to install
    /// are platform specific.
    #[error(
        "the target platform is noarch but the following packages are platform specific: {}",
        .0.join(", ")
    )]
    PlatformSpecificPackagesWithNoarchPlatform(Vec<String>),

    /// Failed to populate the cache with the package
    #[error("failed to fetch {0}")]
    FailedToFetch(String, #[source] PackageCacheError),

    /// Failed to link a certain package
    #[error("failed to link {0}")]
    LinkError(String, #[source] InstallError),

    /// Failed to unlink a certain package
    #[error("failed to unlink {0}")]
    UnlinkError(String, #[source] UnlinkError),

    /// A generic IO error occured
    #[error("{0}")]
    IoError(String, #[source] std::io::Error),

    /// Failed to run a pre-link script
    #[error("pre-processing failed")]
    PreProcessingFailed(#[source] PrePostLinkError),

    /// Failed to run post-processing of the transaction
    #[error("post-processing failed")]
    PostProcessingFailed(#[from] PostProcessingError),

    /// The operation was cancelled
    #[error("the operation was cancelled")]
    Cancelled,
}

impl From<Cancelled> for InstallerError {
    fn from(_: Cancelled) -> Self {
        InstallerError::Cancelled
    }
}
