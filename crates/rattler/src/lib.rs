//! Rattler is a library to install [Conda](http://conda.io) packages into an
//! environment (a "prefix").
//!
//! Given a list of [`rattler_conda_types::RepoDataRecord`]s (resolved by some
//! external solver) this crate downloads the referenced package archives
//! into a shared [`package_cache`], extracts them, and links their contents
//! into the target prefix. See [`install`] for the entry points.

pub mod install;

pub use rattler_cache::{default_cache_dir, package_cache};

#[cfg(test)]
use std::path::{Path, PathBuf};

/// Returns the path to the directory that contains the test data used by this
/// crate's own tests.
#[cfg(test)]
pub(crate) fn get_test_data_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../test-data")
}

/// Extracts the conda package archive at `path` and builds a
/// [`rattler_conda_types::RepoDataRecord`] describing it, reading the name,
/// version and dependency metadata straight out of the extracted
/// `info/index.json`.
///
/// Used by tests that need a real package on disk without downloading one.
#[cfg(test)]
pub(crate) fn get_repodata_record(path: impl AsRef<Path>) -> rattler_conda_types::RepoDataRecord {
    use rattler_conda_types::{
        package::{ArchiveIdentifier, IndexJson, PackageFile},
        PackageRecord,
    };

    let path = path.as_ref();
    let archive = ArchiveIdentifier::try_from_path(path).expect("not a valid package archive");
    let temp_dir = tempfile::tempdir().expect("failed to create temporary directory");
    rattler_package_streaming::fs::extract(path, temp_dir.path())
        .expect("failed to extract package archive");

    let index_json =
        IndexJson::from_package_directory(temp_dir.path()).expect("missing info/index.json");
    let package_record = PackageRecord::from_index_json(index_json, None, None, None)
        .expect("invalid info/index.json");

    rattler_conda_types::RepoDataRecord {
        package_record,
        file_name: format!("{archive}"),
        url: url::Url::from_file_path(path).expect("archive path is not absolute"),
        channel: String::new(),
    }
}
