//! Converts a package archive from one format to the other (`.tar.bz2` to `.conda`
//! or vice versa) by extracting it to a temporary directory and re-packaging it.

use crate::write::{write_conda_package, write_tar_bz2_package, CompressionLevel};
use crate::ExtractError;
use std::path::Path;

/// Recursively collects all file paths under `root`, for feeding into the archive writer.
fn collect_files(root: &Path) -> Result<Vec<std::path::PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    Ok(files)
}

/// Converts a `.tar.bz2` package archive into a `.conda` package archive.
///
/// The archive is extracted to a temporary directory and re-packaged, it is not converted
/// in-place; this does not preserve the original archive's mtimes or other metadata beyond
/// what the `.conda` format itself can represent.
pub fn tar_bz2_to_conda(
    archive: &Path,
    destination: &Path,
    out_name: &str,
    compression_level: CompressionLevel,
) -> Result<(), ExtractError> {
    let temp_dir = tempfile::tempdir().map_err(ExtractError::IoError)?;
    crate::fs::extract_tar_bz2(archive, temp_dir.path())?;

    let files = collect_files(temp_dir.path()).map_err(ExtractError::IoError)?;
    let out_file = std::fs::File::create(destination).map_err(ExtractError::IoError)?;
    write_conda_package(
        out_file,
        temp_dir.path(),
        &files,
        compression_level,
        out_name,
    )
    .map_err(ExtractError::IoError)
}

/// Converts a `.conda` package archive into a `.tar.bz2` package archive.
///
/// The archive is extracted to a temporary directory and re-packaged, it is not converted
/// in-place; this does not preserve the original archive's mtimes or other metadata beyond
/// what the `.tar.bz2` format itself can represent.
pub fn conda_to_tar_bz2(
    archive: &Path,
    destination: &Path,
    compression_level: CompressionLevel,
) -> Result<(), ExtractError> {
    let temp_dir = tempfile::tempdir().map_err(ExtractError::IoError)?;
    crate::fs::extract_conda(archive, temp_dir.path())?;

    let files = collect_files(temp_dir.path()).map_err(ExtractError::IoError)?;
    let out_file = std::fs::File::create(destination).map_err(ExtractError::IoError)?;
    write_tar_bz2_package(out_file, temp_dir.path(), &files, compression_level)
        .map_err(ExtractError::IoError)
}
