//! Functions that enable extracting or streaming a Conda package for objects that implement the
//! [`std::io::Read`] trait.

use super::{ExtractError, ExtractResult};
use rattler_digest::{HashingReader, Md5, Sha256};
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use zip::read::read_zipfile_from_stream;

/// Wraps a reader, counting the total number of bytes read through it.
pub(crate) struct SizeCountingReader<R> {
    inner: R,
    bytes_read: u64,
}

impl<R> SizeCountingReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
        }
    }

    pub(crate) fn finalize(self) -> (R, u64) {
        (self.inner, self.bytes_read)
    }
}

impl<R: Read> Read for SizeCountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

/// Returns the `.tar.bz2` as a decompressed `tar::Archive`. The `tar::Archive` can be used to
/// extract the files from it, or perform introspection.
pub fn stream_tar_bz2(reader: impl Read) -> tar::Archive<impl Read + Sized> {
    tar::Archive::new(bzip2::read::BzDecoder::new(reader))
}

/// Returns the `.tar.zst` as a decompressed `tar` archive. The `tar::Archive` can be used to
/// extract the files from it, or perform introspection.
pub(crate) fn stream_tar_zst(
    reader: impl Read,
) -> Result<tar::Archive<impl Read + Sized>, ExtractError> {
    Ok(tar::Archive::new(zstd::stream::read::Decoder::new(reader)?))
}

/// Returns `true` if `path` is a relative path that stays within its root when
/// joined onto any destination directory, i.e. it contains no `..`, isn't
/// absolute, and isn't empty.
pub(crate) fn is_safe_relative_path(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Lexically resolves `..`/`.` components without touching the filesystem.
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            Component::CurDir => {}
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
        }
    }
    out
}

/// Returns `true` if a symlink at `entry_path` pointing at `link_target` would
/// resolve to a location inside the destination directory.
pub(crate) fn is_safe_symlink_target(entry_path: &Path, link_target: &Path) -> bool {
    if link_target.is_absolute() {
        return false;
    }
    let base = entry_path.parent().unwrap_or_else(|| Path::new(""));
    let resolved = lexically_normalize(&base.join(link_target));
    !matches!(resolved.components().next(), Some(Component::ParentDir))
}

/// Unpacks a `tar::Archive`, rejecting any entry that would extract outside of
/// `destination` (path traversal via `..`, absolute paths, or a symlink whose
/// target escapes the destination) instead of relying solely on `tar`'s own
/// incidental sanitization.
fn unpack_tar_safely(
    mut archive: tar::Archive<impl Read>,
    destination: &Path,
) -> Result<(), ExtractError> {
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();

        if !is_safe_relative_path(&entry_path) {
            return Err(ExtractError::UnsafeArchive(
                entry_path.to_string_lossy().into_owned(),
            ));
        }

        if let Some(link_name) = entry.link_name()? {
            if !is_safe_symlink_target(&entry_path, &link_name) {
                return Err(ExtractError::UnsafeArchive(
                    entry_path.to_string_lossy().into_owned(),
                ));
            }
        }

        let _ = entry.unpack_in(destination)?;
    }
    Ok(())
}

/// Extracts the contents a `.tar.bz2` package archive, returning the hashes
/// and total size of the archive as computed while it was streamed through.
pub fn extract_tar_bz2(reader: impl Read, destination: &Path) -> Result<ExtractResult, ExtractError> {
    std::fs::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;

    let sha256_reader = HashingReader::<_, Sha256>::new(reader);
    let mut md5_reader = HashingReader::<_, Md5>::new(sha256_reader);
    let mut size_reader = SizeCountingReader::new(&mut md5_reader);

    unpack_tar_safely(stream_tar_bz2(&mut size_reader), destination)?;

    // Drain any trailing bytes so the hashes cover the whole archive.
    std::io::copy(&mut size_reader, &mut std::io::sink()).map_err(ExtractError::IoError)?;

    let (_, total_size) = size_reader.finalize();
    let (sha256_reader, md5) = md5_reader.finalize();
    let (_, sha256) = sha256_reader.finalize();

    Ok(ExtractResult {
        sha256,
        md5,
        total_size,
    })
}

/// Extracts the contents of a `.conda` package archive, returning the hashes
/// and total size of the archive as computed while it was streamed through.
pub fn extract_conda(reader: impl Read, destination: &Path) -> Result<ExtractResult, ExtractError> {
    // Construct the destination path if it doesnt exist yet
    std::fs::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;

    let sha256_reader = HashingReader::<_, Sha256>::new(reader);
    let mut md5_reader = HashingReader::<_, Md5>::new(sha256_reader);
    let mut size_reader = SizeCountingReader::new(&mut md5_reader);

    // Iterate over all entries in the zip-file and extract them one-by-one
    while let Some(file) = read_zipfile_from_stream(&mut size_reader)? {
        let raw_name = file.name().to_string();
        if !is_safe_relative_path(Path::new(&raw_name)) {
            return Err(ExtractError::UnsafeArchive(raw_name));
        }

        if file
            .mangled_name()
            .file_name()
            .map(OsStr::to_string_lossy)
            .map_or(false, |file_name| file_name.ends_with(".tar.zst"))
        {
            unpack_tar_safely(stream_tar_zst(file)?, destination)?;
        }
    }

    std::io::copy(&mut size_reader, &mut std::io::sink()).map_err(ExtractError::IoError)?;

    let (_, total_size) = size_reader.finalize();
    let (sha256_reader, md5) = md5_reader.finalize();
    let (_, sha256) = sha256_reader.finalize();

    Ok(ExtractResult {
        sha256,
        md5,
        total_size,
    })
}
