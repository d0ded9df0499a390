//! Implements a registry for "clobbering" files (files that are appearing in
//! multiple packages)

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use fs_err as fs;
use indexmap::IndexSet;
use itertools::Itertools;
use rattler_conda_types::{
    package::{IndexJson, PathsEntry},
    PackageName, PrefixRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClobberedPath {
    /// The name of the package from which the final file is taken.
    pub package: PackageName,

    /// Other packages that clobbered the file.
    pub other_packages: Vec<PackageName>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClobberError {
    #[error("{0}")]
    IoError(String, #[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathState {
    /// A path that is installed after the transaction by a package
    Installed(PackageNameIdx),
    /// A path that is removed after the transaction by a package
    Removed(PackageNameIdx),
}

/// A registry for clobbering files
/// The registry keeps track of all files that are installed by a package and
/// can be used to rename files that are already installed by another package.
#[derive(Debug, Default, Clone)]
pub struct ClobberRegistry {
    /// A cache of package names
    package_names: Vec<PackageName>,

    /// The paths that exist in the prefix and the first package that touched
    /// the file.
    paths_registry: HashMap<PathBuf, PathState>,

    /// Paths that have been clobbered and by which package, this also
    /// includes the primary package. E.g. the package that actually wrote to
    /// the file.
    clobbers: HashMap<PathBuf, Vec<PackageNameIdx>>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
struct PackageNameIdx(usize);

static CLOBBER_TEMPLATE: &str = "__clobber-from-";

fn clobber_template(package_name: &PackageName) -> String {
    format!("{CLOBBER_TEMPLATE}{}", package_name.as_normalized())
}

impl ClobberRegistry {
    /// Create a new clobber registry that is initialized with the given prefix
    /// records.
    pub fn new<'i>(prefix_records: impl IntoIterator<Item = &'i PrefixRecord>) -> Self {
        let mut package_names = Vec::new();
        let mut paths_registry = HashMap::new();
        let mut temp_clobbers = Vec::new();

        for prefix_record in prefix_records {
            let package_name = prefix_record.repodata_record.package_record.name.clone();
            package_names.push(package_name.clone());
            let package_name_idx = PackageNameIdx(package_names.len() - 1);

            for p in &prefix_record.paths_data.paths {
                if let Some(original_path) = &p.original_path {
                    temp_clobbers.push((original_path, package_name_idx));
                } else {
                    paths_registry.insert(
                        p.relative_path.clone(),
                        PathState::Installed(package_name_idx),
                    );
                }
            }
        }

        let mut clobbers = HashMap::with_capacity(temp_clobbers.len());
        for (path, originating_package_idx) in temp_clobbers.iter() {
            let path = *path;
            clobbers
                .entry(path.clone())
                .or_insert_with(|| {
                    // The path can only be installed at this point
                    if let Some(&PathState::Installed(other_idx)) = paths_registry.get(path) {
                        vec![other_idx]
                    } else {
                        Vec::new()
                    }
                })
                .push(*originating_package_idx);
        }

        Self {
            package_names,
            paths_registry,
            clobbers,
        }
    }

    /// Register that all the paths of a package are being removed.
    pub fn unregister_paths(&mut self, prefix_paths: &PrefixRecord) {
        // Find the name in the registry
        let Some(name_idx) = self
            .package_names
            .iter()
            .position(|n| n == &prefix_paths.repodata_record.package_record.name)
            .map(PackageNameIdx)
        else {
            tracing::warn!(
                "Tried to unregister paths for a package ({}) that is not in the registry",
                prefix_paths
                    .repodata_record
                    .package_record
                    .name
                    .as_normalized()
            );
            return;
        };

        // Remove this package from any clobbering consideration.
        for p in &prefix_paths.paths_data.paths {
            let path = p.original_path.as_ref().unwrap_or(&p.relative_path);
            if let Some(clobber) = self.clobbers.get_mut(path) {
                clobber.retain(|&idx| idx != name_idx);
            }

            let Some(paths_entry) = self.paths_registry.get_mut(path) else {
                tracing::warn!("The path {} is not in the registry", path.display());
                continue;
            };

            if *paths_entry == PathState::Installed(name_idx) {
                *paths_entry = PathState::Removed(name_idx);
            }
        }
    }

    /// Register the paths of a package before linking a package in
    /// order to determine which files may clobber other files (clobbering files
    /// are those that are present in multiple packages).
    ///
    /// This function has to run sequentially, and a `post_process` step
    /// will "unclobber" the files after all packages have been installed.
    pub fn register_paths(
        &mut self,
        index_json: &IndexJson,
        computed_paths: &Vec<(PathsEntry, PathBuf)>,
    ) -> HashMap<PathBuf, PathBuf> {
        let mut clobber_paths = HashMap::new();
        let name = &index_json.name.clone();

        // check if we have the package name already registered
        let name_idx = if let Some(idx) = self.package_names.iter().position(|n| n == name) {
            PackageNameIdx(idx)
        } else {
            self.package_names.push(name.clone());
            PackageNameIdx(self.package_names.len() - 1)
        };

        for (_, path) in computed_paths {
            if let Some(&entry) = self.paths_registry.get(path) {
                match entry {
                    PathState::Installed(idx) => {
                        // if we find an entry, we have a clobbering path!
                        // Then we rename the current path to a clobbered path
                        let new_path = clobber_name(path, &self.package_names[name_idx.0]);
                        self.clobbers
                            .entry(path.clone())
                            .or_insert_with(|| vec![idx])
                            .push(name_idx);

                        // We insert the non-renamed path here
                        clobber_paths.insert(path.clone(), new_path);
                    }
                    PathState::Removed(idx) => {
                        if idx == name_idx {
                            // This is just an update of the package itself so we don't need to
                            // do anything special (just flip it as installed)
                            self.paths_registry
                                .insert(path.clone(), PathState::Installed(idx));
                            // If we previously had clobbers with this path, we need to
                            // add the re-installed package back to the clobbers
                            if let Some(entry) = self.clobbers.get_mut(path) {
                                entry.push(name_idx);
                            }
                        } else {
                            // In this case, another package is installing this path. We have previously
                            // removed this path, but since we don't know about the order of execution of
                            // removals and installs _on the disc_ we need to first install this path to a clobbering
                            // path and then rename it back to the original path after everything has finished.
                            let new_path = clobber_name(path, &self.package_names[name_idx.0]);
                            self.clobbers
                                .entry(path.clone())
                                // We insert an empty vector here because there is no other file that should stick around
                                // (idx is already removed)
                                .or_default()
                                .push(name_idx);

                            // We insert the non-renamed path here
                            clobber_paths.insert(path.clone(), new_path);
                        }
                    }
                }
            } else {
                self.paths_registry
                    .insert(path.clone(), PathState::Installed(name_idx));
            }
        }

        clobber_paths
    }

    /// Unclobber the paths after all installation steps have been completed.
    /// Returns an overview of all the clobbered files.
    pub fn unclobber(
        &mut self,
        sorted_prefix_records: &[&PrefixRecord],
        target_prefix: &Path,
    ) -> Result<HashMap<PathBuf, ClobberedPath>, ClobberError> {
        let conda_meta = target_prefix.join("conda-meta");
        let sorted_names = sorted_prefix_records
            .iter()
            .map(|p| p.repodata_record.package_record.name.clone())
            .collect::<IndexSet<_>>();

        let mut prefix_records = sorted_prefix_records
            .iter()
            .map(|x| (*x).clone())
            .collect::<Vec<PrefixRecord>>();
        let mut prefix_records_to_rewrite = HashSet::new();
        let mut result = HashMap::new();

        tracing::info!("Unclobbering {} files", self.clobbers.len());
        for (path, clobbered_by) in self.clobbers.iter() {
            let clobbered_by_names = clobbered_by
                .iter()
                .map(|&idx| &self.package_names[idx.0])
                .collect::<IndexSet<_>>();

            // Extract the subset of clobbered_by that is in sorted_prefix_records
            let sorted_clobbered_by = sorted_names
                .iter()
                .cloned()
                .enumerate()
                .filter(|(_, n)| clobbered_by_names.contains(n))
                .collect::<Vec<_>>();

            let Some(current_winner_entry) = self.paths_registry.get(path) else {
                tracing::warn!(
                    "The path {} is clobbered but not in the registry",
                    path.display()
                );
                continue;
            };

            // let current_winner = current_winner_entry.map(|idx| &self.package_names[idx.0]);
            let current_winner = match current_winner_entry {
                PathState::Installed(idx) => Some(&self.package_names[idx.0]),
                PathState::Removed(_) => None,
            };

            // Determine which package should write to the file
            let winner = match sorted_clobbered_by.last() {
                Some(winner) => winner,
                // In this case, all files have been removed and we can skip any unclobbering
                None => continue,
            };

            if clobbered_by.len() > 1 {
                tracing::info!(
                    "The path {} is clobbered by multiple packages ({}) but ultimately the file from {} is kept.",
                    path.display(),
                    sorted_clobbered_by.iter().map(|(_, n)| n.as_normalized()).format(", "),
                    &winner.1.as_normalized()
                );
            }

            if clobbered_by.len() > 1 {
                result.insert(
                    path.clone(),
                    ClobberedPath {
                        package: winner.1.clone(),
                        other_packages: sorted_clobbered_by
                            .iter()
                            .rev()
                            .skip(1)
                            .rev()
                            .map(|(_, n)| n.clone())
                            .collect(),
                    },
                );
            }

            // If the package that wrote to the file initially is already the package that
            // should write it, we can skip modifying this file in the first place.
            if Some(&winner.1) == current_winner {
                continue;
            }

            // If the path currently exists, we need to rename it.
            let full_path = target_prefix.join(path);
            if full_path.exists() {
                if let Some(loser_name) = current_winner {
                    let loser_path = clobber_name(path, loser_name);

                    // Rename the original file to a clobbered path.
                    tracing::debug!("renaming {} to {}", path.display(), loser_path.display());
                    fs::rename(target_prefix.join(path), target_prefix.join(&loser_path)).map_err(
                        |e| {
                            ClobberError::IoError(
                                format!(
                                    "failed to rename {} to {}",
                                    path.display(),
                                    loser_path.display()
                                ),
                                e,
                            )
                        },
                    )?;

                    if let Some(loser_idx) = sorted_clobbered_by
                        .iter()
                        .find(|(_, n)| n == loser_name)
                        .map(|(idx, _)| *idx)
                    {
                        rename_path_in_prefix_record(
                            &mut prefix_records[loser_idx],
                            path,
                            &loser_path,
                            true,
                        );
                        prefix_records_to_rewrite.insert(loser_idx);
                    }
                }
            }

            // Rename the winner
            let winner_path = clobber_name(path, &winner.1);
            tracing::debug!("renaming {} to {}", winner_path.display(), path.display());
            fs::rename(target_prefix.join(&winner_path), target_prefix.join(path)).map_err(
                |e| {
                    ClobberError::IoError(
                        format!(
                            "failed to rename {} to {}",
                            winner_path.display(),
                            path.display()
                        ),
                        e,
                    )
                },
            )?;

            rename_path_in_prefix_record(&mut prefix_records[winner.0], &winner_path, path, false);

            prefix_records_to_rewrite.insert(winner.0);
        }

        for idx in prefix_records_to_rewrite {
            let rec = &prefix_records[idx];
            tracing::debug!(
                "writing updated prefix record to: {:?}",
                conda_meta.join(rec.file_name())
            );
            rec.write_to_path(conda_meta.join(rec.file_name()), true)
                .map_err(|e| {
                    ClobberError::IoError(
                        format!("failed to write updated prefix record {}", rec.file_name()),
                        e,
                    )
                })?;
        }

        Ok(result)
    }
}

fn clobber_name(path: &Path, package_name: &PackageName) -> PathBuf {
    let file_name = path.file_name().unwrap_or_default();
    let mut new_path = path.to_path_buf();
    new_path.set_file_name(format!(
        "{}{}",
        file_name.to_string_lossy(),
        clobber_template(package_name),
    ));
    new_path
}

fn rename_path_in_prefix_record(
    record: &mut PrefixRecord,
    old_path: &Path,
    new_path: &Path,
    new_path_is_clobber: bool,
) {
    for path in record.files.iter_mut() {
        if path == old_path {
            *path = new_path.to_path_buf();
        }
    }

    for path in record.paths_data.paths.iter_mut() {
        if path.relative_path == old_path {
            path.relative_path = new_path.to_path_buf();
            path.original_path = if new_path_is_clobber {
                Some(old_path.to_path_buf())
            } else {
                None
            };
        }
    }
}
