use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::build::{Build, surrogate_id};
use crate::error::{Error, Result};
use crate::types::RpmRecord;

/// A point-in-time view of every `product/version/release` directory under a repository root.
#[derive(Debug, Default)]
pub struct BuildIndex {
    products: Vec<String>,
    builds: Vec<Build>,
    package_ids: BTreeMap<i32, Vec<String>>,
}

impl BuildIndex {
    /// Walks the tree three directories deep. Entries that are not directories, hidden
    /// entries and unreadable subtrees are left out rather than failing the scan.
    pub fn scan(root: &Path) -> Self {
        let mut index = Self::default();

        for (product, product_dir) in subdirectories(root) {
            for (version, version_dir) in subdirectories(&product_dir) {
                for (release, release_dir) in subdirectories(&version_dir) {
                    index.builds.push(Build {
                        product: product.clone(),
                        version: version.clone(),
                        release,
                        dir: release_dir,
                    });
                }
            }

            index
                .package_ids
                .entry(surrogate_id(&product))
                .or_default()
                .push(product.clone());
            index.products.push(product);
        }

        for (id, products) in &index.package_ids {
            if products.len() > 1 {
                warn!("Package id {id} collides between {}", products.join(", "));
            }
        }

        index
    }

    #[must_use]
    pub fn products(&self) -> &[String] {
        &self.products
    }

    #[must_use]
    pub fn builds(&self) -> &[Build] {
        &self.builds
    }

    /// Surrogate id of `product`, `None` when no such top-level directory exists.
    #[must_use]
    pub fn package_id(&self, product: &str) -> Option<i32> {
        self.products
            .iter()
            .any(|p| p == product)
            .then(|| surrogate_id(product))
    }

    /// Completed builds of the package. Builds carrying a failure marker are hidden.
    pub fn builds_for_package(&self, package_id: i32) -> Result<Vec<&Build>> {
        if let Some(products) = self.package_ids.get(&package_id) {
            if products.len() > 1 {
                return Err(Error::IdCollision {
                    id: package_id,
                    products: products.clone(),
                });
            }
        }

        Ok(self
            .builds
            .iter()
            .filter(|b| b.package_id() == package_id && !b.is_failed())
            .collect())
    }

    #[must_use]
    pub fn build_by_id(&self, build_id: i32) -> Option<&Build> {
        self.builds.iter().find(|b| b.id() == build_id)
    }

    #[must_use]
    pub fn tags_for(&self, build: &Build) -> Vec<String> {
        build.tags().unwrap_or_else(|e| {
            warn!("Failed to deduce tags of {}: {e}", build.nvr());
            Vec::new()
        })
    }

    pub fn artifacts_for(&self, build: &Build, arches: &[String]) -> Result<Vec<RpmRecord>> {
        Ok(build.artifacts(arches)?)
    }
}

fn subdirectories(dir: &Path) -> Vec<(String, PathBuf)> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Skipping {}: {e}", dir.display());
            return Vec::new();
        }
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping entry of {}: {e}", dir.display());
                continue;
            }
        };

        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        match entry.file_name().into_string() {
            Ok(name) if name.starts_with('.') => {}
            Ok(name) => dirs.push((name, path)),
            Err(name) => warn!("Skipping non UTF-8 directory {name:?} in {}", dir.display()),
        }
    }

    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mkdirs(root: &Path, paths: &[&str]) {
        for path in paths {
            fs::create_dir_all(root.join(path)).unwrap();
        }
    }

    #[test]
    fn test_scan_counts_only_release_directories() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        mkdirs(
            root,
            &[
                "java-1.8.0-openjdk/1.8.0.242.b08/0.fc30/x86_64",
                "java-1.8.0-openjdk/1.8.0.242.b08/1.fc31",
                "java-11-openjdk/11.0.6.10/0.el8/data",
                "lonely-product",
                "no-release/1.0",
                ".hidden/1/1",
            ],
        );
        fs::write(root.join("stray-file"), b"x").unwrap();
        fs::write(root.join("no-release/1.0/file"), b"x").unwrap();
        fs::write(root.join("java-11-openjdk/notes"), b"x").unwrap();

        let index = BuildIndex::scan(root);

        let nvrs: Vec<String> = index.builds().iter().map(Build::nvr).collect();
        assert_eq!(
            nvrs,
            [
                "java-1.8.0-openjdk-1.8.0.242.b08-0.fc30",
                "java-1.8.0-openjdk-1.8.0.242.b08-1.fc31",
                "java-11-openjdk-11.0.6.10-0.el8",
            ]
        );
        assert_eq!(
            index.products(),
            ["java-1.8.0-openjdk", "java-11-openjdk", "lonely-product", "no-release"]
        );
    }

    #[test]
    fn test_scan_of_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        let index = BuildIndex::scan(&temp.path().join("missing"));
        assert!(index.builds().is_empty());
        assert!(index.products().is_empty());
    }

    #[test]
    fn test_package_id_lookup() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["java-11-openjdk/11.0.6.10/0.el8"]);

        let index = BuildIndex::scan(temp.path());
        let id = index.package_id("java-11-openjdk").unwrap();
        assert_eq!(Some(id), index.package_id("java-11-openjdk"));
        assert_eq!(id, surrogate_id("java-11-openjdk"));
        assert!(index.package_id("java-17-openjdk").is_none());
    }

    #[test]
    fn test_builds_for_package_hides_failed_builds() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        mkdirs(root, &["p/1/1.el8/x86_64", "p/1/2.el8/data", "q/1/1.el8"]);
        fs::write(root.join("p/1/2.el8/data/FAILED"), b"").unwrap();

        let index = BuildIndex::scan(root);
        let id = index.package_id("p").unwrap();
        let builds = index.builds_for_package(id).unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].release, "1.el8");

        assert!(index.builds_for_package(-1).unwrap().is_empty());
    }

    #[test]
    fn test_collisions_are_reported() {
        let mut index = BuildIndex::default();
        index.package_ids.insert(7, vec!["a".to_string(), "b".to_string()]);
        assert!(matches!(
            index.builds_for_package(7),
            Err(Error::IdCollision { id: 7, .. })
        ));
    }

    #[test]
    fn test_build_by_id() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["p/1/1.el8", "p/2/1.el8"]);

        let index = BuildIndex::scan(temp.path());
        let wanted = &index.builds()[1];
        assert_eq!(index.build_by_id(wanted.id()), Some(wanted));
        assert!(index.build_by_id(-5).is_none());
    }

    #[test]
    fn test_tags_for_vanished_build_is_empty() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["p/1/1.el8/x86_64"]);

        let index = BuildIndex::scan(temp.path());
        let build = index.builds()[0].clone();
        fs::remove_dir_all(temp.path().join("p")).unwrap();
        assert!(index.tags_for(&build).is_empty());
    }
}
