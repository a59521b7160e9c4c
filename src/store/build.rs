use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::owner::owner_name;
use crate::types::{BUILD_STATE_COMPLETE, BuildRecord, DATA_DIR, INTERNAL_REPO, Nvra, RpmRecord};

/// Marker file whose presence means the build never completed.
pub const FAILED_MARKER: &str = "FAILED";

const DEFAULT_OWNER: &str = "fakekoji";
const KOJI_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Stable 31-bit id for `key`. XML-RPC integers are 32-bit signed, so the top bit is dropped.
#[must_use]
pub fn surrogate_id(key: &str) -> i32 {
    let digest = Sha256::digest(key.as_bytes());
    let value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7fff_ffff;
    value as i32
}

/// One `product/version/release` directory found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
    pub product: String,
    pub version: String,
    pub release: String,
    pub dir: PathBuf,
}

impl Build {
    #[must_use]
    pub fn nvr(&self) -> String {
        format!("{}-{}-{}", self.product, self.version, self.release)
    }

    #[must_use]
    pub fn id(&self) -> i32 {
        surrogate_id(&self.nvr())
    }

    #[must_use]
    pub fn package_id(&self) -> i32 {
        surrogate_id(&self.product)
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.dir.join(FAILED_MARKER).exists()
            || self.dir.join(DATA_DIR).join(FAILED_MARKER).exists()
    }

    /// Architecture directories of the build, sorted.
    pub fn arches(&self) -> io::Result<Vec<String>> {
        let mut arches = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name != DATA_DIR && !name.starts_with('.') {
                    arches.push(name.to_string());
                }
            }
        }
        arches.sort();
        Ok(arches)
    }

    /// Tags deduced from the release's distribution marker and the architectures present.
    pub fn tags(&self) -> io::Result<Vec<String>> {
        let arches = self.arches()?;
        if arches.is_empty() {
            return Ok(Vec::new());
        }

        let os = os_variant(&self.release);
        let mut tags = vec![format!("{os}-candidate")];
        tags.extend(arches.iter().map(|arch| format!("{os}-{arch}")));
        Ok(tags)
    }

    /// Binary artifacts, restricted to `arches` unless it is empty.
    pub fn artifacts(&self, arches: &[String]) -> io::Result<Vec<RpmRecord>> {
        let build_id = self.id();
        let mut records = Vec::new();

        for arch in self.arches()? {
            if !arches.is_empty() && !arches.contains(&arch) {
                continue;
            }

            let arch_dir = self.dir.join(&arch);
            let mut files: Vec<(String, fs::Metadata)> = Vec::new();
            for entry in fs::read_dir(&arch_dir)? {
                let entry = entry?;
                let metadata = entry.metadata()?;
                if !metadata.is_file() {
                    continue;
                }
                if let Ok(name) = entry.file_name().into_string() {
                    files.push((name, metadata));
                }
            }
            files.sort_by(|a, b| a.0.cmp(&b.0));

            for (filename, metadata) in files {
                let (name, version, release) = match Nvra::parse(&filename) {
                    Ok(nvra) => (nvra.product, nvra.version, nvra.release),
                    Err(_) => (filename.clone(), self.version.clone(), self.release.clone()),
                };
                let buildtime = metadata
                    .modified()
                    .map(|t| DateTime::<Utc>::from(t).timestamp())
                    .unwrap_or_default();

                records.push(RpmRecord {
                    id: surrogate_id(&format!("{}/{arch}/{filename}", self.nvr())),
                    build_id,
                    nvr: format!("{name}-{version}-{release}"),
                    name,
                    version,
                    release,
                    arch: arch.clone(),
                    epoch: None,
                    filename,
                    size: metadata.len() as i64,
                    buildtime,
                    external_repo_id: 0,
                    external_repo_name: INTERNAL_REPO.to_string(),
                    metadata_only: false,
                });
            }
        }

        Ok(records)
    }

    #[must_use]
    pub fn record(&self) -> BuildRecord {
        let metadata = fs::metadata(&self.dir).ok();
        let completed = metadata
            .as_ref()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let created = metadata
            .as_ref()
            .and_then(|m| m.created().ok())
            .unwrap_or(completed);
        let created = DateTime::<Utc>::from(created);
        let completed = DateTime::<Utc>::from(completed);

        BuildRecord {
            build_id: self.id(),
            package_id: self.package_id(),
            package_name: self.product.clone(),
            name: self.product.clone(),
            version: self.version.clone(),
            release: self.release.clone(),
            nvr: self.nvr(),
            epoch: None,
            state: BUILD_STATE_COMPLETE,
            task_id: None,
            owner_name: owner_name(&self.dir).unwrap_or_else(|| DEFAULT_OWNER.to_string()),
            creation_time: created.format(KOJI_TIME_FORMAT).to_string(),
            completion_time: completed.format(KOJI_TIME_FORMAT).to_string(),
            creation_ts: timestamp(created),
            completion_ts: timestamp(completed),
        }
    }
}

fn timestamp(time: DateTime<Utc>) -> f64 {
    time.timestamp_micros() as f64 / 1_000_000.0
}

/// `fc30` -> `f30`, `el8` / `el7_4` -> `el8` / `el7`, anything else -> `unknown`.
fn os_variant(release: &str) -> String {
    for part in release.split('.') {
        if let Some(version) = part.strip_prefix("fc") {
            if !version.is_empty() && version.chars().all(|c| c.is_ascii_digit()) {
                return format!("f{version}");
            }
        }
        if let Some(rest) = part.strip_prefix("el") {
            let version: String = rest.chars().take_while(char::is_ascii_digit).collect();
            if !version.is_empty() {
                return format!("el{version}");
            }
        }
    }
    "unknown".to_string()
}
