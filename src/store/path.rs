use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{DATA_DIR, LOGS_DIR, Nvra};

const STATIC_RELEASE_MARKER: &str = "static";
const UPSTREAM_RELEASE_MARKER: &str = "upstream";

/// The three storage areas under a build's base path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// `product/version/release/arch`
    Binary,
    /// `product/version/release/data`
    Data,
    /// `product/version/release/data/logs/arch`
    Logs,
}

/// The single repository location a raw client path stands for.
///
/// A canonical path is a zone directory of one build plus a (possibly empty) tail of
/// segments below it. Every segment has been validated, so [`CanonicalPath::to_fs_path`]
/// never leaves the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPath {
    nvra: Nvra,
    zone: Zone,
    tail: Vec<String>,
}

impl CanonicalPath {
    #[must_use]
    pub fn nvra(&self) -> &Nvra {
        &self.nvra
    }

    #[must_use]
    pub fn zone(&self) -> Zone {
        self.zone
    }

    /// True when the path names the zone directory itself rather than something inside it.
    #[must_use]
    pub fn is_zone_root(&self) -> bool {
        self.tail.is_empty()
    }

    #[must_use]
    pub fn zone_root(&self) -> String {
        match self.zone {
            Zone::Binary => self.nvra.arched_path(),
            Zone::Data => self.nvra.data_path(),
            Zone::Logs => self.nvra.logs_path(),
        }
    }

    /// Last segment of the path, the zone directory's own name for a zone root.
    #[must_use]
    pub fn file_name(&self) -> &str {
        match self.tail.last() {
            Some(name) => name,
            None => match self.zone {
                Zone::Binary | Zone::Logs => &self.nvra.arch,
                Zone::Data => DATA_DIR,
            },
        }
    }

    /// Appends one file name below this path.
    pub fn join(&self, name: &str) -> Result<Self> {
        if name.contains('/') || name == "." {
            return Err(Error::InvalidPath(name.to_string()));
        }
        validate_segment(name)?;

        let mut tail = self.tail.clone();
        tail.push(name.to_string());
        Ok(Self {
            nvra: self.nvra.clone(),
            zone: self.zone,
            tail,
        })
    }

    #[must_use]
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        self.to_string()
            .split('/')
            .fold(root.to_path_buf(), |path, segment| path.join(segment))
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.zone_root())?;
        for segment in &self.tail {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Maps loosely specified client paths onto the repository layout.
///
/// SCP clients send whatever path the user typed: a bare artifact name, a rename target,
/// a path with an unrelated prefix, or a `data`/`logs` zone. All of them go through
/// [`PathResolver::resolve`].
#[derive(Debug, Clone, Copy)]
pub struct PathResolver {
    normalize_static_release: bool,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PathResolver {
    #[must_use]
    pub fn new(normalize_static_release: bool) -> Self {
        Self {
            normalize_static_release,
        }
    }

    pub fn resolve(&self, raw: &str) -> Result<CanonicalPath> {
        let segments = split_segments(raw)?;

        if let Some(resolved) = self.resolve_zone(&segments) {
            return Ok(resolved);
        }

        self.resolve_binary(raw, &segments)
    }

    /// Tries each `data`/`logs` marker from the right; the first whose identifier
    /// parses decides the zone.
    fn resolve_zone(&self, segments: &[&str]) -> Option<CanonicalPath> {
        for (idx, segment) in segments.iter().enumerate().rev() {
            let (zone, id_idx) = match *segment {
                LOGS_DIR if idx >= 1 && segments[idx - 1] == DATA_DIR => {
                    (Zone::Logs, idx.checked_sub(2))
                }
                LOGS_DIR => (Zone::Logs, idx.checked_sub(1)),
                DATA_DIR => (Zone::Data, idx.checked_sub(1)),
                _ => continue,
            };

            let Some(nvra) = id_idx.and_then(|i| Nvra::parse(segments[i]).ok()) else {
                continue;
            };
            let nvra = self.normalize(nvra);

            let mut tail: Vec<String> = segments[idx + 1..].iter().map(|s| s.to_string()).collect();
            if zone == Zone::Logs && tail.first() == Some(&nvra.arch) {
                tail.remove(0);
            }

            return Some(CanonicalPath { nvra, zone, tail });
        }
        None
    }

    fn resolve_binary(&self, raw: &str, segments: &[&str]) -> Result<CanonicalPath> {
        let found = segments
            .iter()
            .enumerate()
            .rev()
            .find_map(|(idx, segment)| Nvra::parse(segment).ok().map(|nvra| (idx, nvra)));

        let (idx, nvra) = match found {
            Some(found) => found,
            None => {
                let last = segments
                    .last()
                    .ok_or_else(|| Error::MalformedIdentifier(raw.to_string()))?;
                (segments.len() - 1, Nvra::parse(last)?)
            }
        };

        Ok(CanonicalPath {
            nvra: self.normalize(nvra),
            zone: Zone::Binary,
            tail: segments[idx + 1..].iter().map(|s| s.to_string()).collect(),
        })
    }

    // TODO: confirm whether `static` builds are meant to be renamed to `upstream` at all,
    // or only for the java-*-openjdk portable builds this was written for.
    fn normalize(&self, mut nvra: Nvra) -> Nvra {
        if !self.normalize_static_release {
            return nvra;
        }

        let normalized: Vec<&str> = nvra
            .release
            .split('.')
            .map(|part| {
                if part == STATIC_RELEASE_MARKER {
                    UPSTREAM_RELEASE_MARKER
                } else {
                    part
                }
            })
            .collect();
        let normalized = normalized.join(".");

        if normalized != nvra.release {
            debug!("Normalized release {} to {normalized}", nvra.release);
            nvra.release = normalized;
        }
        nvra
    }
}

fn split_segments(raw: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = raw
        .trim()
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    for segment in &segments {
        validate_segment(segment)?;
    }

    Ok(segments)
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment == ".." {
        return Err(Error::InvalidPath(format!("illegal path segment {segment:?}")));
    }

    if segment.len() > 255 {
        return Err(Error::InvalidPath(
            "path segment cannot exceed 255 characters".to_string(),
        ));
    }

    const INVALID_CHARS: &[char] = &['\0', '\n', '\r'];
    if segment.chars().any(|c| INVALID_CHARS.contains(&c)) {
        return Err(Error::InvalidPath(
            "path segment contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

/// Validates a request path for direct use under the repository root.
pub fn checked_relative_path(raw: &str) -> Result<PathBuf> {
    let segments = split_segments(raw)?;
    if segments.is_empty() {
        return Err(Error::InvalidPath("path cannot be empty".to_string()));
    }
    Ok(segments.iter().collect())
}
