use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::store::owner::chown_to;
use crate::store::{CanonicalPath, PathResolver, Zone};
use crate::types::{DATA_DIR, LOGS_DIR};

/// Where a read request landed on disk.
#[derive(Debug, Clone)]
pub struct Located {
    pub canonical: CanonicalPath,
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
}

/// An open repository file and its size when it was opened.
#[derive(Debug)]
pub struct ArtifactReader {
    pub canonical: CanonicalPath,
    pub size: u64,
    pub reader: BufReader<File>,
}

/// A file being written by an upload. Dropped before [`Upload::finish`], it removes the
/// partial file so a retry is not refused as a conflict.
#[derive(Debug)]
pub struct Upload {
    file: File,
    path: PathBuf,
    canonical: CanonicalPath,
    created: Vec<PathBuf>,
    completed: bool,
}

impl Upload {
    #[must_use]
    pub fn canonical(&self) -> &CanonicalPath {
        &self.canonical
    }

    /// Directories created for this upload, outermost first, followed by the file.
    #[must_use]
    pub fn created(&self) -> &[PathBuf] {
        &self.created
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).await?;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<CanonicalPath> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        self.completed = true;
        Ok(self.canonical.clone())
    }

    pub fn abort(self) {
        info!("Discarding partial upload {}", self.canonical);
    }
}

impl Drop for Upload {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove partial upload {}: {e}", self.path.display());
        }
    }
}

/// Reads and writes repository files addressed by raw client paths.
pub struct IngestService {
    root: PathBuf,
    resolver: PathResolver,
}

impl IngestService {
    pub fn new(root: impl Into<PathBuf>, resolver: PathResolver) -> Self {
        Self {
            root: root.into(),
            resolver,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, raw: &str) -> Result<CanonicalPath> {
        self.resolver.resolve(raw)
    }

    /// Resolves `raw` for reading. A bare artifact name resolves to its architecture
    /// directory; when a file of that name exists inside it, the file is returned instead.
    pub async fn locate(&self, raw: &str) -> Result<Located> {
        let resolved = self.resolver.resolve(raw)?;

        if resolved.zone() == Zone::Binary && resolved.is_zone_root() {
            if let Some(own_file) = last_segment(raw).and_then(|name| resolved.join(name).ok()) {
                let path = own_file.to_fs_path(&self.root);
                if let Ok(metadata) = fs::metadata(&path).await {
                    if metadata.is_file() {
                        return Ok(Located {
                            canonical: own_file,
                            path,
                            is_dir: false,
                            size: metadata.len(),
                        });
                    }
                }
            }
        }

        let path = resolved.to_fs_path(&self.root);
        let metadata = fs::metadata(&path).await.map_err(Error::from_io)?;
        Ok(Located {
            canonical: resolved,
            path,
            is_dir: metadata.is_dir(),
            size: metadata.len(),
        })
    }

    pub async fn open_for_read(&self, raw: &str) -> Result<ArtifactReader> {
        let located = self.locate(raw).await?;
        self.open_located(&located).await
    }

    pub async fn open_located(&self, located: &Located) -> Result<ArtifactReader> {
        if located.is_dir {
            return Err(Error::BadRequest(format!("{} is a directory", located.canonical)));
        }

        let file = File::open(&located.path).await.map_err(Error::from_io)?;
        Ok(ArtifactReader {
            canonical: located.canonical.clone(),
            size: located.size,
            reader: BufReader::new(file),
        })
    }

    /// Resolves `raw` and creates the file it names. A bare artifact name is stored
    /// under its own name inside its architecture directory.
    pub async fn open_for_write(&self, raw: &str, owner: &str) -> Result<Upload> {
        let resolved = self.resolver.resolve(raw)?;

        let target = if resolved.is_zone_root() {
            match (resolved.zone(), last_segment(raw)) {
                (Zone::Binary, Some(name)) => resolved.join(name)?,
                _ => {
                    return Err(Error::BadRequest(format!(
                        "{raw} names the directory {resolved}, not a file"
                    )));
                }
            }
        } else {
            resolved
        };

        self.create(&target, owner).await
    }

    /// Creates `target` exclusively, along with any missing parent directories.
    /// Everything created here is handed to `owner` when the server runs as root.
    pub async fn create(&self, target: &CanonicalPath, owner: &str) -> Result<Upload> {
        let path = target.to_fs_path(&self.root);

        if fs::symlink_metadata(&path).await.is_ok() {
            return Err(Error::Conflict(format!("{target} already exists")));
        }

        let mut created = match path.parent() {
            Some(parent) => self.create_missing_dirs(parent).await?,
            None => Vec::new(),
        };

        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::Conflict(format!("{target} already exists")));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        created.push(path.clone());
        chown_to(owner, &created);

        info!("Receiving {target} from {owner}");

        Ok(Upload {
            file,
            path,
            canonical: target.clone(),
            created,
            completed: false,
        })
    }

    /// Creates the directory `raw` resolves to, handing the new parts to `owner`.
    /// A path without an artifact identifier creates nothing; files sent into it
    /// supply the identifier themselves.
    pub async fn create_directory(&self, raw: &str, owner: &str) -> Result<Vec<PathBuf>> {
        let resolved = match self.resolver.resolve(raw) {
            Ok(resolved) => resolved,
            Err(Error::MalformedIdentifier(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let path = resolved.to_fs_path(&self.root);
        let created = self.create_missing_dirs(&path).await?;
        if !fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            return Err(Error::Conflict(format!("{resolved} exists and is not a directory")));
        }
        chown_to(owner, &created);
        Ok(created)
    }

    /// Decides where a file called `suggested` goes when sent to `base`.
    ///
    /// The name is appended when `base` is a zone or architecture directory, or any
    /// existing directory; otherwise `base` itself is the file (a rename). When `base`
    /// carries no artifact identifier at all, the file name supplies it.
    pub async fn choose_target_name(&self, base: &str, suggested: &str) -> Result<CanonicalPath> {
        let resolved = match self.resolver.resolve(base) {
            Ok(resolved) => resolved,
            Err(Error::MalformedIdentifier(_)) => {
                let own = self.resolver.resolve(suggested)?;
                return if own.is_zone_root() {
                    own.join(suggested)
                } else {
                    Ok(own)
                };
            }
            Err(e) => return Err(e),
        };

        if resolved.is_zone_root() || self.is_existing_dir(&resolved).await {
            return resolved.join(suggested);
        }

        Ok(resolved)
    }

    /// Where a file called `name` goes when `base` is known to be a directory, as
    /// with `scp -d` or inside a directory sent by `scp -r`.
    pub async fn target_in_directory(&self, base: &str, name: &str) -> Result<CanonicalPath> {
        match self.resolver.resolve(base) {
            Ok(resolved) => resolved.join(name),
            Err(Error::MalformedIdentifier(_)) => self.choose_target_name(base, name).await,
            Err(e) => Err(e),
        }
    }

    /// Raw path of a directory called `name` entered below `base` during a recursive
    /// upload. `data` and `logs` always nest; other names nest only into directories,
    /// otherwise `base` is the renamed directory.
    pub async fn enter_directory(&self, base: &str, name: &str) -> String {
        let nested = join_raw(base, name);
        if name == DATA_DIR || name == LOGS_DIR {
            return nested;
        }

        match self.resolver.resolve(base) {
            Ok(resolved) if !resolved.is_zone_root() && !self.is_existing_dir(&resolved).await => {
                base.to_string()
            }
            _ => nested,
        }
    }

    async fn is_existing_dir(&self, path: &CanonicalPath) -> bool {
        fs::metadata(path.to_fs_path(&self.root))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn create_missing_dirs(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut missing = Vec::new();
        let mut current = Some(dir);
        while let Some(path) = current {
            if path == self.root || fs::metadata(path).await.is_ok() {
                break;
            }
            missing.push(path.to_path_buf());
            current = path.parent();
        }

        let mut created = Vec::new();
        for path in missing.into_iter().rev() {
            match fs::create_dir(&path).await {
                Ok(()) => created.push(path),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(created)
    }
}

fn last_segment(raw: &str) -> Option<&str> {
    raw.split('/').filter(|s| !s.is_empty() && *s != ".").last()
}

pub(crate) fn join_raw(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() || base == "." {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}
