use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Hands freshly created paths to the uploading user.
///
/// Only possible when running as root; otherwise the paths keep the server's own
/// ownership and nothing is reported beyond a debug line.
#[cfg(unix)]
pub fn chown_to(owner: &str, paths: &[PathBuf]) {
    use nix::unistd::{User, chown, geteuid};

    if paths.is_empty() {
        return;
    }

    if !geteuid().is_root() {
        debug!("Not running as root, leaving ownership of {} paths", paths.len());
        return;
    }

    let user = match User::from_name(owner) {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!("No local account named {owner}, leaving ownership unchanged");
            return;
        }
        Err(e) => {
            warn!("Failed to look up account {owner}: {e}");
            return;
        }
    };

    for path in paths {
        if let Err(e) = chown(path.as_path(), Some(user.uid), Some(user.gid)) {
            warn!("Failed to chown {} to {owner}: {e}", path.display());
        }
    }
}

#[cfg(not(unix))]
pub fn chown_to(_owner: &str, _paths: &[PathBuf]) {}

/// Name of the account owning `path`, if it can be determined.
#[cfg(unix)]
pub fn owner_name(path: &Path) -> Option<String> {
    use std::os::unix::fs::MetadataExt;

    use nix::unistd::{Uid, User};

    let uid = std::fs::metadata(path).ok()?.uid();
    User::from_uid(Uid::from_raw(uid)).ok().flatten().map(|u| u.name)
}

#[cfg(not(unix))]
pub fn owner_name(_path: &Path) -> Option<String> {
    None
}
