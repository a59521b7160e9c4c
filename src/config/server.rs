use std::fmt;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings for `fakekoji serve`. Every field can come from a TOML file; the command
/// line overrides whatever the file says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub repo_root: PathBuf,
    pub scp_port: u16,
    pub xmlrpc_port: u16,
    pub download_port: u16,
    /// Private key the SSH endpoint presents to clients.
    pub host_key: Option<PathBuf>,
    /// Who may upload. Empty means the invoking user's `~/.ssh/authorized_keys`.
    pub authorized_keys: Vec<KeySource>,
    /// Rewrite a `static` release segment to `upstream` while resolving paths.
    pub normalize_static_release: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            repo_root: PathBuf::from("./builds"),
            scp_port: 9822,
            xmlrpc_port: 9848,
            download_port: 9849,
            host_key: None,
            authorized_keys: Vec::new(),
            normalize_static_release: true,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn scp_addr(&self) -> Result<SocketAddr> {
        self.addr(self.scp_port)
    }

    pub fn xmlrpc_addr(&self) -> Result<SocketAddr> {
        self.addr(self.xmlrpc_port)
    }

    pub fn download_addr(&self) -> Result<SocketAddr> {
        self.addr(self.download_port)
    }

    /// Accepts IP literals (bracketed or bare IPv6 included) and host names.
    fn addr(&self, port: u16) -> Result<SocketAddr> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("bad listen address {}: {e}", self.host)))?
            .next()
            .ok_or_else(|| Error::Config(format!("{} resolves to no address", self.host)))
    }

    /// The configured key sources, or the current user's default when none are set.
    pub fn key_sources(&self) -> Result<Vec<KeySource>> {
        if !self.authorized_keys.is_empty() {
            return Ok(self.authorized_keys.clone());
        }
        Ok(vec![KeySource::current_user()?])
    }
}

/// An authorized_keys file whose keys authenticate as `principal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeySource {
    pub principal: String,
    pub path: PathBuf,
}

impl KeySource {
    #[cfg(unix)]
    pub fn current_user() -> Result<Self> {
        use nix::unistd::{Uid, User};

        let user = User::from_uid(Uid::current()).ok().flatten();
        let principal = std::env::var("USER")
            .ok()
            .filter(|name| !name.is_empty())
            .or_else(|| user.as_ref().map(|u| u.name.clone()))
            .ok_or_else(|| Error::Config("cannot determine the current user".to_string()))?;
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .or_else(|| user.map(|u| u.dir))
            .ok_or_else(|| Error::Config("cannot determine the home directory".to_string()))?;

        Ok(Self {
            principal,
            path: home.join(".ssh").join("authorized_keys"),
        })
    }

    #[cfg(not(unix))]
    pub fn current_user() -> Result<Self> {
        Err(Error::Config(
            "authorized keys must be configured explicitly on this platform".to_string(),
        ))
    }
}

impl FromStr for KeySource {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let (principal, path) = raw
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("expected principal=path, got {raw:?}")))?;
        let principal = principal.trim();
        let path = path.trim();

        if principal.is_empty() || path.is_empty() {
            return Err(Error::Config(format!("expected principal=path, got {raw:?}")));
        }

        Ok(Self {
            principal: principal.to_string(),
            path: PathBuf::from(path),
        })
    }
}

impl TryFrom<String> for KeySource {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

impl From<KeySource> for String {
    fn from(source: KeySource) -> Self {
        source.to_string()
    }
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.principal, self.path.display())
    }
}
