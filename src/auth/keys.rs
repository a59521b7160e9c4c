use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use russh_keys::PublicKeyBase64;
use tracing::{info, warn};

use crate::config::KeySource;
use crate::error::{Error, Result};

const KEY_TYPE_PREFIXES: &[&str] = &["ssh-", "ecdsa-sha2-", "sk-ssh-", "sk-ecdsa-sha2-"];

/// Public keys allowed to upload, grouped by the principal they authenticate as.
///
/// Keys are kept in the canonical base64 encoding russh produces for a parsed key,
/// which is also how an offered key is rendered for comparison.
#[derive(Debug, Default, Clone)]
pub struct AuthorizedKeys {
    keys: BTreeMap<String, BTreeSet<String>>,
}

impl AuthorizedKeys {
    /// Reads every source. A missing or unreadable file only costs that principal its keys.
    pub fn load(sources: &[KeySource]) -> Result<Self> {
        let mut keys = Self::default();

        for source in sources {
            let content = match fs::read_to_string(&source.path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(
                        "Cannot read keys of {} from {}: {e}",
                        source.principal,
                        source.path.display()
                    );
                    continue;
                }
            };

            let blobs = parse_authorized_keys(&content);
            info!(
                "Loaded {} key(s) for {} from {}",
                blobs.len(),
                source.principal,
                source.path.display()
            );
            for blob in blobs {
                keys.add(&source.principal, blob);
            }
        }

        if keys.is_empty() {
            return Err(Error::Config("no usable authorized keys".to_string()));
        }
        Ok(keys)
    }

    pub fn add(&mut self, principal: &str, blob: impl Into<String>) {
        self.keys
            .entry(principal.to_string())
            .or_default()
            .insert(blob.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.values().all(BTreeSet::is_empty)
    }

    /// True when `blob` is one of `principal`'s keys.
    #[must_use]
    pub fn is_authorized(&self, principal: &str, blob: &str) -> bool {
        self.keys
            .get(principal)
            .is_some_and(|blobs| blobs.contains(blob))
    }

    pub fn principals(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

/// Extracts the keys from authorized_keys content, skipping comments, options and
/// lines whose blob is not a valid key of the declared type.
#[must_use]
pub fn parse_authorized_keys(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let at = fields.iter().position(|field| is_key_type(field))?;
            let key_type = fields[at];
            let blob = fields.get(at + 1)?;

            if !blob_matches_type(blob, key_type) {
                warn!("Ignoring {key_type} key whose blob declares another type");
                return None;
            }
            match russh_keys::parse_public_key_base64(blob) {
                Ok(key) => Some(key.public_key_base64()),
                Err(e) => {
                    warn!("Ignoring malformed {key_type} key: {e}");
                    None
                }
            }
        })
        .collect()
}

fn is_key_type(field: &str) -> bool {
    KEY_TYPE_PREFIXES.iter().any(|prefix| field.starts_with(prefix))
}

/// The blob starts with the length-prefixed key type name.
fn blob_matches_type(blob: &str, key_type: &str) -> bool {
    let Ok(bytes) = STANDARD.decode(blob) else {
        return false;
    };
    let Some(len) = bytes.get(..4) else {
        return false;
    };
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    bytes.get(4..4 + len) == Some(key_type.as_bytes())
}
