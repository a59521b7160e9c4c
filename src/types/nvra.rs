use std::fmt;

use crate::error::{Error, Result};

/// Directory holding files shared by every architecture of a build.
pub const DATA_DIR: &str = "data";
/// Directory under [`DATA_DIR`] holding per-architecture build logs.
pub const LOGS_DIR: &str = "logs";

/// A `<product>-<version>-<release>.<arch>.<suffix>` artifact name split into its parts.
///
/// The product may itself contain hyphens (`java-1.8.0-openjdk`); version and release
/// never do. Every field is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nvra {
    pub product: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub suffix: String,
}

impl Nvra {
    pub fn parse(name: &str) -> Result<Self> {
        let malformed = || Error::MalformedIdentifier(name.to_string());

        let (rest, release_arch_suffix) = name.rsplit_once('-').ok_or_else(malformed)?;
        let (product, version) = rest.rsplit_once('-').ok_or_else(malformed)?;

        let (release_arch, suffix) = release_arch_suffix
            .rsplit_once('.')
            .ok_or_else(malformed)?;
        let (release, arch) = release_arch.rsplit_once('.').ok_or_else(malformed)?;

        if [product, version, release, arch, suffix]
            .iter()
            .any(|part| part.is_empty())
        {
            return Err(malformed());
        }

        Ok(Self {
            product: product.to_string(),
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// `product-version-release`, the build's name in query results.
    #[must_use]
    pub fn nvr(&self) -> String {
        format!("{}-{}-{}", self.product, self.version, self.release)
    }

    /// `product/version/release`
    #[must_use]
    pub fn base_path(&self) -> String {
        format!("{}/{}/{}", self.product, self.version, self.release)
    }

    /// `product/version/release/arch`
    #[must_use]
    pub fn arched_path(&self) -> String {
        format!("{}/{}", self.base_path(), self.arch)
    }

    #[must_use]
    pub fn data_path(&self) -> String {
        format!("{}/{DATA_DIR}", self.base_path())
    }

    #[must_use]
    pub fn logs_path(&self) -> String {
        format!("{}/{LOGS_DIR}/{}", self.data_path(), self.arch)
    }
}

impl fmt::Display for Nvra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}.{}.{}",
            self.product, self.version, self.release, self.arch, self.suffix
        )
    }
}
