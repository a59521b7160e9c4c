use serde::{Deserialize, Serialize};

/// Koji's `BUILD_STATES['COMPLETE']`.
pub const BUILD_STATE_COMPLETE: i32 = 1;

/// Repository name Koji reports for artifacts built by the hub itself.
pub const INTERNAL_REPO: &str = "INTERNAL";

/// One `product/version/release` build as returned by `listBuilds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub build_id: i32,
    pub package_id: i32,
    pub package_name: String,
    pub name: String,
    pub version: String,
    pub release: String,
    pub nvr: String,
    pub epoch: Option<i32>,
    pub state: i32,
    pub task_id: Option<i32>,
    pub owner_name: String,
    pub creation_time: String,
    pub completion_time: String,
    pub creation_ts: f64,
    pub completion_ts: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub name: String,
}

/// One binary artifact of a build as returned by `listRPMs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpmRecord {
    pub id: i32,
    pub build_id: i32,
    pub name: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub epoch: Option<i32>,
    pub nvr: String,
    /// File name under the architecture directory.
    pub filename: String,
    pub size: i64,
    pub buildtime: i64,
    pub external_repo_id: i32,
    pub external_repo_name: String,
    pub metadata_only: bool,
}
