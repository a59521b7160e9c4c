//! Getting build artifacts into the repository, and back out over the same channel.

mod scp;
mod service;
mod ssh;

pub use scp::{ScpCommand, ScpMode, ScpSession};
pub use service::{ArtifactReader, IngestService, Located, Upload};
pub use ssh::{ScpServer, load_host_key};
