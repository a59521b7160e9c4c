mod builds;
mod resolve;

pub use builds::run_builds;
pub use resolve::run_resolve;
