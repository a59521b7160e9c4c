mod models;
mod nvra;

pub use models::*;
pub use nvra::{DATA_DIR, LOGS_DIR, Nvra};
