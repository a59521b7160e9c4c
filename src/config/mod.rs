mod server;

pub use server::{KeySource, ServerConfig};
