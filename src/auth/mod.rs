mod keys;

pub use keys::{AuthorizedKeys, parse_authorized_keys};
