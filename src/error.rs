use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("authentication failed for {0}")]
    AuthenticationFailure(String),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("package id {id} is shared by {products:?}")]
    IdCollision { id: i32, products: Vec<String> },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),
}

impl Error {
    /// Maps a missing file to [`Error::NotFound`], keeping every other io error as is.
    pub fn from_io(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
