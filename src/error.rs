use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("blob `{0}` not found in store")]
    BlobNotFound(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("ciphertext is too short: {len} bytes, need at least {min}")]
    CiphertextTooShort { len: usize, min: usize },

    #[error("encryption key must be {expected} bytes, got {actual}")]
    InvalidKey { expected: usize, actual: usize },

    #[error("index could not be parsed (wrong key or corrupted store?): {0}")]
    Parse(#[from] serde_json::Error),

    #[error("file `{0}` does not exist in the index")]
    FileNotFound(String),

    #[error("file `{0}` already exists in the index")]
    FileAlreadyExists(String),

    #[error("write start {start} is outside block of {size} bytes")]
    OutOfRange { start: u64, size: u64 },

    #[error("index is corrupt: {0}")]
    Corrupt(String),
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Error::Remote(error.to_string())
    }
}
