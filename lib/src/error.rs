use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Corrupt data: {0}")]
    CorruptData(#[from] CorruptDataError),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures of the codec, the identity deriver and the secure-field encryptor.
///
/// Messages never carry key material or plaintext.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("The key is missing or does not have the required length")]
    KeyInvalid,
    #[error("The authentication tag did not verify (tampered data or wrong key)")]
    TagMismatch,
    #[error("The encrypted blob is malformed: {0}")]
    MalformedBlob(&'static str),
    #[error("A required input is missing: {0}")]
    MissingInput(&'static str),
    #[error("The field name `{0}` is reserved")]
    ReservedField(String),
    #[error("Encoding failed: {0}")]
    Encoding(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid {
        name: &'static str,
        reason: &'static str,
    },
}

/// Rejected input. Always raised before any state is touched.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("A commitment cannot be empty")]
    Empty,
    #[error("A commitment must be a non-negative decimal integer")]
    NotDecimal,
    #[error("A commitment cannot be longer than 78 digits")]
    TooLong,
    #[error("The group is full (capacity {capacity})")]
    TreeFull { capacity: u64 },
    #[error("Tree depth {0} is not supported")]
    UnsupportedDepth(u8),
}

#[derive(thiserror::Error, Debug)]
#[error("{}: {reason}", .path.display())]
pub struct CorruptDataError {
    pub path: PathBuf,
    pub reason: CorruptReason,
}

#[derive(thiserror::Error, Debug)]
pub enum CorruptReason {
    #[error("not an encrypted envelope ({0})")]
    Envelope(String),
    #[error("decryption failed ({0})")]
    Decryption(#[from] CryptoError),
    #[error("invalid group payload ({0})")]
    Payload(String),
    #[error("unreadable ({0})")]
    Unreadable(std::io::ErrorKind),
}
