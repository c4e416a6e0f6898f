use discog_types::ContentHash;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ObjectStoreError {
    #[error("upstream directory listing request failed")]
    UpstreamUnavailable(#[source] reqwest::Error),

    #[error("upstream returned no dump versions")]
    NoVersionsPublished,

    #[error("error parsing directory listing JSON")]
    ListingParseError(#[source] serde_json::Error),

    #[error("checksum manifest request failed")]
    ManifestFetchError(#[source] reqwest::Error),

    #[error("checksum manifest line {0:?} is not of the form \"<hex>  <filename>\"")]
    ManifestLineMalformed(String),

    #[error("checksum manifest does not name a file for entity class {0}")]
    ManifestMissingEntity(discog_types::EntityClass),

    #[error("error building fetch request")]
    RequestBuildError(#[source] reqwest::Error),

    #[error("fetch request failed")]
    RequestExecuteError(#[source] reqwest::Error),

    #[error("upstream reported a server error")]
    UpstreamStatusError(#[source] reqwest::Error),
}

impl ObjectStoreError {
    /// Connection resets, timeouts, and 5xx responses are worth retrying;
    /// malformed data from upstream is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ObjectStoreError::UpstreamUnavailable(e)
            | ObjectStoreError::ManifestFetchError(e)
            | ObjectStoreError::RequestExecuteError(e)
            | ObjectStoreError::UpstreamStatusError(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            ObjectStoreError::NoVersionsPublished
            | ObjectStoreError::ListingParseError(_)
            | ObjectStoreError::ManifestLineMalformed(_)
            | ObjectStoreError::ManifestMissingEntity(_)
            | ObjectStoreError::RequestBuildError(_) => false,
        }
    }
}

/// Surfaced as an `io::Error` source at end-of-stream when the computed
/// digest of the compressed bytes does not match the manifest's expected
/// digest.
#[derive(Debug, Error)]
#[error("checksum mismatch: expected {expected}, computed {actual}")]
pub struct ChecksumMismatch {
    pub expected: String,
    pub actual: String,
}

impl ChecksumMismatch {
    pub fn new(expected: ContentHash, actual: ContentHash) -> Self {
        Self {
            expected: discog_types::hash_to_hex(&expected),
            actual: discog_types::hash_to_hex(&actual),
        }
    }
}
