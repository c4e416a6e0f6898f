use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PublishError {
    #[error("malformed broker connection URI {0:?}")]
    InvalidUri(String),

    #[error("error connecting to broker")]
    Connect(#[source] lapin::Error),

    #[error("error opening broker channel")]
    OpenChannel(#[source] lapin::Error),

    #[error("error declaring broker topology")]
    DeclareTopology(#[source] lapin::Error),

    #[error("error publishing message")]
    Publish(#[source] lapin::Error),

    #[error("broker nacked the message")]
    Nacked,

    #[error("timed out waiting for publisher confirm")]
    ConfirmTimeout,

    #[error("broker connection dropped")]
    Disconnected,

    #[error("error serializing outbound message headers")]
    Headers(#[source] serde_json::Error),
}

impl PublishError {
    /// Nacks and dropped connections are transient and worth retrying via
    /// the shared retry combinator.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublishError::Nacked | PublishError::ConfirmTimeout | PublishError::Disconnected | PublishError::Publish(_)
        )
    }
}
