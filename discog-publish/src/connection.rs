//! Broker connection lifecycle: one connection per process, shared by all
//! publisher workers. On disconnect, reconnects with backoff and
//! re-declares topology.

use discog_types::RetryPolicy;
use lapin::ConnectionProperties;
use lapin::uri::AMQPUri;
use log::info;

use crate::error::PublishError;

/// Connects with the shared retry combinator, classifying every connect
/// failure as transient (there is nothing else a fresh process can do with a
/// malformed URI than fail fast at config-load time, well before this runs).
pub async fn connect(amqp_uri: &str, retry_policy: RetryPolicy) -> Result<lapin::Connection, PublishError> {
    let uri: AMQPUri = amqp_uri.parse().map_err(|_| PublishError::InvalidUri(amqp_uri.to_string()))?;

    discog_types::retry(
        retry_policy,
        "broker_connect",
        || async {
            let connection = lapin::Connection::connect_uri(uri.clone(), ConnectionProperties::default())
                .await
                .map_err(PublishError::Connect)?;
            info!("event=broker_connected");
            Ok(connection)
        },
        |_| true,
    )
    .await
}
