//! Per-entity-class publish worker. Each worker owns its own `lapin::Channel`
//! — broker channels are not safe to share across workers — and publishes in
//! confirm mode.
//!
//! The in-flight-confirm window is a bounded semaphore: acquiring a permit
//! before publish and releasing it only once that publish's confirm resolves
//! caps the number of unconfirmed messages in flight, backpressuring the
//! consuming side once the window is full.

use std::sync::Arc;
use std::time::Duration;

use discog_types::{DumpVersion, OutboundMessage, Record, RetryPolicy, retry};
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection};
use log::{debug, warn};
use tokio::sync::Semaphore;

use crate::error::PublishError;
use crate::topology;
use discog_types::EntityClass;

const CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PublishWorker {
    channel: Channel,
    class: EntityClass,
    confirm_window: Arc<Semaphore>,
    retry_policy: RetryPolicy,
}

impl PublishWorker {
    /// Opens a fresh channel on `connection`, declares this class's slice of
    /// the topology, and enables publisher confirms.
    pub async fn open(
        connection: &Connection,
        class: EntityClass,
        confirm_window: usize,
        retry_policy: RetryPolicy,
    ) -> Result<Self, PublishError> {
        let channel = connection.create_channel().await.map_err(PublishError::OpenChannel)?;
        channel.confirm_select(ConfirmSelectOptions::default()).await.map_err(PublishError::OpenChannel)?;
        topology::declare(&channel, class).await?;

        Ok(Self { channel, class, confirm_window: Arc::new(Semaphore::new(confirm_window)), retry_policy })
    }

    /// Publishes one record, retrying nacks/timeouts up to the configured
    /// policy's attempt count. Blocks while the confirm window is full.
    pub async fn publish(&self, version: DumpVersion, record: &Record) -> Result<(), PublishError> {
        let message = OutboundMessage::new(version, record);
        let permit = self.confirm_window.clone().acquire_owned().await.expect("semaphore never closed");

        let result = retry(
            self.retry_policy,
            "publish_record",
            || self.publish_once(&message),
            PublishError::is_retryable,
        )
        .await;

        drop(permit);

        if let Err(ref err) = result {
            warn!(
                "event=publish_failed class={} entity_id={} correlation_id={} error={err}",
                self.class, record.entity_id, message.correlation_id
            );
        }

        result
    }

    async fn publish_once(&self, message: &OutboundMessage) -> Result<(), PublishError> {
        let properties = build_properties(message);

        let confirm = self
            .channel
            .basic_publish(
                topology::EXCHANGE,
                message.routing_key.as_str(),
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(PublishError::Publish)?;

        let confirmation = tokio::time::timeout(CONFIRM_TIMEOUT, confirm)
            .await
            .map_err(|_| PublishError::ConfirmTimeout)?
            .map_err(PublishError::Publish)?;

        match confirmation {
            Confirmation::Ack(_) | Confirmation::NotRequested => {
                debug!("event=publish_confirmed correlation_id={}", message.correlation_id);
                Ok(())
            }
            Confirmation::Nack(_) => Err(PublishError::Nacked),
        }
    }
}

/// Builds the AMQP message properties: `x-content-hash`/`x-version`/
/// `x-entity-class` headers, persistent delivery mode, message id = content
/// hash, correlation id.
fn build_properties(message: &OutboundMessage) -> BasicProperties {
    let mut headers = FieldTable::default();
    headers.insert("x-content-hash".into(), AMQPValue::LongString(message.content_hash_hex.clone().into()));
    headers.insert("x-version".into(), AMQPValue::LongString(message.version.to_string().into()));
    headers.insert("x-entity-class".into(), AMQPValue::LongString(message.routing_key.as_str().into()));

    BasicProperties::default()
        .with_content_type(message.content_type.into())
        .with_delivery_mode(if message.persistent { 2 } else { 1 })
        .with_message_id(message.message_id.clone().into())
        .with_correlation_id(message.correlation_id.clone().into())
        .with_headers(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use discog_types::{DumpVersion, content_hash};

    #[test]
    fn properties_carry_persistent_delivery_and_content_hash_headers() {
        let version = DumpVersion::parse("20240601").unwrap();
        let record = Record {
            entity_class: EntityClass::Artist,
            entity_id: 1,
            canonical_json: br#"{"id":1}"#.to_vec(),
            content_hash: content_hash(br#"{"id":1}"#),
        };
        let message = OutboundMessage::new(version, &record);
        let properties = build_properties(&message);

        assert_eq!(properties.delivery_mode(), &Some(2));
        assert_eq!(properties.message_id().as_ref().map(|s| s.as_str()), Some(message.message_id.as_str()));
        assert_eq!(
            properties.correlation_id().as_ref().map(|s| s.as_str()),
            Some("20240601:artist:1")
        );
    }
}
