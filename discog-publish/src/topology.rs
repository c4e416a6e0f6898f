//! Broker topology declaration: one topic exchange, two durable queues per
//! entity class — one per consumer family — each paired with a
//! dead-lettered `.dlq` queue.

use lapin::Channel;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{ExchangeKind, types::AMQPValue};

use discog_types::EntityClass;

use crate::error::PublishError;

pub const EXCHANGE: &str = "discogsography";
pub const DEAD_LETTER_EXCHANGE: &str = "discogsography.dlx";
pub const CONSUMER_FAMILIES: [&str; 2] = ["graph", "relational"];

pub fn queue_name(consumer: &str, class: EntityClass) -> String {
    format!("discogsography-{consumer}-{class}")
}

pub fn dead_letter_queue_name(consumer: &str, class: EntityClass) -> String {
    format!("{}.dlq", queue_name(consumer, class))
}

/// Declares the exchange, DLX, and this entity class's queues across both
/// consumer families. Idempotent — safe to call again after a reconnect.
pub async fn declare(channel: &Channel, class: EntityClass) -> Result<(), PublishError> {
    channel
        .exchange_declare(
            EXCHANGE,
            ExchangeKind::Topic,
            ExchangeDeclareOptions { durable: true, ..Default::default() },
            FieldTable::default(),
        )
        .await
        .map_err(PublishError::DeclareTopology)?;

    channel
        .exchange_declare(
            DEAD_LETTER_EXCHANGE,
            ExchangeKind::Direct,
            ExchangeDeclareOptions { durable: true, ..Default::default() },
            FieldTable::default(),
        )
        .await
        .map_err(PublishError::DeclareTopology)?;

    for consumer in CONSUMER_FAMILIES {
        let queue = queue_name(consumer, class);
        let dlq = dead_letter_queue_name(consumer, class);

        channel
            .queue_declare(
                &dlq,
                QueueDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(PublishError::DeclareTopology)?;

        channel
            .queue_bind(&dlq, DEAD_LETTER_EXCHANGE, &queue, QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(PublishError::DeclareTopology)?;

        let mut queue_args = FieldTable::default();
        queue_args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString(DEAD_LETTER_EXCHANGE.into()));
        queue_args.insert("x-dead-letter-routing-key".into(), AMQPValue::LongString(queue.clone().into()));

        channel
            .queue_declare(&queue, QueueDeclareOptions { durable: true, ..Default::default() }, queue_args)
            .await
            .map_err(PublishError::DeclareTopology)?;

        channel
            .queue_bind(&queue, EXCHANGE, class.as_str(), QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(PublishError::DeclareTopology)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_names_follow_the_documented_convention() {
        assert_eq!(queue_name("graph", EntityClass::Artist), "discogsography-graph-artist");
        assert_eq!(dead_letter_queue_name("graph", EntityClass::Artist), "discogsography-graph-artist.dlq");
    }

    #[test]
    fn both_consumer_families_are_distinct() {
        let graph = queue_name("graph", EntityClass::Release);
        let relational = queue_name("relational", EntityClass::Release);
        assert_ne!(graph, relational);
    }
}
