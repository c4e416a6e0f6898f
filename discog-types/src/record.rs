use serde::{Deserialize, Serialize};

use crate::canonical::ContentHash;
use crate::entity_class::EntityClass;
use crate::version::DumpVersion;

/// One parsed top-level XML element projected to canonical JSON.
#[derive(Debug, Clone)]
pub struct Record {
    pub entity_class: EntityClass,
    pub entity_id: i64,
    pub canonical_json: Vec<u8>,
    pub content_hash: ContentHash,
}

/// The decision an element reaches after the dedup lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Publish,
    Drop,
}

/// A record ready to publish to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub routing_key: EntityClass,
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub persistent: bool,
    pub message_id: String,
    pub correlation_id: String,
    pub content_hash_hex: String,
    pub version: DumpVersion,
}

impl OutboundMessage {
    pub fn new(version: DumpVersion, record: &Record) -> Self {
        let content_hash_hex = crate::canonical::hash_to_hex(&record.content_hash);
        Self {
            routing_key: record.entity_class,
            body: record.canonical_json.clone(),
            content_type: "application/json",
            persistent: true,
            message_id: content_hash_hex.clone(),
            correlation_id: format!("{}:{}:{}", version, record.entity_class, record.entity_id),
            content_hash_hex,
            version,
        }
    }
}
