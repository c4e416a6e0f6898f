pub mod canonical;
pub mod entity_class;
pub mod record;
pub mod retry;
pub mod version;

pub use canonical::{ContentHash, canonicalize, canonicalize_and_hash, content_hash, hash_from_hex, hash_to_hex};
pub use entity_class::EntityClass;
pub use record::{Decision, OutboundMessage, Record};
pub use retry::{RetryPolicy, retry};
pub use version::DumpVersion;
