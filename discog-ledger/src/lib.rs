mod dedup;
mod progress;

pub use dedup::{DedupEntry, DedupError, DedupIndex};
pub use progress::{Cursor, LedgerError, ProgressLedger};
