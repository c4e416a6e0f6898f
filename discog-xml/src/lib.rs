pub mod error;
pub mod pipeline;
pub mod project;
pub mod tree;

pub use error::XmlError;
pub use pipeline::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_CHECKPOINT_INTERVAL, EmittedRecord, PipelineOutcome, PipelineStats, run};
pub use project::project;
pub use tree::RawElement;
