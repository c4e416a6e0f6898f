pub mod connection;
pub mod error;
pub mod topology;
pub mod worker;

pub use connection::connect;
pub use error::PublishError;
pub use topology::{CONSUMER_FAMILIES, DEAD_LETTER_EXCHANGE, EXCHANGE, dead_letter_queue_name, queue_name};
pub use worker::PublishWorker;
