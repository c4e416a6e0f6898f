mod client;
mod error;
mod hashing_stream;
mod manifest;

pub use client::ObjectStoreClient;
pub use error::{ChecksumMismatch, ObjectStoreError};
pub use hashing_stream::HashingReader;
pub use manifest::{DumpManifest, FileDescriptor};
