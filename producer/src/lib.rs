//! Event producer for GOB catalogue collections.
//!
//! Reads the internal event log and entity tables, converts events to the
//! externally published schema, and publishes them in batches to a message
//! broker while tracking a per-stream watermark.
//!
//! The crate follows a hexagonal layout: [`domain`] holds the producer logic
//! and its ports, [`outbound`] the database, broker, and filesystem adapters,
//! and [`inbound`] the JSON invocation surface used by the binary.

pub mod config;
pub mod domain;
pub mod inbound;
pub mod outbound;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
