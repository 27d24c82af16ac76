//! Outbound adapters implementing domain ports.
//!
//! - [`persistence`]: Diesel adapters for the event store and checkpoints.
//! - [`broker`]: AMQP and logging publishers.
//! - [`filesystem`]: loaders for schema and mapping definitions.

pub mod broker;
pub mod filesystem;
pub mod persistence;
