//! Broker adapters implementing the [`EventBroker`] port.
//!
//! [`AmqpEventBroker`] publishes to a real broker (feature `amqp`).
//! [`LoggingEventBroker`] stands in when no broker URL is configured.
//!
//! [`EventBroker`]: crate::domain::ports::EventBroker

#[cfg(feature = "amqp")]
mod amqp;
mod logging;

#[cfg(feature = "amqp")]
pub use amqp::AmqpEventBroker;
pub use logging::LoggingEventBroker;
