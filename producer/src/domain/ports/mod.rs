//! Domain ports defining the edges of the hexagon.
//!
//! Driven ports describe how the producer reads the event log, persists its
//! watermark, and publishes to the broker. Each of them exposes a typed error
//! so adapters map their failures into predictable variants. The driving
//! port, [`ProduceCommand`], accepts produce requests.

mod macros;

pub(crate) use macros::define_port_error;

mod checkpoint_repository;
mod event_broker;
mod event_store;
mod produce_command;

#[cfg(test)]
pub use checkpoint_repository::MockCheckpointRepository;
pub use checkpoint_repository::{
    CheckpointRepository, CheckpointRepositoryError, FixtureCheckpointRepository, NO_PROGRESS,
};
#[cfg(test)]
pub use event_broker::{MockEventBroker, MockPublishChannel};
pub use event_broker::{EventBroker, EventPublisherError, PublishChannel};
#[cfg(test)]
pub use event_store::MockEventStore;
pub use event_store::{EventStore, EventStoreError, FixtureEventStore};
#[cfg(test)]
pub use produce_command::MockProduceCommand;
pub use produce_command::{
    ProduceCommand, ProduceRequest, ProduceResponse, ProduceSummary, RequestContents,
    RequestHeader, FULL_LOAD_MODE,
};
