//! Domain model and services of the event producer.
//!
//! Purpose: turn the internal event log and entity snapshots into external
//! events. Everything here is free of persistence and transport details;
//! adapters plug in through [`ports`].
//!
//! Public surface:
//! - Error (alias to `error::Error`): transport agnostic error payload.
//! - ErrorCode (alias to `error::ErrorCode`): stable error identifier.
//! - EventProducer (alias to `producer::EventProducer`): per-stream
//!   incremental and full-load production.
//! - ProduceService (alias to `produce_service::ProduceService`): request
//!   handling on top of the producer.

pub mod batch_publisher;
pub mod checkpoint;
pub mod conversion;
pub mod error;
pub mod event_data;
pub mod external_event;
pub mod jobs;
pub mod mapper;
pub mod mapping;
pub mod materializer;
pub mod naming;
pub mod ports;
pub mod produce_service;
pub mod producer;
pub mod records;
pub mod relations;
pub mod schema;
pub mod snapshot_stream;

pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::produce_service::ProduceService;
pub use self::producer::{
    EventProducer, FullLoadEventIds, FullLoadWatermark, ProducerPorts, ProductionConfig,
};
