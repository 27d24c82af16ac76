//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! Two adapters live here:
//!
//! - [`DieselEventStore`] reads the event log and entity tables of the
//!   event store database. It never writes.
//! - [`DieselCheckpointRepository`] keeps one watermark per stream in the
//!   producer's own database, whose schema is managed by the embedded
//!   migrations in [`run_checkpoint_migrations`].
//!
//! Both take a [`DbPool`] built with `diesel-async` and `bb8`. Diesel row
//! types stay private; errors are mapped to the port error types.
//!
//! # Example
//!
//! ```ignore
//! use eventproducer::outbound::persistence::{DbPool, DieselEventStore, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/gob").named("event store")).await?;
//! let store = DieselEventStore::new(pool);
//! ```

pub(crate) mod diesel_helpers;
mod diesel_checkpoint_repository;
mod diesel_event_store;
mod migrations;
mod pool;
mod schema;

pub use diesel_checkpoint_repository::DieselCheckpointRepository;
pub use diesel_event_store::DieselEventStore;
pub use migrations::{run_checkpoint_migrations, MigrationError};
pub use pool::{DbPool, PoolConfig, PoolError};
