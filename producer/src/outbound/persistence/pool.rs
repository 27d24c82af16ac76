//! Pooled async Diesel connections.
//!
//! The producer talks to two databases: the event store it reads from and
//! the database holding its watermarks. Each gets its own [`DbPool`], named
//! so checkout failures say which side is unreachable.

use std::time::Duration;

use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use tracing::debug;

/// Errors that can occur during pool operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// No connection could be checked out in time.
    #[error("failed to get {pool} connection: {message}")]
    Checkout { pool: String, message: String },

    /// The pool could not be built.
    #[error("failed to build {pool} pool: {message}")]
    Build { pool: String, message: String },
}

impl PoolError {
    /// Create a checkout error for the named pool.
    pub fn checkout(pool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Checkout {
            pool: pool.into(),
            message: message.into(),
        }
    }

    /// Create a build error for the named pool.
    pub fn build(pool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Build {
            pool: pool.into(),
            message: message.into(),
        }
    }
}

/// Configuration for one connection pool.
///
/// # Example
///
/// ```ignore
/// let config = PoolConfig::new("postgres://gob@localhost/gob")
///     .named("event store")
///     .with_max_size(4);
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    name: String,
    database_url: String,
    max_size: u32,
    min_idle: Option<u32>,
    connection_timeout: Duration,
}

impl PoolConfig {
    /// Configuration with defaults suited to a single production run:
    /// four connections, none kept idle, a 30 second checkout timeout.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            name: "database".to_owned(),
            database_url: database_url.into(),
            max_size: 4,
            min_idle: None,
            connection_timeout: Duration::from_secs(30),
        }
    }

    /// Name used in errors and logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the maximum number of connections in the pool.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the minimum number of idle connections to maintain.
    pub fn with_min_idle(mut self, min_idle: Option<u32>) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the connection checkout timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Database URL.
    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

/// Async PostgreSQL connection pool.
#[derive(Clone)]
pub struct DbPool {
    name: String,
    inner: Pool<AsyncPgConnection>,
}

impl DbPool {
    /// Build a pool. Connections are opened lazily by bb8.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Build`] when bb8 rejects the configuration.
    pub async fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);

        let inner = Pool::builder()
            .max_size(config.max_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|err| PoolError::build(config.name.as_str(), err.to_string()))?;
        debug!(pool = %config.name, max_size = config.max_size, "connection pool ready");

        Ok(Self {
            name: config.name,
            inner,
        })
    }

    /// Check out a connection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Checkout`] when no connection becomes available
    /// within the configured timeout.
    pub async fn get(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, PoolError> {
        self.inner
            .get()
            .await
            .map_err(|err| PoolError::checkout(self.name.as_str(), err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults_fit_a_single_run() {
        let config = PoolConfig::new("postgres://localhost/gob");

        assert_eq!(config.database_url(), "postgres://localhost/gob");
        assert_eq!(config.name(), "database");
        assert_eq!(config.max_size, 4);
        assert_eq!(config.min_idle, None);
        assert_eq!(config.connection_timeout, Duration::from_secs(30));
    }

    #[rstest]
    fn builder_overrides_defaults() {
        let config = PoolConfig::new("postgres://localhost/gob")
            .named("checkpoints")
            .with_max_size(2)
            .with_min_idle(Some(1))
            .with_connection_timeout(Duration::from_secs(5));

        assert_eq!(config.name(), "checkpoints");
        assert_eq!(config.max_size, 2);
        assert_eq!(config.min_idle, Some(1));
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
    }

    #[rstest]
    fn errors_name_the_pool() {
        let error = PoolError::checkout("event store", "connection refused");
        assert_eq!(
            error.to_string(),
            "failed to get event store connection: connection refused"
        );
    }
}
