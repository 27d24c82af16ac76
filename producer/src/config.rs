//! Producer configuration loaded via OrthoConfig.
//!
//! Values come from `EVENT_PRODUCER_*` environment variables or an optional
//! configuration file. Command-line flags are parsed separately by the
//! binary, so settings are loaded from the program name alone.

use std::ffi::OsString;
use std::path::PathBuf;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::producer::{
    DEFAULT_EXCHANGE, DEFAULT_LOG_EVERY, DEFAULT_MAX_EVENTS_PER_MESSAGE, DEFAULT_PAGE_SIZE,
};
use crate::domain::{FullLoadEventIds, FullLoadWatermark, ProductionConfig};

const DEFAULT_MAPPING_DIR: &str = "mappings";

fn default_schema_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join("schema.json")
}

/// Errors raised while interpreting settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// OrthoConfig could not assemble the settings.
    #[error("failed to load settings: {message}")]
    Load {
        /// Loader failure description.
        message: String,
    },
    /// A required setting is absent.
    #[error("missing setting {name}")]
    Missing {
        /// Environment variable that must be set.
        name: &'static str,
    },
    /// A size setting is zero.
    #[error("setting {name} must be greater than zero")]
    Zero {
        /// Environment variable holding the value.
        name: &'static str,
    },
}

/// Configuration values of the event producer.
#[derive(Debug, Clone, Default, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "EVENT_PRODUCER")]
pub struct ProducerSettings {
    /// Database holding the event log and entity tables.
    pub source_database_url: Option<String>,
    /// Database holding the watermark table.
    pub checkpoint_database_url: Option<String>,
    /// AMQP URI; the logging stub publishes when absent.
    pub broker_url: Option<String>,
    /// Exchange receiving external events.
    pub exchange: Option<String>,
    /// Schema descriptor path.
    pub schema_path: Option<PathBuf>,
    /// Root of the mapping definitions.
    pub mapping_dir: Option<PathBuf>,
    /// Events or snapshots read per page.
    pub page_size: Option<usize>,
    /// Events per published message.
    pub max_events_per_message: Option<usize>,
    /// Progress log interval.
    pub log_every: Option<usize>,
    /// Comma separated catalogues whose notifications trigger production.
    pub listen_to_catalogues: Option<String>,
    /// Emit `null` event ids during full loads.
    #[ortho_config(default = false)]
    pub full_load_null_event_ids: bool,
    /// Leave the watermark untouched after full loads.
    #[ortho_config(default = false)]
    pub full_load_keep_watermark: bool,
}

impl ProducerSettings {
    /// Load settings from the environment and configuration files.
    pub fn load_for(program: impl Into<OsString>) -> Result<Self, SettingsError> {
        Self::load_from_iter([program.into()]).map_err(|err| SettingsError::Load {
            message: err.to_string(),
        })
    }

    /// URL of the event store database.
    pub fn source_database_url(&self) -> Result<&str, SettingsError> {
        self.source_database_url
            .as_deref()
            .ok_or(SettingsError::Missing {
                name: "EVENT_PRODUCER_SOURCE_DATABASE_URL",
            })
    }

    /// URL of the checkpoint database, falling back to the source database.
    pub fn checkpoint_database_url(&self) -> Result<&str, SettingsError> {
        match self.checkpoint_database_url.as_deref() {
            Some(url) => Ok(url),
            None => self.source_database_url(),
        }
    }

    /// Broker URI, if one is configured.
    pub fn broker_url(&self) -> Option<&str> {
        self.broker_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    /// Schema descriptor path, falling back to the packaged descriptor.
    pub fn schema_path(&self) -> PathBuf {
        self.schema_path.clone().unwrap_or_else(default_schema_path)
    }

    /// Mapping definition root.
    pub fn mapping_dir(&self) -> PathBuf {
        self.mapping_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MAPPING_DIR))
    }

    /// Listened catalogues, trimmed and without blanks.
    pub fn listen_to_catalogues(&self) -> Vec<String> {
        self.listen_to_catalogues
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Resolve defaults into the domain's run configuration.
    pub fn production_config(&self) -> Result<ProductionConfig, SettingsError> {
        Ok(ProductionConfig {
            exchange: self
                .exchange
                .clone()
                .unwrap_or_else(|| DEFAULT_EXCHANGE.to_owned()),
            page_size: positive(self.page_size, DEFAULT_PAGE_SIZE, "EVENT_PRODUCER_PAGE_SIZE")?,
            max_events_per_message: positive(
                self.max_events_per_message,
                DEFAULT_MAX_EVENTS_PER_MESSAGE,
                "EVENT_PRODUCER_MAX_EVENTS_PER_MESSAGE",
            )?,
            log_every: positive(self.log_every, DEFAULT_LOG_EVERY, "EVENT_PRODUCER_LOG_EVERY")?,
            full_load_event_ids: if self.full_load_null_event_ids {
                FullLoadEventIds::Null
            } else {
                FullLoadEventIds::LastEvent
            },
            full_load_watermark: if self.full_load_keep_watermark {
                FullLoadWatermark::Keep
            } else {
                FullLoadWatermark::Replace
            },
        })
    }
}

fn positive(value: Option<usize>, default: usize, name: &'static str) -> Result<usize, SettingsError> {
    match value.unwrap_or(default) {
        0 => Err(SettingsError::Zero { name }),
        value => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for producer configuration parsing.

    use super::*;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARIABLES: [&str; 12] = [
        "EVENT_PRODUCER_SOURCE_DATABASE_URL",
        "EVENT_PRODUCER_CHECKPOINT_DATABASE_URL",
        "EVENT_PRODUCER_BROKER_URL",
        "EVENT_PRODUCER_EXCHANGE",
        "EVENT_PRODUCER_SCHEMA_PATH",
        "EVENT_PRODUCER_MAPPING_DIR",
        "EVENT_PRODUCER_PAGE_SIZE",
        "EVENT_PRODUCER_MAX_EVENTS_PER_MESSAGE",
        "EVENT_PRODUCER_LOG_EVERY",
        "EVENT_PRODUCER_LISTEN_TO_CATALOGUES",
        "EVENT_PRODUCER_FULL_LOAD_NULL_EVENT_IDS",
        "EVENT_PRODUCER_FULL_LOAD_KEEP_WATERMARK",
    ];

    fn environment(overrides: &[(&str, &str)]) -> Vec<(&'static str, Option<String>)> {
        VARIABLES
            .iter()
            .map(|name| {
                let value = overrides
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| (*value).to_owned());
                (*name, value)
            })
            .collect()
    }

    fn load() -> ProducerSettings {
        ProducerSettings::load_for("event-producer").expect("config should load")
    }

    #[rstest]
    fn defaults_are_used_when_missing() {
        let _guard = lock_env(environment(&[]));

        let settings = load();
        assert_eq!(settings.production_config(), Ok(ProductionConfig::default()));
        assert_eq!(settings.schema_path(), default_schema_path());
        assert_eq!(settings.mapping_dir(), PathBuf::from(DEFAULT_MAPPING_DIR));
        assert!(settings.broker_url().is_none());
        assert!(settings.listen_to_catalogues().is_empty());
        assert_eq!(
            settings.source_database_url(),
            Err(SettingsError::Missing {
                name: "EVENT_PRODUCER_SOURCE_DATABASE_URL"
            })
        );
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env(environment(&[
            ("EVENT_PRODUCER_SOURCE_DATABASE_URL", "postgres://gob"),
            ("EVENT_PRODUCER_BROKER_URL", "amqp://broker"),
            ("EVENT_PRODUCER_EXCHANGE", "test.events"),
            ("EVENT_PRODUCER_PAGE_SIZE", "50"),
            ("EVENT_PRODUCER_LISTEN_TO_CATALOGUES", " nap, ,gebieden "),
            ("EVENT_PRODUCER_FULL_LOAD_NULL_EVENT_IDS", "true"),
            ("EVENT_PRODUCER_FULL_LOAD_KEEP_WATERMARK", "true"),
        ]));

        let settings = load();
        let config = settings.production_config().expect("valid config");
        assert_eq!(config.exchange, "test.events");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.max_events_per_message, DEFAULT_MAX_EVENTS_PER_MESSAGE);
        assert_eq!(config.full_load_event_ids, FullLoadEventIds::Null);
        assert_eq!(config.full_load_watermark, FullLoadWatermark::Keep);
        assert_eq!(settings.broker_url(), Some("amqp://broker"));
        assert_eq!(settings.checkpoint_database_url(), Ok("postgres://gob"));
        assert_eq!(settings.listen_to_catalogues(), vec!["nap", "gebieden"]);
    }

    #[rstest]
    fn zero_sizes_are_rejected() {
        let _guard = lock_env(environment(&[("EVENT_PRODUCER_MAX_EVENTS_PER_MESSAGE", "0")]));

        assert_eq!(
            load().production_config(),
            Err(SettingsError::Zero {
                name: "EVENT_PRODUCER_MAX_EVENTS_PER_MESSAGE"
            })
        );
    }

    #[rstest]
    fn blank_broker_urls_select_the_stub() {
        let settings = ProducerSettings {
            broker_url: Some("  ".to_owned()),
            ..ProducerSettings::default()
        };
        assert!(settings.broker_url().is_none());
    }
}
