//! Produce external events for GOB collections.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use eventproducer::config::ProducerSettings;
use eventproducer::domain::jobs::NotificationFilter;
use eventproducer::domain::ports::{
    EventBroker, ProduceCommand, ProduceRequest, RequestContents, RequestHeader, FULL_LOAD_MODE,
};
use eventproducer::domain::schema::SchemaRegistry;
use eventproducer::domain::{Error, ProduceService, ProducerPorts};
use eventproducer::inbound::invocation::{
    exit_code_for, notification_workflow, split_job, InvocationHandler,
};
#[cfg(feature = "amqp")]
use eventproducer::outbound::broker::AmqpEventBroker;
use eventproducer::outbound::broker::LoggingEventBroker;
use eventproducer::outbound::filesystem::{load_mapping_registry, load_schema_registry};
use eventproducer::outbound::persistence::{
    run_checkpoint_migrations, DbPool, DieselCheckpointRepository, DieselEventStore, PoolConfig,
};
use mockable::DefaultClock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Builder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const PROGRAM: &str = "event-producer";

/// `event-producer` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "event-producer",
    about = "Publish GOB collection events to the external event exchange",
    version
)]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Produce events for one catalogue/collection.
    Produce {
        /// Catalogue name.
        #[arg(long, value_name = "name")]
        catalogue: String,
        /// Collection name.
        #[arg(long, value_name = "name")]
        collection: String,
        /// Replay the current state of every entity instead of new events.
        #[arg(long)]
        full: bool,
        /// Expected watermark; a mismatch is logged, never obeyed.
        #[arg(long, value_name = "id", allow_negative_numbers = true)]
        min_event_id: Option<i64>,
        /// Highest event id to publish.
        #[arg(long, value_name = "id")]
        max_event_id: Option<i64>,
    },
    /// Read a produce request on stdin and write the response on stdout.
    Handle,
    /// Read a produce request on stdin and write one request per stream of
    /// the catalogue on stdout.
    Split {
        /// Catalogue to split.
        #[arg(long, value_name = "name")]
        catalogue: String,
    },
    /// Read an event notification on stdin and write the workflow to start,
    /// if any, on stdout.
    Notify,
    /// Apply the checkpoint database migrations.
    Migrate,
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let args = CliArgs::parse();
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("failed to build Tokio runtime")?;
    runtime.block_on(run(args.command))
}

async fn run(command: Command) -> Result<ExitCode> {
    let settings = ProducerSettings::load_for(PROGRAM)?;
    match command {
        Command::Produce {
            catalogue,
            collection,
            full,
            min_event_id,
            max_event_id,
        } => {
            let request = ProduceRequest {
                header: RequestHeader {
                    mode: full.then(|| FULL_LOAD_MODE.to_owned()),
                    ..RequestHeader::for_stream(catalogue, collection)
                },
                contents: RequestContents {
                    last_event: Some((min_event_id, max_event_id)),
                    ..RequestContents::default()
                },
            };
            let service = build_service(&settings).await?;
            let outcome = service.produce(request).await;
            finish(outcome.map(|response| {
                info!(produced = response.summary.produced, "production finished");
                None
            }))
            .await
        }
        Command::Handle => {
            let input = read_stdin().await?;
            let handler = InvocationHandler::new(Arc::new(build_service(&settings).await?));
            finish(handler.handle_json(&input).await.map(Some)).await
        }
        Command::Split { catalogue } => {
            let input = read_stdin().await?;
            let registry = load_schema_registry(&settings.schema_path())?;
            finish(split_job(&registry, &catalogue, &input).map(Some)).await
        }
        Command::Notify => {
            let input = read_stdin().await?;
            let registry = load_schema_registry(&settings.schema_path())?;
            let filter = NotificationFilter::new(settings.listen_to_catalogues());
            finish(notify(&registry, &filter, &input)).await
        }
        Command::Migrate => {
            let url = settings.checkpoint_database_url()?;
            let applied = run_checkpoint_migrations(url).await?;
            info!(applied, "migrations applied");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn notify(registry: &SchemaRegistry, filter: &NotificationFilter, input: &str) -> Result<Option<String>, Error> {
    let Some(start) = notification_workflow(registry, filter, input)? else {
        info!("notification ignored");
        return Ok(None);
    };
    serde_json::to_string(&start)
        .map(Some)
        .map_err(|err| Error::internal(format!("failed to serialise workflow: {err}")))
}

async fn build_service(settings: &ProducerSettings) -> Result<ProduceService> {
    let registry = Arc::new(load_schema_registry(&settings.schema_path())?);
    let mappings = Arc::new(load_mapping_registry(&settings.mapping_dir())?);
    let source_pool =
        DbPool::new(PoolConfig::new(settings.source_database_url()?).named("event store")).await?;
    let checkpoint_pool =
        DbPool::new(PoolConfig::new(settings.checkpoint_database_url()?).named("checkpoints"))
            .await?;
    let ports = ProducerPorts {
        event_store: Arc::new(DieselEventStore::new(source_pool)),
        checkpoints: Arc::new(DieselCheckpointRepository::new(checkpoint_pool)),
        broker: select_broker(settings.broker_url()),
    };
    Ok(ProduceService::new(
        registry,
        mappings,
        ports,
        Arc::new(DefaultClock),
        settings.production_config()?,
    ))
}

#[cfg(feature = "amqp")]
fn select_broker(url: Option<&str>) -> Arc<dyn EventBroker> {
    match url {
        Some(url) => Arc::new(AmqpEventBroker::new(url)),
        None => {
            warn!("EVENT_PRODUCER_BROKER_URL is not set; events are logged, not published");
            Arc::new(LoggingEventBroker::new())
        }
    }
}

#[cfg(not(feature = "amqp"))]
fn select_broker(url: Option<&str>) -> Arc<dyn EventBroker> {
    if url.is_some() {
        warn!("built without AMQP support; events are logged, not published");
    }
    Arc::new(LoggingEventBroker::new())
}

async fn read_stdin() -> Result<String> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .wrap_err("failed to read stdin")?;
    Ok(input)
}

/// Write successful output to stdout; report domain errors and map them to
/// an exit code.
async fn finish(outcome: Result<Option<String>, Error>) -> Result<ExitCode> {
    match outcome {
        Ok(output) => {
            if let Some(output) = output {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(output.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            error!(code = ?err.code(), message = err.message(), "production failed");
            Ok(ExitCode::from(exit_code_for(err.code())))
        }
    }
}
