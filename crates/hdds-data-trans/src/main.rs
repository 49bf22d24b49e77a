// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use hdds_data_trans::config::{ConfigSnapshot, DatabaseDialect, LogLevel};
use hdds_data_trans::dispatcher::Dispatcher;
use hdds_data_trans::logging::init_logging;
use hdds_data_trans::mqtt::MqttClient;
use hdds_data_trans::sink::Sink;
use hdds_data_trans::sink_file::FileSink;
use hdds_data_trans::sink_mysql::MySqlSink;
use hdds_data_trans::sink_postgres::PostgresSink;
use hdds_data_trans::watcher;
use hdds_data_trans::{StorageFanOut, TransformerRegistry};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "hdds-data-trans", version, about = "IoT device-data normalization and fan-out gateway")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the configured logger level (debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new().context("failed to start the tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut snapshot = ConfigSnapshot::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    if let Some(level) = &cli.log_level {
        snapshot.logger.level = parse_log_level(level)?;
    }

    init_logging(&snapshot.logger).context("failed to initialize logging")?;
    tracing::info!(config = %cli.config.display(), "starting hdds-data-trans");

    let registry = Arc::new(TransformerRegistry::build(&snapshot.transformers)?);
    let fanout = Arc::new(build_fanout(&snapshot).await?);
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), fanout.clone()));

    let mut mqtt_client = MqttClient::connect(&snapshot.mqtt)
        .await
        .context("failed to connect to the mqtt broker")?;

    let runtime_handle = tokio::runtime::Handle::current();
    let reload_registry = registry.clone();
    let reload_fanout = fanout.clone();
    let watcher_handle = watcher::watch(
        &cli.config,
        Box::new(move |new_snapshot| {
            let registry = reload_registry.clone();
            let fanout = reload_fanout.clone();
            runtime_handle.spawn(async move {
                reconcile(new_snapshot, registry, fanout).await;
            });
        }),
    )
    .context("failed to start the config file watcher")?;

    let dispatch_dispatcher = dispatcher.clone();
    let dispatch_task = tokio::spawn(async move {
        loop {
            match mqtt_client.next_message().await {
                Some(message) => {
                    let dispatcher = dispatch_dispatcher.clone();
                    tokio::spawn(async move {
                        dispatcher.on_message(&message.topic, &message.payload).await;
                    });
                }
                None => break,
            }
        }
        mqtt_client
    });

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received, draining in-flight work");

    dispatch_task.abort();
    watcher_handle.stop().await;
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    fanout.close().await;

    tracing::info!("shutdown complete");
    Ok(())
}

fn parse_log_level(raw: &str) -> anyhow::Result<LogLevel> {
    match raw.to_uppercase().as_str() {
        "DEBUG" => Ok(LogLevel::Debug),
        "INFO" => Ok(LogLevel::Info),
        "WARN" | "WARNING" => Ok(LogLevel::Warn),
        "ERROR" => Ok(LogLevel::Error),
        other => anyhow::bail!("unknown --log-level {other:?}, expected one of debug, info, warn, error"),
    }
}

/// Bootstrap every configured sink. A bootstrap failure for one backend is
/// fatal at startup — unlike a runtime reload, there is no prior snapshot to
/// fall back to.
async fn build_fanout(snapshot: &ConfigSnapshot) -> anyhow::Result<StorageFanOut> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();

    if let Some(file_config) = &snapshot.storage.file {
        let sink = FileSink::bootstrap(&file_config.path)
            .await
            .context("failed to bootstrap the file sink")?;
        sinks.push(Box::new(sink));
    }

    if let Some(database_config) = &snapshot.storage.database {
        let sink: Box<dyn Sink> = match database_config.dialect {
            DatabaseDialect::MySql => Box::new(
                MySqlSink::bootstrap(&database_config.dsn)
                    .await
                    .context("failed to bootstrap the mysql sink")?,
            ),
            DatabaseDialect::Postgresql => Box::new(
                PostgresSink::bootstrap(&database_config.dsn)
                    .await
                    .context("failed to bootstrap the postgresql sink")?,
            ),
        };
        sinks.push(sink);
    }

    Ok(StorageFanOut::from_sinks(sinks))
}

/// Reconcile a freshly reloaded config against the live Registry and
/// FanOut. Transformer entries are replaced in place; entries dropped from
/// the new snapshot are removed. Storage backends whose bootstrap fails are
/// logged and left out rather than aborting the reload, since a prior
/// snapshot's sinks should keep running.
async fn reconcile(
    new_snapshot: ConfigSnapshot,
    registry: Arc<TransformerRegistry>,
    fanout: Arc<StorageFanOut>,
) {
    let existing_types = registry.device_types().await;
    for device_type in &existing_types {
        if !new_snapshot.transformers.contains_key(device_type) {
            registry.remove(device_type).await;
            tracing::info!(device_type, "transformer removed on reload");
        }
    }
    for (device_type, source) in &new_snapshot.transformers {
        if let Err(err) = registry.replace(device_type, source).await {
            tracing::error!(device_type, error = %err, "failed to reload transformer, keeping previous version");
        }
    }

    reconcile_file_sink(&new_snapshot, &fanout).await;
    reconcile_database_sink(&new_snapshot, &fanout).await;
}

async fn reconcile_file_sink(new_snapshot: &ConfigSnapshot, fanout: &StorageFanOut) {
    fanout.remove_backend_by_type("file").await;
    if let Some(file_config) = &new_snapshot.storage.file {
        match FileSink::bootstrap(&file_config.path).await {
            Ok(sink) => fanout.add_backend(Box::new(sink)).await,
            Err(err) => tracing::error!(error = %err, "failed to reload the file sink"),
        }
    }
}

async fn reconcile_database_sink(new_snapshot: &ConfigSnapshot, fanout: &StorageFanOut) {
    fanout.remove_backend_by_type("mysql").await;
    fanout.remove_backend_by_type("postgresql").await;

    let Some(database_config) = &new_snapshot.storage.database else {
        return;
    };

    let bootstrapped: Result<Box<dyn Sink>, hdds_data_trans::GatewayError> = match database_config.dialect {
        DatabaseDialect::MySql => MySqlSink::bootstrap(&database_config.dsn)
            .await
            .map(|sink| Box::new(sink) as Box<dyn Sink>),
        DatabaseDialect::Postgresql => PostgresSink::bootstrap(&database_config.dsn)
            .await
            .map(|sink| Box::new(sink) as Box<dyn Sink>),
    };

    match bootstrapped {
        Ok(sink) => fanout.add_backend(sink).await,
        Err(err) => tracing::error!(error = %err, "failed to reload the database sink"),
    }
}
