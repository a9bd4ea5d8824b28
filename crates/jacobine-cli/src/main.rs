mod cli;

use std::sync::Arc;

use clap::Parser;
use jacobine_core::config::Config;
use jacobine_core::error::JacobineError;
use jacobine_core::logging;
use jacobine_db::DbGateway;
use jacobine_fetch::HttpFetcher;
use jacobine_queue::QueueClient;
use jacobine_runtime::{ConsumerRuntime, StageDeps};
use tokio::sync::Notify;
use tracing::info;

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = CliArgs::parse();
    match run(args).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("jacobine: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs) -> Result<(), JacobineError> {
    let config = Config::from_file(&args.config)?;

    match args.command {
        Command::Produce { project } => {
            logging::init(&config.logging, "producer");
            config.log_summary();

            let project_config = config.project(&project)?;
            let mut db = DbGateway::connect(config.mysql.connect_options(&project_config.mysql.database)).await?;
            let queue = QueueClient::connect(&config.rabbitmq.amqp_uri()).await?;
            let fetcher = HttpFetcher::new()?;

            let outcome = jacobine_producer::run(&config, &project, &mut db, &queue, &fetcher)
                .await
                .map_err(|e| JacobineError::Other(e.to_string()))?;

            info!(
                project,
                inserted = outcome.inserted,
                republished = outcome.republished,
                skipped = outcome.skipped,
                "producer run complete"
            );
            Ok(())
        }

        Command::Consume { project, stage } => {
            let stage_name: jacobine_stages::StageName = stage.into();
            let stage = stage_name.build();

            logging::init(&config.logging, stage.routing_key());
            config.log_summary();

            let project_config = config.project(&project)?;
            let exchange = project_config.rabbitmq.exchange.clone();

            let db = DbGateway::connect(config.mysql.connect_options(&project_config.mysql.database)).await?;
            let queue = Arc::new(QueueClient::connect(&config.rabbitmq.amqp_uri()).await?);
            let fetcher = Arc::new(HttpFetcher::new()?);
            let config = Arc::new(config);

            let deps = Arc::new(StageDeps::new(
                Box::new(db),
                queue.clone() as Arc<dyn jacobine_queue::Queue>,
                fetcher,
                config,
                project,
            ));

            let queue_name = stage.routing_key().to_string();
            let consumer_tag = format!("jacobine-{}-{}", stage.routing_key(), std::process::id());

            let shutdown = Arc::new(Notify::new());
            let shutdown_waiter = shutdown.clone();
            tokio::spawn(async move {
                os_signal().await;
                shutdown_waiter.notify_one();
            });

            let runtime = ConsumerRuntime::new(queue, stage, deps, exchange, queue_name, consumer_tag);
            runtime.run(Some(shutdown)).await?;
            Ok(())
        }
    }
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (cross-platform fallback).
async fn os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl_c");
    }
}
