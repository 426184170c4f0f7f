use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use distributed_tasks::broker::connection::{Backend, BackendKind, ConnectionInfo, connect};
use distributed_tasks::broker::handlers::broker_router;
use distributed_tasks::broker::memory::MemoryBroker;
use distributed_tasks::broker::remote::HttpBroker;
use distributed_tasks::config::{BrokerArgs, WorkerArgs};
use distributed_tasks::executor::executor::TaskExecutor;
use distributed_tasks::executor::handlers::api_router;
use distributed_tasks::executor::producer::Producer;
use distributed_tasks::executor::protocol::{TaskStatusResponse, parse_arg};
use distributed_tasks::executor::status::StatusReader;
use distributed_tasks::executor::tasks::builtin_registry;
use distributed_tasks::executor::types::TaskId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(name = "taskd", version, about = "Distributed task queue: broker node, workers and producer API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a broker node: the queue and the result store, served over HTTP.
    Broker {
        #[arg(long, env = "TASKD_BIND", default_value = "127.0.0.1:6400")]
        bind: SocketAddr,

        /// Bearer credential required on every request.
        #[arg(long, env = "TASKD_BROKER_CREDENTIAL")]
        credential: Option<String>,

        #[arg(long, env = "TASKD_VISIBILITY_TIMEOUT_SECS", default_value_t = 30)]
        visibility_timeout_secs: u64,
    },

    /// Run a worker pool against a broker.
    Worker {
        #[command(flatten)]
        broker: BrokerArgs,

        #[command(flatten)]
        worker: WorkerArgs,
    },

    /// Serve the submit/status HTTP API.
    Api {
        #[arg(long, env = "TASKD_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        #[command(flatten)]
        broker: BrokerArgs,
    },

    /// Memory broker, worker pool and HTTP API in one process.
    Standalone {
        #[arg(long, env = "TASKD_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Bearer credential for the embedded broker routes.
        #[arg(long, env = "TASKD_BROKER_CREDENTIAL")]
        credential: Option<String>,

        #[arg(long, env = "TASKD_VISIBILITY_TIMEOUT_SECS", default_value_t = 30)]
        visibility_timeout_secs: u64,

        #[command(flatten)]
        worker: WorkerArgs,
    },

    /// Submit a task and print its id.
    Submit {
        task_name: String,

        /// Positional arguments, each parsed as a JSON literal.
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,

        #[command(flatten)]
        broker: BrokerArgs,

        #[command(flatten)]
        poll: PollArgs,
    },

    /// Print the record of a task.
    Status {
        task_id: String,

        #[command(flatten)]
        broker: BrokerArgs,

        #[command(flatten)]
        poll: PollArgs,
    },

    /// Print queue depth and record counts of a broker node.
    Stats {
        #[command(flatten)]
        broker: BrokerArgs,
    },
}

#[derive(Debug, Clone, Args)]
struct PollArgs {
    /// Poll until the task is SUCCESS or FAILURE.
    #[arg(long)]
    wait: bool,

    #[arg(long, default_value_t = 500)]
    poll_interval_ms: u64,

    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Broker {
            bind,
            credential,
            visibility_timeout_secs,
        } => {
            let broker = Arc::new(MemoryBroker::with_visibility_timeout(Duration::from_secs(
                visibility_timeout_secs,
            )));
            if credential.is_none() {
                tracing::warn!("Broker node started without a credential");
            }
            serve(bind, broker_router(broker, credential), shutdown_signal()).await
        }

        Commands::Worker { broker, worker } => {
            let backend = connect(&broker.settings())
                .await
                .context("failed to connect to the broker")?;
            let executor = TaskExecutor::new(
                backend.store,
                backend.queue,
                builtin_registry(),
                worker.settings(),
            );

            executor.run(shutdown_signal()).await;
            Ok(())
        }

        Commands::Api { bind, broker } => {
            let backend = connect(&broker.settings())
                .await
                .context("failed to connect to the broker")?;
            let app = api_router(
                Producer::new(backend.store.clone(), backend.queue),
                StatusReader::new(backend.store),
            );
            serve(bind, app, shutdown_signal()).await
        }

        Commands::Standalone {
            bind,
            credential,
            visibility_timeout_secs,
            worker,
        } => {
            let broker = Arc::new(MemoryBroker::with_visibility_timeout(Duration::from_secs(
                visibility_timeout_secs,
            )));
            let backend = Backend::memory(broker.clone());
            let shutdown = shutdown_signal();

            let executor = TaskExecutor::new(
                backend.store.clone(),
                backend.queue.clone(),
                builtin_registry(),
                worker.settings(),
            );
            let workers = executor.start(shutdown.clone());

            let app = api_router(
                Producer::new(backend.store.clone(), backend.queue),
                StatusReader::new(backend.store),
            )
            .merge(broker_router(broker, credential));

            serve(bind, app, shutdown).await?;

            tracing::info!("Waiting for in-flight tasks to finish");
            for handle in workers {
                if let Err(e) = handle.await {
                    tracing::error!("Worker loop terminated abnormally: {}", e);
                }
            }
            Ok(())
        }

        Commands::Submit {
            task_name,
            args,
            broker,
            poll,
        } => {
            let backend = connect(&broker.settings())
                .await
                .context("failed to connect to the broker")?;
            let producer = Producer::new(backend.store.clone(), backend.queue);
            let args = args.iter().map(|raw| parse_arg(raw)).collect();

            let task_id = producer.submit(&task_name, args).await?;
            println!("{}", task_id);

            if poll.wait {
                print_status(&StatusReader::new(backend.store), &task_id, &poll).await?;
            }
            Ok(())
        }

        Commands::Status {
            task_id,
            broker,
            poll,
        } => {
            let backend = connect(&broker.settings())
                .await
                .context("failed to connect to the broker")?;
            print_status(&StatusReader::new(backend.store), &TaskId(task_id), &poll).await
        }

        Commands::Stats { broker } => {
            let settings = broker.settings();
            let info = ConnectionInfo::parse(&settings.broker_url)?;
            anyhow::ensure!(
                info.kind == BackendKind::Http,
                "stats are served by broker nodes (http:// or https://), got {}",
                info
            );

            let node = HttpBroker::new(&info, settings.retry, settings.visibility_timeout);
            let stats = node.stats().await.context("failed to read broker stats")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}

async fn print_status(status: &StatusReader, task_id: &TaskId, poll: &PollArgs) -> anyhow::Result<()> {
    let record = if poll.wait {
        status
            .wait_for_terminal(
                task_id,
                Duration::from_millis(poll.poll_interval_ms),
                Duration::from_secs(poll.timeout_secs),
            )
            .await?
    } else {
        status.status(task_id).await?
    };

    let response = TaskStatusResponse::from(record);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn serve(bind: SocketAddr, app: axum::Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;

    tracing::info!("HTTP server listening on {}", listener.local_addr()?);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Token cancelled on Ctrl+C.
fn shutdown_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown requested");
        trigger.cancel();
    });

    token
}
