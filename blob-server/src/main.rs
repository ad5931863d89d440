use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use blob_server::check::{check_integrity, CheckConfig};
use blob_server::config::ServerConfig;
use blob_server::http::{BasicAuth, BlobHttpService};
use blob_server::metrics::PrometheusMetrics;
use blob_server::retrieve::{retrieve, RetrieveConfig};
use blob_storage::{BlobStore, HookRegistry, Pipeline};

#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Retrieve a blob
    Retrieve(RetrieveConfig),

    /// Check blob integrity
    Check(CheckConfig),

    /// Start the blob server
    Server(ServerConfig),
}

fn setup_tracing(log_level: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", log_level);
            EnvFilter::new("info")
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let log_level = match &cli.command {
        Command::Server(config) => config.log_level.as_str(),
        _ => "info",
    };

    setup_tracing(log_level);

    match cli.command {
        Command::Retrieve(config) => retrieve(config)?,
        Command::Check(config) => check_integrity(config)?,
        Command::Server(config) => run(config)?,
    }
    Ok(())
}

#[tokio::main]
async fn run(args: ServerConfig) -> anyhow::Result<()> {
    let store = Arc::new(BlobStore::new(&args.storage_path)?);
    info!("Using storage path: {}", store.root().display());
    store.clear_staging()?;

    let metrics = PrometheusMetrics::new();
    let hooks = Arc::new(HookRegistry::new());
    hooks.register_post_commit(|digest: &str, path: &Path| -> anyhow::Result<()> {
        tracing::debug!(digest, path = %path.display(), "blob available");
        Ok(())
    });
    let pipeline = Pipeline::new(store, hooks, metrics.to_shared());

    let service = BlobHttpService::new(pipeline).with_metrics(metrics);
    if let Some((username, password)) = args.credentials() {
        info!("basic auth enabled for user: {}", username);
        service.router().middleware(BasicAuth::new(username, password));
    }

    run_server(args, service).await
}

async fn run_server(args: ServerConfig, service: BlobHttpService) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port)).await?;
    let local_addr = listener.local_addr()?;

    let metrics_listener =
        tokio::net::TcpListener::bind((args.metric_host.as_str(), args.metric_port)).await?;
    let metrics_addr = metrics_listener.local_addr()?;
    info!("metrics server is running at http://{metrics_addr}");

    let metrics_service = hyper::service::service_fn(
        move |req: hyper::Request<hyper::body::Incoming>| async move {
            let response = match (req.method(), req.uri().path()) {
                (&hyper::Method::GET, "/metrics") => blob_server::metrics::render(),
                _ => hyper::Response::builder()
                    .status(hyper::StatusCode::NOT_FOUND)
                    .body(http_body_util::Full::new(bytes::Bytes::from("Not Found")))
                    .unwrap(),
            };
            Ok::<_, std::convert::Infallible>(response)
        },
    );

    let http_server = ConnBuilder::new(TokioExecutor::new());
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();

    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());

    info!("server is running at http://{local_addr}");

    loop {
        tokio::select! {
            res = listener.accept() => {
                match res {
                    Ok((socket, _)) => {
                        let service = service.clone();
                        let handler = hyper::service::service_fn(move |req| {
                            let service = service.clone();
                            async move { service.handle_request(req).await }
                        });
                        let conn = http_server.serve_connection(TokioIo::new(socket), handler);
                        let conn = graceful.watch(conn.into_owned());
                        tokio::spawn(async move {
                            let _ = conn.await;
                        });
                    }
                    Err(err) => {
                        tracing::error!("error accepting connection: {err}");
                    }
                }
            }
            res = metrics_listener.accept() => {
                match res {
                    Ok((socket, _)) => {
                        let conn = http_server.serve_connection(TokioIo::new(socket), metrics_service);
                        let conn = graceful.watch(conn.into_owned());
                        tokio::spawn(async move {
                            let _ = conn.await;
                        });
                    }
                    Err(err) => {
                        tracing::error!("error accepting metrics connection: {err}");
                    }
                }
            }
            _ = ctrl_c.as_mut() => {
                break;
            }
        };
    }

    tokio::select! {
        () = graceful.shutdown() => {
            tracing::debug!("Gracefully shutdown!");
        },
        () = tokio::time::sleep(std::time::Duration::from_secs(10)) => {
            tracing::debug!("Waited 10 seconds for graceful shutdown, aborting...");
        }
    }

    info!("server is stopped");
    Ok(())
}
