//! Filegate -- multi-tenant file gateway.
//!
//! On SIGTERM/SIGINT every listener stops admitting requests, in-flight
//! requests get `server.shutdown_timeout` seconds to finish, and the
//! process exits non-zero if any of them is still running after that.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use filegate::auth::AuthCache;
use filegate::config::{Config, LoggingConfig};
use filegate::credentials::cache::MemoryCredentialCache;
use filegate::credentials::sqlite::SqliteCredentialStore;
use filegate::gateway::ObjectGateway;
use filegate::metrics::MetricsRecorder;
use filegate::shutdown::ShutdownCoordinator;
use filegate::storage::aws::AwsBackend;
use filegate::storage::backend::ObjectStore;
use filegate::storage::local::LocalBackend;
use filegate::storage::memory::MemoryBackend;

/// Command-line arguments for the Filegate server.
#[derive(Parser, Debug)]
#[command(name = "filegate", version, about = "Multi-tenant file gateway")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "filegate.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = filegate::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    let metrics = if config.observability.metrics {
        let recorder = MetricsRecorder::install()?;
        info!("Prometheus metrics initialized");
        recorder
    } else {
        MetricsRecorder::detached()
    };

    // Credential source of truth, fronted by the in-process cache.
    let metadata_path = &config.metadata.sqlite.path;
    let credentials = SqliteCredentialStore::new(metadata_path)?;
    info!("SQLite credential store initialized at {}", metadata_path);

    if let Some(seed) = &config.auth.seed {
        credentials.seed_credential(&seed.tenant_key, &seed.email)?;
        info!("Seed tenant ensured");
    }

    let auth = Arc::new(AuthCache::new(
        Arc::new(MemoryCredentialCache::new()),
        Arc::new(credentials),
        config.auth.cache_ttl_days,
        config.auth.max_background_tasks,
        metrics.clone(),
    ));

    let storage = build_storage(&config).await?;

    let staging_dir = if config.server.staging_dir.is_empty() {
        std::env::temp_dir()
    } else {
        PathBuf::from(&config.server.staging_dir)
    };
    std::fs::create_dir_all(&staging_dir)?;

    let gateway = Arc::new(ObjectGateway::new(
        storage,
        metrics.clone(),
        staging_dir,
        config.server.max_file_size,
    ));

    let api_shutdown = ShutdownCoordinator::new("api");
    let metrics_shutdown = ShutdownCoordinator::new("metrics");
    let drain_timeout = Duration::from_secs(config.server.shutdown_timeout);

    let state = Arc::new(filegate::AppState {
        config: config.clone(),
        auth: auth.clone(),
        gateway,
        metrics: metrics.clone(),
        shutdown: api_shutdown.clone(),
    });

    let (api_stop_tx, api_stop_rx) = oneshot::channel::<()>();
    let (metrics_stop_tx, metrics_stop_rx) = oneshot::channel::<()>();

    let metrics_server = if config.observability.metrics {
        let metrics_addr = format!(
            "{}:{}",
            config.observability.metrics_host, config.observability.metrics_port
        );
        let listener = TcpListener::bind(&metrics_addr).await?;
        info!("Metrics listening on {}", metrics_addr);
        let router = filegate::server::metrics_app(metrics.clone(), metrics_shutdown.clone());
        Some(tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = metrics_stop_rx.await;
            })
            .await
        }))
    } else {
        None
    };

    let app = filegate::server::app(state);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Filegate listening on {}", bind_addr);

    let api_server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = api_stop_rx.await;
        })
        .await
    });

    shutdown_signal().await;

    // Both listeners reject new work from here on; wait for what is running.
    let (api_drained, metrics_drained) = tokio::join!(
        api_shutdown.drain(drain_timeout),
        metrics_shutdown.drain(drain_timeout)
    );
    let _ = api_stop_tx.send(());
    let _ = metrics_stop_tx.send(());

    let mut timed_out = false;
    for drained in [api_drained, metrics_drained] {
        if let Err(e) = drained {
            error!(error = %e, "drain did not complete");
            timed_out = true;
        }
    }
    if !auth.shutdown_background(drain_timeout).await {
        error!(
            timeout_secs = drain_timeout.as_secs(),
            "background credential tasks still running"
        );
        timed_out = true;
    }
    if timed_out {
        std::process::exit(1);
    }

    api_server.await??;
    if let Some(handle) = metrics_server {
        handle.await??;
    }

    info!("Filegate shut down");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Build the object store named by `storage.backend`.
async fn build_storage(config: &Config) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let storage: Arc<dyn ObjectStore> = match config.storage.backend.as_str() {
        "aws" => {
            let aws_config = config.storage.aws.as_ref().ok_or_else(|| {
                anyhow::anyhow!("storage.backend is 'aws' but storage.aws config section is missing")
            })?;
            let backend = AwsBackend::new(
                aws_config.bucket.clone(),
                aws_config.region.clone(),
                aws_config.prefix.clone(),
                non_empty(&aws_config.endpoint_url),
                aws_config.use_path_style,
                non_empty(&aws_config.access_key_id),
                non_empty(&aws_config.secret_access_key),
            )
            .await?;
            info!(
                "AWS storage backend initialized: bucket={} region={} prefix='{}'",
                aws_config.bucket, aws_config.region, aws_config.prefix
            );
            Arc::new(backend)
        }
        "memory" => {
            info!("In-memory storage backend initialized");
            Arc::new(MemoryBackend::new())
        }
        "local" => {
            let storage_root = &config.storage.local.root_dir;
            let backend = LocalBackend::new(storage_root)?;
            info!("Local storage backend initialized at {}", storage_root);
            Arc::new(backend)
        }
        other => anyhow::bail!("unknown storage backend '{other}'"),
    };
    Ok(storage)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
