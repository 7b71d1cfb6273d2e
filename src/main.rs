//! ZFS Volume Provisioner
//!
//! Serves provisioning requests over REST, exports volumes over NFS or
//! iSCSI, and publishes per-volume usage on the metrics endpoint.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zfs_provisioner::{
    ApiServer, ApiServerConfig, Error, Provisioner, ProvisionerConfig, Result, TgtAdmin, ZfsCli,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// ZFS Volume Provisioner - NFS and iSCSI persistent volumes from ZFS datasets
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Parent dataset under which volumes are created
    #[arg(long, env = "ZFS_PARENT_DATASET")]
    parent_dataset: Option<String>,

    /// YAML configuration file
    #[arg(long, env = "CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Directory for iSCSI target descriptor files
    #[arg(long, env = "TGT_CONFIG_DIR")]
    target_config_dir: Option<PathBuf>,

    /// Default NFS share options
    #[arg(long, env = "SHARE_OPTIONS")]
    share_options: Option<String>,

    /// Hostname advertised in exports (defaults to `hostname -f`)
    #[arg(long, env = "SERVER_HOSTNAME")]
    server_hostname: Option<String>,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting ZFS Volume Provisioner");
    info!("  Version: {}", zfs_provisioner::VERSION);
    info!("  REST API: {}", args.api_addr);

    let config = build_config(&args)?;
    info!("  Parent dataset: {}", config.parent_dataset);

    let provisioner = Arc::new(Provisioner::new(
        config,
        Arc::new(ZfsCli::new()),
        Arc::new(TgtAdmin::new()),
    )?);

    // The parent dataset must be listable before anything is served
    let startup_check = provisioner.clone();
    tokio::task::spawn_blocking(move || startup_check.check_engine())
        .await
        .map_err(|e| Error::Internal(format!("startup check failed: {}", e)))?
        .map_err(|e| Error::Configuration(format!("storage engine unusable: {}", e)))?;
    info!("Storage engine reachable");

    // Register volume metrics
    let collector = provisioner.metrics_collector()?;
    prometheus::register(Box::new(collector))?;

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_provisioner = provisioner.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_provisioner).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Create and run API server
    let api_config = ApiServerConfig {
        rest_addr: args
            .api_addr
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid REST API address: {}", e)))?,
    };

    let api_server = Arc::new(ApiServer::new(api_config, provisioner));

    let signalled = api_server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signalled.shutdown();
        }
    });

    info!("Starting API server");
    api_server.run().await?;

    info!("Provisioner shutdown complete");
    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

/// File configuration with command-line values layered on top
fn build_config(args: &Args) -> Result<ProvisionerConfig> {
    let mut config = match &args.config_file {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ProvisionerConfig::from_yaml_file(path)?
        }
        None => ProvisionerConfig::default(),
    };

    if let Some(parent) = &args.parent_dataset {
        config.parent_dataset = parent.clone();
    }
    if let Some(dir) = &args.target_config_dir {
        config.target_config_dir = dir.clone();
    }
    if let Some(options) = &args.share_options {
        config.default_share_options = options.clone();
    }
    if let Some(hostname) = &args.server_hostname {
        config.server_hostname = Some(hostname.clone());
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn", "tower_http=info", "axum=info"] {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("ignoring log directive {}: {}", directive, e),
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str, provisioner: Arc<Provisioner>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let provisioner = provisioner.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let provisioner = provisioner.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" => {
                            let ready =
                                tokio::task::spawn_blocking(move || provisioner.check_engine())
                                    .await;
                            match ready {
                                Ok(Ok(())) => text_response(StatusCode::OK, "ok"),
                                Ok(Err(e)) => {
                                    warn!("Readiness check failed: {}", e);
                                    text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready")
                                }
                                Err(e) => {
                                    warn!("Readiness check panicked: {}", e);
                                    text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready")
                                }
                            }
                        }
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid health server address: {}", e)))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    // Gathering runs the volume collector, which shells out
                    let gathered = tokio::task::spawn_blocking(|| {
                        let encoder = TextEncoder::new();
                        let mut buffer = Vec::new();
                        encoder
                            .encode(&prometheus::gather(), &mut buffer)
                            .map(|()| (buffer, encoder.format_type().to_string()))
                    })
                    .await;

                    match gathered {
                        Ok(Ok((buffer, content_type))) => {
                            let mut response = Response::new(Body::from(buffer));
                            if let Ok(value) = content_type.parse() {
                                response
                                    .headers_mut()
                                    .insert(hyper::header::CONTENT_TYPE, value);
                            }
                            response
                        }
                        Ok(Err(e)) => {
                            error!("Failed to encode metrics: {}", e);
                            text_response(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
                        }
                        Err(e) => {
                            error!("Metrics gathering panicked: {}", e);
                            text_response(StatusCode::INTERNAL_SERVER_ERROR, "gathering failed")
                        }
                    }
                }
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
