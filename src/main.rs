//! Instance Discovery
//!
//! Registry of live world instances, backed by RedisJSON documents and a
//! RediSearch index, served over an internal REST API.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

use instance_discovery::{
    ApiServer, ApiServerConfig, Error, InstanceRegistry, RedisStoreConfig, RegistryConfig, Result,
    SharedInstanceStore, StoreBackend, StoreFactory,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Instance Discovery - ephemeral world instance registry
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API bind address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9090")]
    metrics_addr: String,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Store backend (redis, memory)
    #[arg(long, env = "STORE", default_value = "redis")]
    store: String,

    /// Timeout for each store round trip in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "2000")]
    store_timeout_ms: u64,

    /// Search index name
    #[arg(long, env = "INDEX_NAME", default_value = "instanceIdx")]
    index_name: String,

    /// Maximum rows returned by one search
    #[arg(long, env = "SEARCH_LIMIT", default_value = "1000")]
    search_limit: usize,

    /// Capacity for registrations that do not specify one
    #[arg(long, env = "DEFAULT_CAPACITY", default_value = "10")]
    default_capacity: u32,

    /// Draws per short/secure name before giving up (0 disables the check)
    #[arg(long, env = "NAME_ATTEMPTS", default_value = "5")]
    name_attempts: u32,

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
    init_logging(&args)?;

    info!("Starting Instance Discovery");
    info!("  Version: {}", instance_discovery::VERSION);
    info!("  REST API: {}", args.listen_addr);
    info!("  Store: {}", args.store);

    let backend: StoreBackend = args.store.parse()?;
    let store_config = RedisStoreConfig {
        url: args.redis_url.clone(),
        index_name: args.index_name.clone(),
        timeout: Duration::from_millis(args.store_timeout_ms),
        search_limit: args.search_limit,
    };

    let store = StoreFactory::create(backend, store_config).await?;
    info!("Store '{}' ready", store.name());

    let registry = InstanceRegistry::new(
        RegistryConfig {
            default_capacity: args.default_capacity,
            name_attempts: args.name_attempts,
        },
        store.clone(),
    );

    registry
        .metrics()
        .register(prometheus::default_registry())
        .map_err(|e| Error::Internal(format!("Failed to register metrics: {}", e)))?;

    // Start health server
    let health_addr = parse_addr("health server", &args.health_addr)?;
    let health_store = store.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_store).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = parse_addr("metrics server", &args.metrics_addr)?;
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    let api_config = ApiServerConfig {
        listen_addr: parse_addr("REST API", &args.listen_addr)?,
    };

    let api_server = ApiServer::new(api_config, registry);

    let shutdown = api_server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            let _ = shutdown.send(());
        }
    });

    api_server.run().await?;

    info!("Shutdown complete");
    Ok(())
}

fn parse_addr(what: &str, addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} address '{}': {}", what, addr, e)))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directive = |d: &str| -> Result<Directive> {
        d.parse()
            .map_err(|e| Error::Configuration(format!("Invalid log directive '{}': {}", d, e)))
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("tower=warn")?)
        .add_directive(directive("axum=info")?);

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

    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: SocketAddr, store: SharedInstanceStore) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let store = store.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let store = store.clone();
                async move {
                    let (status, body) = match req.uri().path() {
                        "/healthz" | "/livez" => (StatusCode::OK, "ok"),
                        "/readyz" => match store.health_check().await {
                            Ok(true) => (StatusCode::OK, "ok"),
                            _ => (StatusCode::SERVICE_UNAVAILABLE, "store unavailable"),
                        },
                        _ => (StatusCode::NOT_FOUND, "not found"),
                    };
                    let mut response = Response::new(Body::from(body));
                    *response.status_mut() = status;
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

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

async fn run_metrics_server(addr: SocketAddr) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{header, Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let mut response = Response::new(Body::empty());
            match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => {
                            if let Ok(value) = header::HeaderValue::from_str(encoder.format_type()) {
                                response.headers_mut().insert(header::CONTENT_TYPE, value);
                            }
                            *response.body_mut() = Body::from(buffer);
                        }
                        Err(e) => {
                            error!("Failed to encode metrics: {}", e);
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        }
                    }
                }
                _ => {
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    *response.body_mut() = Body::from("not found");
                }
            }
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
