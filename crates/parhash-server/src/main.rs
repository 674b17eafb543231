#![doc = include_str!("../README.md")]

use clap::Parser;
use futures::Stream;
use parhash_core::proto::{
    FILE_DESCRIPTOR_SET, parhash::parallel_hash_svc_server::ParallelHashSvcServer,
};
use parhash_server::server::{
    backend::BackendRegistry,
    config::{CliArgs, ServerConfig},
    pool::BoundedExecutor,
    service::{Dispatcher, Lifecycle, ParHashService},
    telemetry::{TelemetryProviders, init_telemetry},
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    // Every backend must be reachable before the listener is opened.
    let registry = Arc::new(
        BackendRegistry::connect(&config.backend_addrs, config.connect_timeout).await?,
    );
    tracing::info!("Connected to {} backends", registry.len());

    let service = build_service(&config, Arc::clone(&registry), &providers)?;

    let res = if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;
            let uds_path = config.listen_addr.clone();
            let uds = UnixListener::bind(&uds_path)?;
            let incoming = UnixListenerStream::new(uds);
            log_startup_info(&uds_path, &config);
            let res = run_server_with_incoming(providers, service, incoming, &config).await;
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.listen_addr.clone();
        let tcp = TcpListener::bind(&tcp_path).await?;
        let incoming = TcpListenerStream::new(tcp);
        log_startup_info(&tcp_path, &config);
        run_server_with_incoming(providers, service, incoming, &config).await
    };

    // Last reference: closes every backend channel.
    drop(registry);
    tracing::info!("Backend connections closed");

    res
}

fn build_service(
    config: &ServerConfig,
    registry: Arc<BackendRegistry>,
    providers: &TelemetryProviders,
) -> anyhow::Result<ParHashService> {
    let shutdown_token = CancellationToken::new();
    let telemetry = providers.recorder(&registry);
    let executor = BoundedExecutor::new(config.concurrency, shutdown_token.clone())?;
    let dispatcher = Dispatcher::new(registry, executor, telemetry, config.max_buffers)?;

    Ok(ParHashService::new(
        Arc::new(dispatcher),
        Arc::new(Lifecycle::new(shutdown_token)),
    ))
}

async fn run_server_with_incoming<I, IO, IE>(
    providers: TelemetryProviders,
    service: ParHashService,
    incoming: I,
    config: &ServerConfig,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<ParallelHashSvcServer<ParHashService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let mut builder = Server::builder();
    if let Some(request_timeout) = config.request_timeout {
        builder = builder.timeout(request_timeout);
    }

    builder
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service.clone())
        .add_service(reflection)
        .add_service(build_parhash_service(service.clone()))
        .serve_with_incoming_shutdown(
            incoming,
            shutdown_signal(service, health_reporter, providers, config.clone()),
        )
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(addr: &str, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting parallel hash service on {} with full config: {:#?}",
            addr,
            config
        );
    } else {
        tracing::info!(
            "Starting parallel hash service on {} with {} backends and concurrency {}",
            addr,
            config.backend_addrs.len(),
            config.concurrency
        );
    }
}

fn build_parhash_service(service: ParHashService) -> ParallelHashSvcServer<ParHashService> {
    ParallelHashSvcServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

async fn shutdown_signal(
    service: ParHashService,
    health_reporter: HealthReporter,
    providers: TelemetryProviders,
    config: ServerConfig,
) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!(
        "Shutdown signal received, stopping in {:?} mode",
        config.shutdown_mode
    );

    // 1. Publish the status
    health_reporter
        .set_not_serving::<ParallelHashSvcServer<ParHashService>>()
        .await;

    // 2. Refuse new requests, then drain or abort in-flight ones
    service
        .shutdown(config.shutdown_mode, config.shutdown_timeout)
        .await;

    // 3. Flush telemetry
    providers.shutdown();
}
