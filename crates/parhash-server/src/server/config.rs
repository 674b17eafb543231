use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;

/// How in-flight requests are treated when the server is asked to stop.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Refuse new requests, wait up to `shutdown_timeout` for in-flight
    /// requests to finish, then cancel whatever is left.
    Drain,
    /// Refuse new requests and cancel in-flight requests immediately.
    Abort,
}

/// Runtime configuration for the `parhash-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first if present).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "parhash-server",
    version,
    about = "A gRPC service that fans hash requests out to a fleet of backends"
)]
pub struct CliArgs {
    /// Backend addresses (`host:port`), comma separated.
    ///
    /// Buffers are assigned to backends in round-robin order, in the order
    /// given here. Every backend must be reachable at startup.
    ///
    /// Environment variable: `BACKEND_ADDRS`
    #[arg(long, env = "BACKEND_ADDRS", value_delimiter = ',', required = true)]
    pub backend_addrs: Vec<String>,

    /// Maximum number of backend calls in flight across the whole server.
    ///
    /// Shared by all concurrent requests. Submitting a buffer waits while the
    /// limit is reached.
    ///
    /// Environment variable: `CONCURRENCY`
    #[arg(long, env = "CONCURRENCY", default_value_t = 16)]
    pub concurrency: usize,

    /// Maximum number of buffers accepted in a single request.
    ///
    /// Environment variable: `MAX_BUFFERS`
    #[arg(long, env = "MAX_BUFFERS", default_value_t = 1_000_000)]
    pub max_buffers: usize,

    /// Timeout for establishing each backend connection at startup, in
    /// milliseconds.
    ///
    /// Environment variable: `CONNECT_TIMEOUT_MS`
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value_t = 5_000)]
    pub connect_timeout_ms: u64,

    /// Server-side deadline for a whole request, in milliseconds. `0` disables
    /// it; client `grpc-timeout` headers are honoured either way.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_MS`
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 0)]
    pub request_timeout_ms: u64,

    /// What to do with in-flight requests on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_MODE`
    #[arg(long, env = "SHUTDOWN_MODE", value_enum, default_value_t = ShutdownMode::Drain)]
    pub shutdown_mode: ShutdownMode,

    /// Seconds to wait for in-flight requests in `drain` mode.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix
    /// socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/parhash.sock"
    ///
    /// Environment variable: `LISTEN_ADDR`
    #[arg(long, env = "LISTEN_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub listen_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `LISTEN_ADDR` must be a
    /// file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub backend_addrs: Vec<String>,
    pub concurrency: usize,
    pub max_buffers: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Option<Duration>,
    pub shutdown_mode: ShutdownMode,
    pub shutdown_timeout: Duration,
    pub listen_addr: String,
    pub uds: bool,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let backend_addrs: Vec<String> = args
            .backend_addrs
            .iter()
            .map(|addr| addr.trim().to_string())
            .collect();

        if backend_addrs.is_empty() {
            bail!("BACKEND_ADDRS must name at least one backend");
        }

        if backend_addrs.iter().any(String::is_empty) {
            bail!("BACKEND_ADDRS contains an empty address");
        }

        if args.concurrency == 0 {
            bail!("CONCURRENCY must be greater than 0");
        }

        if args.max_buffers == 0 {
            bail!("MAX_BUFFERS must be greater than 0");
        }

        let request_timeout =
            (args.request_timeout_ms > 0).then(|| Duration::from_millis(args.request_timeout_ms));

        Ok(Self {
            backend_addrs,
            concurrency: args.concurrency,
            max_buffers: args.max_buffers,
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            request_timeout,
            shutdown_mode: args.shutdown_mode,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            listen_addr: args.listen_addr,
            uds: args.uds,
        })
    }
}
