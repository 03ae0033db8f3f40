use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sievedns::{Result, Server, ServerConfig};

#[derive(Parser)]
#[command(name = "sievedns")]
#[command(about = "Caching, blacklist-filtering DNS forwarder", long_about = None)]
struct Args {
    /// Local port to listen on
    #[arg(short, long, default_value = "53")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Upstream DNS server (ip or ip:port)
    #[arg(short, long, default_value = "8.8.8.8")]
    upstream: String,

    /// Blacklist file, one glob pattern per line
    #[arg(long, default_value = "blacklist.txt")]
    blacklist: PathBuf,

    /// Upstream reply timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Seconds between cache expiry sweeps
    #[arg(long, default_value = "10")]
    sweep_secs: u64,

    /// Seconds between stats reports (0 disables)
    #[arg(long, default_value = "60")]
    stats_secs: u64,

    /// Log every query (debug level) unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let stats_interval = (self.stats_secs > 0).then(|| Duration::from_secs(self.stats_secs));

        let config = ServerConfig::parse(&self.bind, self.port, &self.upstream)?
            .with_blacklist_file(self.blacklist)
            .with_forward_timeout(Duration::from_millis(self.timeout_ms))
            .with_sweep_interval(Duration::from_secs(self.sweep_secs))
            .with_stats_interval(stats_interval);
        config.validate()?;

        Ok(config)
    }
}

/// `RUST_LOG` wins when set and valid; otherwise `debug` or `info`.
fn log_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

fn init_logging(verbose: bool) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(verbose, rust_log.as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(config: ServerConfig) -> Result<()> {
    let server = Arc::new(Server::new(config)?);
    let shutdown = CancellationToken::new();

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        ctrl_c.cancel();
    });

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(server.clone(), shutdown.clone()));

    server.run(shutdown).await
}

/// Reload the blacklist whenever the process receives SIGHUP.
#[cfg(unix)]
async fn reload_on_hangup(server: Arc<Server>, shutdown: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot install SIGHUP handler, blacklist reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(()) = hangup.recv() => {
                if let Err(e) = server.reload_blacklist() {
                    error!(error = %e, "blacklist reload failed");
                }
            }
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "refusing to start");
            return ExitCode::FAILURE;
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "DNS server failed");
            ExitCode::FAILURE
        }
    }
}
