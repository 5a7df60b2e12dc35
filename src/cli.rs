use clap::Parser;
use std::path::PathBuf;

/// Raw-socket ICMP echo prober with loss and round-trip statistics
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "icmp-probe")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Target hosts to probe (IPv4 address or hostname)
    pub targets: Vec<String>,

    /// Number of echo requests per target
    #[arg(short = 'c', long = "count")]
    pub count: Option<u16>,

    /// Per-probe reply timeout in seconds
    #[arg(short = 'W', long = "timeout")]
    pub timeout: Option<f64>,

    /// Interval between probes in seconds
    #[arg(short = 'i', long = "interval")]
    pub interval: Option<f64>,

    /// JSON config file (defaults to $TARGET_CONFIG when set)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Accept replies without checking their checksum
    #[arg(long = "no-verify-checksum")]
    pub no_verify_checksum: bool,

    /// Print each run report as JSON after the summary
    #[arg(long = "json")]
    pub json: bool,

    /// Serve Prometheus metrics on this address while probing
    #[arg(long = "metrics-addr")]
    pub metrics_addr: Option<std::net::SocketAddr>,
}
