mod cli;
mod config;
mod error;
mod metrics;
mod packet;
mod prober;
mod scheduler;
mod stats;
mod timestamp;
mod transport;
mod util;

use clap::Parser;
use cli::Args;
use config::ProbeConfig;
use metrics::{observe_latency, inc_timeout, initialize_metrics};
use prober::{run_target, ProbeOutcome, RunReport};

use tokio::sync::watch;
use tracing::{info, error, warn};

fn record_outcome(target: &str, outcome: &ProbeOutcome) {
    match outcome.rtt_ms {
        Some(rtt) => {
            println!("{}: icmp_seq={} time={:.2} ms", target, outcome.sequence, rtt);
            observe_latency(target, rtt);
        }
        None => {
            println!("{}: icmp_seq={} timeout", target, outcome.sequence);
            inc_timeout(target);
        }
    }
}

fn print_summary(report: &RunReport) {
    println!();
    println!("--- {} ({}) ping statistics ---", report.target, report.destination);
    if report.cancelled {
        println!("(interrupted)");
    }
    println!("{}", report.statistics);
    if report.statistics.all_lost() {
        warn!("no replies from {} ({})", report.target, report.destination);
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ProbeConfig::load(&args)?;
    let log_level = config.get_tracing_level()?;

    // Init tracing with configured log level
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()
                         .add_directive(format!("icmp_probe={}", log_level.as_str().to_lowercase()).parse()?))
        .init();

    initialize_metrics(config.enable_latency_history)?;
    if let Some(addr) = config.metrics_addr {
        info!("serving metrics on {}", addr);
        tokio::spawn(metrics::serve_metrics(addr));
    }

    // Ctrl-C stops each run after its in-flight probe resolves
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after current probes");
            let _ = cancel_tx.send(true);
        }
    });

    let settings = config.probe_settings();
    let mut runs = Vec::with_capacity(config.targets.len());
    for target in config.targets.iter().cloned() {
        let cancel = cancel_rx.clone();
        runs.push(tokio::spawn(async move {
            let result = run_target(&target, settings, cancel, |outcome| {
                record_outcome(&target, outcome)
            })
            .await;
            (target, result)
        }));
    }

    let mut failed = Vec::new();
    for run in runs {
        let (target, result) = run.await?;
        match result {
            Ok(report) => {
                print_summary(&report);
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            Err(e) => {
                error!("{}: {}", target, e);
                failed.push(format!("{}: {}", target, e));
            }
        }
    }

    if !failed.is_empty() {
        return Err(anyhow::anyhow!(failed.join("; ")));
    }
    Ok(())
}
