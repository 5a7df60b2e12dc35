use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::error::ProbeError;
use crate::scheduler::Scheduler;
use crate::stats::RunStatistics;
use crate::transport::IcmpSocket;

pub mod icmp;

pub use icmp::Prober;

/// Result of one sequence number. `rtt_ms == None` is a lost probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub sequence: u16,
    /// Wall-clock send time, epoch milliseconds
    pub sent_at_ms: f64,
    pub rtt_ms: Option<f64>,
}

impl ProbeOutcome {
    pub fn lost(sequence: u16, sent_at_ms: f64) -> Self {
        Self {
            sequence,
            sent_at_ms,
            rtt_ms: None,
        }
    }

    pub fn replied(sequence: u16, sent_at_ms: f64, rtt_ms: f64) -> Self {
        Self {
            sequence,
            sent_at_ms,
            rtt_ms: Some(rtt_ms),
        }
    }

    pub fn is_lost(&self) -> bool {
        self.rtt_ms.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    ResolvingHost,
    Sending { sequence: u16 },
    SendFailed { sequence: u16 },
    AwaitingReply { sequence: u16 },
    Matched { sequence: u16 },
    TimedOut { sequence: u16 },
    Finished,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSettings {
    pub count: u16,
    pub timeout: Duration,
    pub interval: Duration,
    pub verify_checksum: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            count: 10,
            timeout: Duration::from_secs(1),
            interval: Duration::from_secs(1),
            verify_checksum: true,
        }
    }
}

/// Everything a finished (or cancelled) run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub target: String,
    pub destination: Ipv4Addr,
    pub identifier: u16,
    pub cancelled: bool,
    pub outcomes: Vec<ProbeOutcome>,
    pub statistics: RunStatistics,
}

/// Probe one target end to end on its own socket.
///
/// Fatal conditions (socket creation, resolution) are returned before any
/// probe is sent. The socket is dropped on every return path.
pub async fn run_target<F>(
    target: &str,
    settings: ProbeSettings,
    cancel: watch::Receiver<bool>,
    on_outcome: F,
) -> Result<RunReport, ProbeError>
where
    F: FnMut(&ProbeOutcome),
{
    let socket = IcmpSocket::open()?;
    let mut prober = Prober::new(socket, settings);
    let destination = prober.resolve(target).await?;
    info!(
        "pinging {} ({}) with identifier {:#06x}",
        target,
        destination,
        prober.identifier()
    );

    let mut scheduler = Scheduler::new(settings.interval, cancel);
    let outcomes = prober.run(destination, &mut scheduler, on_outcome).await;
    let statistics = RunStatistics::aggregate(&outcomes);

    Ok(RunReport {
        target: target.to_string(),
        destination,
        identifier: prober.identifier(),
        cancelled: prober.cut_short(),
        outcomes,
        statistics,
    })
}
