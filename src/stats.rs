use std::fmt;

use serde::Serialize;

use crate::prober::ProbeOutcome;

/// Round-trip figures over the probes that got a reply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RttSummary {
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub total_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatistics {
    pub transmitted: usize,
    pub received: usize,
    pub loss_pct: f64,
    /// Absent when every probe was lost
    pub rtt: Option<RttSummary>,
}

impl RunStatistics {
    pub fn aggregate(outcomes: &[ProbeOutcome]) -> Self {
        let transmitted = outcomes.len();
        let rtts: Vec<f64> = outcomes.iter().filter_map(|o| o.rtt_ms).collect();
        let received = outcomes.iter().filter(|o| !o.is_lost()).count();

        let loss_pct = if transmitted == 0 {
            0.0
        } else {
            100.0 * (transmitted - received) as f64 / transmitted as f64
        };

        let rtt = if rtts.is_empty() {
            None
        } else {
            let total_ms: f64 = rtts.iter().sum();
            Some(RttSummary {
                min_ms: rtts.iter().copied().fold(f64::INFINITY, f64::min),
                max_ms: rtts.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                avg_ms: total_ms / received as f64,
                total_ms,
            })
        };

        Self {
            transmitted,
            received,
            loss_pct,
            rtt,
        }
    }

    pub fn all_lost(&self) -> bool {
        self.received == 0
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} packets transmitted, {} received, {:.2}% packet loss",
            self.transmitted, self.received, self.loss_pct
        )?;
        match &self.rtt {
            Some(rtt) => {
                writeln!(f, "Total RTT = {:.2} ms", rtt.total_ms)?;
                writeln!(f, "Average RTT = {:.2} ms", rtt.avg_ms)?;
                writeln!(f, "Minimum RTT = {:.2} ms", rtt.min_ms)?;
                write!(f, "Maximum RTT = {:.2} ms", rtt.max_ms)
            }
            None => write!(f, "All probes were lost"),
        }
    }
}
