use std::net::Ipv4Addr;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::{ProbeOutcome, ProbeSettings, ProbeState};
use crate::error::ProbeError;
use crate::packet::{decode, encode_echo_request, ip_header_len, IcmpMessage};
use crate::scheduler::Scheduler;
use crate::timestamp::epoch_millis;
use crate::transport::Transport;
use crate::util::resolve_host_to_ipv4;

/// Identifier for one run: the process id mixed with per-run salt so two
/// runs in the same process do not share it.
pub fn derive_identifier(process_id: u32, salt: u16) -> u16 {
    (process_id as u16) ^ salt
}

/// A decoded message answers `(identifier, sequence)` only on an exact match.
pub fn is_reply_to(msg: &IcmpMessage, identifier: u16, sequence: u16) -> bool {
    msg.is_echo_reply() && msg.identifier == identifier && msg.sequence == sequence
}

/// One measurement run against one destination, one probe in flight at a time.
pub struct Prober<T> {
    transport: T,
    identifier: u16,
    settings: ProbeSettings,
    state: ProbeState,
    cut_short: bool,
}

impl<T: Transport> Prober<T> {
    pub fn new(transport: T, settings: ProbeSettings) -> Self {
        let identifier = derive_identifier(std::process::id(), rand::random());
        Self::with_identifier(transport, settings, identifier)
    }

    pub fn with_identifier(transport: T, settings: ProbeSettings, identifier: u16) -> Self {
        Self {
            transport,
            identifier,
            settings,
            state: ProbeState::Idle,
            cut_short: false,
        }
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// True when the last run stopped before sending all `count` probes.
    pub fn cut_short(&self) -> bool {
        self.cut_short
    }

    pub async fn resolve(&mut self, host: &str) -> Result<Ipv4Addr, ProbeError> {
        self.state = ProbeState::ResolvingHost;
        match resolve_host_to_ipv4(host).await {
            Ok(ip) => {
                info!("resolved {} to {}", host, ip);
                Ok(ip)
            }
            Err(e) => {
                self.state = ProbeState::Aborted;
                Err(e)
            }
        }
    }

    /// Send `count` probes, handing each outcome to `on_outcome` as it is recorded.
    ///
    /// Cancellation is honoured between probes only; a probe already sent is
    /// always allowed to match or time out first.
    pub async fn run<F>(
        &mut self,
        destination: Ipv4Addr,
        scheduler: &mut Scheduler,
        mut on_outcome: F,
    ) -> Vec<ProbeOutcome>
    where
        F: FnMut(&ProbeOutcome),
    {
        let mut outcomes = Vec::with_capacity(usize::from(self.settings.count));
        self.cut_short = false;

        for sequence in 1..=self.settings.count {
            if !scheduler.wait_turn(sequence).await {
                info!("run cancelled after {} probes", outcomes.len());
                self.cut_short = true;
                break;
            }
            let outcome = self.probe(destination, sequence).await;
            on_outcome(&outcome);
            outcomes.push(outcome);
        }

        self.state = ProbeState::Finished;
        outcomes
    }

    async fn probe(&mut self, destination: Ipv4Addr, sequence: u16) -> ProbeOutcome {
        self.state = ProbeState::Sending { sequence };
        let sent_at_ms = epoch_millis();
        let packet = encode_echo_request(self.identifier, sequence, sent_at_ms);
        debug!(
            "sending echo request id={} seq={} ({} bytes)",
            self.identifier,
            sequence,
            packet.len()
        );

        let sent_at = Instant::now();
        if let Err(e) = self.transport.send_to(&packet, destination).await {
            warn!("send to {} failed for seq {}: {}", destination, sequence, e);
            self.state = ProbeState::SendFailed { sequence };
            return ProbeOutcome::lost(sequence, sent_at_ms);
        }

        self.state = ProbeState::AwaitingReply { sequence };
        let deadline = sent_at + self.settings.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let buffer = match self.transport.recv_within(remaining).await {
                Ok(Some(buffer)) => buffer,
                Ok(None) => break,
                Err(e) => {
                    warn!("receive failed while waiting for seq {}: {}", sequence, e);
                    break;
                }
            };
            let received_at = Instant::now();

            if self.accepts(&buffer, sequence) {
                let rtt_ms = received_at.duration_since(sent_at).as_secs_f64() * 1000.0;
                self.state = ProbeState::Matched { sequence };
                return ProbeOutcome::replied(sequence, sent_at_ms, rtt_ms);
            }
        }

        self.state = ProbeState::TimedOut { sequence };
        ProbeOutcome::lost(sequence, sent_at_ms)
    }

    fn accepts(&self, buffer: &[u8], sequence: u16) -> bool {
        let msg = match decode(buffer, ip_header_len(buffer)) {
            Ok(msg) => msg,
            Err(e) => {
                trace!("ignoring {}", e);
                return false;
            }
        };
        trace!(
            "received type={} code={} id={} seq={}",
            msg.icmp_type, msg.code, msg.identifier, msg.sequence
        );

        if !is_reply_to(&msg, self.identifier, sequence) {
            return false;
        }
        if self.settings.verify_checksum && !msg.checksum_valid() {
            debug!("echo reply seq {} has a bad checksum", sequence);
            return false;
        }
        if let Some(sent_ms) = msg.timestamp_ms() {
            trace!("reply seq {} echoes send time {:.3} ms", sequence, sent_ms);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::watch;

    const ID: u16 = 0x4242;
    const DEST: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

    /// What one `recv_within` call sees. `packet: None` is silence for the whole budget.
    struct Arrival {
        delay: Duration,
        packet: Option<Vec<u8>>,
    }

    fn after(ms: u64, packet: Vec<u8>) -> Arrival {
        Arrival {
            delay: Duration::from_millis(ms),
            packet: Some(packet),
        }
    }

    fn silence() -> Arrival {
        Arrival {
            delay: Duration::ZERO,
            packet: None,
        }
    }

    #[derive(Default)]
    struct ScriptedTransport {
        arrivals: Mutex<VecDeque<Arrival>>,
        sent: Mutex<Vec<Vec<u8>>>,
        failing_sends: Vec<u16>,
    }

    impl ScriptedTransport {
        fn new(arrivals: Vec<Arrival>) -> Self {
            Self {
                arrivals: Mutex::new(arrivals.into()),
                ..Default::default()
            }
        }
    }

    impl Transport for ScriptedTransport {
        async fn send_to(&self, packet: &[u8], _destination: Ipv4Addr) -> io::Result<usize> {
            let sequence = u16::from_be_bytes([packet[6], packet[7]]);
            if self.failing_sends.contains(&sequence) {
                return Err(io::Error::new(io::ErrorKind::Other, "network unreachable"));
            }
            self.sent.lock().unwrap().push(packet.to_vec());
            Ok(packet.len())
        }

        async fn recv_within(&self, budget: Duration) -> io::Result<Option<Vec<u8>>> {
            let next = self.arrivals.lock().unwrap().pop_front();
            match next {
                None | Some(Arrival { packet: None, .. }) => {
                    tokio::time::sleep(budget).await;
                    Ok(None)
                }
                Some(Arrival {
                    delay,
                    packet: Some(packet),
                }) if delay > budget => {
                    tokio::time::sleep(budget).await;
                    self.arrivals.lock().unwrap().push_front(Arrival {
                        delay: delay - budget,
                        packet: Some(packet),
                    });
                    Ok(None)
                }
                Some(Arrival { delay, packet }) => {
                    tokio::time::sleep(delay).await;
                    Ok(packet)
                }
            }
        }
    }

    fn with_ip_header(icmp: Vec<u8>) -> Vec<u8> {
        let mut buffer = vec![0u8; 20];
        buffer[0] = 0x45;
        buffer[9] = 1;
        buffer.extend(icmp);
        buffer
    }

    fn message(icmp_type: u8, identifier: u16, sequence: u16) -> IcmpMessage {
        IcmpMessage {
            icmp_type,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
            payload: 1_000.0f64.to_be_bytes().to_vec(),
        }
    }

    fn reply(identifier: u16, sequence: u16) -> Vec<u8> {
        with_ip_header(message(ICMP_ECHO_REPLY, identifier, sequence).to_bytes())
    }

    fn settings(count: u16) -> ProbeSettings {
        ProbeSettings {
            count,
            ..ProbeSettings::default()
        }
    }

    async fn run(transport: ScriptedTransport, count: u16) -> (Prober<ScriptedTransport>, Vec<ProbeOutcome>) {
        let (_tx, rx) = watch::channel(false);
        let mut scheduler = Scheduler::new(Duration::from_secs(1), rx);
        let mut prober = Prober::with_identifier(transport, settings(count), ID);
        let outcomes = prober.run(DEST, &mut scheduler, |_| {}).await;
        (prober, outcomes)
    }

    fn assert_rtt(outcome: &ProbeOutcome, expected_ms: f64) {
        let rtt = outcome.rtt_ms.expect("probe should have a reply");
        assert!((rtt - expected_ms).abs() < 1.5, "rtt {} != {}", rtt, expected_ms);
    }

    #[test]
    fn matching_is_exact() {
        assert!(is_reply_to(&message(ICMP_ECHO_REPLY, 7, 3), 7, 3));
        assert!(!is_reply_to(&message(ICMP_ECHO_REPLY, 8, 3), 7, 3));
        assert!(!is_reply_to(&message(ICMP_ECHO_REPLY, 7, 4), 7, 3));
        assert!(!is_reply_to(&message(ICMP_ECHO_REQUEST, 7, 3), 7, 3));
    }

    #[test]
    fn identifier_depends_on_salt() {
        assert_ne!(derive_identifier(4321, 1), derive_identifier(4321, 2));
        assert_eq!(derive_identifier(0x1_0005, 0), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn replies_are_timed_per_probe() {
        let transport = ScriptedTransport::new(vec![after(10, reply(ID, 1)), after(25, reply(ID, 2))]);
        let (prober, outcomes) = run(transport, 2).await;

        assert_eq!(outcomes.len(), 2);
        assert_rtt(&outcomes[0], 10.0);
        assert_rtt(&outcomes[1], 25.0);
        assert_eq!(prober.state(), ProbeState::Finished);

        let sent = prober.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let first = decode(&sent[0], 0).unwrap();
        assert_eq!(first.icmp_type, ICMP_ECHO_REQUEST);
        assert_eq!(first.identifier, ID);
        assert_eq!(first.sequence, 1);
        assert!(first.checksum_valid());
        assert!(first.timestamp_ms().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn strays_are_skipped() {
        let mut corrupted = reply(ID, 1);
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let transport = ScriptedTransport::new(vec![
            after(5, reply(ID + 1, 1)),
            after(5, reply(ID, 2)),
            after(5, with_ip_header(message(ICMP_ECHO_REQUEST, ID, 1).to_bytes())),
            after(5, vec![0x45, 0, 0, 0]),
            after(5, corrupted),
            after(5, reply(ID, 1)),
        ]);
        let (_, outcomes) = run(transport, 1).await;

        assert_rtt(&outcomes[0], 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_checksum_accepted_when_not_verifying() {
        let mut corrupted = reply(ID, 1);
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let (_tx, rx) = watch::channel(false);
        let mut scheduler = Scheduler::new(Duration::from_secs(1), rx);
        let settings = ProbeSettings {
            count: 1,
            verify_checksum: false,
            ..ProbeSettings::default()
        };
        let transport = ScriptedTransport::new(vec![after(5, corrupted)]);
        let mut prober = Prober::with_identifier(transport, settings, ID);
        let outcomes = prober.run(DEST, &mut scheduler, |_| {}).await;

        assert_rtt(&outcomes[0], 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn stray_burst_cannot_extend_deadline() {
        let transport = ScriptedTransport::new(vec![
            after(300, reply(ID + 1, 1)),
            after(300, reply(ID + 1, 1)),
            after(300, reply(ID + 1, 1)),
            after(300, reply(ID + 1, 1)),
        ]);
        let start = Instant::now();
        let (prober, outcomes) = run(transport, 1).await;

        assert!(outcomes[0].is_lost());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_millis(1_010));
        assert_eq!(prober.state(), ProbeState::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_does_not_resurrect_or_match_later() {
        let transport = ScriptedTransport::new(vec![
            after(10, reply(ID, 1)),
            after(20, reply(ID, 2)),
            // seq 3 answers after its 1s budget, then lands during seq 4's wait
            after(1_500, reply(ID, 3)),
            after(100, reply(ID, 4)),
        ]);
        let (_, outcomes) = run(transport, 4).await;

        assert_rtt(&outcomes[0], 10.0);
        assert_rtt(&outcomes[1], 20.0);
        assert!(outcomes[2].is_lost());
        // 500ms left of the stray plus 100ms for its own reply
        assert_rtt(&outcomes[3], 600.0);
    }

    #[tokio::test(start_paused = true)]
    async fn loss_accounting_over_ten_probes() {
        let arrivals = (1..=10u16)
            .map(|seq| match seq {
                2 | 5 | 7 => silence(),
                _ => after(u64::from(seq), reply(ID, seq)),
            })
            .collect();
        let (_, outcomes) = run(ScriptedTransport::new(arrivals), 10).await;
        let stats = crate::stats::RunStatistics::aggregate(&outcomes);

        assert_eq!(stats.transmitted, 10);
        assert_eq!(stats.received, 7);
        assert_eq!(stats.loss_pct, 30.0);
        let lost: Vec<u16> = outcomes.iter().filter(|o| o.is_lost()).map(|o| o.sequence).collect();
        assert_eq!(lost, vec![2, 5, 7]);

        let rtt = stats.rtt.unwrap();
        assert!((rtt.min_ms - 1.0).abs() < 1.5);
        assert!((rtt.max_ms - 10.0).abs() < 1.5);
        assert!((rtt.total_ms - 41.0).abs() < 7.0 * 1.5);
    }

    #[tokio::test(start_paused = true)]
    async fn all_lost() {
        let (_, outcomes) = run(ScriptedTransport::default(), 3).await;
        let stats = crate::stats::RunStatistics::aggregate(&outcomes);

        assert_eq!(stats.transmitted, 3);
        assert_eq!(stats.received, 0);
        assert!(stats.rtt.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_is_loss_without_waiting() {
        let transport = ScriptedTransport {
            failing_sends: vec![2],
            ..ScriptedTransport::new(vec![after(10, reply(ID, 1)), after(10, reply(ID, 3))])
        };
        let start = Instant::now();
        let (prober, outcomes) = run(transport, 3).await;

        assert_rtt(&outcomes[0], 10.0);
        assert!(outcomes[1].is_lost());
        assert_rtt(&outcomes[2], 10.0);
        assert_eq!(prober.transport.sent.lock().unwrap().len(), 2);
        // two intervals plus two 10ms replies, no timeout spent on seq 2
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2_020) && elapsed < Duration::from_millis(2_100));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_between_probes_keeps_completed() {
        let (tx, rx) = watch::channel(false);
        let mut scheduler = Scheduler::new(Duration::from_secs(1), rx);
        let transport = ScriptedTransport::new(vec![after(10, reply(ID, 1)), after(10, reply(ID, 2))]);
        let mut prober = Prober::with_identifier(transport, settings(5), ID);

        let outcomes = prober
            .run(DEST, &mut scheduler, |outcome| {
                if outcome.sequence == 2 {
                    let _ = tx.send(true);
                }
            })
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| !o.is_lost()));
        assert!(scheduler.is_cancelled());
        assert!(prober.cut_short());
        assert_eq!(prober.state(), ProbeState::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_last_probe_is_not_cut_short() {
        let (tx, rx) = watch::channel(false);
        let mut scheduler = Scheduler::new(Duration::from_secs(1), rx);
        let transport = ScriptedTransport::new(vec![after(10, reply(ID, 1)), after(10, reply(ID, 2))]);
        let mut prober = Prober::with_identifier(transport, settings(2), ID);

        let outcomes = prober
            .run(DEST, &mut scheduler, |outcome| {
                if outcome.sequence == 2 {
                    let _ = tx.send(true);
                }
            })
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(scheduler.is_cancelled());
        assert!(!prober.cut_short());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_is_not_a_timeout() {
        let transport = ScriptedTransport {
            failing_sends: vec![1],
            ..ScriptedTransport::default()
        };
        let mut prober = Prober::with_identifier(transport, settings(1), ID);

        let outcome = prober.probe(DEST, 1).await;
        assert!(outcome.is_lost());
        assert_eq!(prober.state(), ProbeState::SendFailed { sequence: 1 });

        let mut silent = Prober::with_identifier(ScriptedTransport::default(), settings(1), ID);
        let outcome = silent.probe(DEST, 1).await;
        assert!(outcome.is_lost());
        assert_eq!(silent.state(), ProbeState::TimedOut { sequence: 1 });
    }
}
