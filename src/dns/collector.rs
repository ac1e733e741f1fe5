use crate::dns::DnsPacket;
use crate::plugin::Plugin;
use anyhow::Result;
use chrono::{DateTime, Local};
use log::{debug, info};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// How often an idle live capture checks whether its interval is over.
const IDLE_CHECK: Duration = Duration::from_secs(1);

/// When a collection interval ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntervalPolicy {
    /// Close once a packet is captured this long after the interval's first packet.
    pub period: Option<Duration>,
    /// Close after this many delivered packets.
    pub packets: Option<u64>,
    /// Also close on the wall clock when no packet arrives (live captures).
    pub wall_clock: bool,
}

impl IntervalPolicy {
    pub fn new(period_secs: u64, packets: u64) -> Self {
        Self {
            period: (period_secs > 0).then(|| Duration::from_secs(period_secs)),
            packets: (packets > 0).then_some(packets),
            wall_clock: false,
        }
    }

    pub fn with_wall_clock(mut self, wall_clock: bool) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.period.is_none() && self.packets.is_none()
    }
}

/// Interval currently open on the plugin.
struct OpenInterval {
    /// Capture time of the packet that opened it.
    start: DateTime<Local>,
    /// Capture time of the latest packet delivered into it.
    last: DateTime<Local>,
    /// Runtime clock at open, for idle checks.
    opened_at: Instant,
    packets: u64,
}

/// Feeds captured packets to a plugin one at a time and delivers interval
/// boundaries. The collector is the plugin's only owner while it runs.
///
/// Intervals follow packet capture time: an interval opens with the first
/// packet after the previous one closed, and closes when a packet's timestamp
/// reaches `start + period` or the packet limit is hit. Live captures also
/// close an idle interval once `period` has passed on the runtime clock.
pub struct Collector<P> {
    plugin: P,
    rx: mpsc::Receiver<DnsPacket>,
    policy: IntervalPolicy,
    cancel: CancellationToken,
    current: Option<OpenInterval>,
}

impl<P: Plugin> Collector<P> {
    pub fn new(
        plugin: P,
        rx: mpsc::Receiver<DnsPacket>,
        policy: IntervalPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            plugin,
            rx,
            policy,
            cancel,
            current: None,
        }
    }

    /// Run until the capture channel closes or the token is cancelled, then
    /// close the last interval and stop the plugin.
    ///
    /// The token is cancelled whenever this returns, errors included, so the
    /// capture loop feeding the channel always stops.
    pub async fn run(mut self) -> Result<P> {
        let _stop_capture = self.cancel.clone().drop_guard();

        let mut ticker = self
            .policy
            .period
            .filter(|_| self.policy.wall_clock)
            .map(|period| {
                let every = period.min(IDLE_CHECK);
                let mut ticker = interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });

        loop {
            tokio::select! {
                packet = self.rx.recv() => {
                    let Some(packet) = packet else {
                        info!("Capture finished, closing final interval");
                        break;
                    };
                    self.deliver(&packet)?;
                }
                _ = next_tick(&mut ticker) => {
                    self.close_if_idle()?;
                }
                _ = self.cancel.cancelled() => {
                    info!("Collector cancelled, closing final interval");
                    break;
                }
            }
        }

        if let Some(current) = self.current.take() {
            let end = if self.policy.wall_clock {
                Local::now()
            } else {
                current.last
            };
            self.plugin.close(end)?;
        }
        self.plugin.stop()?;
        Ok(self.plugin)
    }

    fn deliver(&mut self, packet: &DnsPacket) -> Result<()> {
        let ts = packet.timestamp;

        let expired = match (&self.current, self.policy.period) {
            (Some(current), Some(period)) => ts
                .signed_duration_since(current.start)
                .to_std()
                .is_ok_and(|age| age >= period),
            _ => false,
        };
        if expired {
            debug!("Interval period elapsed at packet time {ts}");
            self.current = None;
            self.plugin.close(ts)?;
        }

        if self.current.is_none() {
            self.plugin.open(ts)?;
        }
        let current = self.current.get_or_insert_with(|| OpenInterval {
            start: ts,
            last: ts,
            opened_at: Instant::now(),
            packets: 0,
        });

        current.last = current.last.max(ts);
        current.packets += 1;
        let packets = current.packets;
        self.plugin.output(packet);

        if self.policy.packets.is_some_and(|limit| packets >= limit) {
            debug!("Packet limit of {packets} reached");
            self.current = None;
            self.plugin.close(ts)?;
        }
        Ok(())
    }

    fn close_if_idle(&mut self) -> Result<()> {
        let idle = match (&self.current, self.policy.period) {
            (Some(current), Some(period)) => current.opened_at.elapsed() >= period,
            _ => false,
        };
        if !idle {
            return Ok(());
        }
        debug!("Interval open past its period without traffic, closing");
        self.current = None;
        self.plugin.close(Local::now())
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::FrootMonitor;
    use crate::plugin::test_support::{ClosedPipe, SharedBuffer, dns_packet, dns_packet_at};
    use chrono::TimeDelta;

    async fn collect_packets(
        policy: IntervalPolicy,
        packets: Vec<DnsPacket>,
    ) -> (FrootMonitor, String) {
        let buffer = SharedBuffer::default();
        let mut monitor = FrootMonitor::new(false);
        monitor.start(Box::new(buffer.clone())).unwrap();

        let (tx, rx) = mpsc::channel(packets.len().max(1));
        for packet in packets {
            tx.send(packet).await.unwrap();
        }
        drop(tx);

        let collector = Collector::new(monitor, rx, policy, CancellationToken::new());
        let monitor = collector.run().await.unwrap();
        (monitor, buffer.contents())
    }

    async fn collect(policy: IntervalPolicy, flags_words: &[u16]) -> (FrootMonitor, String) {
        let packets = flags_words.iter().map(|&word| dns_packet(word)).collect();
        collect_packets(policy, packets).await
    }

    /// Run a collector over a live-style feed: one packet, a pause on the
    /// runtime clock, another packet, all stamped with the same capture time.
    async fn collect_with_pause(policy: IntervalPolicy, pause: Duration) -> String {
        let buffer = SharedBuffer::default();
        let mut monitor = FrootMonitor::new(false);
        monitor.start(Box::new(buffer.clone())).unwrap();

        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(
            Collector::new(monitor, rx, policy, CancellationToken::new()).run(),
        );

        let captured = Local::now();
        tx.send(dns_packet_at(0x0001, captured)).await.unwrap();
        tokio::time::sleep(pause).await;
        tx.send(dns_packet_at(0x0001, captured)).await.unwrap();
        drop(tx);

        handle.await.unwrap().unwrap();
        buffer.contents()
    }

    #[test]
    fn policy_zero_disables_triggers() {
        assert_eq!(IntervalPolicy::new(0, 0), IntervalPolicy::default());
        assert!(IntervalPolicy::new(0, 0).with_wall_clock(true).is_unbounded());

        let policy = IntervalPolicy::new(60, 5);
        assert_eq!(policy.period, Some(Duration::from_secs(60)));
        assert_eq!(policy.packets, Some(5));
        assert!(!policy.wall_clock);
        assert!(!policy.is_unbounded());
    }

    #[tokio::test]
    async fn end_of_capture_closes_final_interval() {
        let (monitor, report) = collect(IntervalPolicy::default(), &[1, 2, 1, 1]).await;
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000001: 3, "));
        assert!(lines[1].starts_with("00000002: 1, "));
        assert!(monitor.requests().is_empty());
    }

    #[tokio::test]
    async fn empty_capture_reports_nothing() {
        let (monitor, report) = collect(IntervalPolicy::default(), &[]).await;
        assert!(report.is_empty());
        assert!(monitor.requests().is_empty());
    }

    #[tokio::test]
    async fn packet_limit_splits_intervals() {
        let policy = IntervalPolicy::new(0, 2);
        let (_, report) = collect(policy, &[7, 7, 5, 5, 3]).await;
        assert_eq!(report, "00000007: 2, 0\n00000005: 2, 0\n00000003: 1, 0\n");
    }

    #[tokio::test]
    async fn capture_time_an_hour_apart_splits_intervals() {
        let start = Local::now();
        let packets = vec![
            dns_packet_at(0x0001, start),
            dns_packet_at(0x0001, start + TimeDelta::seconds(3600)),
        ];
        let (_, report) = collect_packets(IntervalPolicy::new(60, 0), packets).await;
        assert_eq!(report, "00000001: 1, 0\n00000001: 1, 0\n");
    }

    #[tokio::test]
    async fn packets_within_period_share_interval() {
        let start = Local::now();
        let packets = vec![
            dns_packet_at(0x0001, start),
            dns_packet_at(0x0001, start + TimeDelta::seconds(30)),
            dns_packet_at(0x0002, start + TimeDelta::seconds(59)),
            dns_packet_at(0x0002, start + TimeDelta::seconds(60)),
        ];
        let (_, report) = collect_packets(IntervalPolicy::new(60, 0), packets).await;
        assert_eq!(report, "00000001: 2, 1\n00000002: 1, 0\n00000002: 1, 0\n");
    }

    #[tokio::test]
    async fn cancellation_stops_collector() {
        let buffer = SharedBuffer::default();
        let mut monitor = FrootMonitor::new(false);
        monitor.start(Box::new(buffer.clone())).unwrap();

        let (tx, rx) = mpsc::channel(4);
        tx.send(dns_packet(0x0120)).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            Collector::new(monitor, rx, IntervalPolicy::default(), cancel.clone()).run(),
        );
        tokio::task::yield_now().await;
        cancel.cancel();

        let monitor = handle.await.unwrap().unwrap();
        assert!(monitor.requests().is_empty());
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_live_interval_closes_on_runtime_clock() {
        let policy = IntervalPolicy::new(10, 0).with_wall_clock(true);
        let report = collect_with_pause(policy, Duration::from_secs(11)).await;
        assert_eq!(report, "00000001: 1, 0\n00000001: 1, 0\n");
    }

    #[tokio::test(start_paused = true)]
    async fn offline_interval_ignores_runtime_clock() {
        let policy = IntervalPolicy::new(10, 0);
        let report = collect_with_pause(policy, Duration::from_secs(11)).await;
        assert_eq!(report, "00000001: 2, 0\n");
    }

    #[tokio::test]
    async fn failed_report_cancels_capture() {
        let mut monitor = FrootMonitor::new(false);
        monitor.start(Box::new(ClosedPipe)).unwrap();

        let (tx, rx) = mpsc::channel(1);
        tx.send(dns_packet(0x0001)).await.unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        let result = Collector::new(monitor, rx, IntervalPolicy::default(), cancel.clone())
            .run()
            .await;

        assert!(result.is_err());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn finished_run_cancels_capture() {
        let cancel = CancellationToken::new();
        let (_, rx) = mpsc::channel(1);
        Collector::new(FrootMonitor::new(false), rx, IntervalPolicy::default(), cancel.clone())
            .run()
            .await
            .unwrap();
        assert!(cancel.is_cancelled());
    }
}
