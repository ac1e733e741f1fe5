use super::{Plugin, Sink};
use crate::counter::{CounterTable, write_report};
use crate::dns::{Direction, DnsPacket, extract_key};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{debug, info};
use std::io::{self, Write};

/// Counts the DNS flags word per collection interval and dumps the histogram
/// to the diagnostic sink when the interval closes.
///
/// Every DNS message feeds the request table unless response tracking is
/// enabled, in which case messages with the QR bit set go to the response
/// table instead and both tables are reported on close.
pub struct FrootMonitor {
    requests: CounterTable,
    responses: CounterTable,
    track_responses: bool,
    sink: Sink,
    interval_start: Option<DateTime<Local>>,
}

impl FrootMonitor {
    pub fn new(track_responses: bool) -> Self {
        Self {
            requests: CounterTable::new(),
            responses: CounterTable::new(),
            track_responses,
            sink: Box::new(io::stderr()),
            interval_start: None,
        }
    }

    pub fn observe(&mut self, key: u64) {
        self.requests.increment(key);
    }

    pub fn observe_response(&mut self, key: u64) {
        self.responses.increment(key);
    }

    /// Report and reset the tables for the interval that just ended.
    ///
    /// Both tables are emptied even when writing the report fails; the first
    /// write error is returned.
    pub fn on_interval_close(&mut self) -> io::Result<()> {
        let mut result = report_and_clear("request", &mut self.requests, &mut self.sink);
        if self.track_responses {
            let responses = report_and_clear("response", &mut self.responses, &mut self.sink);
            result = result.and(responses);
        }
        result
    }

    pub fn requests(&self) -> &CounterTable {
        &self.requests
    }

    pub fn responses(&self) -> &CounterTable {
        &self.responses
    }
}

fn report_and_clear(label: &str, table: &mut CounterTable, sink: &mut Sink) -> io::Result<()> {
    let written = write_report(table, sink);
    debug!(
        "{label} table: {} keys, {} observations",
        table.len(),
        table.total()
    );
    table.clear();
    written.map(|_| ())
}

impl Plugin for FrootMonitor {
    fn name(&self) -> &'static str {
        "frootmon"
    }

    fn start(&mut self, sink: Sink) -> Result<()> {
        self.sink = sink;
        info!(
            "{} started (response tracking {})",
            self.name(),
            if self.track_responses { "on" } else { "off" }
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.sink.flush().context("Failed to flush report sink")?;
        info!("{} stopped", self.name());
        Ok(())
    }

    fn open(&mut self, ts: DateTime<Local>) -> Result<()> {
        debug!("Interval opened at {ts}");
        self.interval_start = Some(ts);
        Ok(())
    }

    fn close(&mut self, ts: DateTime<Local>) -> Result<()> {
        let keys = self.requests.len();
        match self.interval_start.take() {
            Some(start) => info!("Interval {start} - {ts}: {keys} distinct keys"),
            None => info!("Interval closed at {ts}: {keys} distinct keys"),
        }
        self.on_interval_close()
            .context("Failed to write interval report")
    }

    fn output(&mut self, packet: &DnsPacket) {
        if !packet.is_dns() {
            return;
        }

        let Some(key) = extract_key(&packet.payload) else {
            debug!(
                "Skipping short DNS payload ({} bytes, proto {}) {}:{} -> {}:{}",
                packet.payload.len(),
                packet.protocol,
                packet.src,
                packet.src_port,
                packet.dst,
                packet.dst_port
            );
            return;
        };

        if self.track_responses && Direction::of(&packet.payload) == Some(Direction::Response) {
            self.observe_response(key);
        } else {
            self.observe(key);
        }
    }
}
