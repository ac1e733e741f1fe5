mod frootmon;

pub use frootmon::FrootMonitor;

#[cfg(test)]
pub(crate) mod test_support;

use crate::dns::DnsPacket;
use anyhow::Result;
use chrono::{DateTime, Local};
use std::io::Write;

/// Report sink handed to a plugin at start-up.
pub type Sink = Box<dyn Write + Send>;

/// Hooks a capture host invokes on a packet-inspection plugin.
///
/// Calls are serialized: the host never runs two hooks concurrently.
pub trait Plugin {
    fn name(&self) -> &'static str;

    /// Called once before any packet, with the diagnostic sink to keep.
    fn start(&mut self, sink: Sink) -> Result<()>;

    /// Called once when the host exits normally.
    fn stop(&mut self) -> Result<()>;

    /// Start of a collection interval.
    fn open(&mut self, ts: DateTime<Local>) -> Result<()>;

    /// End of a collection interval.
    fn close(&mut self, ts: DateTime<Local>) -> Result<()>;

    /// One captured packet.
    fn output(&mut self, packet: &DnsPacket);
}
