mod collector;
mod event;
mod header;

pub use collector::{Collector, IntervalPolicy};
pub use event::DnsPacket;
pub use header::{DNS_HEADER_LEN, Direction, OutputFlags, extract_key};
