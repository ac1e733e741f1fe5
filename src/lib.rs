//! Per-interval frequency monitor for the DNS header flags word.
//!
//! Packets come from libpcap ([`pcap`]), are classified and handed to a
//! [`plugin::Plugin`] by the [`dns::Collector`], and the [`plugin::FrootMonitor`]
//! keeps one [`counter::CounterTable`] per tracked direction, dumped to stderr
//! whenever a collection interval closes.

pub mod counter;
pub mod dns;
pub mod pcap;
pub mod plugin;
