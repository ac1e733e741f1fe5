use super::OutputFlags;
use bytes::Bytes;
use chrono::{DateTime, Local};
use std::net::IpAddr;

/// A captured packet handed from the capture loop to the plugin host.
///
/// `payload` starts at the transport payload: for UDP the DNS message itself,
/// for TCP the message with its 2-byte length prefix already stripped.
#[derive(Clone, Debug)]
pub struct DnsPacket {
    pub flags: OutputFlags,
    pub protocol: u8,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub timestamp: DateTime<Local>,
    pub payload: Bytes,
}

impl DnsPacket {
    pub fn is_dns(&self) -> bool {
        self.flags.contains(OutputFlags::IS_DNS)
    }
}
