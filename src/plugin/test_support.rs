use crate::dns::{DnsPacket, OutputFlags};
use bytes::Bytes;
use chrono::{DateTime, Local};
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

/// Cloneable in-memory sink so tests can read what a plugin wrote.
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink whose reader has gone away.
pub(crate) struct ClosedPipe;

impl Write for ClosedPipe {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }
}

pub(crate) fn dns_packet(flags_word: u16) -> DnsPacket {
    dns_packet_at(flags_word, Local::now())
}

/// UDP query from 192.0.2.1 to 192.0.2.53 captured at `timestamp`.
pub(crate) fn dns_packet_at(flags_word: u16, timestamp: DateTime<Local>) -> DnsPacket {
    let mut payload = vec![0xbe, 0xef];
    payload.extend_from_slice(&flags_word.to_be_bytes());
    payload.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]);
    DnsPacket {
        flags: OutputFlags::IS_DNS,
        protocol: 17,
        src: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
        dst: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 53)),
        src_port: 40000,
        dst_port: 53,
        timestamp,
        payload: Bytes::from(payload),
    }
}
