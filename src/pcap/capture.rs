use crate::dns::{DNS_HEADER_LEN, DnsPacket, OutputFlags};
use anyhow::{Context, Result, bail};
use bytes::Bytes;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use pcap::{Activated, Capture, Device, Error};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DNS_PORT: u16 = 53;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const IPPROTO_FRAGMENT: u8 = 44;

// libpcap DLT_* values
const LINKTYPE_NULL: i32 = 0;
const LINKTYPE_ETHERNET: i32 = 1;
const LINKTYPE_RAW_BSD: i32 = 12;
const LINKTYPE_RAW_OPENBSD: i32 = 14;
const LINKTYPE_RAW: i32 = 101;
const LINKTYPE_LOOP: i32 = 108;
const LINKTYPE_LINUX_SLL: i32 = 113;

/// Where packets come from.
#[derive(Debug, Clone)]
pub enum CaptureSource {
    Interface(String),
    File(PathBuf),
}

pub struct CaptureLoader;

impl CaptureLoader {
    pub fn list_interfaces() -> Result<Vec<Device>> {
        Ok(Device::list()?)
    }

    pub fn select_default_interface() -> Result<String> {
        let devices = Device::list()?;

        for device in &devices {
            if device.name == "any" {
                continue;
            }
            if !device.flags.is_loopback() && device.flags.is_up() && device.flags.is_running() {
                return Ok(device.name.clone());
            }
        }

        for device in &devices {
            if device.name != "any" && device.flags.is_up() {
                return Ok(device.name.clone());
            }
        }

        bail!("No suitable network interface found")
    }

    pub fn load(
        source: &CaptureSource,
        filter: &str,
    ) -> Result<(JoinHandle<()>, mpsc::Receiver<DnsPacket>, CancellationToken)> {
        let mut cap: Capture<dyn Activated> = match source {
            CaptureSource::Interface(interface) => {
                info!("Opening capture on interface: {interface}");
                let device = if interface == "any" {
                    Device::from("any")
                } else {
                    Device::list()?
                        .into_iter()
                        .find(|d| d.name == *interface)
                        .context(format!("Interface {interface} not found"))?
                };

                Capture::from_device(device)?
                    .immediate_mode(true)
                    .timeout(100)
                    .open()
                    .context(format!("Failed to open interface {interface}"))?
                    .into()
            }
            CaptureSource::File(path) => {
                info!("Reading packets from {}", path.display());
                Capture::from_file(path)
                    .context(format!("Failed to open capture file {}", path.display()))?
                    .into()
            }
        };

        cap.filter(filter, true)
            .context(format!("Invalid capture filter: {filter}"))?;

        let linktype = cap.get_datalink().0;
        if !is_supported_linktype(linktype) {
            bail!("Unsupported link type {linktype}");
        }

        info!("Capture started (filter: {filter}, link type {linktype})");

        let (tx, rx) = mpsc::channel(10000);
        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        let should_stop = Arc::new(AtomicBool::new(false));
        let should_stop_clone = should_stop.clone();

        let handle = tokio::task::spawn_blocking(move || {
            while !should_stop_clone.load(Ordering::Relaxed) {
                match cap.next_packet() {
                    Ok(packet) => {
                        if should_stop_clone.load(Ordering::Relaxed) {
                            break;
                        }

                        let timestamp = packet_time(
                            packet.header.ts.tv_sec as i64,
                            packet.header.ts.tv_usec as i64,
                        );
                        if let Some(event) = decode_frame(linktype, packet.data, timestamp)
                            && tx.blocking_send(event).is_err()
                        {
                            info!("Channel closed, stopping capture");
                            break;
                        }
                    }
                    Err(Error::TimeoutExpired) => {
                        continue;
                    }
                    Err(Error::NoMorePackets) => {
                        info!("End of capture file");
                        break;
                    }
                    Err(e) => {
                        warn!("Error reading packet: {e}");
                        continue;
                    }
                }
            }
            info!("Packet capture task terminated");
        });

        let stop_handle = should_stop.clone();
        tokio::spawn(async move {
            token_clone.cancelled().await;
            stop_handle.store(true, Ordering::Relaxed);
        });

        Ok((handle, rx, cancel_token))
    }
}

fn is_supported_linktype(linktype: i32) -> bool {
    matches!(
        linktype,
        LINKTYPE_NULL
            | LINKTYPE_ETHERNET
            | LINKTYPE_RAW_BSD
            | LINKTYPE_RAW_OPENBSD
            | LINKTYPE_RAW
            | LINKTYPE_LOOP
            | LINKTYPE_LINUX_SLL
    )
}

fn packet_time(sec: i64, usec: i64) -> DateTime<Local> {
    let nanos = u32::try_from(usec.clamp(0, 999_999)).unwrap_or(0) * 1000;
    DateTime::from_timestamp(sec, nanos)
        .map(DateTime::<Local>::from)
        .unwrap_or_else(Local::now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Network {
    V4,
    V6,
}

/// Network layer header fields needed to reach the transport payload.
struct IpLayer<'a> {
    src: IpAddr,
    dst: IpAddr,
    protocol: u8,
    fragment: bool,
    payload: &'a [u8],
}

/// Decode a captured frame down to its transport payload.
///
/// Frames that are not UDP or TCP over IPv4/IPv6, or that are truncated,
/// yield `None`. The returned packet carries `IS_DNS` when either port is 53
/// and the payload can hold a DNS header, and `IS_FRAG` when the IP datagram
/// is a fragment (fragments are not reassembled and never carry `IS_DNS`).
pub(crate) fn decode_frame(
    linktype: i32,
    data: &[u8],
    timestamp: DateTime<Local>,
) -> Option<DnsPacket> {
    let (network, offset) = parse_link(linktype, data)?;
    let ip = match network {
        Network::V4 => parse_ipv4(&data[offset..])?,
        Network::V6 => parse_ipv6(&data[offset..])?,
    };

    if ip.fragment {
        if ip.protocol != IPPROTO_UDP && ip.protocol != IPPROTO_TCP {
            return None;
        }
        return Some(DnsPacket {
            flags: OutputFlags::IS_FRAG,
            protocol: ip.protocol,
            src: ip.src,
            dst: ip.dst,
            src_port: 0,
            dst_port: 0,
            timestamp,
            payload: Bytes::copy_from_slice(ip.payload),
        });
    }

    let (src_port, dst_port, payload) = match ip.protocol {
        IPPROTO_UDP => parse_udp(ip.payload)?,
        IPPROTO_TCP => parse_tcp(ip.payload)?,
        _ => return None,
    };

    let mut flags = OutputFlags::empty();
    if (src_port == DNS_PORT || dst_port == DNS_PORT) && payload.len() >= DNS_HEADER_LEN {
        flags = flags | OutputFlags::IS_DNS;
    } else {
        debug!("Non-DNS payload {src_port} -> {dst_port} ({} bytes)", payload.len());
    }

    Some(DnsPacket {
        flags,
        protocol: ip.protocol,
        src: ip.src,
        dst: ip.dst,
        src_port,
        dst_port,
        timestamp,
        payload: Bytes::copy_from_slice(payload),
    })
}

/// Strip the link layer header.
///
/// - Ethernet (RFC 894): 14 bytes, EtherType at bytes 12-13, 802.1Q/802.1ad
///   tags (4 bytes each) skipped
/// - Linux cooked capture (`any` device): 16 bytes, protocol at bytes 14-15
/// - BSD loopback (NULL/LOOP): 4-byte address family, host or network order
/// - Raw IP: no header, version taken from the first nibble
///
/// Returns: (network protocol, offset of the IP header)
fn parse_link(linktype: i32, data: &[u8]) -> Option<(Network, usize)> {
    match linktype {
        LINKTYPE_ETHERNET => {
            if data.len() < 14 {
                return None;
            }
            let mut eth_type = u16::from_be_bytes([data[12], data[13]]);
            let mut offset = 14;
            while eth_type == 0x8100 || eth_type == 0x88A8 {
                if data.len() < offset + 4 {
                    return None;
                }
                eth_type = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
                offset += 4;
            }
            Some((ethertype_network(eth_type)?, offset))
        }
        LINKTYPE_LINUX_SLL => {
            if data.len() < 16 {
                return None;
            }
            let protocol = u16::from_be_bytes([data[14], data[15]]);
            Some((ethertype_network(protocol)?, 16))
        }
        LINKTYPE_NULL | LINKTYPE_LOOP => {
            if data.len() < 4 {
                return None;
            }
            // Little-endian hosts put the family in byte 0, big-endian in byte 3
            let family = if data[0] != 0 { data[0] } else { data[3] };
            let network = match family {
                2 => Network::V4,
                24 | 28 | 30 => Network::V6,
                _ => return None,
            };
            Some((network, 4))
        }
        LINKTYPE_RAW | LINKTYPE_RAW_BSD | LINKTYPE_RAW_OPENBSD => {
            let network = match data.first()? >> 4 {
                4 => Network::V4,
                6 => Network::V6,
                _ => return None,
            };
            Some((network, 0))
        }
        _ => None,
    }
}

fn ethertype_network(eth_type: u16) -> Option<Network> {
    match eth_type {
        0x0800 => Some(Network::V4),
        0x86DD => Some(Network::V6),
        _ => None,
    }
}

/// Parse IPv4 header (RFC 791)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Version|  IHL  |Type of Service|          Total Length         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Identification        |Flags|      Fragment Offset    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Time to Live |    Protocol   |         Header Checksum       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Source Address                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Destination Address                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// A datagram is a fragment when More Fragments (0x2000) is set or the
/// fragment offset (low 13 bits) is non-zero.
fn parse_ipv4(data: &[u8]) -> Option<IpLayer<'_>> {
    if data.len() < 20 || data[0] >> 4 != 4 {
        return None;
    }

    // IHL counts 32-bit words
    let ihl = (data[0] & 0x0F) as usize * 4;
    if ihl < 20 || data.len() < ihl {
        return None;
    }

    // Total Length bounds the datagram; anything past it is link padding
    let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let end = total_len.clamp(ihl, data.len());

    let frag = u16::from_be_bytes([data[6], data[7]]);

    Some(IpLayer {
        src: IpAddr::V4(Ipv4Addr::new(data[12], data[13], data[14], data[15])),
        dst: IpAddr::V4(Ipv4Addr::new(data[16], data[17], data[18], data[19])),
        protocol: data[9],
        fragment: frag & 0x3FFF != 0,
        payload: &data[ihl..end],
    })
}

/// Parse IPv6 header (RFC 8200)
///
/// ```text
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Version| Traffic Class |           Flow Label                  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Payload Length        |  Next Header  |   Hop Limit   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                   Source Address (16 bytes)                   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                Destination Address (16 bytes)                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Only a directly following Fragment header (next header 44) is walked;
/// other extension headers leave the packet undecoded.
fn parse_ipv6(data: &[u8]) -> Option<IpLayer<'_>> {
    if data.len() < 40 || data[0] >> 4 != 6 {
        return None;
    }

    let payload_len = u16::from_be_bytes([data[4], data[5]]) as usize;
    let end = (40 + payload_len).min(data.len());

    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&data[8..24]);
    dst.copy_from_slice(&data[24..40]);

    let (protocol, fragment, start) = if data[6] == IPPROTO_FRAGMENT {
        if end < 48 {
            return None;
        }
        (data[40], true, 48)
    } else {
        (data[6], false, 40)
    };

    Some(IpLayer {
        src: IpAddr::V6(Ipv6Addr::from(src)),
        dst: IpAddr::V6(Ipv6Addr::from(dst)),
        protocol,
        fragment,
        payload: &data[start..end],
    })
}

/// Parse UDP header (RFC 768): ports, then payload bounded by the UDP length.
fn parse_udp(data: &[u8]) -> Option<(u16, u16, &[u8])> {
    if data.len() < 8 {
        return None;
    }

    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    let udp_len = u16::from_be_bytes([data[4], data[5]]) as usize;
    let end = udp_len.clamp(8, data.len());

    Some((src_port, dst_port, &data[8..end]))
}

/// Parse TCP header (RFC 9293) and strip the 2-byte DNS length prefix
/// (RFC 1035 Section 4.2.2).
///
/// Segments without payload (handshake, bare ACKs) yield `None`. Messages
/// split across segments are not reassembled; only the first segment's bytes
/// are delivered.
fn parse_tcp(data: &[u8]) -> Option<(u16, u16, &[u8])> {
    if data.len() < 20 {
        return None;
    }

    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    let data_offset = (data[12] >> 4) as usize * 4;
    if data_offset < 20 || data.len() < data_offset + 2 {
        return None;
    }

    let segment = &data[data_offset..];
    let msg_len = u16::from_be_bytes([segment[0], segment[1]]) as usize;
    let end = (2 + msg_len).min(segment.len());

    Some((src_port, dst_port, &segment[2..end]))
}
