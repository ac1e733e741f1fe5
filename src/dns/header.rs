use std::ops::BitOr;

/// DNS header is 12 bytes (RFC 1035 Section 4.1.1)
pub const DNS_HEADER_LEN: usize = 12;

/// Offset of the 16-bit flags word (QR, Opcode, AA, TC, RD, RA, Z, RCODE)
const FLAGS_OFFSET: usize = 2;

/// QR bit: 0 = Query, 1 = Response
const QR_MASK: u8 = 0x80;

/// Classification bits attached to every packet delivered to a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputFlags(u8);

impl OutputFlags {
    /// Packet is an IP fragment that was not reassembled.
    pub const IS_FRAG: Self = Self(1 << 0);
    /// Payload is the start of a DNS message.
    pub const IS_DNS: Self = Self(1 << 1);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OutputFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    /// Classify a DNS message by its QR bit.
    pub fn of(payload: &[u8]) -> Option<Self> {
        let flags_hi = *payload.get(FLAGS_OFFSET)?;
        if flags_hi & QR_MASK != 0 {
            Some(Self::Response)
        } else {
            Some(Self::Request)
        }
    }
}

/// Read the DNS flags word (bytes 2-3, network order) widened to 64 bits.
///
/// Returns `None` when the payload is too short to hold the field.
pub fn extract_key(payload: &[u8]) -> Option<u64> {
    let field = payload.get(FLAGS_OFFSET..FLAGS_OFFSET + 2)?;
    Some(u64::from(u16::from_be_bytes([field[0], field[1]])))
}
