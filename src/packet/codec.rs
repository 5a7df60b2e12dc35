use std::fmt;

use super::checksum::{checksum, verify};

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;
/// type, code, checksum, identifier, sequence
pub const ICMP_HEADER_SIZE: usize = 8;
/// IPv4 header without options
pub const DEFAULT_IP_HEADER_SIZE: usize = 20;
pub const TIMESTAMP_SIZE: usize = 8;

/// Received buffer too short to hold an ICMP header after the IP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedPacket {
    pub len: usize,
    pub ip_header_len: usize,
}

impl fmt::Display for MalformedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed packet: {} bytes, need {} after a {}-byte IP header",
            self.len, ICMP_HEADER_SIZE, self.ip_header_len
        )
    }
}

impl std::error::Error for MalformedPacket {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpMessage {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl IcmpMessage {
    /// Encode with a freshly computed checksum; the `checksum` field is ignored.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(ICMP_HEADER_SIZE + self.payload.len());
        buffer.push(self.icmp_type);
        buffer.push(self.code);
        buffer.extend_from_slice(&[0, 0]);
        buffer.extend_from_slice(&self.identifier.to_be_bytes());
        buffer.extend_from_slice(&self.sequence.to_be_bytes());
        buffer.extend_from_slice(&self.payload);

        let sum = checksum(&buffer);
        buffer[2..4].copy_from_slice(&sum.to_be_bytes());
        buffer
    }

    pub fn is_echo_reply(&self) -> bool {
        self.icmp_type == ICMP_ECHO_REPLY && self.code == 0
    }

    /// Recompute the checksum over the message as received.
    pub fn checksum_valid(&self) -> bool {
        let mut buffer = Vec::with_capacity(ICMP_HEADER_SIZE + self.payload.len());
        buffer.push(self.icmp_type);
        buffer.push(self.code);
        buffer.extend_from_slice(&self.checksum.to_be_bytes());
        buffer.extend_from_slice(&self.identifier.to_be_bytes());
        buffer.extend_from_slice(&self.sequence.to_be_bytes());
        buffer.extend_from_slice(&self.payload);
        verify(&buffer)
    }

    /// Send timestamp carried in the first 8 payload bytes, if present.
    pub fn timestamp_ms(&self) -> Option<f64> {
        let bytes: [u8; TIMESTAMP_SIZE] = self.payload.get(..TIMESTAMP_SIZE)?.try_into().ok()?;
        Some(f64::from_be_bytes(bytes))
    }
}

/// Build a ready-to-send Echo Request carrying `timestamp_ms` as its payload.
pub fn encode_echo_request(identifier: u16, sequence: u16, timestamp_ms: f64) -> Vec<u8> {
    IcmpMessage {
        icmp_type: ICMP_ECHO_REQUEST,
        code: 0,
        checksum: 0,
        identifier,
        sequence,
        payload: timestamp_ms.to_be_bytes().to_vec(),
    }
    .to_bytes()
}

/// Length of the IPv4 header at the start of a raw receive buffer.
pub fn ip_header_len(buffer: &[u8]) -> usize {
    match buffer.first() {
        // IHL below 5 words cannot be a real IPv4 header
        Some(&first) if first >> 4 == 4 && first & 0x0F >= 5 => usize::from(first & 0x0F) * 4,
        _ => DEFAULT_IP_HEADER_SIZE,
    }
}

/// Parse the ICMP message that follows `ip_header_len` bytes of IP header.
pub fn decode(buffer: &[u8], ip_header_len: usize) -> Result<IcmpMessage, MalformedPacket> {
    let malformed = MalformedPacket {
        len: buffer.len(),
        ip_header_len,
    };
    let icmp = buffer.get(ip_header_len..).ok_or(malformed)?;
    if icmp.len() < ICMP_HEADER_SIZE {
        return Err(malformed);
    }

    Ok(IcmpMessage {
        icmp_type: icmp[0],
        code: icmp[1],
        checksum: u16::from_be_bytes([icmp[2], icmp[3]]),
        identifier: u16::from_be_bytes([icmp[4], icmp[5]]),
        sequence: u16::from_be_bytes([icmp[6], icmp[7]]),
        payload: icmp[ICMP_HEADER_SIZE..].to_vec(),
    })
}
