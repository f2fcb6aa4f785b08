//! Fixed 24-byte header framing, flag/length packing, and checksum.
//!
//! ```text
//! offset  size  field
//!      0     4  sequence
//!      4     4  acknowledgement
//!      8     8  timestamp (monotonic nanoseconds, echoed by the ACK)
//!     16     4  length (29 bits) + flags (SYN, FIN, ACK)
//!     20     2  reserved, zero on the wire
//!     22     2  checksum
//!     24     L  payload
//! ```

pub const HEADER_LEN: usize = 24;

const FLAG_SYN: u32 = 1 << 2;
const FLAG_FIN: u32 = 1 << 1;
const FLAG_ACK: u32 = 1 << 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence: u32,
    pub acknowledgement: u32,
    pub timestamp: u64,
    pub syn: bool,
    pub fin: bool,
    pub ack: bool,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn data(sequence: u32, acknowledgement: u32, timestamp: u64, payload: Vec<u8>) -> Self {
        Packet {
            sequence,
            acknowledgement,
            timestamp,
            syn: false,
            fin: false,
            ack: true,
            payload,
        }
    }

    pub fn syn(sequence: u32, timestamp: u64) -> Self {
        Packet {
            sequence,
            acknowledgement: 0,
            timestamp,
            syn: true,
            fin: false,
            ack: false,
            payload: Vec::new(),
        }
    }

    pub fn syn_ack(sequence: u32, acknowledgement: u32, timestamp: u64) -> Self {
        Packet {
            sequence,
            acknowledgement,
            timestamp,
            syn: true,
            fin: false,
            ack: true,
            payload: Vec::new(),
        }
    }

    pub fn ack_only(sequence: u32, acknowledgement: u32, timestamp: u64) -> Self {
        Packet {
            sequence,
            acknowledgement,
            timestamp,
            syn: false,
            fin: false,
            ack: true,
            payload: Vec::new(),
        }
    }

    pub fn fin(sequence: u32, acknowledgement: u32, timestamp: u64) -> Self {
        Packet {
            sequence,
            acknowledgement,
            timestamp,
            syn: false,
            fin: true,
            ack: true,
            payload: Vec::new(),
        }
    }

    pub fn fin_ack(sequence: u32, acknowledgement: u32, timestamp: u64) -> Self {
        Packet {
            sequence,
            acknowledgement,
            timestamp,
            syn: false,
            fin: true,
            ack: true,
            payload: Vec::new(),
        }
    }

    fn flags(&self) -> u32 {
        (if self.syn { FLAG_SYN } else { 0 })
            | (if self.fin { FLAG_FIN } else { 0 })
            | (if self.ack { FLAG_ACK } else { 0 })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("datagram too short: {0} bytes")]
    Truncated(usize),
    #[error("declared payload length {declared} overruns datagram of {actual} bytes")]
    LengthOverrun { declared: u32, actual: usize },
    #[error("checksum mismatch: expected {expected:#06x}, got {got:#06x}")]
    ChecksumMismatch { expected: u16, got: u16 },
}

/// Allocates a buffer of `HEADER_LEN + payload.len()` bytes, writes the
/// header, zeroes the checksum field, then patches in the computed sum.
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_LEN + packet.payload.len()];

    buf[0..4].copy_from_slice(&packet.sequence.to_be_bytes());
    buf[4..8].copy_from_slice(&packet.acknowledgement.to_be_bytes());
    buf[8..16].copy_from_slice(&packet.timestamp.to_be_bytes());

    let length_and_flags = ((packet.payload.len() as u32) << 3) | packet.flags();
    buf[16..20].copy_from_slice(&length_and_flags.to_be_bytes());
    // reserved bytes at [20..22] stay zero
    buf[22..24].copy_from_slice(&0u16.to_be_bytes());

    buf[24..].copy_from_slice(&packet.payload);

    let sum = checksum(&buf);
    buf[22..24].copy_from_slice(&sum.to_be_bytes());

    buf
}

/// Parses a header, reads exactly `length` payload bytes, and verifies the
/// checksum against a copy of the buffer with the checksum field zeroed.
pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::Truncated(bytes.len()));
    }

    let sequence = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    let acknowledgement = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    let timestamp = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
    let length_and_flags = u32::from_be_bytes(bytes[16..20].try_into().unwrap());
    let transmitted_checksum = u16::from_be_bytes(bytes[22..24].try_into().unwrap());

    let length = length_and_flags >> 3;
    let flags = length_and_flags & 0b111;

    if HEADER_LEN + length as usize != bytes.len() {
        return Err(DecodeError::LengthOverrun {
            declared: length,
            actual: bytes.len().saturating_sub(HEADER_LEN),
        });
    }

    let mut verify_buf = bytes.to_vec();
    verify_buf[22..24].copy_from_slice(&0u16.to_be_bytes());
    let computed = checksum(&verify_buf);
    if computed != transmitted_checksum {
        return Err(DecodeError::ChecksumMismatch {
            expected: computed,
            got: transmitted_checksum,
        });
    }

    Ok(Packet {
        sequence,
        acknowledgement,
        timestamp,
        syn: flags & FLAG_SYN != 0,
        fin: flags & FLAG_FIN != 0,
        ack: flags & FLAG_ACK != 0,
        payload: bytes[HEADER_LEN..].to_vec(),
    })
}

/// 16-bit one's-complement checksum with end-around carry, computed over
/// `buf` with the checksum field assumed to be zeroed by the caller.
pub fn checksum(buf: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = buf.chunks_exact(2);

    for pair in &mut chunks {
        let word = u16::from_be_bytes([pair[0], pair[1]]) as u32;
        sum += word;
        if sum & 0xFFFF_0000 != 0 {
            sum = (sum & 0xFFFF) + 1;
        }
    }

    if let [last] = *chunks.remainder() {
        let word = (last as u32) << 8;
        sum += word;
        if sum & 0xFFFF_0000 != 0 {
            sum = (sum & 0xFFFF) + 1;
        }
    }

    !(sum as u16)
}
