//! Per-packet event trace and end-of-run statistics, written verbatim to
//! standard output (distinct from the leveled diagnostics that go through
//! the `log` facade).

use std::io::Write;
use std::time::Instant;

use crate::codec::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Snd,
    Rcv,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Snd => "snd",
            Direction::Rcv => "rcv",
        }
    }
}

/// Writes `<dir> <t.sss> <S|-> <F|-> <A|-> <D|-> <seq> <len> <ack>` lines
/// against a monotonic origin captured when the connection begins. Cheap
/// to clone: the origin instant is shared verbatim with the producer
/// thread so both sides of the sender log against the same zero point.
#[derive(Debug, Clone, Copy)]
pub struct Recorder {
    origin: Instant,
}

impl Recorder {
    pub fn new() -> Self {
        Recorder {
            origin: Instant::now(),
        }
    }

    pub fn record(&self, dir: Direction, packet: &Packet) {
        let t = self.origin.elapsed().as_secs_f64();
        let line = format!(
            "{} {:.3} {} {} {} {} {} {} {}",
            dir.as_str(),
            t,
            flag_char(packet.syn, 'S'),
            flag_char(packet.fin, 'F'),
            flag_char(packet.ack, 'A'),
            flag_char(!packet.payload.is_empty(), 'D'),
            packet.sequence,
            packet.payload.len(),
            packet.acknowledgement,
        );
        let mut stdout = std::io::stdout();
        let _ = writeln!(stdout, "{line}");
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

fn flag_char(set: bool, ch: char) -> char {
    if set {
        ch
    } else {
        '-'
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SenderStats {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub retransmissions: u64,
    pub duplicate_acks: u64,
}

impl SenderStats {
    pub fn print(&self) {
        println!(
            "bytes_sent={} packets_sent={} retransmissions={} duplicate_acks={}",
            self.bytes_sent, self.packets_sent, self.retransmissions, self.duplicate_acks
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReceiverStats {
    pub bytes_received: u64,
    pub packets_received: u64,
    pub out_of_order: u64,
    pub checksum_errors: u64,
}

impl ReceiverStats {
    pub fn print(&self) {
        println!(
            "bytes_received={} packets_received={} out_of_order={} checksum_errors={}",
            self.bytes_received, self.packets_received, self.out_of_order, self.checksum_errors
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_char_renders_dash_when_unset() {
        assert_eq!(flag_char(false, 'S'), '-');
        assert_eq!(flag_char(true, 'S'), 'S');
    }
}
