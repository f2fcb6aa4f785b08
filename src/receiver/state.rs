use std::collections::HashMap;
use std::net::SocketAddr;

use crate::log_record::ReceiverStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Listen,
    Established,
    Closed,
}

/// `expected_seq`, the reassembly buffer, and the bookkeeping the receive
/// loop needs. Touched only by the single receive loop, so no locking.
pub struct ReceiverState {
    pub state: State,
    pub peer: Option<SocketAddr>,
    pub expected_seq: u32,
    pub send_seq: u32,
    pub mtu: u32,
    pub window_packets: u32,
    pub reassembly: HashMap<u32, Vec<u8>>,
    pub stats: ReceiverStats,
}

impl ReceiverState {
    pub fn new(mtu: u32, window_packets: u32) -> Self {
        ReceiverState {
            state: State::Listen,
            peer: None,
            expected_seq: 0,
            send_seq: 0,
            mtu,
            window_packets,
            reassembly: HashMap::new(),
            stats: ReceiverStats::default(),
        }
    }

    fn window_bytes(&self) -> u64 {
        self.mtu as u64 * self.window_packets as u64
    }

    /// Drains any buffered entry keyed exactly by the current
    /// `expected_seq`, advancing it as each one is consumed.
    pub fn drain_reassembly(&mut self) -> Vec<Vec<u8>> {
        let mut drained = Vec::new();
        while let Some(payload) = self.reassembly.remove(&self.expected_seq) {
            self.expected_seq = self.expected_seq.wrapping_add(payload.len() as u32);
            drained.push(payload);
        }
        drained
    }

    /// True if `seq` falls within `[expected_seq, expected_seq + window)`.
    pub fn in_window(&self, seq: u32) -> bool {
        let offset = seq.wrapping_sub(self.expected_seq) as u64;
        offset < self.window_bytes()
    }
}
