use std::collections::{BinaryHeap, HashMap};
use std::cmp::{Ordering, Reverse};

use crate::clock::RttEstimator;
use crate::log_record::SenderStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    SynSent,
    Established,
    FinSent,
    Closed,
}

pub const MAX_RETRIES: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Syn,
    Data,
    Fin,
}

#[derive(Debug, Clone)]
pub struct UnackedEntry {
    pub kind: PacketKind,
    pub payload: Vec<u8>,
    pub first_send_time: u64,
    pub retries: u32,
    pub retransmitted: bool,
    /// Byte length occupied on the wire: payload length, or 1 for the
    /// control sequence consumed by a bare SYN/FIN.
    pub wire_len: u32,
}

/// One entry in the deadline heap: fires no earlier than `deadline`, for
/// `sequence`, tagged with the `generation` it was scheduled at so a timer
/// that outlives a retransmit (which reschedules with a new generation)
/// can recognize itself as stale and no-op.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Deadline {
    pub at: u64,
    pub sequence: u32,
    pub generation: u32,
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.cmp(&other.at).then(self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shared sender state, guarded by a single mutex: the
/// unacked store, window cursors, RTT estimator, and duplicate-ACK counter
/// are all touched by the producer, the ACK handler, and timer firings.
pub struct SenderShared {
    pub state: State,
    pub base: u32,
    pub next_seq: u32,
    pub peer_next_seq: u32,
    pub last_ack_value: u32,
    pub dup_ack_count: u32,
    pub rtt: RttEstimator,
    pub unacked: HashMap<u32, UnackedEntry>,
    pub timers: BinaryHeap<Reverse<Deadline>>,
    pub generation: HashMap<u32, u32>,
    pub peer_fin_seq: Option<u32>,
    pub stats: SenderStats,
    pub failed: Option<u32>,
}

impl SenderShared {
    pub fn new() -> Self {
        SenderShared {
            state: State::Init,
            base: 0,
            next_seq: 0,
            peer_next_seq: 0,
            last_ack_value: 0,
            dup_ack_count: 0,
            rtt: RttEstimator::new(),
            unacked: HashMap::new(),
            timers: BinaryHeap::new(),
            generation: HashMap::new(),
            peer_fin_seq: None,
            stats: SenderStats::default(),
            failed: None,
        }
    }

    /// Installs an unacked entry and schedules its first retransmission
    /// deadline, bumping the sequence's generation so any earlier timer
    /// for it is recognized as stale.
    pub fn install(&mut self, sequence: u32, entry: UnackedEntry, now: u64) {
        self.unacked.insert(sequence, entry);
        self.reschedule(sequence, now);
    }

    /// Schedules a fresh deadline for `sequence` at `now + rto`, using the
    /// estimator's current RTO, and bumps its generation so any deadline
    /// already sitting in the heap for it is recognized as stale.
    pub fn reschedule(&mut self, sequence: u32, now: u64) {
        let rto = self.rtt.rto();
        let generation = self.generation.entry(sequence).or_insert(0);
        *generation += 1;
        let gen = *generation;
        self.timers.push(Reverse(Deadline {
            at: now + rto,
            sequence,
            generation: gen,
        }));
    }

    /// Removes a sequence's unacked entry and its generation counter
    /// together, so a fully-retired sequence leaves no trace behind.
    pub fn retire(&mut self, sequence: u32) -> Option<UnackedEntry> {
        let entry = self.unacked.remove(&sequence);
        self.generation.remove(&sequence);
        entry
    }

    /// A deadline is live only if the entry is still unacked and the
    /// generation matches the most recent schedule for that sequence.
    pub fn is_live(&self, deadline: &Deadline) -> bool {
        self.unacked.contains_key(&deadline.sequence)
            && self.generation.get(&deadline.sequence) == Some(&deadline.generation)
    }

    pub fn next_deadline_at(&self) -> Option<u64> {
        self.timers.peek().map(|Reverse(d)| d.at)
    }
}

impl Default for SenderShared {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    Ignored,
    FastRetransmit(u32),
    Advanced,
}

/// Cumulative-ACK bookkeeping: duplicate-ACK counting with fast
/// retransmit at three duplicates, Karn's-rule-aware RTT sampling, and
/// advancing `base` over every unacked entry the new ack value retires.
pub fn handle_ack(shared: &mut SenderShared, now: u64, ack_value: u32, echoed_timestamp: u64) -> AckAction {
    if ack_value == shared.last_ack_value {
        shared.dup_ack_count += 1;
        shared.stats.duplicate_acks += 1;
        if shared.dup_ack_count >= 3 {
            shared.dup_ack_count = 0;
            if shared.unacked.contains_key(&ack_value) {
                if let Some(e) = shared.unacked.get_mut(&ack_value) {
                    e.retransmitted = true;
                }
                shared.stats.retransmissions += 1;
                return AckAction::FastRetransmit(ack_value);
            }
        }
        return AckAction::Ignored;
    }

    if ack_value < shared.last_ack_value {
        return AckAction::Ignored;
    }

    shared.dup_ack_count = 0;

    let mut any_retransmitted = false;
    let mut seq = shared.base;
    while seq < ack_value {
        match shared.unacked.get(&seq) {
            Some(e) => {
                if e.retransmitted {
                    any_retransmitted = true;
                }
                seq += e.wire_len.max(1);
            }
            None => break,
        }
    }
    if !any_retransmitted {
        let sample = now.saturating_sub(echoed_timestamp);
        shared.rtt.observe(sample);
    }

    shared.last_ack_value = ack_value;
    while shared.base < ack_value {
        match shared.retire(shared.base) {
            Some(entry) => shared.base += entry.wire_len.max(1),
            None => break,
        }
    }

    AckAction::Advanced
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Retransmit(u32),
    Failed(u32),
}

/// Pops every deadline due at or before `now`, ignoring stale ones, and
/// either retransmits or declares the sequence failed once its retry
/// budget (`RetriesExhausted`) is spent.
pub fn process_due_timers(shared: &mut SenderShared, now: u64) -> Vec<TimerAction> {
    let mut actions = Vec::new();
    loop {
        let due = match shared.timers.peek() {
            Some(Reverse(d)) if d.at <= now => shared.timers.pop().unwrap().0,
            _ => break,
        };
        if !shared.is_live(&due) {
            continue;
        }
        let seq = due.sequence;
        let retries = shared.unacked.get(&seq).map(|e| e.retries).unwrap_or(0);
        if retries >= MAX_RETRIES {
            shared.failed = Some(seq);
            actions.push(TimerAction::Failed(seq));
            break;
        }
        if let Some(e) = shared.unacked.get_mut(&seq) {
            e.retries += 1;
            e.retransmitted = true;
        }
        shared.stats.retransmissions += 1;
        shared.reschedule(seq, now);
        actions.push(TimerAction::Retransmit(seq));
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> UnackedEntry {
        UnackedEntry {
            kind: PacketKind::Data,
            payload: vec![1],
            first_send_time: 0,
            retries: 0,
            retransmitted: false,
            wire_len: 1,
        }
    }

    #[test]
    fn stale_deadline_after_reschedule_is_not_live() {
        let mut s = SenderShared::new();
        s.install(1, entry(), 0);
        let Reverse(first) = s.timers.pop().unwrap();
        s.reschedule(1, 50);
        assert!(!s.is_live(&first));
        let Reverse(second) = s.timers.pop().unwrap();
        assert!(s.is_live(&second));
    }

    #[test]
    fn deadline_goes_stale_once_entry_is_removed() {
        let mut s = SenderShared::new();
        s.install(1, entry(), 0);
        let Reverse(d) = s.timers.pop().unwrap();
        s.unacked.remove(&1);
        assert!(!s.is_live(&d));
    }

    fn data_entry(first_send_time: u64) -> UnackedEntry {
        UnackedEntry {
            kind: PacketKind::Data,
            payload: vec![0; 4],
            first_send_time,
            retries: 0,
            retransmitted: false,
            wire_len: 4,
        }
    }

    #[test]
    fn new_ack_advances_base_and_samples_rtt() {
        let mut s = SenderShared::new();
        s.base = 0;
        s.next_seq = 4;
        s.install(0, data_entry(100), 100);

        let action = handle_ack(&mut s, 150, 4, 100);
        assert_eq!(action, AckAction::Advanced);
        assert_eq!(s.base, 4);
        assert!(!s.unacked.contains_key(&0));
        assert_eq!(s.last_ack_value, 4);
        assert_eq!(s.rtt.rtt_est(), Some(50.0));
    }

    #[test]
    fn retransmitted_entry_suppresses_rtt_sample() {
        let mut s = SenderShared::new();
        s.base = 0;
        s.next_seq = 4;
        s.install(0, data_entry(100), 100);
        s.unacked.get_mut(&0).unwrap().retransmitted = true;

        handle_ack(&mut s, 500, 4, 100);
        assert_eq!(s.rtt.rtt_est(), None);
    }

    #[test]
    fn third_duplicate_ack_triggers_fast_retransmit() {
        let mut s = SenderShared::new();
        s.base = 0;
        s.next_seq = 4;
        s.last_ack_value = 0;
        s.install(0, data_entry(100), 100);

        assert_eq!(handle_ack(&mut s, 110, 0, 100), AckAction::Ignored);
        assert_eq!(handle_ack(&mut s, 120, 0, 100), AckAction::Ignored);
        assert_eq!(handle_ack(&mut s, 130, 0, 100), AckAction::FastRetransmit(0));
        assert!(s.unacked.get(&0).unwrap().retransmitted);
        assert_eq!(s.dup_ack_count, 0);
        assert_eq!(s.stats.duplicate_acks, 3);
    }

    #[test]
    fn retiring_a_sequence_prunes_its_generation_entry() {
        let mut s = SenderShared::new();
        s.base = 0;
        s.next_seq = 4;
        s.install(0, data_entry(100), 100);
        assert!(s.generation.contains_key(&0));

        handle_ack(&mut s, 150, 4, 100);
        assert!(!s.unacked.contains_key(&0));
        assert!(!s.generation.contains_key(&0));
    }

    #[test]
    fn timer_retransmits_until_retry_budget_is_spent() {
        let mut s = SenderShared::new();
        s.install(0, data_entry(0), 0);

        let mut now = 0u64;
        for _ in 0..MAX_RETRIES {
            let rto = s.rtt.rto();
            now += rto;
            let actions = process_due_timers(&mut s, now);
            assert_eq!(actions, vec![TimerAction::Retransmit(0)]);
        }

        let rto = s.rtt.rto();
        now += rto;
        let actions = process_due_timers(&mut s, now);
        assert_eq!(actions, vec![TimerAction::Failed(0)]);
        assert_eq!(s.failed, Some(0));
    }
}
