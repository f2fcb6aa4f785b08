//! In-memory [`DatagramTransport`] double used by unit tests and the
//! integration suite. Not part of the public protocol surface; exposed so
//! `tests/` can drive the same loss/reorder/corruption scenarios without real sockets.
#![doc(hidden)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::transport::DatagramTransport;

struct Inbox {
    queue: Mutex<VecDeque<Vec<u8>>>,
    cvar: Condvar,
}

impl Inbox {
    fn new() -> Self {
        Inbox {
            queue: Mutex::new(VecDeque::new()),
            cvar: Condvar::new(),
        }
    }

    fn push(&self, datagram: Vec<u8>) {
        self.queue.lock().unwrap().push_back(datagram);
        self.cvar.notify_one();
    }

    fn pop(&self, timeout: Option<Duration>) -> Option<Vec<u8>> {
        let mut q = self.queue.lock().unwrap();
        loop {
            if let Some(d) = q.pop_front() {
                return Some(d);
            }
            match timeout {
                None => q = self.cvar.wait(q).unwrap(),
                Some(t) => {
                    let start = Instant::now();
                    let (guard, result) = self.cvar.wait_timeout(q, t).unwrap();
                    q = guard;
                    if result.timed_out() || start.elapsed() >= t {
                        return None;
                    }
                }
            }
        }
    }
}

/// A policy that can drop, reorder, or corrupt datagrams before delivery.
/// Applied at the sending side; `deliver` hands a datagram on to the peer's
/// inbox, so a policy may call it zero times (drop), once (pass through or
/// corrupt), or twice in a different order than it was invoked (reorder).
pub trait LinkPolicy: Send + Sync {
    fn apply(&self, datagram: Vec<u8>, deliver: &dyn Fn(Vec<u8>));
}

pub struct Transparent;
impl LinkPolicy for Transparent {
    fn apply(&self, datagram: Vec<u8>, deliver: &dyn Fn(Vec<u8>)) {
        deliver(datagram)
    }
}

/// Swaps every pair of adjacent datagrams: holds the first, then on the
/// second of the pair delivers (second, first) in that order.
pub struct ReorderPairs {
    held: Mutex<Option<Vec<u8>>>,
}

impl ReorderPairs {
    pub fn new() -> Self {
        ReorderPairs {
            held: Mutex::new(None),
        }
    }
}

impl Default for ReorderPairs {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkPolicy for ReorderPairs {
    fn apply(&self, datagram: Vec<u8>, deliver: &dyn Fn(Vec<u8>)) {
        let mut held = self.held.lock().unwrap();
        match held.take() {
            None => {
                *held = Some(datagram);
            }
            Some(previous) => {
                deliver(datagram);
                deliver(previous);
            }
        }
    }
}

/// Drops every packet whose payload's first byte, fed through a simple
/// counter-based rule, lands in the configured fraction. Deterministic so
/// tests are reproducible without a seeded RNG dependency.
pub struct DropEveryNth {
    n: u64,
    counter: Mutex<u64>,
}

impl DropEveryNth {
    pub fn new(n: u64) -> Self {
        DropEveryNth {
            n,
            counter: Mutex::new(0),
        }
    }
}

impl LinkPolicy for DropEveryNth {
    fn apply(&self, datagram: Vec<u8>, deliver: &dyn Fn(Vec<u8>)) {
        let mut c = self.counter.lock().unwrap();
        *c += 1;
        if self.n != 0 && *c % self.n == 0 {
            // dropped
        } else {
            deliver(datagram);
        }
    }
}

/// Drops a single chosen sequence number's data packets forever (for S6),
/// or just once (for S5/S2-style single-loss scenarios).
pub struct DropSequences {
    sequences: Vec<u32>,
    once: bool,
    seen: Mutex<std::collections::HashSet<u32>>,
}

impl DropSequences {
    pub fn forever(sequences: Vec<u32>) -> Self {
        DropSequences {
            sequences,
            once: false,
            seen: Mutex::new(Default::default()),
        }
    }

    pub fn once(sequences: Vec<u32>) -> Self {
        DropSequences {
            sequences,
            once: true,
            seen: Mutex::new(Default::default()),
        }
    }
}

impl LinkPolicy for DropSequences {
    fn apply(&self, datagram: Vec<u8>, deliver: &dyn Fn(Vec<u8>)) {
        if datagram.len() < 4 {
            deliver(datagram);
            return;
        }
        let seq = u32::from_be_bytes(datagram[0..4].try_into().unwrap());
        if self.sequences.contains(&seq) {
            if self.once {
                let mut seen = self.seen.lock().unwrap();
                if seen.contains(&seq) {
                    deliver(datagram);
                    return;
                }
                seen.insert(seq);
            }
            return;
        }
        deliver(datagram);
    }
}

/// Flips one bit in the payload of the first datagram whose sequence
/// matches, then stops tampering (for S5).
pub struct CorruptOnce {
    sequence: u32,
    done: Mutex<bool>,
}

impl CorruptOnce {
    pub fn new(sequence: u32) -> Self {
        CorruptOnce {
            sequence,
            done: Mutex::new(false),
        }
    }
}

impl LinkPolicy for CorruptOnce {
    fn apply(&self, mut datagram: Vec<u8>, deliver: &dyn Fn(Vec<u8>)) {
        let mut done = self.done.lock().unwrap();
        if !*done && datagram.len() > crate::codec::HEADER_LEN {
            let seq = u32::from_be_bytes(datagram[0..4].try_into().unwrap());
            if seq == self.sequence {
                datagram[crate::codec::HEADER_LEN] ^= 0x01;
                *done = true;
            }
        }
        deliver(datagram);
    }
}

/// One side of a channel-backed loopback pair standing in for a UDP
/// socket between two endpoints.
pub struct ChannelEndpoint {
    self_addr: SocketAddr,
    peer_addr: SocketAddr,
    own_inbox: Arc<Inbox>,
    peer_inbox: Arc<Inbox>,
    policy: Arc<dyn LinkPolicy>,
}

impl DatagramTransport for ChannelEndpoint {
    fn send_to(&self, buf: &[u8], _target: SocketAddr) -> Result<usize, TransportError> {
        let len = buf.len();
        let peer_inbox = &self.peer_inbox;
        self.policy
            .apply(buf.to_vec(), &|datagram| peer_inbox.push(datagram));
        Ok(len)
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<Option<(usize, SocketAddr)>, TransportError> {
        match self.own_inbox.pop(timeout) {
            None => Ok(None),
            Some(datagram) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(Some((n, self.peer_addr)))
            }
        }
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.self_addr)
    }
}

pub struct ChannelPair {
    pub a: ChannelEndpoint,
    pub b: ChannelEndpoint,
    pub addr_a: SocketAddr,
    pub addr_b: SocketAddr,
}

impl ChannelPair {
    pub fn new() -> Self {
        Self::with_policy(Arc::new(Transparent))
    }

    pub fn with_policy(policy: Arc<dyn LinkPolicy>) -> Self {
        let addr_a: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        let addr_b: SocketAddr = "127.0.0.1:40002".parse().unwrap();
        let inbox_a = Arc::new(Inbox::new());
        let inbox_b = Arc::new(Inbox::new());

        let a = ChannelEndpoint {
            self_addr: addr_a,
            peer_addr: addr_b,
            own_inbox: inbox_a.clone(),
            peer_inbox: inbox_b.clone(),
            policy: policy.clone(),
        };
        let b = ChannelEndpoint {
            self_addr: addr_b,
            peer_addr: addr_a,
            own_inbox: inbox_b,
            peer_inbox: inbox_a,
            policy,
        };

        ChannelPair {
            a,
            b,
            addr_a,
            addr_b,
        }
    }
}

impl Default for ChannelPair {
    fn default() -> Self {
        Self::new()
    }
}
