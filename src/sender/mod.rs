//! Send state machine: `INIT -> SYN_SENT -> ESTABLISHED -> FIN_SENT -> CLOSED`.
//!
//! Two tasks run concurrently against one [`SenderShared`] behind a mutex
//! a producer thread reads the file and feeds the window,
//! while this thread drives the socket, retiring ACKs and firing timers
//! from a single collapsed deadline heap.

mod state;

pub use state::{PacketKind, SenderShared, State, UnackedEntry};

use std::io::Read;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use log::info;

use crate::clock::Clock;
use crate::codec::{self, Packet};
use crate::config::Config;
use crate::error::Error;
use crate::log_record::{Direction, Recorder};
use crate::transport::DatagramTransport;

use state::{handle_ack, process_due_timers, AckAction, TimerAction, MAX_RETRIES};

pub struct Sender<T: DatagramTransport + Sync + 'static, R: Read + Send + 'static> {
    transport: Arc<T>,
    peer_addr: SocketAddr,
    config: Config,
    clock: Arc<dyn Clock>,
    recorder: Recorder,
    reader: R,
}

impl<T: DatagramTransport + Sync + 'static, R: Read + Send + 'static> Sender<T, R> {
    pub fn new(transport: T, peer_addr: SocketAddr, reader: R, config: Config, clock: Arc<dyn Clock>) -> Self {
        Sender {
            transport: Arc::new(transport),
            peer_addr,
            config,
            clock,
            recorder: Recorder::new(),
            reader,
        }
    }

    /// Drives the handshake, the windowed transfer, and teardown to
    /// completion, or returns the first fatal error (transport failure,
    /// file error, or a sequence exhausting its retransmission budget).
    pub fn run(self) -> Result<(), Error> {
        let shared = Arc::new(Mutex::new(SenderShared::new()));
        let cvar = Arc::new(Condvar::new());

        handshake(&shared, self.transport.as_ref(), self.peer_addr, self.clock.as_ref(), &self.recorder)?;
        info!("handshake complete with {}", self.peer_addr);

        let producer = {
            let shared = shared.clone();
            let cvar = cvar.clone();
            let transport = self.transport.clone();
            let peer_addr = self.peer_addr;
            let config = self.config;
            let clock = self.clock.clone();
            let recorder = self.recorder;
            let mut reader = self.reader;
            thread::spawn(move || -> Result<(), Error> {
                run_producer(&mut reader, &shared, &cvar, transport.as_ref(), peer_addr, config, clock.as_ref(), &recorder)
            })
        };

        let consume_result = consume_loop(
            &shared,
            &cvar,
            self.transport.as_ref(),
            self.peer_addr,
            self.clock.as_ref(),
            &self.recorder,
            self.config.mtu,
        );

        cvar.notify_all();
        let producer_result = producer.join().expect("producer thread panicked");

        consume_result.and(producer_result)
    }
}

fn rebuild_packet(seq: u32, peer_next_seq: u32, entry: &UnackedEntry) -> Packet {
    match entry.kind {
        PacketKind::Syn => Packet::syn(seq, entry.first_send_time),
        PacketKind::Fin => Packet::fin(seq, peer_next_seq, entry.first_send_time),
        PacketKind::Data => Packet::data(seq, peer_next_seq, entry.first_send_time, entry.payload.clone()),
    }
}

/// `UdpSocket::set_read_timeout` rejects a zero duration, so an already-due
/// deadline is rounded up to one nanosecond rather than polled with `ZERO`.
fn next_wait(shared: &Mutex<SenderShared>, clock: &dyn Clock) -> Duration {
    let g = shared.lock().unwrap();
    let now = clock.now();
    match g.next_deadline_at() {
        Some(at) if at > now => Duration::from_nanos(at - now),
        Some(_) => Duration::from_nanos(1),
        None => Duration::from_millis(500),
    }
}

/// Pops every timer due by `now`, retransmitting each live one and
/// returning the first exhausted sequence, if any.
fn fire_due_timers<T: DatagramTransport>(
    shared: &Mutex<SenderShared>,
    transport: &T,
    peer_addr: SocketAddr,
    recorder: &Recorder,
    now: u64,
) -> Option<u32> {
    let mut g = shared.lock().unwrap();
    for action in process_due_timers(&mut g, now) {
        match action {
            TimerAction::Retransmit(seq) => {
                if let Some(entry) = g.unacked.get(&seq).cloned() {
                    let packet = rebuild_packet(seq, g.peer_next_seq, &entry);
                    let bytes = codec::encode(&packet);
                    let _ = transport.send_to(&bytes, peer_addr);
                    recorder.record(Direction::Snd, &packet);
                }
            }
            TimerAction::Failed(seq) => return Some(seq),
        }
    }
    None
}

fn handshake<T: DatagramTransport>(
    shared: &Arc<Mutex<SenderShared>>,
    transport: &T,
    peer_addr: SocketAddr,
    clock: &dyn Clock,
    recorder: &Recorder,
) -> Result<(), Error> {
    {
        let mut g = shared.lock().unwrap();
        let now = clock.now();
        let packet = Packet::syn(0, now);
        let bytes = codec::encode(&packet);
        transport.send_to(&bytes, peer_addr).map_err(Error::Transport)?;
        recorder.record(Direction::Snd, &packet);
        g.install(
            0,
            UnackedEntry {
                kind: PacketKind::Syn,
                payload: Vec::new(),
                first_send_time: now,
                retries: 0,
                retransmitted: false,
                wire_len: 1,
            },
            now,
        );
        g.state = State::SynSent;
    }

    let mut buf = vec![0u8; codec::HEADER_LEN];
    loop {
        let wait = next_wait(shared, clock);
        let received = transport.recv_from(&mut buf, Some(wait)).map_err(Error::Transport)?;

        let now = clock.now();
        if let Some(seq) = fire_due_timers(shared, transport, peer_addr, recorder, now) {
            return Err(Error::RetriesExhausted { seq, retries: MAX_RETRIES });
        }

        let (n, from) = match received {
            Some(pair) => pair,
            None => continue,
        };
        if from != peer_addr {
            continue;
        }
        let packet = match codec::decode(&buf[..n]) {
            Ok(p) => p,
            Err(_) => continue,
        };
        recorder.record(Direction::Rcv, &packet);

        if packet.syn && packet.ack {
            let mut g = shared.lock().unwrap();
            if g.state == State::SynSent {
                g.peer_next_seq = packet.sequence.wrapping_add(1);
                g.last_ack_value = g.peer_next_seq;
                g.retire(0);
                g.base = 1;
                g.next_seq = 1;
                g.state = State::Established;
                let peer_next_seq = g.peer_next_seq;
                drop(g);

                let ack = Packet::ack_only(1, peer_next_seq, packet.timestamp);
                let bytes = codec::encode(&ack);
                transport.send_to(&bytes, peer_addr).map_err(Error::Transport)?;
                recorder.record(Direction::Snd, &ack);

                return Ok(());
            }
        }
    }
}

fn read_chunk<R: Read>(reader: &mut R, mtu: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; mtu];
    let mut filled = 0;
    while filled < mtu {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

fn send_data_chunk<T: DatagramTransport>(
    shared: &Mutex<SenderShared>,
    cvar: &Condvar,
    transport: &T,
    peer_addr: SocketAddr,
    clock: &dyn Clock,
    recorder: &Recorder,
    config: Config,
    chunk: Vec<u8>,
) -> Result<(), Error> {
    let window_bytes = config.mtu as u64 * config.window as u64;
    let mut g = shared.lock().unwrap();
    loop {
        if let Some(seq) = g.failed {
            return Err(Error::RetriesExhausted { seq, retries: MAX_RETRIES });
        }
        let in_flight = g.next_seq.wrapping_sub(g.base) as u64;
        if in_flight + chunk.len() as u64 <= window_bytes {
            break;
        }
        g = cvar.wait(g).unwrap();
    }

    let seq = g.next_seq;
    let peer_next_seq = g.peer_next_seq;
    let now = clock.now();
    let packet = Packet::data(seq, peer_next_seq, now, chunk.clone());
    let bytes = codec::encode(&packet);
    transport.send_to(&bytes, peer_addr).map_err(Error::Transport)?;
    recorder.record(Direction::Snd, &packet);

    let wire_len = chunk.len() as u32;
    g.next_seq = seq.wrapping_add(wire_len);
    g.install(
        seq,
        UnackedEntry {
            kind: PacketKind::Data,
            payload: chunk,
            first_send_time: now,
            retries: 0,
            retransmitted: false,
            wire_len,
        },
        now,
    );
    g.stats.bytes_sent += wire_len as u64;
    g.stats.packets_sent += 1;
    Ok(())
}

fn send_fin<T: DatagramTransport>(
    shared: &Mutex<SenderShared>,
    cvar: &Condvar,
    transport: &T,
    peer_addr: SocketAddr,
    clock: &dyn Clock,
    recorder: &Recorder,
) -> Result<(), Error> {
    let mut g = shared.lock().unwrap();
    loop {
        if let Some(seq) = g.failed {
            return Err(Error::RetriesExhausted { seq, retries: MAX_RETRIES });
        }
        if g.base == g.next_seq {
            break;
        }
        g = cvar.wait(g).unwrap();
    }

    let seq = g.next_seq;
    let peer_next_seq = g.peer_next_seq;
    let now = clock.now();
    let packet = Packet::fin(seq, peer_next_seq, now);
    let bytes = codec::encode(&packet);
    transport.send_to(&bytes, peer_addr).map_err(Error::Transport)?;
    recorder.record(Direction::Snd, &packet);

    g.next_seq = seq.wrapping_add(1);
    g.install(
        seq,
        UnackedEntry {
            kind: PacketKind::Fin,
            payload: Vec::new(),
            first_send_time: now,
            retries: 0,
            retransmitted: false,
            wire_len: 1,
        },
        now,
    );
    g.state = State::FinSent;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_producer<T: DatagramTransport, R: Read>(
    reader: &mut R,
    shared: &Arc<Mutex<SenderShared>>,
    cvar: &Arc<Condvar>,
    transport: &T,
    peer_addr: SocketAddr,
    config: Config,
    clock: &dyn Clock,
    recorder: &Recorder,
) -> Result<(), Error> {
    loop {
        let chunk = read_chunk(reader, config.mtu as usize).map_err(Error::File)?;
        if chunk.is_empty() {
            break;
        }
        send_data_chunk(shared, cvar, transport, peer_addr, clock, recorder, config, chunk)?;
        cvar.notify_all();
    }

    send_fin(shared, cvar, transport, peer_addr, clock, recorder)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn consume_loop<T: DatagramTransport>(
    shared: &Arc<Mutex<SenderShared>>,
    cvar: &Arc<Condvar>,
    transport: &T,
    peer_addr: SocketAddr,
    clock: &dyn Clock,
    recorder: &Recorder,
    mtu: u32,
) -> Result<(), Error> {
    let mut buf = vec![0u8; codec::HEADER_LEN + mtu as usize];

    loop {
        {
            let g = shared.lock().unwrap();
            if g.state == State::Closed {
                return Ok(());
            }
            if let Some(seq) = g.failed {
                return Err(Error::RetriesExhausted { seq, retries: MAX_RETRIES });
            }
        }

        let wait = next_wait(shared, clock);
        let received = transport.recv_from(&mut buf, Some(wait)).map_err(Error::Transport)?;

        let now = clock.now();
        if let Some(seq) = fire_due_timers(shared, transport, peer_addr, recorder, now) {
            cvar.notify_all();
            return Err(Error::RetriesExhausted { seq, retries: MAX_RETRIES });
        }

        let (n, from) = match received {
            Some(pair) => pair,
            None => continue,
        };
        if from != peer_addr {
            continue;
        }
        let packet = match codec::decode(&buf[..n]) {
            Ok(p) => p,
            Err(_) => continue,
        };
        recorder.record(Direction::Rcv, &packet);

        let mut g = shared.lock().unwrap();
        if g.state != State::Established && g.state != State::FinSent {
            continue;
        }

        let mut should_notify = false;
        if packet.ack {
            let action = handle_ack(&mut g, now, packet.acknowledgement, packet.timestamp);
            if let AckAction::FastRetransmit(seq) = action {
                if let Some(entry) = g.unacked.get(&seq).cloned() {
                    let p = rebuild_packet(seq, g.peer_next_seq, &entry);
                    let bytes = codec::encode(&p);
                    let _ = transport.send_to(&bytes, peer_addr);
                    recorder.record(Direction::Snd, &p);
                    g.reschedule(seq, now);
                }
            }
            should_notify = action != AckAction::Ignored;
        }

        if packet.fin && packet.ack && g.state == State::FinSent {
            g.peer_next_seq = packet.sequence.wrapping_add(1);
            g.peer_fin_seq = Some(packet.sequence);
            let final_ack = Packet::ack_only(g.next_seq, g.peer_next_seq, packet.timestamp);
            let bytes = codec::encode(&final_ack);
            let _ = transport.send_to(&bytes, peer_addr);
            recorder.record(Direction::Snd, &final_ack);
            g.state = State::Closed;
            g.stats.print();
            drop(g);
            cvar.notify_all();
            return Ok(());
        }

        drop(g);
        if should_notify {
            cvar.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::test_support::ChannelPair;
    use std::io::Cursor;

    #[test]
    fn handshake_completes_against_a_cooperative_peer() {
        let pair = ChannelPair::new();
        let clock = MonotonicClock::new();
        let recorder = Recorder::new();
        let shared = Arc::new(Mutex::new(SenderShared::new()));

        let b = pair.b;
        let responder = thread::spawn(move || {
            let mut buf = vec![0u8; codec::HEADER_LEN];
            let (n, from) = b.recv_from(&mut buf, Some(Duration::from_secs(2))).unwrap().unwrap();
            let syn = codec::decode(&buf[..n]).unwrap();
            assert!(syn.syn && !syn.ack);
            let reply = Packet::syn_ack(0, syn.sequence.wrapping_add(1), syn.timestamp);
            b.send_to(&codec::encode(&reply), from).unwrap();
        });

        handshake(&shared, &pair.a, pair.addr_b, &clock, &recorder).unwrap();
        responder.join().unwrap();

        let g = shared.lock().unwrap();
        assert_eq!(g.state, State::Established);
        assert_eq!(g.base, 1);
        assert_eq!(g.next_seq, 1);
        assert_eq!(g.peer_next_seq, 1);
    }

    #[test]
    fn full_transfer_against_a_real_receiver() {
        use crate::receiver::Receiver;

        let pair = ChannelPair::new();
        let config = Config::new(512, 8).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let payload = b"the quick brown fox jumps over the lazy dog".to_vec();

        let receiver_side = thread::spawn(move || {
            let mut receiver = Receiver::new(pair.b, Cursor::new(Vec::new()), config);
            receiver.run().unwrap();
            receiver
        });

        let sender = Sender::new(pair.a, pair.addr_b, Cursor::new(payload.clone()), config, clock);
        sender.run().unwrap();

        let receiver = receiver_side.join().unwrap();
        assert_eq!(receiver.into_inner().into_inner(), payload);
    }
}
