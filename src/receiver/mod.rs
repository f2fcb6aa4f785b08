//! Receive state machine: `LISTEN -> ESTABLISHED -> CLOSED`. The reassembly
//! buffer and `expected_seq` are touched only from [`Receiver::run`], so no
//! locking is needed on this side (contrast the sender's shared mutex).

mod state;

pub use state::{ReceiverState, State};

use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};

use crate::codec::{self, DecodeError, Packet};
use crate::config::Config;
use crate::error::Error;
use crate::log_record::{Direction, Recorder};
use crate::transport::DatagramTransport;

pub struct Receiver<T: DatagramTransport, W: Write> {
    transport: T,
    out: W,
    config: Config,
    state: ReceiverState,
    recorder: Recorder,
}

impl<T: DatagramTransport, W: Write> Receiver<T, W> {
    pub fn new(transport: T, out: W, config: Config) -> Self {
        Receiver {
            transport,
            out,
            state: ReceiverState::new(config.mtu, config.window),
            config,
            recorder: Recorder::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Drives the receive loop to completion (peer FIN observed) or a fatal
    /// transport/file error.
    pub fn run(&mut self) -> Result<(), Error> {
        let mut buf = vec![0u8; codec::HEADER_LEN + self.config.mtu as usize];

        loop {
            let received = self
                .transport
                .recv_from(&mut buf, Some(Duration::from_secs(1)))
                .map_err(Error::Transport)?;

            let Some((n, from)) = received else {
                continue;
            };

            let packet = match codec::decode(&buf[..n]) {
                Ok(p) => p,
                Err(DecodeError::ChecksumMismatch { .. }) => {
                    self.state.stats.checksum_errors += 1;
                    debug!("dropped datagram from {from}: checksum mismatch");
                    continue;
                }
                Err(e) => {
                    debug!("dropped malformed datagram from {from}: {e}");
                    continue;
                }
            };

            self.state.stats.packets_received += 1;
            self.state.stats.bytes_received += packet.payload.len() as u64;
            self.recorder.record(Direction::Rcv, &packet);

            if self.on_segment(&packet, from)? {
                return Ok(());
            }
        }
    }

    /// Returns `Ok(true)` once the connection has reached `Closed`.
    fn on_segment(&mut self, packet: &Packet, from: SocketAddr) -> Result<bool, Error> {
        match self.state.state {
            State::Listen => {
                if packet.syn && !packet.ack {
                    self.state.peer = Some(from);
                    self.state.expected_seq = packet.sequence.wrapping_add(1);

                    let synack =
                        Packet::syn_ack(self.state.send_seq, self.state.expected_seq, packet.timestamp);
                    self.state.send_seq = self.state.send_seq.wrapping_add(1);
                    self.send(&synack, from)?;

                    self.state.state = State::Established;
                    info!("handshake complete with {from}");
                }
                Ok(false)
            }
            State::Established => {
                if self.state.peer != Some(from) {
                    return Ok(false);
                }

                if packet.payload.len() as u32 > self.config.mtu {
                    debug!("dropped oversize payload ({} bytes) from {from}", packet.payload.len());
                    return Ok(false);
                }

                if packet.fin {
                    let finack = Packet::fin_ack(
                        self.state.send_seq,
                        packet.sequence.wrapping_add(1),
                        packet.timestamp,
                    );
                    self.state.send_seq = self.state.send_seq.wrapping_add(1);
                    self.send(&finack, from)?;

                    self.out.flush().map_err(Error::File)?;
                    self.state.state = State::Closed;
                    self.state.stats.print();
                    info!("connection closed by peer FIN");
                    return Ok(true);
                }

                if !packet.payload.is_empty() {
                    self.on_payload(packet, from)?;
                }

                Ok(false)
            }
            State::Closed => Ok(true),
        }
    }

    fn on_payload(&mut self, packet: &Packet, from: SocketAddr) -> Result<(), Error> {
        if !self.state.in_window(packet.sequence) {
            self.ack(packet, from)?;
            return Ok(());
        }

        if packet.sequence == self.state.expected_seq {
            self.write_payload(&packet.payload)?;
            self.state.expected_seq = self.state.expected_seq.wrapping_add(packet.payload.len() as u32);

            for payload in self.state.drain_reassembly() {
                self.write_payload(&payload)?;
            }

            self.ack(packet, from)?;
        } else {
            self.state
                .reassembly
                .insert(packet.sequence, packet.payload.clone());
            self.state.stats.out_of_order += 1;
            warn!(
                "out-of-order segment seq={} while expecting {}",
                packet.sequence, self.state.expected_seq
            );
            self.ack(packet, from)?;
        }

        Ok(())
    }

    fn write_payload(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.out.write_all(payload).map_err(Error::File)
    }

    fn ack(&mut self, incoming: &Packet, from: SocketAddr) -> Result<(), Error> {
        let ack = Packet::ack_only(self.state.send_seq, self.state.expected_seq, incoming.timestamp);
        self.send(&ack, from)
    }

    fn send(&mut self, packet: &Packet, to: SocketAddr) -> Result<(), Error> {
        let bytes = codec::encode(packet);
        self.transport.send_to(&bytes, to).map_err(Error::Transport)?;
        self.recorder.record(Direction::Snd, packet);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ChannelEndpoint, ChannelPair};
    use std::io::Cursor;

    fn receiver(ep: ChannelEndpoint, window: u32) -> Receiver<ChannelEndpoint, Cursor<Vec<u8>>> {
        Receiver::new(ep, Cursor::new(Vec::new()), Config::new(1500, window).unwrap())
    }

    #[test]
    fn listen_ignores_non_syn() {
        let pair = ChannelPair::new();
        let mut r = receiver(pair.a, 8);
        let addr = pair.addr_b;
        let handled = r
            .on_segment(&Packet::ack_only(0, 0, 0), addr)
            .unwrap();
        assert!(!handled);
        assert_eq!(r.state.state, State::Listen);
    }

    #[test]
    fn syn_transitions_to_established() {
        let pair = ChannelPair::new();
        let mut r = receiver(pair.a, 8);
        let addr = pair.addr_b;
        r.on_segment(&Packet::syn(41, 7), addr).unwrap();
        assert_eq!(r.state.state, State::Established);
        assert_eq!(r.state.expected_seq, 42);
    }

    #[test]
    fn in_order_payload_advances_expected_seq_and_writes_file() {
        let pair = ChannelPair::new();
        let mut r = receiver(pair.a, 8);
        let addr = pair.addr_b;
        r.on_segment(&Packet::syn(0, 0), addr).unwrap();
        r.on_segment(&Packet::data(1, 0, 0, vec![1, 2, 3]), addr)
            .unwrap();
        assert_eq!(r.state.expected_seq, 4);
        assert_eq!(r.out.get_ref(), &[1, 2, 3]);
    }

    #[test]
    fn out_of_order_payload_is_buffered_then_drained() {
        let pair = ChannelPair::new();
        let mut r = receiver(pair.a, 8);
        let addr = pair.addr_b;
        r.on_segment(&Packet::syn(0, 0), addr).unwrap();
        r.on_segment(&Packet::data(5, 0, 0, vec![9, 9]), addr)
            .unwrap();
        assert_eq!(r.state.stats.out_of_order, 1);
        assert_eq!(r.state.expected_seq, 1);

        r.on_segment(&Packet::data(1, 0, 0, vec![1, 2, 3, 4]), addr)
            .unwrap();
        assert_eq!(r.state.expected_seq, 7);
        assert_eq!(r.out.get_ref(), &[1, 2, 3, 4, 9, 9]);
    }

    #[test]
    fn duplicate_head_after_drain_is_out_of_window() {
        let pair = ChannelPair::new();
        let mut r = receiver(pair.a, 8);
        let addr = pair.addr_b;
        r.on_segment(&Packet::syn(0, 0), addr).unwrap();
        r.on_segment(&Packet::data(1, 0, 0, vec![1, 2, 3]), addr)
            .unwrap();
        assert_eq!(r.state.expected_seq, 4);

        // Re-delivery of the already-consumed head: must not rewrite it.
        r.on_segment(&Packet::data(1, 0, 0, vec![1, 2, 3]), addr)
            .unwrap();
        assert_eq!(r.out.get_ref(), &[1, 2, 3]);
    }

    #[test]
    fn fin_closes_connection() {
        let pair = ChannelPair::new();
        let mut r = receiver(pair.a, 8);
        let addr = pair.addr_b;
        r.on_segment(&Packet::syn(0, 0), addr).unwrap();
        let closed = r.on_segment(&Packet::fin(4, 0, 0), addr).unwrap();
        assert!(closed);
        assert_eq!(r.state.state, State::Closed);
    }
}
