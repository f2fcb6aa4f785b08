//! End-to-end transfer scenarios driven over the in-memory
//! [`rft::test_support`] transport double: no real sockets, no real
//! packet loss, just scripted [`rft::test_support::LinkPolicy`] behavior.

use std::io::Cursor;
use std::sync::Arc;
use std::thread;

use rft::clock::MonotonicClock;
use rft::config::Config;
use rft::receiver::Receiver;
use rft::sender::Sender;
use rft::test_support::{ChannelPair, CorruptOnce, DropSequences, ReorderPairs, Transparent};

fn transfer(payload: Vec<u8>, mtu: u32, window: u32, policy: Arc<dyn rft::test_support::LinkPolicy>) -> Vec<u8> {
    let pair = ChannelPair::with_policy(policy);
    let config = Config::new(mtu, window).unwrap();
    let clock: Arc<dyn rft::clock::Clock> = Arc::new(MonotonicClock::new());

    let receiver_side = thread::spawn(move || {
        let mut receiver = Receiver::new(pair.b, Cursor::new(Vec::new()), config);
        receiver.run().unwrap();
        receiver.into_inner().into_inner()
    });

    let sender = Sender::new(pair.a, pair.addr_b, Cursor::new(payload), config, clock);
    sender.run().unwrap();

    receiver_side.join().unwrap()
}

fn sample_payload(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i % 251) as u8).collect()
}

/// S1: no impairment, byte-exact in-order delivery.
#[test]
fn clean_transfer_is_byte_exact() {
    let payload = sample_payload(253);
    let received = transfer(payload.clone(), 32, 8, Arc::new(Transparent));
    assert_eq!(received, payload);
}

/// S2: a single data segment is lost once; duplicate ACKs from the
/// segments behind it drive a fast retransmit that recovers it without
/// waiting on the retransmission timer.
///
/// With an mtu of 4 and the handshake consuming sequence 0, data segments
/// land on 1, 5, 9, 13, ...; sequence 9 is the third segment.
#[test]
fn single_loss_recovers_via_fast_retransmit() {
    let payload = sample_payload(40);
    let policy = Arc::new(DropSequences::once(vec![9]));
    let received = transfer(payload.clone(), 4, 16, policy);
    assert_eq!(received, payload);
}

/// S3: every adjacent pair of segments arrives swapped; the receiver
/// reassembles them in order via its out-of-order buffer.
#[test]
fn reordered_segments_are_reassembled_in_order() {
    let payload = sample_payload(48);
    let received = transfer(payload.clone(), 4, 16, Arc::new(ReorderPairs::new()));
    assert_eq!(received, payload);
}

/// S4: a loss further into the stream, with more segments in flight
/// behind it, so at least three duplicate ACKs land before the fast
/// retransmit fires (rather than relying on only one or two).
///
/// Sequence 25 is the sixth segment, leaving eight more already queued
/// behind it within the window.
#[test]
fn loss_mid_stream_with_several_segments_in_flight_recovers() {
    let payload = sample_payload(60);
    let policy = Arc::new(DropSequences::once(vec![25]));
    let received = transfer(payload.clone(), 4, 16, policy);
    assert_eq!(received, payload);
}

/// S5: one segment arrives with a corrupted payload; the receiver drops
/// it silently on checksum mismatch, and the resulting duplicate ACKs
/// recover it the same way a dropped segment would.
#[test]
fn corrupted_segment_is_dropped_and_recovered() {
    let payload = sample_payload(40);
    let policy = Arc::new(CorruptOnce::new(9));
    let received = transfer(payload.clone(), 4, 16, policy);
    assert_eq!(received, payload);
}
