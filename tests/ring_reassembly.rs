//! Scenario tests for the reassembly ring: resync, overflow, boundary
//! conditions, and cross-thread producer/consumer behavior.

use std::thread;
use std::time::{Duration, Instant};

use sliplink::slip::ring::bounded;
use sliplink::slip::{FlowControl, WakeHint, END, ESC, ESC_END, ESC_XON, XON};

fn feed_all(feeder: &mut sliplink::slip::ByteFeeder, bytes: &[u8]) -> Vec<WakeHint> {
    bytes.iter().map(|&b| feeder.feed_byte(b)).collect()
}

#[test]
fn malformed_escape_discards_frame_and_resyncs() {
    let (mut feeder, mut drain) = bounded(64, FlowControl::None);

    // ESC followed by a non-marker poisons the first frame; everything up to
    // the next delimiter goes with it.
    feed_all(&mut feeder, &[END, 0x41, ESC, 0x00, 0x42, 0x42]);
    feed_all(&mut feeder, &[END, 0x43, END]);

    let mut out = [0u8; 16];
    assert_eq!(drain.drain_frame(&mut out), 1);
    assert_eq!(out[0], 0x43);
    assert_eq!(drain.drain_frame(&mut out), 0);

    let stats = drain.stats();
    assert_eq!(stats.bad_escapes, 1);
    assert_eq!(stats.discarded_bytes, 2, "the two bytes after the bad pair");
    assert_eq!(stats.frames_sealed, 1);
}

#[test]
fn esc_end_pair_is_a_bad_escape_not_a_delimiter() {
    let (mut feeder, mut drain) = bounded(64, FlowControl::None);

    // A raw END directly after ESC must not seal the frame.
    let hints = feed_all(&mut feeder, &[END, 0x41, ESC, END]);
    assert!(hints.iter().all(|h| *h != WakeHint::FrameSealed));
    assert_eq!(feeder.stats().bad_escapes, 1);

    let mut out = [0u8; 16];
    assert_eq!(drain.drain_frame(&mut out), 0);
}

#[test]
fn overflow_preserves_sealed_frames() {
    let (mut feeder, mut drain) = bounded(8, FlowControl::None);

    // Seal a two byte frame, then try to feed one that cannot fit.
    feed_all(&mut feeder, &[END, 0x41, 0x41, END]);
    let hints = feed_all(&mut feeder, &[0x51, 0x52, 0x53, 0x54, 0x55]);
    assert!(hints.contains(&WakeHint::BufferFull));
    assert_eq!(feeder.stats().overflows, 1);

    // The sealed frame survived intact.
    let mut out = [0u8; 8];
    assert_eq!(drain.drain_frame(&mut out), 2);
    assert_eq!(&out[..2], &[0x41, 0x41]);
}

#[test]
fn ring_recovers_after_overflow_and_drain() {
    let (mut feeder, mut drain) = bounded(8, FlowControl::None);

    feed_all(&mut feeder, &[END, 0x41, 0x41, END]);
    // Overflow while a frame is queued, then keep feeding garbage.
    feed_all(&mut feeder, &[0x51, 0x52, 0x53, 0x54, 0x55, 0x56]);
    assert_eq!(feeder.stats().overflows, 1);

    let mut out = [0u8; 8];
    assert_eq!(drain.drain_frame(&mut out), 2);

    // After a delimiter the producer is back in business.
    let hints = feed_all(&mut feeder, &[END, 0x61, END]);
    assert_eq!(hints.last(), Some(&WakeHint::FrameSealed));
    assert_eq!(drain.drain_frame(&mut out), 1);
    assert_eq!(out[0], 0x61);
}

#[test]
fn frame_filling_all_but_reserved_slot_is_accepted() {
    // Capacity 8: six payload slots plus the stored delimiter is seven, one
    // slot stays reserved.
    let (mut feeder, mut drain) = bounded(8, FlowControl::None);
    let hints = feed_all(&mut feeder, &[END, 1, 2, 3, 4, 5, 6, END]);
    assert_eq!(hints.last(), Some(&WakeHint::FrameSealed));
    assert_eq!(feeder.stats().overflows, 0);

    let mut out = [0u8; 8];
    assert_eq!(drain.drain_frame(&mut out), 6);
    assert_eq!(&out[..6], &[1, 2, 3, 4, 5, 6]);
}

#[test]
fn frame_one_byte_larger_overflows_at_the_delimiter() {
    let (mut feeder, mut drain) = bounded(8, FlowControl::None);
    let hints = feed_all(&mut feeder, &[END, 1, 2, 3, 4, 5, 6, 7, END]);
    assert_eq!(hints.last(), Some(&WakeHint::BufferFull));
    assert_eq!(feeder.stats().overflows, 1);

    let mut out = [0u8; 8];
    assert_eq!(drain.drain_frame(&mut out), 0);
}

#[test]
fn escape_pair_needs_two_slots() {
    // Six plain bytes leave exactly one free slot besides the reserved one;
    // an escape pair needs two, so the overflow hits on the pair itself.
    let (mut feeder, _drain) = bounded(8, FlowControl::None);
    let hints = feed_all(&mut feeder, &[END, 1, 2, 3, 4, 5, 6, ESC, ESC_END]);
    assert_eq!(hints.last(), Some(&WakeHint::BufferFull));
    assert_eq!(feeder.stats().overflows, 1);
}

#[test]
fn fifo_order_across_wraparound() {
    let (mut feeder, mut drain) = bounded(8, FlowControl::None);
    let mut out = [0u8; 8];

    feed_all(&mut feeder, &[END, 0x41, 0x42, END]);
    assert_eq!(drain.drain_frame(&mut out), 2);

    // This frame's delimiter lands on the last slot and the next frame
    // wraps around the end of the buffer.
    feed_all(&mut feeder, &[0x43, 0x44, 0x45, 0x46, END]);
    feed_all(&mut feeder, &[0x47, END]);

    assert_eq!(drain.drain_frame(&mut out), 4);
    assert_eq!(&out[..4], &[0x43, 0x44, 0x45, 0x46]);
    assert_eq!(drain.drain_frame(&mut out), 1);
    assert_eq!(out[0], 0x47);
    assert_eq!(drain.drain_frame(&mut out), 0);
}

#[test]
fn oversized_frame_is_dropped_for_the_next_one() {
    let (mut feeder, mut drain) = bounded(64, FlowControl::None);
    feed_all(&mut feeder, &[END, 1, 2, 3, 4, 5, 6, END, 7, 8, END]);

    // A four byte output buffer cannot take the six byte frame; the drain
    // drops it and hands over the next frame in the same call.
    let mut small = [0u8; 4];
    assert_eq!(drain.drain_frame(&mut small), 2);
    assert_eq!(&small[..2], &[7, 8]);

    let stats = drain.stats();
    assert_eq!(stats.oversized_drops, 1);
    assert_eq!(stats.frames_delivered, 1);
}

#[test]
fn xon_escape_survives_the_ring_in_xonxoff_mode() {
    let (mut feeder, mut drain) = bounded(64, FlowControl::XonXoff);
    feed_all(&mut feeder, &[END, 0x41, ESC, ESC_XON, 0x42, END]);

    let mut out = [0u8; 8];
    assert_eq!(drain.drain_frame(&mut out), 3);
    assert_eq!(&out[..3], &[0x41, XON, 0x42]);
}

#[test]
fn xon_escape_is_malformed_in_plain_mode() {
    let (mut feeder, mut drain) = bounded(64, FlowControl::None);
    feed_all(&mut feeder, &[END, 0x41, ESC, ESC_XON, 0x42, END, 0x43, END]);

    let mut out = [0u8; 8];
    assert_eq!(drain.drain_frame(&mut out), 1);
    assert_eq!(out[0], 0x43);
    assert_eq!(drain.stats().bad_escapes, 1);
}

#[test]
fn producer_thread_consumer_thread() {
    let (mut feeder, mut drain) = bounded(256, FlowControl::None);

    let frames: Vec<Vec<u8>> = (0u8..50)
        .map(|i| vec![i, i.wrapping_add(1), i.wrapping_add(2)])
        .collect();
    let expected = frames.clone();

    let producer = thread::spawn(move || {
        for frame in frames {
            feeder.feed_byte(END);
            for &byte in &frame {
                // 50 short frames fit a 256 slot ring even if the consumer
                // never runs, so overflow here is a bug.
                assert_ne!(feeder.feed_byte(byte), WakeHint::BufferFull);
            }
            feeder.feed_byte(END);
        }
    });

    let mut received = Vec::new();
    let mut out = [0u8; 64];
    let deadline = Instant::now() + Duration::from_secs(5);
    while received.len() < expected.len() && Instant::now() < deadline {
        let n = drain.drain_frame(&mut out);
        if n == 0 {
            thread::sleep(Duration::from_millis(1));
            continue;
        }
        received.push(out[..n].to_vec());
    }
    producer.join().expect("producer thread panicked");

    assert_eq!(received, expected, "frames must arrive intact and in order");
}
