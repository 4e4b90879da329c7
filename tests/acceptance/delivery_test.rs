//! Delivery acceptance tests.
//!
//! A slow consumer drains small queues while the generator emits faster
//! than it can keep up. Every event the generator counts as sent must reach
//! the consumer exactly once, in order, on both connections.

use super::common::{assert_contiguous_from_one, test_config, wait_until, Harness};
use hsi_common::config::SignalEmulationMode;
use hsi_dataformats::{FrameBytes, HsiEvent, HsiFrame};
use hsi_runtime::frame_processor::FrameProcessor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_no_loss_under_backpressure() {
    let mut config = test_config(2000.0);
    config.connections.queue_capacity = 4;
    let mut harness = Harness::new(&config);
    let outputs = harness.attach(&config);

    let done = Arc::new(AtomicBool::new(false));
    let consumed = Arc::new(AtomicUsize::new(0));
    let consumer = {
        let done = Arc::clone(&done);
        let consumed = Arc::clone(&consumed);
        thread::spawn(move || {
            let mut events: Vec<HsiEvent> = Vec::new();
            let mut frames: Vec<FrameBytes> = Vec::new();
            while !done.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(2));
                if let Ok(event) = outputs.events.try_recv() {
                    events.push(event);
                    consumed.store(events.len(), Ordering::Relaxed);
                }
                if let Ok(frame) = outputs.frames.try_recv() {
                    frames.push(frame);
                }
            }
            events.extend(outputs.events.drain());
            frames.extend(outputs.frames.drain());
            (events, frames)
        })
    };

    harness.generator.configure(config.clone()).unwrap();
    harness.start_run(1, None);

    assert!(wait_until(Duration::from_secs(10), || consumed.load(Ordering::Relaxed) >= 150));
    harness.generator.stop().unwrap();
    done.store(true, Ordering::Relaxed);
    let (events, frames) = consumer.join().unwrap();

    let counters = harness.generator.info().counters;
    println!(
        "generated {} sent {} frames {} failed {}",
        counters.generated, counters.sent, counters.sent_frames, counters.failed_to_send
    );

    assert!(counters.failed_to_send > 0, "consumer never pushed back");
    assert_eq!(events.len() as u64, counters.sent);
    assert_eq!(frames.len() as u64, counters.sent_frames);
    assert_contiguous_from_one(&events);

    // A stop can abandon at most the one event in flight
    assert!(counters.generated - counters.sent <= 1);
    assert!(counters.sent - counters.sent_frames <= 1);

    for (i, bytes) in frames.iter().enumerate() {
        let frame = HsiFrame::from_bytes(bytes).unwrap();
        assert_eq!(u64::from(frame.sequence), i as u64 + 1);
        assert_eq!(frame.timestamp, events[i].timestamp);
    }
    assert_eq!(counters.last_sent_timestamp, events[events.len() - 1].timestamp);
}

/// Frames decode, validate cleanly and carry the offset timestamp of their event.
#[test]
fn test_end_to_end_frame_validation() {
    for offset in [0i64, 12_345, -4_000] {
        let mut config = test_config(1000.0);
        config.generator.timestamp_offset = offset;
        config.generator.signal_emulation_mode = SignalEmulationMode::PoissonPerBit;
        config.generator.mean_signal_multiplicity = 0.1;
        let mut harness = Harness::new(&config);
        let outputs = harness.attach(&config);

        harness.generator.configure(config.clone()).unwrap();
        harness.start_run(11, None);
        assert!(harness.wait_for_generated(100, Duration::from_secs(5)));
        harness.generator.stop().unwrap();

        let events = outputs.events.drain();
        let frames = outputs.frames.drain();
        assert_eq!(events.len(), frames.len());

        let mut processor = FrameProcessor::new();
        for (event, bytes) in events.iter().zip(&frames) {
            let frame = processor.process(bytes).expect("frame decodes");
            assert_eq!(frame.timestamp, event.timestamp);
            assert_eq!(frame.trigger, event.signal_map);
            assert_eq!(u64::from(frame.sequence), event.sequence_counter);
            assert_eq!(event.device_id(), 3);
            assert_eq!(event.run_number, 11);

            // The estimate starts at the anchor, the offset shifts it
            let base = super::common::TIMESYNC_BASE.saturating_add_signed(offset);
            assert!(event.timestamp >= base, "timestamp {} below {base}", event.timestamp);
        }

        let stats = processor.stats();
        assert_eq!(stats.processed, events.len() as u64);
        assert_eq!(processor.integrity_errors(), 0, "offset {offset}");
        assert_eq!(stats.last_timestamp, events[events.len() - 1].timestamp);
    }
}

/// The trigger map is the signal map masked by the enabled signals.
#[test]
fn test_trigger_mask() {
    for mask in [u32::MAX, 0x0000_00FF, 0xA5A5_A5A5, 0x8000_0000] {
        let mut config = test_config(2000.0);
        config.generator.signal_emulation_mode = SignalEmulationMode::UniformRandom;
        config.generator.enabled_signals = mask;
        let mut harness = Harness::new(&config);
        let outputs = harness.attach(&config);

        harness.generator.configure(config.clone()).unwrap();
        harness.start_run(1, None);
        assert!(harness.wait_for_generated(50, Duration::from_secs(5)), "mask {mask:#x}");
        harness.generator.stop().unwrap();

        let (events, frames) = outputs.drain();
        assert!(!events.is_empty());
        for (event, frame) in events.iter().zip(&frames) {
            assert_eq!(frame.trigger, frame.input_low & mask);
            assert_eq!(event.signal_map, frame.trigger);
            assert_ne!(event.signal_map, 0);
            assert_eq!(frame.input_high, 0);
        }
    }
}

/// An empty mask never triggers.
#[test]
fn test_empty_mask_never_emits() {
    let mut config = test_config(2000.0);
    config.generator.signal_emulation_mode = SignalEmulationMode::UniformRandom;
    config.generator.enabled_signals = 0;
    let mut harness = Harness::new(&config);
    let outputs = harness.attach(&config);

    harness.generator.configure(config.clone()).unwrap();
    harness.start_run(1, None);
    thread::sleep(Duration::from_millis(200));
    harness.generator.stop().unwrap();

    let (events, frames) = outputs.drain();
    assert!(events.is_empty());
    assert!(frames.is_empty());
    assert_eq!(harness.generator.counters().generated(), 0);
}
