//! In-process data handler.
//!
//! Drains the structured event and raw frame connections on one thread,
//! validating every frame and checking that event sequence numbers are
//! contiguous.

use hsi_common::cancel::CancelToken;
use hsi_common::error::{HsiError, HsiResult};
use hsi_dataformats::{FrameBytes, HsiEvent};
use hsi_link::ChannelReceiver;
use hsi_runtime::frame_processor::{FrameProcessor, FrameProcessorStats, DATA_INTEGRITY_ERROR};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Live counters readable while the handler runs.
#[derive(Debug, Default)]
pub struct ConsumerCounters {
    events: AtomicU64,
    frames: AtomicU64,
    integrity_errors: AtomicU64,
}

impl ConsumerCounters {
    /// Structured events received.
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Raw frames decoded.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Integrity violations across both streams.
    pub fn integrity_errors(&self) -> u64 {
        self.integrity_errors.load(Ordering::Relaxed)
    }
}

/// Final statistics returned by [`DataHandler::stop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Structured events received.
    pub events: u64,
    /// Events whose sequence number did not follow the previous one.
    pub sequence_gaps: u64,
    /// Raw frame statistics.
    pub frames: FrameProcessorStats,
}

/// Consumer thread handle. Stops on drop.
#[derive(Debug)]
pub struct DataHandler {
    cancel: CancelToken,
    counters: Arc<ConsumerCounters>,
    handle: Option<JoinHandle<ConsumerReport>>,
}

impl DataHandler {
    /// Start draining `events` and `frames`.
    ///
    /// # Errors
    ///
    /// Returns [`HsiError::Thread`] if the consumer thread cannot be spawned.
    pub fn start(
        events: ChannelReceiver<HsiEvent>,
        frames: ChannelReceiver<FrameBytes>,
    ) -> HsiResult<Self> {
        let cancel = CancelToken::new();
        let counters = Arc::new(ConsumerCounters::default());

        let thread_cancel = cancel.clone();
        let thread_counters = Arc::clone(&counters);
        let handle = thread::Builder::new()
            .name("hsi-dlh".into())
            .spawn(move || {
                let mut consumer = Consumer::new(thread_counters);
                while !thread_cancel.is_cancelled() {
                    consumer.poll(&events, &frames);
                }
                // Take whatever the generator delivered before it stopped
                for event in events.drain() {
                    consumer.on_event(&event);
                }
                for payload in frames.drain() {
                    consumer.on_frame(&payload);
                }
                consumer.report()
            })
            .map_err(|e| HsiError::Thread(format!("failed to spawn data handler: {e}")))?;

        Ok(Self {
            cancel,
            counters,
            handle: Some(handle),
        })
    }

    /// Live counters.
    pub fn counters(&self) -> &Arc<ConsumerCounters> {
        &self.counters
    }

    /// Drain what is queued, stop the thread, and return its statistics.
    pub fn stop(&mut self) -> Option<ConsumerReport> {
        let handle = self.handle.take()?;
        self.cancel.cancel();
        match handle.join() {
            Ok(report) => {
                info!(
                    events = report.events,
                    frames = report.frames.processed,
                    decode_errors = report.frames.decode_errors,
                    sequence_gaps = report.sequence_gaps,
                    "Data handler stopped"
                );
                Some(report)
            }
            Err(_) => {
                warn!("Data handler thread panicked");
                None
            }
        }
    }
}

impl Drop for DataHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Consumer {
    processor: FrameProcessor,
    counters: Arc<ConsumerCounters>,
    events: u64,
    last_sequence: Option<u64>,
    sequence_gaps: u64,
}

impl Consumer {
    fn new(counters: Arc<ConsumerCounters>) -> Self {
        Self {
            processor: FrameProcessor::new(),
            counters,
            events: 0,
            last_sequence: None,
            sequence_gaps: 0,
        }
    }

    fn poll(&mut self, events: &ChannelReceiver<HsiEvent>, frames: &ChannelReceiver<FrameBytes>) {
        if let Ok(payload) = frames.recv_timeout(POLL_TIMEOUT) {
            self.on_frame(&payload);
        }
        while let Ok(event) = events.try_recv() {
            self.on_event(&event);
        }
    }

    fn on_event(&mut self, event: &HsiEvent) {
        self.events += 1;
        self.counters.events.fetch_add(1, Ordering::Relaxed);

        // A run restarts the sequence at 1
        let expected = self.last_sequence.map_or(1, |s| s + 1);
        if event.sequence_counter != expected && event.sequence_counter != 1 {
            self.sequence_gaps += 1;
            self.counters.integrity_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                expected,
                received = event.sequence_counter,
                "{DATA_INTEGRITY_ERROR} HSI event sequence gap"
            );
        }
        self.last_sequence = Some(event.sequence_counter);
    }

    fn on_frame(&mut self, payload: &[u8]) {
        let before = self.processor.integrity_errors() + self.processor.stats().decode_errors;
        if self.processor.process(payload).is_some() {
            self.counters.frames.fetch_add(1, Ordering::Relaxed);
        }
        let after = self.processor.integrity_errors() + self.processor.stats().decode_errors;
        self.counters.integrity_errors.fetch_add(after - before, Ordering::Relaxed);
    }

    fn report(&self) -> ConsumerReport {
        ConsumerReport {
            events: self.events,
            sequence_gaps: self.sequence_gaps,
            frames: self.processor.stats(),
        }
    }
}
