//! Reliable dual-channel delivery of generated events.
//!
//! Every event goes out twice: as a structured [`HsiEvent`] and as an encoded
//! raw frame. Each channel is retried until it accepts the item, so nothing is
//! dropped and nothing is reordered within a channel. Only a stop request can
//! end a retry loop early.

use hsi_common::cancel::CancelToken;
use hsi_common::config::StartupConfig;
use hsi_common::error::{HsiError, HsiResult};
use hsi_common::metrics::GeneratorCounters;
use hsi_dataformats::{FrameBytes, HsiEvent, HsiFrame};
use hsi_link::OutputSender;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Outbound connection for structured events.
pub type EventOutput = Box<dyn OutputSender<HsiEvent>>;

/// Outbound connection for raw frames.
pub type FrameOutput = Box<dyn OutputSender<FrameBytes>>;

/// Sent-event interval between progress messages.
const PROGRESS_INTERVAL: u64 = 200_000;

/// Result of handing one event to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Both channels accepted the event.
    Delivered,
    /// A stop request arrived while a channel was still refusing the event.
    Abandoned,
}

/// Sends events and frames on their connections, retrying on backpressure.
pub struct HsiEventSender {
    module: String,
    events: EventOutput,
    frames: FrameOutput,
    send_timeout: Duration,
    counters: Arc<GeneratorCounters>,
}

impl std::fmt::Debug for HsiEventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HsiEventSender")
            .field("module", &self.module)
            .field("events", &self.events.name())
            .field("frames", &self.frames.name())
            .field("send_timeout", &self.send_timeout)
            .finish()
    }
}

impl HsiEventSender {
    /// Create a dispatcher updating `counters`.
    pub fn new(
        module: &str,
        events: EventOutput,
        frames: FrameOutput,
        send_timeout: Duration,
        counters: Arc<GeneratorCounters>,
    ) -> Self {
        Self {
            module: module.to_string(),
            events,
            frames,
            send_timeout,
            counters,
        }
    }

    /// Shared counters this dispatcher updates.
    pub fn counters(&self) -> &Arc<GeneratorCounters> {
        &self.counters
    }

    /// Wait for both connections to have a consumer.
    ///
    /// Each connection gets a quick probe, then up to `ready_attempts`
    /// waits of `ready_wait`.
    ///
    /// # Errors
    ///
    /// Returns [`HsiError::SenderReadyTimeout`] naming the first connection
    /// that did not become ready.
    pub fn ready_to_send(&self, startup: &StartupConfig) -> HsiResult<()> {
        self.wait_ready(self.events.name(), |t| self.events.is_ready_for_sending(t), startup)?;
        self.wait_ready(self.frames.name(), |t| self.frames.is_ready_for_sending(t), startup)
    }

    fn wait_ready(
        &self,
        connection: &str,
        is_ready: impl Fn(Duration) -> bool,
        startup: &StartupConfig,
    ) -> HsiResult<()> {
        if is_ready(startup.initial_probe) {
            return Ok(());
        }

        for attempt in 1..=startup.ready_attempts {
            info!(
                module = %self.module,
                connection,
                attempt,
                max_attempts = startup.ready_attempts,
                "Waiting for connection to become ready"
            );
            if is_ready(startup.ready_wait) {
                return Ok(());
            }
        }

        Err(HsiError::SenderReadyTimeout {
            module: self.module.clone(),
            connection: connection.to_string(),
            attempts: startup.ready_attempts,
        })
    }

    /// Deliver `event` and its raw `frame`, structured channel first.
    ///
    /// Blocks until both channels accept or `cancel` is observed between attempts.
    pub fn send(&self, event: HsiEvent, frame: &HsiFrame, cancel: &CancelToken) -> Delivery {
        debug!(
            connection = self.events.name(),
            header = event.header,
            signal_map = format_args!("{:032b}", event.signal_map),
            timestamp = event.timestamp,
            sequence = event.sequence_counter,
            "Sending HSI event"
        );

        let timestamp = event.timestamp;
        if !self.send_with_retry(&*self.events, event, cancel) {
            return Delivery::Abandoned;
        }
        self.counters.record_sent(timestamp);

        let sent = self.counters.sent();
        if sent % PROGRESS_INTERVAL == 0 {
            debug!(sent, "Progress: HSI events sent");
        }

        trace!(
            version = frame.header.version,
            detector_id = frame.header.detector_id,
            timestamp = format_args!("{:#x}", frame.timestamp),
            input_low = format_args!("{:#x}", frame.input_low),
            input_high = format_args!("{:#x}", frame.input_high),
            trigger = format_args!("{:#x}", frame.trigger),
            sequence = frame.sequence,
            "Sending raw HSI frame"
        );

        if !self.send_with_retry(&*self.frames, frame.to_bytes(), cancel) {
            return Delivery::Abandoned;
        }
        self.counters.record_sent_frame();

        Delivery::Delivered
    }

    /// Retry `item` on `sender` until accepted. Returns `false` if abandoned.
    fn send_with_retry<T>(
        &self,
        sender: &dyn OutputSender<T>,
        item: T,
        cancel: &CancelToken,
    ) -> bool {
        let timeout_ms = u64::try_from(self.send_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut item = item;
        let mut failures: u64 = 0;

        loop {
            match sender.send(item, self.send_timeout) {
                Ok(()) => {
                    if failures > 0 {
                        info!(connection = sender.name(), failures, "Delivered after retries");
                    }
                    return true;
                }
                Err(err) => {
                    self.counters.record_failed_send();
                    failures += 1;

                    let disconnected = !err.is_timeout();
                    if failures == 1 {
                        warn!(
                            module = %self.module,
                            connection = sender.name(),
                            timeout_ms,
                            disconnected,
                            "Push to output connection failed, retrying"
                        );
                    } else {
                        trace!(connection = sender.name(), failures, "Retrying send");
                    }
                    item = err.into_inner();

                    if cancel.is_cancelled() {
                        warn!(
                            connection = sender.name(),
                            failures,
                            "Stop requested, abandoning undelivered item"
                        );
                        return false;
                    }

                    // A disconnected channel fails instantly; pace the retries.
                    if disconnected && !cancel.sleep_for(self.send_timeout, self.send_timeout) {
                        warn!(
                            connection = sender.name(),
                            "Stop requested, abandoning undelivered item"
                        );
                        return false;
                    }
                }
            }
        }
    }
}
