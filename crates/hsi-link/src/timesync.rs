//! Time-sync subscription.
//!
//! [`TimeSyncReceiver`] drains a time-sync connection on its own thread and
//! hands each sample to the registered [`TimeSyncSink`]. Removing the
//! callback joins that thread, so once [`TimeSyncReceiver::remove_callback`]
//! returns the sink is never invoked again.

use crate::connection::ChannelReceiver;
use crossbeam_channel::RecvTimeoutError;
use hsi_common::cancel::CancelToken;
use hsi_common::error::{HsiError, HsiResult};
use hsi_dataformats::TimeSync;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long the dispatch thread blocks before re-checking for removal.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Consumer of time-sync samples.
pub trait TimeSyncSink: Send + Sync {
    /// Called on the dispatch thread for every received sample.
    fn on_timesync(&self, sample: &TimeSync);
}

/// Active callback registration.
#[derive(Debug)]
struct Dispatcher {
    stop: CancelToken,
    handle: JoinHandle<()>,
}

/// Receives time-sync samples and forwards them to at most one callback.
#[derive(Debug)]
pub struct TimeSyncReceiver {
    receiver: ChannelReceiver<TimeSync>,
    dispatcher: Option<Dispatcher>,
}

impl TimeSyncReceiver {
    /// Wrap the consumer end of a time-sync connection.
    pub fn new(receiver: ChannelReceiver<TimeSync>) -> Self {
        receiver.attach();
        Self {
            receiver,
            dispatcher: None,
        }
    }

    /// Connection name.
    pub fn name(&self) -> &str {
        self.receiver.name()
    }

    /// Whether a callback is currently registered.
    pub fn has_callback(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Register `sink`, replacing any previous callback.
    ///
    /// # Errors
    ///
    /// Returns [`HsiError::Thread`] if the dispatch thread cannot be spawned.
    pub fn add_callback(&mut self, sink: Arc<dyn TimeSyncSink>) -> HsiResult<()> {
        self.remove_callback();

        let stop = CancelToken::new();
        let thread_stop = stop.clone();
        let receiver = self.receiver.clone();

        let handle = thread::Builder::new()
            .name("hsi-timesync".into())
            .spawn(move || {
                debug!(connection = receiver.name(), "Time-sync dispatch thread started");
                while !thread_stop.is_cancelled() {
                    match receiver.recv_timeout(POLL_INTERVAL) {
                        Ok(sample) => sink.on_timesync(&sample),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            warn!(connection = receiver.name(), "Time-sync source disconnected");
                            break;
                        }
                    }
                }
                debug!(connection = receiver.name(), "Time-sync dispatch thread stopped");
            })
            .map_err(|e| HsiError::Thread(format!("failed to spawn time-sync thread: {e}")))?;

        self.dispatcher = Some(Dispatcher { stop, handle });
        info!(connection = self.name(), "Time-sync callback registered");
        Ok(())
    }

    /// Revoke the callback and wait for the dispatch thread to exit.
    pub fn remove_callback(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.stop.cancel();
            if dispatcher.handle.join().is_err() {
                warn!(connection = self.name(), "Time-sync dispatch thread panicked");
            }
            info!(connection = self.name(), "Time-sync callback removed");
        }
    }
}

impl Drop for TimeSyncReceiver {
    fn drop(&mut self) {
        self.remove_callback();
    }
}
