//! Bounded in-process connections.
//!
//! A connection is a bounded crossbeam channel plus a readiness flag. The
//! flag is raised when a consumer attaches, which is what a producer's
//! readiness probe waits for. Items sent before any consumer attaches are
//! buffered up to the queue capacity.

use crate::{OutputSender, SendError};
use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError,
};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::debug;

/// Attachment state shared by both ends of a connection.
#[derive(Debug, Default)]
struct Readiness {
    attached: Mutex<bool>,
    changed: Condvar,
}

impl Readiness {
    fn attach(&self) {
        let mut attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        *attached = true;
        self.changed.notify_all();
    }

    fn wait_attached(&self, timeout: Duration) -> bool {
        let attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        let (attached, _) = self
            .changed
            .wait_timeout_while(attached, timeout, |attached| !*attached)
            .unwrap_or_else(|e| e.into_inner());
        *attached
    }
}

/// Create a bounded connection named `name`.
///
/// The receiver is returned detached; call [`ChannelReceiver::attach`]
/// (or resolve it through the registry) to signal readiness to producers.
pub fn connection<T>(name: &str, capacity: usize) -> (ChannelSender<T>, ChannelReceiver<T>) {
    let (tx, rx) = bounded(capacity.max(1));
    let readiness = Arc::new(Readiness::default());
    let name: Arc<str> = Arc::from(name);

    (
        ChannelSender {
            name: Arc::clone(&name),
            tx,
            readiness: Arc::clone(&readiness),
        },
        ChannelReceiver { name, rx, readiness },
    )
}

/// Producer end of a connection.
#[derive(Debug)]
pub struct ChannelSender<T> {
    name: Arc<str>,
    tx: Sender<T>,
    readiness: Arc<Readiness>,
}

impl<T> Clone for ChannelSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
            readiness: Arc::clone(&self.readiness),
        }
    }
}

impl<T> ChannelSender<T> {
    /// Number of items waiting in the queue.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }
}

impl<T: Send> OutputSender<T> for ChannelSender<T> {
    fn send(&self, item: T, timeout: Duration) -> Result<(), SendError<T>> {
        self.tx.send_timeout(item, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(item) => SendError::Timeout(item),
            SendTimeoutError::Disconnected(item) => SendError::Disconnected(item),
        })
    }

    fn is_ready_for_sending(&self, timeout: Duration) -> bool {
        self.readiness.wait_attached(timeout)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Consumer end of a connection.
#[derive(Debug)]
pub struct ChannelReceiver<T> {
    name: Arc<str>,
    rx: Receiver<T>,
    readiness: Arc<Readiness>,
}

impl<T> Clone for ChannelReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            rx: self.rx.clone(),
            readiness: Arc::clone(&self.readiness),
        }
    }
}

impl<T> ChannelReceiver<T> {
    /// Mark the connection as having a consumer.
    pub fn attach(&self) {
        debug!(connection = %self.name, "Consumer attached");
        self.readiness.attach();
    }

    /// Connection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `timeout` for the next item.
    ///
    /// # Errors
    ///
    /// Returns [`RecvTimeoutError`] on timeout or when every sender is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Take the next item without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`TryRecvError`] if the queue is empty or disconnected.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }

    /// Take everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }
}
