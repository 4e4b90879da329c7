//! Connection layer between the emulator and its downstream consumers.
//!
//! This crate provides:
//! - [`OutputSender`] trait for abstracting an outbound connection
//! - [`connection`] module with bounded in-process connections and readiness tracking
//! - [`registry`] module resolving connection names to typed endpoints
//! - [`timesync`] module delivering time-sync samples to a revocable callback

pub mod connection;
pub mod registry;
pub mod timesync;

pub use connection::*;
pub use registry::*;
pub use timesync::*;

use std::time::Duration;

/// Failed send; the item is handed back so the caller can retry it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError<T> {
    /// The connection did not accept the item within the timeout.
    #[error("send timed out")]
    Timeout(T),
    /// The receiving side has gone away.
    #[error("connection disconnected")]
    Disconnected(T),
}

impl<T> SendError<T> {
    /// Recover the item that failed to send.
    pub fn into_inner(self) -> T {
        match self {
            Self::Timeout(item) | Self::Disconnected(item) => item,
        }
    }

    /// Whether this was a timeout rather than a disconnect.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Outbound connection abstraction.
///
/// This trait lets the dispatcher deliver messages without knowing the
/// transport behind a connection name, so tests can inject senders that
/// time out on demand.
pub trait OutputSender<T>: Send + Sync {
    /// Attempt to send one item, blocking for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns the item inside a [`SendError`] if it was not accepted.
    fn send(&self, item: T, timeout: Duration) -> Result<(), SendError<T>>;

    /// Wait up to `timeout` for a consumer to be attached.
    ///
    /// Returns `true` once the connection can deliver.
    fn is_ready_for_sending(&self, timeout: Duration) -> bool;

    /// Connection name, for logging.
    fn name(&self) -> &str;
}

impl<T, S: OutputSender<T> + ?Sized> OutputSender<T> for std::sync::Arc<S> {
    fn send(&self, item: T, timeout: Duration) -> Result<(), SendError<T>> {
        (**self).send(item, timeout)
    }

    fn is_ready_for_sending(&self, timeout: Duration) -> bool {
        (**self).is_ready_for_sending(timeout)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
