//! Named connection registry.
//!
//! Modules refer to their outputs by name in configuration. The registry
//! owns one typed connection per name and hands out producer and consumer
//! ends on request; resolving a consumer end marks the connection ready.

use crate::connection::{connection, ChannelReceiver, ChannelSender};
use hsi_common::error::{HsiError, HsiResult};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

/// Both ends of a declared connection.
struct Endpoints<T> {
    sender: ChannelSender<T>,
    receiver: ChannelReceiver<T>,
}

/// Registry of named, typed connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, Box<dyn Any + Send>>>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<&String> = connections.keys().collect();
        names.sort();
        f.debug_struct("ConnectionRegistry")
            .field("connections", &names)
            .finish()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a connection carrying `T`.
    ///
    /// Declaring an existing name replaces the previous connection.
    pub fn declare<T: Send + 'static>(&self, name: &str, capacity: usize) {
        let (sender, receiver) = connection::<T>(name, capacity);
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        if connections
            .insert(name.to_string(), Box::new(Endpoints { sender, receiver }))
            .is_some()
        {
            debug!(connection = name, "Replaced existing connection");
        }
        info!(connection = name, capacity, "Connection declared");
    }

    /// Whether `name` has been declared.
    pub fn contains(&self, name: &str) -> bool {
        let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        connections.contains_key(name)
    }

    /// Resolve the producer end of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HsiError::ConnectionNotFound`] if the name is unknown or
    /// was declared with a different item type.
    pub fn sender<T: Send + 'static>(&self, name: &str) -> HsiResult<ChannelSender<T>> {
        self.with_endpoints::<T, _>(name, |endpoints| endpoints.sender.clone())
    }

    /// Resolve the consumer end of `name` and mark the connection ready.
    ///
    /// # Errors
    ///
    /// Returns [`HsiError::ConnectionNotFound`] if the name is unknown or
    /// was declared with a different item type.
    pub fn receiver<T: Send + 'static>(&self, name: &str) -> HsiResult<ChannelReceiver<T>> {
        let receiver = self.with_endpoints::<T, _>(name, |endpoints| endpoints.receiver.clone())?;
        receiver.attach();
        Ok(receiver)
    }

    fn with_endpoints<T: Send + 'static, R>(
        &self,
        name: &str,
        f: impl FnOnce(&Endpoints<T>) -> R,
    ) -> HsiResult<R> {
        let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        connections
            .get(name)
            .and_then(|entry| entry.downcast_ref::<Endpoints<T>>())
            .map(f)
            .ok_or_else(|| HsiError::ConnectionNotFound {
                name: name.to_string(),
            })
    }
}
