use thiserror::Error;

/// HSI emulator error types covering configuration, delivery, and run-control failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HsiError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Trigger rate that is not strictly positive where one is required.
    #[error("invalid trigger rate {0} Hz: rate must be greater than zero")]
    InvalidTriggerRate(f64),

    /// A named connection could not be resolved.
    #[error("connection \"{name}\" could not be resolved")]
    ConnectionNotFound {
        /// Connection name that was looked up.
        name: String,
    },

    /// The outbound sender did not become ready within the startup budget.
    #[error("{module}: sender for connection \"{connection}\" not ready after {attempts} attempts")]
    SenderReadyTimeout {
        /// Module that waited for the sender.
        module: String,
        /// Connection name.
        connection: String,
        /// Number of readiness attempts made.
        attempts: u32,
    },

    /// No valid timestamp estimate was obtained before the first tick.
    #[error("failed to get a valid timestamp estimate")]
    TimestampUnavailable,

    /// Send on an outbound connection timed out.
    #[error("send to \"{connection}\" timed out after {timeout_ms}ms")]
    SendTimeout {
        /// Connection name.
        connection: String,
        /// Timeout applied to the attempt, in milliseconds.
        timeout_ms: u64,
    },

    /// The downstream side of a connection has gone away.
    #[error("connection \"{0}\" is disconnected")]
    Disconnected(String),

    /// Raw frame could not be decoded.
    #[error("frame decode error: {0}")]
    FrameDecode(String),

    /// Worker thread could not be spawned or joined.
    #[error("thread error: {0}")]
    Thread(String),

    /// Command not accepted in the current state.
    #[error("command \"{command}\" not allowed in state {state}")]
    InvalidCommand {
        /// Command name.
        command: String,
        /// Current module state.
        state: String,
    },

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// Convenience type alias for HSI operations.
pub type HsiResult<T> = Result<T, HsiError>;
