//! Error types for the resilience layer.

/// Errors raised while guarding the server.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    /// The OS refused to install a signal handler.
    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[from] std::io::Error),

    /// Work panicked and was contained by [`contain`](crate::contain).
    #[error("panic in {label}: {message}")]
    Panicked { label: String, message: String },
}
