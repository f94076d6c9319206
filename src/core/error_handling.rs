//! Generic error handling utilities
//!
//! Fatal errors reach the binary from two places: configuration (something
//! the operator can fix) and the log store (something the operator has to
//! investigate). This module decides how much of each to show.

/// Trait for errors that can distinguish between user-actionable and system errors
///
/// When `is_user_actionable()` returns `true`, `user_message()` must return
/// `Some(message)`; otherwise it returns `None`.
pub trait ContextualError: std::error::Error {
    /// Returns true if this error carries a message the operator can act on
    /// directly (invalid option, unreadable config file)
    fn is_user_actionable(&self) -> bool;

    /// The specific operator-facing message, if any
    fn user_message(&self) -> Option<&str>;
}

/// Log errors with appropriate detail level based on error specificity
///
/// User-actionable errors print their own message; system errors print the
/// operation context and keep the detail at debug level.
///
/// # Examples
/// ```rust,no_run
/// use disruptor::core::error_handling::log_error_with_context;
/// use disruptor::queue::QueueError;
///
/// let err = QueueError::Config { message: "shard_count must be at least 1".to_string() };
/// log_error_with_context(&err, "Producer construction");
/// // Logs: "FATAL: shard_count must be at least 1"
/// ```
pub fn log_error_with_context<E: ContextualError + std::fmt::Display + std::fmt::Debug>(
    error: &E,
    operation_context: &str,
) {
    match error.user_message() {
        Some(user_msg) if error.is_user_actionable() => log::error!("FATAL: {}", user_msg),
        _ => log::error!("FATAL: {}", operation_context),
    }
    log::debug!("DETAIL: {}", error);
    log::debug!("DEBUG_DETAILS: {:?}", error);
}
