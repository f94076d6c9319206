//! Asynchronous error reporting
//!
//! Background workers cannot return errors to anyone, so they report them.
//! Every report is logged; when the caller configured an [`ErrorSink`] it is
//! told as well.

use crate::queue::error::QueueError;
use std::sync::Arc;

/// Receives errors raised by background flushes and shard readers
///
/// Called from worker tasks, possibly several at once, so implementations
/// must be cheap and must not block. Any `Fn(&QueueError)` closure works:
///
/// ```rust
/// use disruptor::queue::{ErrorSink, QueueError};
/// use std::sync::Arc;
///
/// let sink: Arc<dyn ErrorSink> = Arc::new(|err: &QueueError| eprintln!("queue: {}", err));
/// sink.emit_error(&QueueError::Closed);
/// ```
pub trait ErrorSink: Send + Sync {
    fn emit_error(&self, error: &QueueError);
}

impl<F> ErrorSink for F
where
    F: Fn(&QueueError) + Send + Sync,
{
    fn emit_error(&self, error: &QueueError) {
        self(error)
    }
}

/// Logs errors and forwards them to the optional sink
#[derive(Clone, Default)]
pub(crate) struct Reporter {
    sink: Option<Arc<dyn ErrorSink>>,
}

impl Reporter {
    pub(crate) fn new(sink: Option<Arc<dyn ErrorSink>>) -> Self {
        Self { sink }
    }

    /// Something went wrong but the work will be retried or redelivered
    pub(crate) fn warn(&self, error: QueueError) {
        log::warn!("{}", error);
        self.emit(&error);
    }

    /// Something went wrong and the affected work is lost to this process
    pub(crate) fn error(&self, error: QueueError) {
        log::error!("{}", error);
        self.emit(&error);
    }

    fn emit(&self, error: &QueueError) {
        if let Some(sink) = &self.sink {
            sink.emit_error(error);
        }
    }
}
