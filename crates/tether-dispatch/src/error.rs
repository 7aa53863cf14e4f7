use thiserror::Error;

/// Terminal outcome of a request that did not produce its handler's value.
#[derive(Debug, Error)]
pub enum DispatchError<E> {
    /// Canceled before admission, or while running.
    #[error("request canceled")]
    Canceled,

    /// The handler panicked. The dispatcher state is unaffected.
    #[error("request faulted: {0}")]
    Faulted(String),

    /// Submitted during, or still queued at, shutdown.
    #[error("request rejected: dispatcher is shutting down")]
    QueueRejected,

    /// The handler returned an error.
    #[error("{0}")]
    Handler(E),
}
