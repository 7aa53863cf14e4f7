//! Request admission for tether.
//!
//! The [`Dispatcher`] is a small state machine over one logical workspace:
//!
//! ```text
//!            mutating                      read-only
//! Idle ─────────────► ExclusiveRunning    Idle ─────► ConcurrentRunning(1)
//!   ▲                       │                 ▲              │ +read-only
//!   └──── completes ────────┘                 └── last done ─┘
//! ```
//!
//! Requests that cannot start immediately wait in a FIFO queue. A read-only
//! request never overtakes a queued mutating one, so admission follows
//! arrival order across the mutating/read-only boundary while read-only
//! requests admitted together run concurrently.

pub mod dispatcher;
pub mod error;

pub use dispatcher::{Dispatcher, DispatcherState, RequestMode};
pub use error::DispatchError;
