//! Global operation registry for tether.
//!
//! Disruptive operations (a solution reload, a bulk edit) register while
//! they run. Background consumers subscribe and pause on
//! [`GlobalOperationEvent::Started`], resuming only on
//! [`GlobalOperationEvent::Stopped`], which fires once the last overlapping
//! operation has released its registration.
//!
//! The registry is explicit state: create one at process start, hand
//! clones to the components that need it, and drop it at exit.

pub mod registry;

pub use registry::{GlobalOperationEvent, GlobalOperationRegistration, GlobalOperationRegistry};
