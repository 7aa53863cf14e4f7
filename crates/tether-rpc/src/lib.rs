//! Bidirectional RPC over a framed byte stream.
//!
//! An [`RpcConnection`] owns a reader task and a writer task over any
//! `AsyncRead`/`AsyncWrite` pair. Both ends may issue requests: the host
//! calls into the worker, and the worker calls back into the host to pull
//! missing content while serving a request.
//!
//! # Contract
//!
//! - Every request yields exactly one response, or the connection closes
//!   first and every outstanding request fails with
//!   [`RpcError::ConnectionLost`].
//! - Canceling a local request sends a `cancel` notification to the peer,
//!   which fires the [`CancellationSignal`](tether_types::CancellationSignal)
//!   handed to its handler.
//! - Closure is terminal. A read or write failure, end of stream, or an
//!   explicit [`RpcClient::close`] all end the connection for good.

pub mod connection;
pub mod error;
pub mod handler;

pub use connection::{RpcClient, RpcConnection};
pub use error::{RpcError, RpcResult};
pub use handler::RequestHandler;
