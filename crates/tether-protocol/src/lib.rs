//! Wire protocol for tether.
//!
//! Host and worker exchange length-framed JSON messages over a byte stream
//! (the worker's stdio in production, an in-memory duplex in tests). Each
//! frame is a [`Message`]: a request (has an id and a method), a response
//! (has the id of the request it answers and a result or an error), or a
//! notification (a method without an id, never answered).
//!
//! Method names are stable strings defined in [`methods`], each with a
//! typed parameter struct.

pub mod codec;
pub mod error;
pub mod message;
pub mod methods;

pub use codec::{FrameCodec, MAX_FRAME_SIZE};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{decode_params, encode_params, ErrorCode, Message, RemoteError};
pub use methods::{
    Asset, CancelParams, FetchAssetsParams, FetchAssetsResult, InvokeParams, ReleasePinParams,
    SetPrimaryParams, SetPrimaryResult, SynchronizeParams, SynchronizeResult,
    MAX_ASSET_BATCH_BYTES,
};
