//! Method names and their parameter and result types.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_store::{ObjectKind, StoredObject};
use tether_types::{Checksum, PinId, RequestId, SnapshotVersion};

use crate::error::{ProtocolError, ProtocolResult};

/// Host → worker: resolve and pin a snapshot. Read-only.
pub const SYNCHRONIZE_SOLUTION: &str = "synchronize-solution";
/// Host → worker: run a language-service method against a snapshot.
pub const INVOKE: &str = "invoke";
/// Host → worker: make a snapshot the worker's primary one. Mutating.
pub const SET_PRIMARY_SOLUTION: &str = "set-primary-solution";
/// Host → worker notification: drop a pin returned by synchronization.
pub const RELEASE_PIN: &str = "release-pin";
/// Worker → host: pull content nodes by checksum.
pub const FETCH_ASSETS: &str = "fetch-assets";
/// Either direction notification: cancel an outstanding request.
pub const CANCEL: &str = "cancel";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizeParams {
    pub checksum: Checksum,
    pub version: SnapshotVersion,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizeResult {
    pub pin: PinId,
    pub checksum: Checksum,
    /// Nodes pulled from the host for this call.
    pub fetched: usize,
    /// The snapshot was already live on the worker.
    pub whole_snapshot_hit: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvokeParams {
    /// Language-service method name.
    pub method: String,
    pub checksum: Checksum,
    pub version: SnapshotVersion,
    /// Pin from an earlier synchronization of the same checksum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<PinId>,
    #[serde(default)]
    pub params: Value,
}

pub type SetPrimaryParams = SynchronizeParams;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPrimaryResult {
    pub previous: Option<Checksum>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePinParams {
    pub pin: PinId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAssetsParams {
    pub checksums: Vec<Checksum>,
}

/// Raw payload bytes one `fetch-assets` reply may carry. Base64 grows this
/// by a third, which keeps a full reply well under `MAX_FRAME_SIZE`.
pub const MAX_ASSET_BATCH_BYTES: usize = 16 * 1024 * 1024;

/// A reply may hold a prefix of the requested assets, bounded by the
/// host's batch budget but never empty; the caller asks again for the rest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAssetsResult {
    pub assets: Vec<Asset>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelParams {
    pub id: RequestId,
}

/// One content node in transit. The payload is base64 so arbitrary bytes
/// survive the JSON frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub checksum: Checksum,
    pub kind: ObjectKind,
    pub data: String,
}

impl Asset {
    pub fn from_object(checksum: Checksum, object: &StoredObject) -> Self {
        Self {
            checksum,
            kind: object.kind,
            data: STANDARD.encode(&object.data),
        }
    }

    /// Decode the payload. The checksum is not verified here.
    pub fn to_object(&self) -> ProtocolResult<StoredObject> {
        let data = STANDARD
            .decode(&self.data)
            .map_err(|e| ProtocolError::Deserialization(format!("asset {}: {e}", self.checksum)))?;
        Ok(StoredObject::new(self.kind, data))
    }
}
