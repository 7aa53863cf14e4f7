use std::collections::{HashMap, HashSet};

use tether_store::{ContentStore, StoredObject};
use tether_types::Checksum;

use crate::error::{SyncError, SyncResult};

/// Checks pulled nodes before they reach the local store.
pub struct AssetVerifier;

impl AssetVerifier {
    /// Verify a batch received for `requested`.
    ///
    /// Every requested checksum must be answered exactly by a node that
    /// hashes to it; unrequested extras are dropped. Returns the nodes in
    /// request order.
    pub fn verify_batch(
        requested: &[Checksum],
        received: Vec<(Checksum, StoredObject)>,
    ) -> SyncResult<Vec<(Checksum, StoredObject)>> {
        let mut by_checksum: HashMap<Checksum, StoredObject> = received.into_iter().collect();
        requested
            .iter()
            .map(|checksum| {
                let object = by_checksum
                    .remove(checksum)
                    .ok_or(SyncError::Incomplete(*checksum))?;
                object
                    .verify(checksum)
                    .map_err(|e| SyncError::VerificationFailed {
                        checksum: *checksum,
                        reason: e.to_string(),
                    })?;
                Ok((*checksum, object))
            })
            .collect()
    }

    /// Split `checksums` into what `store` already has and what must be
    /// pulled. Duplicates are collapsed.
    pub fn partition_local(
        store: &dyn ContentStore,
        checksums: &[Checksum],
    ) -> SyncResult<(Vec<(Checksum, StoredObject)>, Vec<Checksum>)> {
        let mut seen = HashSet::new();
        let mut present = Vec::new();
        let mut missing = Vec::new();
        for checksum in checksums {
            if !seen.insert(*checksum) {
                continue;
            }
            match store.get(checksum)? {
                Some(object) => present.push((*checksum, object)),
                None => missing.push(*checksum),
            }
        }
        Ok((present, missing))
    }
}
