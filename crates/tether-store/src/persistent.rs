use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Keyed byte storage that survives process restarts.
///
/// This is the only interface tether needs from a persistence backend; the
/// on-disk format is the backend's business.
pub trait PersistentStorage: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Returns `true` if it existed.
    fn remove(&self, key: &str) -> StoreResult<bool>;
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// On-disk record: the key is stored alongside the value so a hashed file
/// name can be checked against the key it was looked up by.
#[derive(Serialize, Deserialize)]
struct Record {
    key: String,
    value: Vec<u8>,
}

/// One-file-per-key persistent storage.
///
/// Each record is framed like a WAL entry:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized record)]
/// ```
/// Files are written to a temporary name and renamed into place, so a crash
/// never leaves a torn record under a live name. Records failing the CRC
/// check read as absent.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open (or create) a storage directory.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory holding the records.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name = blake3::hash(key.as_bytes()).to_hex();
        self.root.join(&name.as_str()[..2]).join(name.as_str())
    }

    fn encode(key: &str, value: &[u8]) -> StoreResult<Vec<u8>> {
        let payload = bincode::serialize(&Record {
            key: key.to_string(),
            value: value.to_vec(),
        })
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    fn decode(key: &str, raw: &[u8]) -> StoreResult<Vec<u8>> {
        let corrupt = |reason: String| StoreError::CorruptRecord {
            key: key.to_string(),
            reason,
        };
        if raw.len() < HEADER_SIZE {
            return Err(corrupt("truncated header".into()));
        }
        let length = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        let expected_crc = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let payload = &raw[HEADER_SIZE..];
        if payload.len() != length {
            return Err(corrupt(format!(
                "length {length}, found {}",
                payload.len()
            )));
        }
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            return Err(corrupt(format!(
                "crc expected {expected_crc:#010x}, got {actual_crc:#010x}"
            )));
        }
        let record: Record =
            bincode::deserialize(payload).map_err(|e| corrupt(e.to_string()))?;
        if record.key != key {
            return Err(corrupt(format!("stored under key {}", record.key)));
        }
        Ok(record.value)
    }
}

impl PersistentStorage for FileStorage {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.path_for(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match Self::decode(key, &raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "discarding corrupt record");
                Ok(None)
            }
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let path = self.path_for(key);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&dir)?;

        let encoded = Self::encode(key, value)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&encoded)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;

        debug!(key, len = value.len(), "persisted record");
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage() -> (tempfile::TempDir, FileStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("cache")).unwrap();
        (dir, storage)
    }

    #[test]
    fn put_then_get() {
        let (_dir, storage) = temp_storage();
        storage.put("alpha", b"one").unwrap();
        assert_eq!(storage.get("alpha").unwrap(), Some(b"one".to_vec()));
    }

    #[test]
    fn missing_key_is_none() {
        let (_dir, storage) = temp_storage();
        assert!(storage.get("nope").unwrap().is_none());
    }

    #[test]
    fn put_replaces_value() {
        let (_dir, storage) = temp_storage();
        storage.put("k", b"first").unwrap();
        storage.put("k", b"second").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileStorage::open(dir.path()).unwrap().put("k", b"v").unwrap();
        let reopened = FileStorage::open(dir.path()).unwrap();
        assert_eq!(reopened.get("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn remove_reports_presence() {
        let (_dir, storage) = temp_storage();
        storage.put("k", b"v").unwrap();
        assert!(storage.remove("k").unwrap());
        assert!(!storage.remove("k").unwrap());
        assert!(storage.get("k").unwrap().is_none());
    }

    #[test]
    fn corrupt_record_reads_as_absent() {
        let (_dir, storage) = temp_storage();
        storage.put("k", b"value").unwrap();
        let path = storage.path_for("k");
        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        fs::write(&path, raw).unwrap();
        assert!(storage.get("k").unwrap().is_none());
    }

    #[test]
    fn decode_rejects_truncated_header() {
        let err = FileStorage::decode("k", &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord { .. }));
    }
}
