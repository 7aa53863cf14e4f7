use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Content-addressed identifier for one serialized node.
///
/// A `Checksum` is the BLAKE3 hash of a node's canonical serialization.
/// Identical content always produces the same `Checksum`, which makes it
/// usable both as a cache key and as a protocol field naming a content node
/// or a whole snapshot. It is stable across process and machine boundaries.
///
/// On the wire a checksum is a 64-character lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Width of a checksum in bytes.
    pub const LEN: usize = 32;

    /// Compute a `Checksum` from raw bytes without domain separation.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Create a `Checksum` from a pre-computed hash.
    pub const fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The null checksum (all zeros). Represents "no content".
    pub const fn null() -> Self {
        Self([0u8; 32])
    }

    /// Returns `true` if this is the null checksum.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != Self::LEN {
            return Err(TypeError::InvalidLength {
                expected: Self::LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.short_hex())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Checksum {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<Checksum> for [u8; 32] {
    fn from(id: Checksum) -> Self {
        id.0
    }
}

impl std::str::FromStr for Checksum {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn of_is_deterministic() {
        let data = b"fn main() {}";
        assert_eq!(Checksum::of(data), Checksum::of(data));
    }

    #[test]
    fn different_data_produces_different_checksums() {
        assert_ne!(Checksum::of(b"hello"), Checksum::of(b"world"));
    }

    #[test]
    fn null_is_all_zeros() {
        let null = Checksum::null();
        assert!(null.is_null());
        assert_eq!(null.as_bytes(), &[0u8; 32]);
        assert!(!Checksum::of(b"x").is_null());
    }

    #[test]
    fn short_hex_is_8_chars() {
        assert_eq!(Checksum::of(b"test").short_hex().len(), 8);
    }

    #[test]
    fn display_is_full_hex() {
        let id = Checksum::of(b"test");
        let display = format!("{id}");
        assert_eq!(display.len(), 64);
        assert_eq!(display, id.to_hex());
    }

    #[test]
    fn serializes_as_hex_string() {
        let id = Checksum::of(b"serde test");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let parsed: Checksum = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = Checksum::from_hex("abcd").unwrap_err();
        assert_eq!(err, TypeError::InvalidLength { expected: 32, actual: 2 });
        assert!(serde_json::from_str::<Checksum>("\"zz\"").is_err());
    }

    #[test]
    fn ordering_is_consistent() {
        assert!(Checksum::from_hash([0; 32]) < Checksum::from_hash([1; 32]));
    }

    proptest! {
        #[test]
        fn hex_parse_inverts_display(bytes in proptest::array::uniform32(any::<u8>())) {
            let id = Checksum::from_hash(bytes);
            prop_assert_eq!(id.to_string().parse::<Checksum>().unwrap(), id);
        }

        #[test]
        fn equal_content_equal_checksum(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let copy = data.clone();
            prop_assert_eq!(Checksum::of(&data), Checksum::of(&copy));
        }
    }
}
