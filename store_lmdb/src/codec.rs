//! Value and key encoding shared by the LMDB stores.

use serde::de::DeserializeOwned;
use serde::Serialize;

use liquid_store::StoreError;

use crate::LmdbError;

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(value).map_err(LmdbError::from)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(bytes).map_err(LmdbError::from)?)
}

/// `prefix ++ 0x00 ++ seq_be`: groups rows by an owning string key and keeps
/// them in insertion order under a prefix scan.
pub(crate) fn composite_key(prefix: &str, seq: u64) -> Vec<u8> {
    let mut key = prefix_key(prefix);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

pub(crate) fn prefix_key(prefix: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 9);
    key.extend_from_slice(prefix.as_bytes());
    key.push(0);
    key
}

/// Split a composite key back into its owning string and sequence number.
pub(crate) fn split_composite_key(key: &[u8]) -> Result<(&str, u64), StoreError> {
    if key.len() < 9 || key[key.len() - 9] != 0 {
        return Err(StoreError::Corruption("malformed composite key".into()));
    }
    let (owner, rest) = key.split_at(key.len() - 9);
    let owner = std::str::from_utf8(owner)
        .map_err(|e| LmdbError::Serialization(e.to_string()))?;
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&rest[1..]);
    Ok((owner, u64::from_be_bytes(seq)))
}

pub(crate) fn read_u64(bytes: Option<&[u8]>) -> Result<u64, StoreError> {
    match bytes {
        None => Ok(0),
        Some(b) if b.len() == 8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(b);
            Ok(u64::from_be_bytes(buf))
        }
        Some(_) => Err(StoreError::Corruption("counter has unexpected byte length".into())),
    }
}
