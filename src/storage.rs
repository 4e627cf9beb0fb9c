//! Versioned JSON documents over a [`StoragePort`].
//!
//! Every persisted artifact carries a `version` field.  Loading a document
//! written by a different schema version fails with
//! [`StorageError::Incompatible`] instead of half-reading it.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::ports::{StorageError, StoragePort};

/// A persisted, versioned record.
pub trait Document: Serialize + DeserializeOwned {
    const NAMESPACE: &'static str;
    const VERSION: u32;
}

/// Load `key`.  A missing key is `Ok(None)`.
pub fn load<T: Document>(store: &dyn StoragePort, key: &str) -> Result<Option<T>, StorageError> {
    let bytes = match store.read(T::NAMESPACE, key) {
        Ok(b) => b,
        Err(StorageError::NotFound) => return Ok(None),
        Err(e) => return Err(e),
    };
    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|_| StorageError::Corrupted)?;
    let found = value
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0) as u32;
    if found != T::VERSION {
        return Err(StorageError::Incompatible {
            found,
            expected: T::VERSION,
        });
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|_| StorageError::Corrupted)
}

/// Serialise and write `doc` under `key`.
pub fn save<T: Document>(store: &dyn StoragePort, key: &str, doc: &T) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(doc).map_err(|_| StorageError::Corrupted)?;
    store.write(T::NAMESPACE, key, &json)
}
