use std::time::Duration;

use crate::error::Error;

use super::s3utils::ObjectStore;

/// Separates container and key in a persisted reference. S3 bucket names cannot contain it and
/// generated keys are url-safe base64 plus an orientation prefix and extension.
pub const REFERENCE_DELIMITER: char = ',';

/// Location of an object in the object store, persisted on the video record as
/// `<container>,<key>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageReference {
    container: String,
    key: String,
}

impl StorageReference {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Result<Self, Error> {
        let container = container.into();
        let key = key.into();
        if container.is_empty()
            || key.is_empty()
            || container.contains(REFERENCE_DELIMITER)
            || key.contains(REFERENCE_DELIMITER)
        {
            return Err(Error::InvalidReferenceError(format!(
                "{container}{REFERENCE_DELIMITER}{key}"
            )));
        }

        Ok(Self { container, key })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn encode(&self) -> String {
        format!("{}{REFERENCE_DELIMITER}{}", self.container, self.key)
    }

    /// Fails for anything that does not contain exactly one delimiter with non-empty parts,
    /// including plain urls persisted before references were introduced.
    pub fn decode(value: &str) -> Result<Self, Error> {
        let mut parts = value.split(REFERENCE_DELIMITER);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(container), Some(key), None) => Self::new(container, key)
                .map_err(|_| Error::InvalidReferenceError(value.to_string())),
            _ => Err(Error::InvalidReferenceError(value.to_string())),
        }
    }
}

/// Decode a persisted reference and presign a read url valid for `ttl`. Never cached, every read
/// gets a fresh url.
pub async fn resolve(store: &dyn ObjectStore, value: &str, ttl: Duration) -> Result<String, Error> {
    let reference = StorageReference::decode(value)?;
    store
        .presign_get(reference.container(), reference.key(), ttl)
        .await
}
