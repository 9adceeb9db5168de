//! Device credentials issued by checkin.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};

/// Long-lived device identity.
///
/// Both values are 64-bit and routinely exceed what JSON numbers carry
/// losslessly, so they are stored as decimal strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(with = "decimal")]
    pub android_id: u64,
    #[serde(with = "decimal")]
    pub security_token: u64,
}

impl Credentials {
    pub fn new(android_id: u64, security_token: u64) -> Self {
        Self {
            android_id,
            security_token,
        }
    }

    /// Parses credentials given in their decimal text form.
    pub fn parse(android_id: &str, security_token: &str) -> Result<Self, StorageError> {
        let android_id = android_id
            .trim()
            .parse()
            .map_err(|e| StorageError::InvalidCredentials(format!("android id: {}", e)))?;
        let security_token = security_token
            .trim()
            .parse()
            .map_err(|e| StorageError::InvalidCredentials(format!("security token: {}", e)))?;
        Ok(Self::new(android_id, security_token))
    }

    /// Returns false for the all-zero pair a failed checkin may produce.
    pub fn is_valid(&self) -> bool {
        self.android_id != 0 && self.security_token != 0
    }
}

mod decimal {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s.parse().map_err(de::Error::custom),
            Repr::Number(n) => Ok(n),
        }
    }
}
