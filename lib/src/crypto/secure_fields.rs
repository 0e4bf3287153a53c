//! Field-level encryption of JSON records.
//!
//! A sealed record keeps its shape: each sealed field holds an
//! [`EncryptedBlob`] object instead of its value, and the reserved
//! [`ENCRYPTED_FIELDS_KEY`] lists exactly which fields were sealed, so the
//! opening side never has to guess.
//!
//! ```json
//! {
//!   "commitment": "1234",
//!   "subjectId": { "ciphertext": "...", "nonce": "...", "authTag": "...", "algorithmId": "aes-256-gcm" },
//!   "_encryptedFieldNames": ["subjectId"]
//! }
//! ```
//!
//! Records without the metadata key were never sealed and open unchanged.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    crypto::codec::{decrypt, encrypt, EncryptedBlob, EncryptionKey},
    error::CryptoError,
};

pub const ENCRYPTED_FIELDS_KEY: &str = "_encryptedFieldNames";

pub type Record = Map<String, Value>;

/// A record that went through [`seal_fields`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecureRecord(Record);

impl SecureRecord {
    pub fn as_record(&self) -> &Record {
        &self.0
    }

    pub fn into_record(self) -> Record {
        self.0
    }

    pub fn encrypted_field_names(&self) -> Vec<&str> {
        self.0
            .get(ENCRYPTED_FIELDS_KEY)
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Seals every field of `field_names` that is present and non-null.
///
/// All or nothing: if one field fails, no record is returned.
pub fn seal_fields(
    record: &Record,
    field_names: &[&str],
    key: &EncryptionKey,
) -> Result<SecureRecord, CryptoError> {
    if record.contains_key(ENCRYPTED_FIELDS_KEY) {
        return Err(CryptoError::ReservedField(ENCRYPTED_FIELDS_KEY.to_string()));
    }

    let mut sealed = record.clone();
    let mut sealed_names: Vec<Value> = Vec::new();

    for name in field_names {
        if *name == ENCRYPTED_FIELDS_KEY {
            return Err(CryptoError::ReservedField((*name).to_string()));
        }
        if sealed_names.iter().any(|n| n.as_str() == Some(*name)) {
            continue;
        }

        let Some(value) = record.get(*name).filter(|v| !v.is_null()) else {
            continue;
        };

        let plaintext =
            serde_json::to_vec(value).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let blob = encrypt(&plaintext, key)?;
        let blob = serde_json::to_value(blob).map_err(|e| CryptoError::Encoding(e.to_string()))?;

        sealed.insert((*name).to_string(), blob);
        sealed_names.push(Value::String((*name).to_string()));
    }

    sealed.insert(ENCRYPTED_FIELDS_KEY.to_string(), Value::Array(sealed_names));

    Ok(SecureRecord(sealed))
}

/// Opens the fields listed in the record's metadata and drops the metadata.
///
/// A record without metadata is returned as is.
pub fn open_fields(record: &Record, key: &EncryptionKey) -> Result<Record, CryptoError> {
    let Some(names) = record.get(ENCRYPTED_FIELDS_KEY) else {
        return Ok(record.clone());
    };

    let names = names
        .as_array()
        .ok_or(CryptoError::MalformedBlob("field list is not an array"))?;

    let mut opened = record.clone();
    opened.remove(ENCRYPTED_FIELDS_KEY);

    for name in names {
        let name = name
            .as_str()
            .ok_or(CryptoError::MalformedBlob("field name is not a string"))?;
        let sealed = record
            .get(name)
            .ok_or(CryptoError::MalformedBlob("sealed field is missing"))?;

        let blob = EncryptedBlob::deserialize(sealed)
            .map_err(|_| CryptoError::MalformedBlob("sealed field is not a blob"))?;
        let plaintext = decrypt(&blob, key)?;
        let value = serde_json::from_slice(&plaintext)
            .map_err(|_| CryptoError::MalformedBlob("sealed field is not JSON"))?;

        opened.insert(name.to_string(), value);
    }

    Ok(opened)
}
