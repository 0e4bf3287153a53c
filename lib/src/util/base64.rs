//! Serde adapter storing byte strings as standard (padded) base64 text.
//!
//! Use with `#[serde(with = "crate::util::base64")]` on `Vec<u8>` fields.
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S, B>(bytes: &B, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    B: AsRef<[u8]>,
{
    serializer.serialize_str(&Base64::encode_string(bytes.as_ref()))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;

    Base64::decode_vec(&encoded).map_err(serde::de::Error::custom)
}
