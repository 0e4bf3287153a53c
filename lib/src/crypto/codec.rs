//! Authenticated encryption of opaque payloads.
//!
//! Every payload is sealed with AES-256-GCM under a fresh random nonce. The
//! result is an [`EncryptedBlob`], which is what ends up on disk (as JSON) for
//! the group state and inside sealed record fields.
use aes_gcm::{
    aead::{
        consts::{U12, U16},
        AeadCore, AeadInPlace, KeyInit,
    },
    Aes256Gcm, Nonce, Tag,
};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Identifier written into every blob. It is also authenticated as
/// associated data, so relabelling a blob breaks its tag.
pub const ALGORITHM_ID: &str = "aes-256-gcm";
pub const KEY_LENGTH: usize = 32;
pub const NONCE_LENGTH: usize = 12;
pub const TAG_LENGTH: usize = 16;

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LENGTH]);

impl EncryptionKey {
    /// Accepts exactly [`KEY_LENGTH`] bytes. Shorter or longer keys are
    /// rejected instead of being padded or truncated, and so is the all-zero
    /// placeholder key.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| CryptoError::KeyInvalid)?;

        if key.iter().all(|b| *b == 0) {
            return Err(CryptoError::KeyInvalid);
        }

        Ok(Self(key))
    }

    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let mut bytes = hex::decode(encoded.trim()).map_err(|_| CryptoError::KeyInvalid)?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();

        key
    }

    /// A random key. Only meant for development runs and tests: anything
    /// encrypted with it is lost once the key is dropped.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);

        Self(key)
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(&self.0).map_err(|_| CryptoError::KeyInvalid)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// The wire/disk representation of an encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBlob {
    #[serde(with = "crate::util::base64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::util::base64")]
    pub nonce: Vec<u8>,
    #[serde(with = "crate::util::base64")]
    pub auth_tag: Vec<u8>,
    pub algorithm_id: String,
}

pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> Result<EncryptedBlob, CryptoError> {
    let cipher = key.cipher()?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(&nonce, ALGORITHM_ID.as_bytes(), &mut buffer)
        .map_err(|_| CryptoError::Encoding("payload too large for AES-GCM".to_string()))?;

    Ok(EncryptedBlob {
        ciphertext: buffer,
        nonce: nonce.to_vec(),
        auth_tag: tag.to_vec(),
        algorithm_id: ALGORITHM_ID.to_string(),
    })
}

/// Decrypts `blob`. The tag is verified before any plaintext is released;
/// on failure nothing (not even a partial buffer) is returned.
pub fn decrypt(blob: &EncryptedBlob, key: &EncryptionKey) -> Result<Vec<u8>, CryptoError> {
    if blob.algorithm_id != ALGORITHM_ID {
        return Err(CryptoError::MalformedBlob("unsupported algorithm"));
    }
    if blob.nonce.len() != NONCE_LENGTH {
        return Err(CryptoError::MalformedBlob("nonce has the wrong length"));
    }
    if blob.auth_tag.len() != TAG_LENGTH {
        return Err(CryptoError::MalformedBlob("authentication tag has the wrong length"));
    }

    let cipher = key.cipher()?;
    let nonce = Nonce::<U12>::from_slice(&blob.nonce);
    let tag = Tag::<U16>::from_slice(&blob.auth_tag);

    let mut buffer = blob.ciphertext.clone();
    if cipher
        .decrypt_in_place_detached(nonce, ALGORITHM_ID.as_bytes(), &mut buffer, tag)
        .is_err()
    {
        buffer.zeroize();
        return Err(CryptoError::TagMismatch);
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_hex("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f")
            .expect("key is 32 bytes")
    }

    #[test]
    fn roundtrip() {
        let key = test_key();

        for payload in [&b""[..], b"wawa", &[0xffu8; 4096]] {
            let blob = encrypt(payload, &key).expect("encryption works");
            assert_eq!(
                decrypt(&blob, &key).expect("decryption works"),
                payload,
                "decrypt(encrypt(p)) should give back p"
            );
        }
    }

    #[test]
    fn nonces_are_never_reused() {
        let key = test_key();
        let first = encrypt(b"same", &key).expect("encryption works");
        let second = encrypt(b"same", &key).expect("encryption works");

        assert_ne!(first.nonce, second.nonce, "every call must draw a new nonce");
        assert_ne!(
            first.ciphertext, second.ciphertext,
            "same plaintext should not give the same ciphertext"
        );
    }

    #[test]
    fn tampering_is_detected() {
        let key = test_key();
        let blob = encrypt(b"hello group", &key).expect("encryption works");

        let mut bad_ciphertext = blob.clone();
        bad_ciphertext.ciphertext[0] ^= 1;
        let mut bad_nonce = blob.clone();
        bad_nonce.nonce[11] ^= 0x80;
        let mut bad_tag = blob.clone();
        bad_tag.auth_tag[15] ^= 1;

        for tampered in [bad_ciphertext, bad_nonce, bad_tag] {
            assert_eq!(
                decrypt(&tampered, &key),
                Err(CryptoError::TagMismatch),
                "tampered blobs must be rejected"
            );
        }
    }

    #[test]
    fn wrong_key_is_rejected() {
        let blob = encrypt(b"secret", &test_key()).expect("encryption works");

        assert_eq!(
            decrypt(&blob, &EncryptionKey::generate()),
            Err(CryptoError::TagMismatch),
            "a different key must not open the blob"
        );
    }

    #[test]
    fn relabelled_blob_is_rejected() {
        let mut blob = encrypt(b"secret", &test_key()).expect("encryption works");
        blob.algorithm_id = "aes-128-gcm".to_string();

        assert_eq!(
            decrypt(&blob, &test_key()),
            Err(CryptoError::MalformedBlob("unsupported algorithm")),
            "unknown algorithms are refused before decryption"
        );
    }

    #[test]
    fn truncated_fields_are_malformed() {
        let key = test_key();
        let mut blob = encrypt(b"secret", &key).expect("encryption works");
        blob.auth_tag.truncate(8);

        assert!(
            matches!(decrypt(&blob, &key), Err(CryptoError::MalformedBlob(_))),
            "short tags are malformed, not a tag mismatch"
        );
    }

    #[test]
    fn missing_fields_do_not_parse() {
        let blob = encrypt(b"secret", &test_key()).expect("encryption works");
        let mut json = serde_json::to_value(&blob).expect("blob serializes");
        json.as_object_mut()
            .expect("blob is an object")
            .remove("authTag");

        assert!(
            serde_json::from_value::<EncryptedBlob>(json).is_err(),
            "a blob without a tag must not deserialize"
        );
    }

    #[test]
    fn key_length_is_enforced() {
        assert_eq!(
            EncryptionKey::from_slice(&[7u8; 16]),
            Err(CryptoError::KeyInvalid),
            "16 byte keys are too short"
        );
        assert_eq!(
            EncryptionKey::from_slice(&[7u8; 33]),
            Err(CryptoError::KeyInvalid),
            "33 byte keys are too long"
        );
        assert_eq!(
            EncryptionKey::from_slice(&[0u8; 32]),
            Err(CryptoError::KeyInvalid),
            "the all-zero placeholder key is refused"
        );
        assert_eq!(
            EncryptionKey::from_hex("not hex"),
            Err(CryptoError::KeyInvalid),
            "non-hex keys are refused"
        );
    }

    #[test]
    fn debug_output_hides_the_key() {
        assert_eq!(
            format!("{:?}", test_key()),
            "EncryptionKey(<redacted>)",
            "keys must never be printed"
        );
    }

    mod properties {
        use proptest::{prelude::*, sample::Index};

        use super::*;

        proptest! {
            #[test]
            fn any_payload_roundtrips(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
                let key = test_key();
                let blob = encrypt(&payload, &key).expect("encryption works");

                prop_assert_eq!(
                    decrypt(&blob, &key).expect("decryption works"),
                    payload,
                    "decrypt(encrypt(p)) should give back p"
                );
            }

            #[test]
            fn any_flipped_byte_is_detected(
                payload in proptest::collection::vec(any::<u8>(), 1..512),
                field in 0usize..3,
                position in any::<Index>(),
                flip in 1u8..=255,
            ) {
                let key = test_key();
                let mut blob = encrypt(&payload, &key).expect("encryption works");

                let bytes = match field {
                    0 => &mut blob.ciphertext,
                    1 => &mut blob.nonce,
                    _ => &mut blob.auth_tag,
                };
                let at = position.index(bytes.len());
                bytes[at] ^= flip;

                prop_assert_eq!(
                    decrypt(&blob, &key),
                    Err(CryptoError::TagMismatch),
                    "a flipped byte must never decrypt"
                );
            }
        }
    }
}
