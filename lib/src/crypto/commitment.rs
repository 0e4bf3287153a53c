use sha2::{Digest, Sha256};

use crate::{crypto::identity::PrivateScalar, error::CryptoError, util::decimal};

/// Turns a private scalar into its public commitment.
///
/// The commitment is what goes into the membership set, so it has to be
/// compatible with whatever proof system consumes that set. Plug the proof
/// system's own scheme in here; [`Sha256Commitment`] is only a reference.
pub trait CommitmentScheme: Send + Sync {
    /// Returns the commitment as a canonical decimal string.
    fn commit(&self, scalar: &PrivateScalar) -> Result<String, CryptoError>;
}

/// `SHA256("anonset-commitment-v1" || scalar)` with the top three bits
/// cleared, so the value always fits in a 253-bit field element.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Commitment;

const COMMITMENT_DOMAIN: &[u8] = b"anonset-commitment-v1";

impl CommitmentScheme for Sha256Commitment {
    fn commit(&self, scalar: &PrivateScalar) -> Result<String, CryptoError> {
        let mut hasher = Sha256::new();
        hasher.update(COMMITMENT_DOMAIN);
        hasher.update(scalar.as_bytes());
        let mut digest: [u8; 32] = hasher.finalize().into();

        digest[0] &= 0x1f;

        Ok(decimal::be_bytes_to_decimal(&digest))
    }
}
