pub mod codec;
pub mod commitment;
pub mod identity;
pub mod secure_fields;

pub use codec::{decrypt, encrypt, EncryptedBlob, EncryptionKey};
pub use commitment::{CommitmentScheme, Sha256Commitment};
pub use identity::{
    derive_identity, verify_identity, ContextLabel, DerivationRealm, DerivationRequest,
    DerivationStrategy, IdentityDeriver, IdentityMaterial, PrivateScalar,
};
pub use secure_fields::{open_fields, seal_fields, Record, SecureRecord};
