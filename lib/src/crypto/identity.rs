//! Deterministic identities.
//!
//! A returning principal must get the *same* identity every time, without the
//! server storing anything per user. The identity is therefore derived from
//! inputs that are stable for that principal:
//!
//! ```text
//! salt   = HMAC-SHA256(app_secret, iss || aud || [sub] || [aux])
//! scalar = HKDF-SHA256(salt, ikm = app_secret, info = context label)[..32]
//! commitment = CommitmentScheme(scalar)
//! ```
//!
//! Which of `sub`/`aux` go into the salt is chosen by [`DerivationStrategy`].
//! Each field is tagged and length-prefixed, so no two different inputs can
//! produce the same salt message.
//!
//! Bumping the version of the [`ContextLabel`] is the only supported way to
//! rotate the scheme: old and new identities are simply unrelated.
use std::{fmt::Display, str::FromStr};

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    crypto::commitment::{CommitmentScheme, Sha256Commitment},
    error::{ConfigurationError, CryptoError},
    group::Commitment,
};

pub const PRIVATE_SCALAR_LENGTH: usize = 32;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerivationStrategy {
    /// Only the provider's subject identifier.
    #[default]
    SubjectOnly,
    /// Only the (normalized) auxiliary identifier, e.g. a verified email.
    AuxOnly,
    SubjectAndAux,
}

impl DerivationStrategy {
    pub fn requires_aux(self) -> bool {
        match self {
            DerivationStrategy::SubjectOnly => false,
            DerivationStrategy::AuxOnly | DerivationStrategy::SubjectAndAux => true,
        }
    }

    fn includes_subject(self) -> bool {
        match self {
            DerivationStrategy::SubjectOnly | DerivationStrategy::SubjectAndAux => true,
            DerivationStrategy::AuxOnly => false,
        }
    }
}

impl FromStr for DerivationStrategy {
    type Err = ConfigurationError;

    /// Accepts `SubjectOnly`, `subject_only`, `subject-only` and so on.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let flattened: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        match flattened.as_str() {
            "subjectonly" => Ok(Self::SubjectOnly),
            "auxonly" => Ok(Self::AuxOnly),
            "subjectandaux" => Ok(Self::SubjectAndAux),
            _ => Err(ConfigurationError::Invalid {
                name: "IDENTITY_DERIVATION_STRATEGY",
                reason: "expected SubjectOnly, AuxOnly or SubjectAndAux",
            }),
        }
    }
}

impl Display for DerivationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DerivationStrategy::SubjectOnly => "SubjectOnly",
            DerivationStrategy::AuxOnly => "AuxOnly",
            DerivationStrategy::SubjectAndAux => "SubjectAndAux",
        };

        f.write_str(name)
    }
}

/// A versioned HKDF context, e.g. `anonset-identity-v1`.
///
/// Requirements:
///  - `<name>-v<version>` with a non-empty name and a decimal version
///  - printable ASCII only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextLabel {
    label: String,
    version: u32,
}

impl ContextLabel {
    pub fn parse(label: &str) -> Result<Self, ConfigurationError> {
        const INVALID: ConfigurationError = ConfigurationError::Invalid {
            name: "IDENTITY_CONTEXT_LABEL",
            reason: "expected a versioned label such as `identity-v3`",
        };

        let label = label.trim();
        if !label.chars().all(|c| c.is_ascii_graphic()) {
            return Err(INVALID);
        }

        let (name, version) = label.rsplit_once("-v").ok_or(INVALID)?;
        if name.is_empty() || version.is_empty() || !version.chars().all(|c| c.is_ascii_digit()) {
            return Err(INVALID);
        }
        let version = version.parse().map_err(|_| INVALID)?;

        Ok(Self {
            label: label.to_string(),
            version,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.label
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl Display for ContextLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label)
    }
}

/// Issuer and client of the authentication provider. Both are mixed into
/// every salt so that identities from different deployments never coincide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationRealm {
    pub issuer: String,
    pub client_id: String,
}

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateScalar([u8; PRIVATE_SCALAR_LENGTH]);

impl PrivateScalar {
    pub fn from_bytes(bytes: [u8; PRIVATE_SCALAR_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PRIVATE_SCALAR_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.0))
    }
}

impl std::fmt::Debug for PrivateScalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateScalar(<redacted>)")
    }
}

/// The derived identity of a principal.
///
/// Deliberately not `Serialize`: the private scalar stays on the server, only
/// the commitment (or a proof built from the scalar) may leave it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMaterial {
    private_scalar: PrivateScalar,
    commitment: String,
}

impl IdentityMaterial {
    pub fn private_scalar(&self) -> &PrivateScalar {
        &self.private_scalar
    }

    pub fn commitment(&self) -> &str {
        &self.commitment
    }
}

/// Every input of a single derivation.
#[derive(Debug, Clone, Copy)]
pub struct DerivationRequest<'a> {
    pub subject_id: &'a str,
    pub app_secret: &'a [u8],
    pub aux_identifier: Option<&'a str>,
    pub strategy: DerivationStrategy,
    pub context: &'a ContextLabel,
    pub realm: &'a DerivationRealm,
}

/// Trims and lowercases an auxiliary identifier. Blank identifiers count as absent.
pub fn normalize_aux_identifier(aux: &str) -> Option<String> {
    let trimmed = aux.trim();

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

fn salt(request: &DerivationRequest<'_>, aux: Option<&str>) -> Result<[u8; 32], CryptoError> {
    fn field(mac: &mut Hmac<Sha256>, tag: &[u8], value: &str) {
        mac.update(tag);
        mac.update(&(value.len() as u64).to_be_bytes());
        mac.update(value.as_bytes());
    }

    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(request.app_secret)
        .map_err(|_| CryptoError::KeyInvalid)?;

    field(&mut mac, b"iss", &request.realm.issuer);
    field(&mut mac, b"aud", &request.realm.client_id);
    if request.strategy.includes_subject() {
        field(&mut mac, b"sub", request.subject_id);
    }
    if let Some(aux) = aux {
        field(&mut mac, b"aux", aux);
    }

    Ok(mac.finalize().into_bytes().into())
}

/// Derives the identity described by `request`.
///
/// Identical requests always give identical [`IdentityMaterial`], across
/// restarts, as long as the secret and the context label are unchanged.
pub fn derive_identity(
    request: &DerivationRequest<'_>,
    scheme: &impl CommitmentScheme,
) -> Result<IdentityMaterial, CryptoError> {
    if request.subject_id.trim().is_empty() {
        return Err(CryptoError::MissingInput("subjectId"));
    }
    if request.app_secret.is_empty() {
        return Err(CryptoError::MissingInput("appSecret"));
    }

    let aux = match request.aux_identifier.and_then(normalize_aux_identifier) {
        Some(aux) if request.strategy.requires_aux() => Some(Zeroizing::new(aux)),
        None if request.strategy.requires_aux() => {
            return Err(CryptoError::MissingInput("auxIdentifier"))
        }
        _ => None,
    };

    let salt = salt(request, aux.as_deref().map(String::as_str))?;

    let hk = Hkdf::<Sha256>::new(Some(&salt), request.app_secret);
    let mut okm = [0u8; PRIVATE_SCALAR_LENGTH];
    hk.expand(request.context.as_str().as_bytes(), &mut okm)
        .map_err(|_| CryptoError::Encoding("HKDF output length".to_string()))?;

    let private_scalar = PrivateScalar(okm);
    okm.zeroize();

    let commitment = scheme.commit(&private_scalar)?;

    Ok(IdentityMaterial {
        private_scalar,
        commitment,
    })
}

/// Recomputes the identity for `request` and compares its commitment.
pub fn verify_identity(
    request: &DerivationRequest<'_>,
    scheme: &impl CommitmentScheme,
    expected_commitment: &str,
) -> Result<bool, CryptoError> {
    let identity = derive_identity(request, scheme)?;

    // Compared as integers, so "042" matches "42". Non-decimal input never matches.
    Ok(Commitment::parse(expected_commitment)
        .is_ok_and(|expected| expected.as_str() == identity.commitment))
}

/// An identity deriver bound to the server's configured secret, strategy and
/// context label.
pub struct IdentityDeriver<S = Sha256Commitment> {
    app_secret: Zeroizing<Vec<u8>>,
    strategy: DerivationStrategy,
    context: ContextLabel,
    realm: DerivationRealm,
    scheme: S,
}

impl IdentityDeriver {
    pub fn new(
        app_secret: &[u8],
        strategy: DerivationStrategy,
        context: ContextLabel,
        realm: DerivationRealm,
    ) -> Self {
        Self::with_scheme(app_secret, strategy, context, realm, Sha256Commitment)
    }
}

impl<S: CommitmentScheme> IdentityDeriver<S> {
    pub fn with_scheme(
        app_secret: &[u8],
        strategy: DerivationStrategy,
        context: ContextLabel,
        realm: DerivationRealm,
        scheme: S,
    ) -> Self {
        Self {
            app_secret: Zeroizing::new(app_secret.to_vec()),
            strategy,
            context,
            realm,
            scheme,
        }
    }

    pub fn strategy(&self) -> DerivationStrategy {
        self.strategy
    }

    pub fn context(&self) -> &ContextLabel {
        &self.context
    }

    fn request<'a>(
        &'a self,
        subject_id: &'a str,
        aux_identifier: Option<&'a str>,
    ) -> DerivationRequest<'a> {
        DerivationRequest {
            subject_id,
            app_secret: &self.app_secret,
            aux_identifier,
            strategy: self.strategy,
            context: &self.context,
            realm: &self.realm,
        }
    }

    pub fn derive(
        &self,
        subject_id: &str,
        aux_identifier: Option<&str>,
    ) -> Result<IdentityMaterial, CryptoError> {
        derive_identity(&self.request(subject_id, aux_identifier), &self.scheme)
    }

    pub fn verify(
        &self,
        subject_id: &str,
        aux_identifier: Option<&str>,
        expected_commitment: &str,
    ) -> Result<bool, CryptoError> {
        verify_identity(
            &self.request(subject_id, aux_identifier),
            &self.scheme,
            expected_commitment,
        )
    }
}

impl<S> std::fmt::Debug for IdentityDeriver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityDeriver")
            .field("strategy", &self.strategy)
            .field("context", &self.context)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}
