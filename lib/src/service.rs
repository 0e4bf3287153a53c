//! Request-time glue between an authenticated principal, the identity
//! deriver and the membership store.
//!
//! The server hands over who the caller is; everything returned from here is
//! safe to send back except [`IdentityMaterial::private_scalar`], which the
//! server must keep to itself.
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::Config,
    constants::AUDIT_LOG_FILE,
    crypto::{
        codec::EncryptionKey,
        identity::{IdentityDeriver, IdentityMaterial},
        secure_fields::{open_fields, seal_fields, Record},
    },
    error::{CorruptDataError, CorruptReason, CryptoError, Error},
    group::{Commitment, MembershipStore, RootFunction, Sha256MerkleRoot},
    util::time::{unix_timestamp, Clock, SystemClock},
};

/// An authenticated caller, as asserted by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject_id: String,
    /// A secondary identifier such as a verified email address.
    pub aux_identifier: Option<String>,
}

impl Principal {
    pub fn new(subject_id: impl Into<String>, aux_identifier: Option<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            aux_identifier,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Enrollment {
    pub identity: IdentityMaterial,
    /// `true` only if this call added the commitment to the group.
    pub newly_registered: bool,
    pub is_member: bool,
    pub root: String,
}

pub struct IdentityService<R = Sha256MerkleRoot, C = SystemClock> {
    deriver: IdentityDeriver,
    store: MembershipStore<R, C>,
    audit: Option<AuditLog>,
}

impl IdentityService {
    /// The production wiring: store and audit log under the configured
    /// data directory, both encrypted with the configured key.
    pub fn from_config(config: &Config) -> Self {
        let store = MembershipStore::open(&config.storage, config.encryption_key.clone());
        let audit = AuditLog::new(&config.storage.data_dir, config.encryption_key.clone());

        Self::new(config.identity.deriver(), store).with_audit_log(audit)
    }
}

impl<R: RootFunction, C: Clock> IdentityService<R, C> {
    pub fn new(deriver: IdentityDeriver, store: MembershipStore<R, C>) -> Self {
        Self {
            deriver,
            store,
            audit: None,
        }
    }

    #[must_use]
    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn deriver(&self) -> &IdentityDeriver {
        &self.deriver
    }

    pub fn store(&self) -> &MembershipStore<R, C> {
        &self.store
    }

    pub fn audit_log(&self) -> Option<&AuditLog> {
        self.audit.as_ref()
    }

    pub fn identity(&self, principal: &Principal) -> Result<IdentityMaterial, Error> {
        Ok(self
            .deriver
            .derive(&principal.subject_id, principal.aux_identifier.as_deref())?)
    }

    /// Derives the caller's identity and, with `register`, adds its
    /// commitment to the group. Registering twice is harmless.
    pub fn enroll(&self, principal: &Principal, register: bool) -> Result<Enrollment, Error> {
        let identity = self.identity(principal)?;

        let newly_registered = if register {
            self.store.add_member(identity.commitment())?
        } else {
            false
        };

        if newly_registered {
            self.record_registration(principal, &identity);
        }

        let state = self.store.state()?;
        let is_member = state.contains(&Commitment::parse(identity.commitment())?);

        Ok(Enrollment {
            identity,
            newly_registered,
            is_member,
            root: state.root,
        })
    }

    /// Whether `commitment` is the caller's commitment under the current
    /// configuration.
    pub fn verify(&self, principal: &Principal, commitment: &str) -> Result<bool, Error> {
        Ok(self.deriver.verify(
            &principal.subject_id,
            principal.aux_identifier.as_deref(),
            commitment,
        )?)
    }

    fn record_registration(&self, principal: &Principal, identity: &IdentityMaterial) {
        let Some(audit) = &self.audit else {
            return;
        };

        let entry = AuditEntry {
            timestamp: unix_timestamp(),
            commitment: identity.commitment().to_string(),
            subject_id: principal.subject_id.clone(),
            aux_identifier: principal.aux_identifier.clone(),
        };

        // The registration itself is already persisted at this point.
        if let Err(err) = audit.append(&entry) {
            tracing::error!("Could not append to the identity audit log: {err}");
        }
    }
}

impl<R, C> std::fmt::Debug for IdentityService<R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityService")
            .field("deriver", &self.deriver)
            .field("store", &self.store)
            .field("audit", &self.audit)
            .finish()
    }
}

/// One registration, as recorded in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: u64,
    pub commitment: String,
    pub subject_id: String,
    pub aux_identifier: Option<String>,
}

/// Fields of an [`AuditEntry`] that never hit the disk in the clear.
const SEALED_AUDIT_FIELDS: &[&str] = &["subjectId", "auxIdentifier"];

/// Append-only JSON lines file of registrations, with the principal's
/// identifiers sealed.
pub struct AuditLog {
    path: PathBuf,
    key: EncryptionKey,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(dir: &Path, key: EncryptionKey) -> Self {
        Self {
            path: dir.join(AUDIT_LOG_FILE),
            key,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<(), Error> {
        let Value::Object(record) =
            serde_json::to_value(entry).map_err(|e| CryptoError::Encoding(e.to_string()))?
        else {
            return Err(CryptoError::Encoding("audit entry is not an object".to_string()).into());
        };

        let sealed = seal_fields(&record, SEALED_AUDIT_FIELDS, &self.key)?;
        let mut line =
            serde_json::to_string(&sealed).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        line.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(|e| Error::io(&self.path, e))
    }

    /// Every entry, opened. A missing log is an empty log.
    pub fn read_all(&self) -> Result<Vec<AuditEntry>, Error> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::io(&self.path, err)),
        };

        let corrupt = |reason: CorruptReason| CorruptDataError {
            path: self.path.clone(),
            reason,
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| -> Result<AuditEntry, Error> {
                let record: Record = serde_json::from_str(line)
                    .map_err(|e| corrupt(CorruptReason::Payload(e.to_string())))?;
                let record =
                    open_fields(&record, &self.key).map_err(|e| corrupt(CorruptReason::from(e)))?;

                serde_json::from_value(Value::Object(record))
                    .map_err(|e| corrupt(CorruptReason::Payload(e.to_string())).into())
            })
            .collect()
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::StorageConfig,
        crypto::identity::{ContextLabel, DerivationRealm, DerivationStrategy},
        error::ValidationError,
        util::time::ManualClock,
    };

    use super::*;

    fn deriver(strategy: DerivationStrategy) -> IdentityDeriver {
        IdentityDeriver::new(
            b"a test secret of at least thirty-two bytes",
            strategy,
            ContextLabel::parse("anonset-test-v1").expect("label is valid"),
            DerivationRealm {
                issuer: "https://issuer.example.com".to_string(),
                client_id: "test".to_string(),
            },
        )
    }

    fn service(
        dir: &Path,
        strategy: DerivationStrategy,
    ) -> IdentityService<Sha256MerkleRoot, ManualClock> {
        let key = EncryptionKey::generate();
        let mut config = StorageConfig::new(dir);
        config.tree_depth = 4;
        let store = MembershipStore::with_parts(&config, key.clone(), Sha256MerkleRoot, ManualClock::default());

        IdentityService::new(deriver(strategy), store).with_audit_log(AuditLog::new(dir, key))
    }

    fn alice() -> Principal {
        Principal::new("oauth|alice", Some(" Alice@Example.com ".to_string()))
    }

    #[test]
    fn enrollment_registers_once() {
        let dir = tempfile::tempdir().expect("tempdir can be created");
        let service = service(dir.path(), DerivationStrategy::SubjectOnly);

        let peek = service.enroll(&alice(), false).expect("enrollment works");
        assert!(!peek.is_member, "not registered yet");
        assert!(!peek.newly_registered, "peeking does not register");

        let first = service.enroll(&alice(), true).expect("enrollment works");
        assert!(first.newly_registered, "first registration adds the member");
        assert!(first.is_member, "member after registering");
        assert_ne!(first.root, peek.root, "the root moves");

        let second = service.enroll(&alice(), true).expect("enrollment works");
        assert!(!second.newly_registered, "second registration is a no-op");
        assert_eq!(second.root, first.root, "the root does not move again");
        assert_eq!(
            second.identity.commitment(),
            first.identity.commitment(),
            "same principal, same commitment"
        );

        let state = service.store().state().expect("state loads");
        assert_eq!(state.len(), 1, "one member");
    }

    #[test]
    fn verify_accepts_only_the_callers_commitment() {
        let dir = tempfile::tempdir().expect("tempdir can be created");
        let service = service(dir.path(), DerivationStrategy::SubjectOnly);

        let identity = service.identity(&alice()).expect("derivation works");
        let bob = Principal::new("oauth|bob", None);

        assert!(
            service
                .verify(&alice(), identity.commitment())
                .expect("verification works"),
            "own commitment verifies"
        );
        assert!(
            !service
                .verify(&bob, identity.commitment())
                .expect("verification works"),
            "someone else's commitment does not"
        );
    }

    #[test]
    fn strategies_requiring_aux_reject_principals_without_one() {
        let dir = tempfile::tempdir().expect("tempdir can be created");
        let service = service(dir.path(), DerivationStrategy::AuxOnly);

        assert!(
            matches!(
                service.enroll(&Principal::new("oauth|carol", None), true),
                Err(Error::Crypto(CryptoError::MissingInput("auxIdentifier")))
            ),
            "no aux identifier, no identity"
        );
        assert!(
            service.store().state().expect("state loads").is_empty(),
            "nothing was registered"
        );
    }

    #[test]
    fn aux_only_identities_follow_the_normalized_email() {
        let dir = tempfile::tempdir().expect("tempdir can be created");
        let service = service(dir.path(), DerivationStrategy::AuxOnly);

        let web = service.identity(&alice()).expect("derivation works");
        let other_provider = service
            .identity(&Principal::new("saml|a1", Some("alice@example.com".to_string())))
            .expect("derivation works");

        assert_eq!(
            web.commitment(),
            other_provider.commitment(),
            "same email, same identity across providers"
        );
    }

    #[test]
    fn registrations_are_audited_with_sealed_identifiers() {
        let dir = tempfile::tempdir().expect("tempdir can be created");
        let service = service(dir.path(), DerivationStrategy::SubjectOnly);

        let enrollment = service.enroll(&alice(), true).expect("enrollment works");
        service.enroll(&alice(), true).expect("enrollment works");

        let audit = service.audit_log().expect("audit log is configured");
        let raw = fs::read_to_string(audit.path()).expect("audit log exists");
        assert!(!raw.contains("alice"), "identifiers are not stored in the clear");
        assert_eq!(raw.lines().count(), 1, "only new registrations are audited");

        let entries = audit.read_all().expect("audit log opens");
        assert_eq!(entries.len(), 1, "one entry");
        assert_eq!(entries[0].subject_id, "oauth|alice", "subject opens back");
        assert_eq!(
            entries[0].commitment,
            enrollment.identity.commitment(),
            "commitment is recorded"
        );
    }

    #[test]
    fn full_group_rejects_new_registrations() {
        let dir = tempfile::tempdir().expect("tempdir can be created");
        let service = service(dir.path(), DerivationStrategy::SubjectOnly);

        for n in 0..16 {
            service
                .enroll(&Principal::new(format!("user-{n}"), None), true)
                .expect("there is room");
        }

        assert!(
            matches!(
                service.enroll(&Principal::new("user-16", None), true),
                Err(Error::Validation(ValidationError::TreeFull { capacity: 16 }))
            ),
            "a depth 4 tree holds 16 members"
        );
    }
}
