//! The membership store.
//!
//! Owns the one [`GroupState`] of the system. Reads go through a cache with a
//! freshness window; every mutation is written through to disk before the
//! call returns.
//!
//! Loading is an ordered recovery chain, first success wins:
//!
//! 1. [`RecoveryStep::Primary`]: decrypt and parse `group.encrypted`
//! 2. [`RecoveryStep::Backup`]: decrypt and parse `group.backup.encrypted`,
//!    then restore the primary from it
//! 3. [`RecoveryStep::LegacyPlaintext`]: parse the primary (or `group.json`)
//!    as plaintext JSON, keep a verbatim copy, and re-persist it encrypted
//! 4. otherwise the empty default state is created and persisted
//!
//! The chain never invents members: the only state it makes up is the empty
//! group.
//!
//! Writes copy the current primary to the backup before replacing the
//! primary, so a failed write always leaves one of the two loadable.
//!
//! NOTE: there is no cross-process locking. Two processes sharing a data
//! directory can lose each other's additions (last writer wins).
use std::{
    collections::HashSet,
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use serde::Deserialize;
use serde_json::Value;

use crate::{
    config::StorageConfig,
    crypto::{
        codec::{decrypt, encrypt, EncryptedBlob, EncryptionKey},
        secure_fields::{open_fields, seal_fields, Record},
    },
    error::{CorruptDataError, CorruptReason, CryptoError, Error, ValidationError},
    group::{files::GroupFiles, Commitment, GroupState, RootFunction, Sha256MerkleRoot},
    util::time::{Clock, SystemClock},
};

/// Fields of the group state sealed individually inside the encrypted
/// envelope. Nothing needs it today; the whole state is already encrypted.
const SEALED_STATE_FIELDS: &[&str] = &[];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Nothing has been loaded yet (or the cache was cleared by a reset).
    Uninitialized,
    Fresh,
    /// The freshness window elapsed; the next read goes to disk.
    Stale,
}

/// Where the state currently in the cache came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Primary,
    Backup,
    LegacyMigration,
    Default,
    /// Written by a mutation of this store.
    Mutation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryStep {
    Primary,
    Backup,
    LegacyPlaintext,
}

const RECOVERY_CHAIN: [RecoveryStep; 3] = [
    RecoveryStep::Primary,
    RecoveryStep::Backup,
    RecoveryStep::LegacyPlaintext,
];

enum StepFailure {
    /// Nothing to try: the step's file does not exist.
    Missing,
    Corrupt(CorruptDataError),
}

impl From<CorruptDataError> for StepFailure {
    fn from(value: CorruptDataError) -> Self {
        Self::Corrupt(value)
    }
}

#[derive(Debug)]
struct CachedGroup {
    state: GroupState,
    loaded_at: Instant,
    source: LoadSource,
}

/// The plaintext layout written by earlier versions: `{id, treeDepth, members, root}`,
/// with members as strings or bare JSON numbers.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyGroupState {
    #[serde(alias = "groupId")]
    id: u64,
    tree_depth: u8,
    members: Vec<Value>,
}

pub struct MembershipStore<R = Sha256MerkleRoot, C = SystemClock> {
    files: GroupFiles,
    key: EncryptionKey,
    group_id: u64,
    tree_depth: u8,
    cache_ttl: Duration,
    roots: R,
    clock: C,
    cache: Mutex<Option<CachedGroup>>,
}

impl MembershipStore {
    pub fn open(config: &StorageConfig, key: EncryptionKey) -> Self {
        Self::with_parts(config, key, Sha256MerkleRoot, SystemClock)
    }
}

impl<R: RootFunction, C: Clock> MembershipStore<R, C> {
    pub fn with_parts(config: &StorageConfig, key: EncryptionKey, roots: R, clock: C) -> Self {
        Self {
            files: GroupFiles::new(&config.data_dir),
            key,
            group_id: config.group_id,
            tree_depth: config.tree_depth,
            cache_ttl: config.cache_ttl,
            roots,
            clock,
            cache: Mutex::new(None),
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.files.dir()
    }

    /// The current state. Served from the cache while it is fresh, reloaded
    /// from disk otherwise. Corrupt files never surface here: the recovery
    /// chain degrades to the empty group instead.
    pub fn state(&self) -> Result<GroupState, Error> {
        let mut cache = self.lock();

        self.current(&mut cache)
    }

    pub fn merkle_root(&self) -> Result<String, Error> {
        let mut cache = self.lock();

        self.current(&mut cache).map(|state| state.root)
    }

    pub fn is_member(&self, commitment: &str) -> Result<bool, Error> {
        let commitment = Commitment::parse(commitment)?;
        let mut cache = self.lock();

        Ok(self.current(&mut cache)?.contains(&commitment))
    }

    /// Appends `commitment` to the group.
    ///
    /// Returns `Ok(false)`, without touching anything, if it is already a
    /// member. Malformed input is rejected before the state is even loaded.
    pub fn add_member(&self, commitment: &str) -> Result<bool, Error> {
        let commitment = Commitment::parse(commitment)?;
        let mut cache = self.lock();

        let mut state = self.current(&mut cache)?;
        if state.contains(&commitment) {
            tracing::debug!("Commitment {commitment} is already a member");
            return Ok(false);
        }

        state.members.push(commitment);
        state.root = self.roots.compute_root(&state.members, state.tree_depth)?;

        self.persist(&state, true)?;

        tracing::info!(
            "Added member #{} to group {}, new root {}",
            state.len(),
            state.group_id,
            state.root
        );

        *cache = Some(CachedGroup {
            state,
            loaded_at: self.clock.now(),
            source: LoadSource::Mutation,
        });

        Ok(true)
    }

    /// Replaces the state with the empty group (same id and depth) and
    /// clears the cache. The previous revision stays in the backup file.
    pub fn reset(&self) -> Result<(), Error> {
        let mut cache = self.lock();

        let current = self.current(&mut cache)?;
        let (group_id, tree_depth) = (current.group_id, current.tree_depth);
        let empty = GroupState::empty(group_id, tree_depth, &self.roots)?;

        self.persist(&empty, true)?;
        *cache = None;

        tracing::info!("Group {group_id} was reset");

        Ok(())
    }

    /// Deletes every file of the group, backup included, and clears the
    /// cache. The next read starts from a clean slate. This cannot be undone.
    pub fn complete_reset(&self) -> Result<(), Error> {
        let mut cache = self.lock();

        self.files.remove_all()?;
        *cache = None;

        tracing::warn!(
            "All group files under {} were deleted",
            self.files.dir().display()
        );

        Ok(())
    }

    pub fn cache_status(&self) -> CacheStatus {
        match self.lock().as_ref() {
            None => CacheStatus::Uninitialized,
            Some(cached) if self.is_fresh(cached) => CacheStatus::Fresh,
            Some(_) => CacheStatus::Stale,
        }
    }

    /// Where the cached state came from, if anything is cached.
    pub fn load_source(&self) -> Option<LoadSource> {
        self.lock().as_ref().map(|cached| cached.source)
    }

    fn lock(&self) -> MutexGuard<'_, Option<CachedGroup>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_fresh(&self, cached: &CachedGroup) -> bool {
        self.clock
            .now()
            .saturating_duration_since(cached.loaded_at)
            < self.cache_ttl
    }

    fn current(&self, cache: &mut Option<CachedGroup>) -> Result<GroupState, Error> {
        if let Some(cached) = cache.as_ref().filter(|cached| self.is_fresh(cached)) {
            tracing::trace!("Serving group state from cache");
            return Ok(cached.state.clone());
        }

        let (state, source) = self.load()?;
        *cache = Some(CachedGroup {
            state: state.clone(),
            loaded_at: self.clock.now(),
            source,
        });

        Ok(state)
    }

    fn load(&self) -> Result<(GroupState, LoadSource), Error> {
        let mut saw_corruption = false;

        for step in RECOVERY_CHAIN {
            match self.attempt(step) {
                Ok((state, source)) => {
                    if saw_corruption {
                        tracing::warn!("Group state recovered via {step:?}");
                    } else if step != RecoveryStep::Primary {
                        tracing::info!("Group state loaded via {step:?}");
                    }
                    return self.reconcile(state, source);
                }
                Err(StepFailure::Missing) => {
                    tracing::trace!("Recovery step {step:?}: nothing to load");
                }
                Err(StepFailure::Corrupt(err)) => {
                    saw_corruption = true;
                    tracing::warn!("Recovery step {step:?} failed: {err}");
                }
            }
        }

        let state = GroupState::empty(self.group_id, self.tree_depth, &self.roots)?;
        if saw_corruption {
            tracing::error!(
                "No loadable group state under {}, falling back to an empty group",
                self.files.dir().display()
            );
        } else {
            tracing::info!("Initializing empty group {}", self.group_id);
        }

        self.persist(&state, true)?;

        Ok((state, LoadSource::Default))
    }

    fn attempt(&self, step: RecoveryStep) -> Result<(GroupState, LoadSource), StepFailure> {
        match step {
            RecoveryStep::Primary => {
                let state = self.read_encrypted(&self.files.primary())?;
                Ok((state, LoadSource::Primary))
            }
            RecoveryStep::Backup => {
                let state = self.read_encrypted(&self.files.backup())?;

                // Restore without rotating: the primary is what just failed,
                // it must not overwrite the good backup.
                if let Err(err) = self.persist(&state, false) {
                    tracing::error!("Could not restore primary file from backup: {err}");
                }

                Ok((state, LoadSource::Backup))
            }
            RecoveryStep::LegacyPlaintext => self.migrate_legacy(),
        }
    }

    /// Checks the invariants of a freshly loaded state: canonical, unique
    /// members and a root that matches them. Repairs and re-persists if needed.
    fn reconcile(
        &self,
        mut state: GroupState,
        source: LoadSource,
    ) -> Result<(GroupState, LoadSource), Error> {
        let before = state.members.len();
        let mut seen = HashSet::with_capacity(before);
        state.members.retain(|member| seen.insert(member.clone()));
        let deduplicated = before != state.members.len();
        if deduplicated {
            tracing::warn!(
                "Dropped {} duplicate member(s) from loaded state",
                before - state.members.len()
            );
        }

        let root = self.roots.compute_root(&state.members, state.tree_depth)?;
        let root_changed = root != state.root;
        if root_changed {
            tracing::warn!("Stored root did not match the members, recomputed it");
            state.root = root;
        }

        if deduplicated || root_changed {
            self.persist(&state, true)?;
        }

        Ok((state, source))
    }

    fn read_encrypted(&self, path: &Path) -> Result<GroupState, StepFailure> {
        let corrupt = |reason: CorruptReason| CorruptDataError {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = GroupFiles::read(path)
            .map_err(|e| corrupt(CorruptReason::Unreadable(e.kind())))?
            .ok_or(StepFailure::Missing)?;

        let blob: EncryptedBlob = serde_json::from_slice(&bytes)
            .map_err(|e| corrupt(CorruptReason::Envelope(e.to_string())))?;

        let plaintext = decrypt(&blob, &self.key).map_err(|e| corrupt(e.into()))?;

        let record: Record = serde_json::from_slice(&plaintext)
            .map_err(|e| corrupt(CorruptReason::Payload(e.to_string())))?;
        let record = open_fields(&record, &self.key).map_err(|e| corrupt(e.into()))?;

        Ok(serde_json::from_value(Value::Object(record))
            .map_err(|e| corrupt(CorruptReason::Payload(e.to_string())))?)
    }

    fn migrate_legacy(&self) -> Result<(GroupState, LoadSource), StepFailure> {
        let mut last_failure = StepFailure::Missing;

        for path in [self.files.primary(), self.files.legacy()] {
            match self.read_legacy(&path) {
                Ok((state, raw)) => {
                    self.files
                        .write_atomic(&self.files.pre_migration(), &raw)
                        .and_then(|()| self.persist(&state, false))
                        .map_err(|e| {
                            tracing::error!("Migration of {} failed: {e}", path.display());
                            CorruptDataError {
                                path: path.clone(),
                                reason: CorruptReason::Payload("migration failed".to_string()),
                            }
                        })?;

                    // The plaintext lives on in the pre-migration copy only.
                    if path == self.files.legacy() {
                        if let Err(err) = self.files.remove(&path) {
                            tracing::error!("Could not remove migrated plaintext state: {err}");
                        }
                    }

                    tracing::info!(
                        "Migrated plaintext group state from {} ({} members)",
                        path.display(),
                        state.len()
                    );

                    return Ok((state, LoadSource::LegacyMigration));
                }
                Err(StepFailure::Missing) => {}
                Err(failure) => last_failure = failure,
            }
        }

        Err(last_failure)
    }

    fn read_legacy(&self, path: &Path) -> Result<(GroupState, Vec<u8>), StepFailure> {
        let corrupt = |reason: CorruptReason| CorruptDataError {
            path: path.to_path_buf(),
            reason,
        };

        let raw = GroupFiles::read(path)
            .map_err(|e| corrupt(CorruptReason::Unreadable(e.kind())))?
            .ok_or(StepFailure::Missing)?;

        let legacy: LegacyGroupState = serde_json::from_slice(&raw)
            .map_err(|e| corrupt(CorruptReason::Payload(e.to_string())))?;

        let members = legacy
            .members
            .iter()
            .map(|member| match member {
                Value::String(text) => Commitment::parse(text),
                Value::Number(number) => Commitment::parse(&number.to_string()),
                _ => Err(ValidationError::NotDecimal),
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| corrupt(CorruptReason::Payload(e.to_string())))?;

        // The stored root is not trusted.
        let root = self
            .roots
            .compute_root(&members, legacy.tree_depth)
            .map_err(|e| corrupt(CorruptReason::Payload(e.to_string())))?;

        let state = GroupState {
            group_id: legacy.id,
            tree_depth: legacy.tree_depth,
            members,
            root,
        };

        Ok((state, raw))
    }

    /// Encrypts `state` and writes it as the primary file. With `rotate`, the
    /// previous primary is first copied to the backup.
    fn persist(&self, state: &GroupState, rotate: bool) -> Result<(), Error> {
        let record = match serde_json::to_value(state) {
            Ok(Value::Object(record)) => record,
            Ok(_) => return Err(CryptoError::Encoding("state is not an object".to_string()).into()),
            Err(e) => return Err(CryptoError::Encoding(e.to_string()).into()),
        };

        let sealed = seal_fields(&record, SEALED_STATE_FIELDS, &self.key)?;
        let plaintext = serde_json::to_vec(&sealed)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let blob = encrypt(&plaintext, &self.key)?;
        let bytes = serde_json::to_vec_pretty(&blob)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;

        if rotate {
            self.files.rotate_backup()?;
        }

        self.files.write_atomic(&self.files.primary(), &bytes)
    }
}

impl<R, C> std::fmt::Debug for MembershipStore<R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipStore")
            .field("dir", &self.files.dir())
            .field("group_id", &self.group_id)
            .field("tree_depth", &self.tree_depth)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}
