//! The files backing the group state.
//!
//! ```text
//! <dir>/group.encrypted            current revision (EncryptedBlob JSON)
//! <dir>/group.backup.encrypted     previous revision, same format
//! <dir>/group.json                 legacy plaintext state, read-only
//! <dir>/group.pre-migration.json   verbatim copy of a migrated plaintext file
//! ```
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::error::Error;

pub const PRIMARY_FILE: &str = "group.encrypted";
pub const BACKUP_FILE: &str = "group.backup.encrypted";
pub const LEGACY_FILE: &str = "group.json";
pub const PRE_MIGRATION_FILE: &str = "group.pre-migration.json";

#[derive(Debug, Clone)]
pub struct GroupFiles {
    dir: PathBuf,
}

impl GroupFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn primary(&self) -> PathBuf {
        self.dir.join(PRIMARY_FILE)
    }

    pub fn backup(&self) -> PathBuf {
        self.dir.join(BACKUP_FILE)
    }

    pub fn legacy(&self) -> PathBuf {
        self.dir.join(LEGACY_FILE)
    }

    pub fn pre_migration(&self) -> PathBuf {
        self.dir.join(PRE_MIGRATION_FILE)
    }

    /// Returns `Ok(None)` if the file does not exist.
    pub fn read(path: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Writes `bytes` to a sibling temporary file, syncs it, then renames it
    /// over `path`. Readers see either the old or the new content, never a
    /// torn write.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), Error> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;

        let temp_path = path.with_extension("tmp");
        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()
        };

        if let Err(err) = write() {
            let _ = fs::remove_file(&temp_path);
            return Err(Error::io(&temp_path, err));
        }

        fs::rename(&temp_path, path).map_err(|e| Error::io(path, e))
    }

    /// Copies the primary file over the backup, if there is a primary file.
    pub fn rotate_backup(&self) -> Result<(), Error> {
        let primary = self.primary();

        match Self::read(&primary).map_err(|e| Error::io(&primary, e))? {
            Some(bytes) => self.write_atomic(&self.backup(), &bytes),
            None => Ok(()),
        }
    }

    /// Removes `path`. A file that is already gone is fine.
    pub fn remove(&self, path: &Path) -> Result<(), Error> {
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!("Removed {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io(path, err)),
        }
    }

    /// Removes every file of the group, including leftovers of interrupted writes.
    pub fn remove_all(&self) -> Result<(), Error> {
        for path in [
            self.primary(),
            self.backup(),
            self.legacy(),
            self.pre_migration(),
            self.primary().with_extension("tmp"),
            self.backup().with_extension("tmp"),
            self.pre_migration().with_extension("tmp"),
        ] {
            self.remove(&path)?;
        }

        Ok(())
    }

    pub fn exists(path: &Path) -> bool {
        path.try_exists().unwrap_or(false)
    }
}
