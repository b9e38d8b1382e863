// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Stage file storage.
//!
//! Staged restore data is mirrored on disk in a single directory called the
//! __staging directory__. Each user with staged data owns exactly one
//! __stage file__ in it.
//!
//! # Staging Directory Layout
//!
//! Stage files are named `staged_locales_<user_id>.xml`, so
//! `staged_locales_10.xml` holds the staged data of user 10. Nothing else is
//! expected to live in the staging directory. Any other entry found during a
//! directory scan is reported as unrecognized, and is meant to be cleaned up by
//! the caller.
//!
//! # Crash Safety
//!
//! Writes never touch the committed stage file directly. The new content is
//! written to a sibling temporary file, flushed to disk, and then renamed over
//! the committed file. A crash at any point leaves either the previous or the
//! new content in place, never a mix of both. Temporary files left behind by a
//! crash do not match the stage file naming pattern, so the next scan reports
//! them as unrecognized.

use crate::host::UserId;

use std::{
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

/// Common prefix of every stage file name.
pub const STAGE_FILE_NAME: &str = "staged_locales";

const STAGE_FILE_EXT: &str = ".xml";
const TEMP_FILE_EXT: &str = ".tmp";

/// Determine stage file name for user.
pub fn stage_file_name(user_id: UserId) -> String {
    format!("{STAGE_FILE_NAME}_{user_id}{STAGE_FILE_EXT}")
}

/// Extract user id from stage file name.
///
/// # Errors
///
/// - Return [`StageNameError::Unrecognized`] if name does not follow the
///   `staged_locales_<digits>.xml` pattern.
/// - Return [`StageNameError::InvalidUserId`] if digits do not fit a user id.
pub fn parse_stage_file_name(file_name: &str) -> Result<UserId, StageNameError> {
    let digits = file_name
        .strip_prefix(STAGE_FILE_NAME)
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_suffix(STAGE_FILE_EXT))
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .ok_or(StageNameError::Unrecognized)?;

    digits.parse().map_err(|_| StageNameError::InvalidUserId)
}

/// Entry found while scanning the staging directory.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct StageEntry {
    /// Full path to entry.
    pub path: PathBuf,

    /// User id encoded in file name, if the name is valid.
    pub user_id: Result<UserId, StageNameError>,
}

/// Crash-safe store of stage files.
#[derive(Debug, Clone)]
pub struct StageFileStore {
    dir: PathBuf,
}

impl StageFileStore {
    /// Open staging directory.
    ///
    /// Creates the staging directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateDir`] if staging directory cannot be
    ///   created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        mkdirp::mkdirp(&dir).map_err(|err| StoreError::CreateDir {
            source: err,
            path: dir.clone(),
        })?;

        Ok(Self { dir })
    }

    /// Path to staging directory.
    pub fn dir(&self) -> &Path {
        self.dir.as_path()
    }

    /// Path to stage file of user.
    ///
    /// Does not check if the path returned actually exists.
    pub fn path_for(&self, user_id: UserId) -> PathBuf {
        self.dir.join(stage_file_name(user_id))
    }

    /// Read committed stage file of user.
    ///
    /// Returns `None` if user has no stage file.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if stage file exists but cannot be read.
    pub fn read(&self, user_id: UserId) -> Result<Option<Vec<u8>>> {
        read_file(self.path_for(user_id))
    }

    /// Atomically replace stage file of user with new content.
    ///
    /// On failure the temporary file is discarded, and the previously
    /// committed stage file is left untouched.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Write`] if temporary file cannot be written
    ///   or flushed.
    /// - Return [`StoreError::Commit`] if temporary file cannot be renamed
    ///   over stage file.
    pub fn write(&self, user_id: UserId, data: &[u8]) -> Result<()> {
        let path = self.path_for(user_id);
        let temp = temp_path_for(&path);

        if let Err(err) = write_synced(&temp, data) {
            let _ = fs::remove_file(&temp);
            return Err(StoreError::Write { source: err, path: temp });
        }

        if let Err(err) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(StoreError::Commit { source: err, path });
        }

        // INVARIANT: Persist the rename itself, not just the file content.
        #[cfg(unix)]
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        debug!("committed stage file {:?}", path.display());
        Ok(())
    }

    /// Delete stage file of user.
    ///
    /// Deleting a missing stage file is not an error.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Delete`] if stage file cannot be removed.
    pub fn delete(&self, user_id: UserId) -> Result<()> {
        remove_file(self.path_for(user_id))
    }

    /// Scan staging directory.
    ///
    /// Lists every entry of the staging directory alongside the user id its
    /// name encodes. A missing staging directory yields no entries.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::ReadDir`] if staging directory cannot be listed.
    pub fn entries(&self) -> Result<Vec<StageEntry>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StoreError::ReadDir {
                    source: err,
                    path: self.dir.clone(),
                })
            }
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|err| StoreError::ReadDir {
                source: err,
                path: self.dir.clone(),
            })?;
            let name = entry.file_name();
            let user_id = name
                .to_str()
                .ok_or(StageNameError::Unrecognized)
                .and_then(parse_stage_file_name);
            entries.push(StageEntry {
                path: entry.path(),
                user_id,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(entries)
    }

    /// Read file found through [`StageFileStore::entries`].
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if file exists but cannot be read.
    pub fn read_entry(&self, entry: &StageEntry) -> Result<Option<Vec<u8>>> {
        read_file(&entry.path)
    }

    /// Remove file found through [`StageFileStore::entries`].
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Delete`] if file cannot be removed.
    pub fn remove_entry(&self, entry: &StageEntry) -> Result<()> {
        remove_file(&entry.path)
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(TEMP_FILE_EXT);
    path.with_file_name(name)
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

fn read_file(path: impl AsRef<Path>) -> Result<Option<Vec<u8>>> {
    match fs::read(path.as_ref()) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StoreError::Read {
            source: err,
            path: path.as_ref().into(),
        }),
    }
}

fn remove_file(path: impl AsRef<Path>) -> Result<()> {
    match fs::remove_file(path.as_ref()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::Delete {
            source: err,
            path: path.as_ref().into(),
        }),
    }
}

/// Stage file name cannot be mapped to a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StageNameError {
    /// File name does not follow stage file naming pattern.
    #[error("Unrecognized file")]
    Unrecognized,

    /// File name follows the pattern, but the user id does not fit.
    #[error("Could not parse user id from file name")]
    InvalidUserId,
}

/// Stage file store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Staging directory cannot be created.
    #[error("failed to create staging directory at {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Staging directory cannot be listed.
    #[error("failed to list staging directory at {:?}", path.display())]
    ReadDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Stage file cannot be read.
    #[error("failed to read stage file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Temporary stage file cannot be written.
    #[error("failed to write temporary stage file at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Temporary stage file cannot be committed.
    #[error("failed to commit stage file at {:?}", path.display())]
    Commit {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Stage file cannot be deleted.
    #[error("failed to delete stage file at {:?}", path.display())]
    Delete {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
