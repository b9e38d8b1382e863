// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Staged restore data.
//!
//! A restore may carry locale preferences for applications that are not yet
//! installed for the user. These preferences are __staged__ until the
//! application shows up, and are kept in the [`StagedTable`], keyed by user.
//!
//! # Record Lifecycle
//!
//! 1. A record is created when a restore payload is ingested that holds at
//!    least one package that is not installed yet.
//! 2. Each time one of its pending packages is installed and reconciled, the
//!    package is dropped from the record.
//! 3. Once the record runs out of pending packages, it is removed from memory
//!    and disk.
//!
//! Records can also be removed early. A record older than the retention period
//! is swept regardless of its pending packages, and a record is dropped right
//! away when its user is removed.
//!
//! # Write-Through
//!
//! The in-memory table is the authority. Each mutation is written through to
//! the [`StageFileStore`] via [`StagedTable::persist`] or
//! [`StagedTable::remove`]. If a write fails, memory stays ahead of disk until
//! the next successful write for that user.

use crate::{
    codec::{self, PackageStates},
    host::UserId,
    store::{StageEntry, StageFileStore},
};

use std::{collections::BTreeMap, time::Duration};
use tracing::{debug, error, info, warn};

/// Default retention period of staged data.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Staged restore record of a single user.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct StagedData {
    /// Time when record was created, never updated afterwards.
    pub creation_time_millis: i64,

    /// Packages waiting to be installed, mapped to their language tags.
    pub package_states: PackageStates,
}

impl StagedData {
    /// Construct new empty record created at given time.
    pub fn new(creation_time_millis: i64) -> Self {
        Self {
            creation_time_millis,
            package_states: PackageStates::new(),
        }
    }

    /// Check if record has outlived retention period at given time.
    ///
    /// A record exactly at the edge of the retention period is still fresh.
    pub fn is_expired(&self, now_millis: i64, retention: Duration) -> bool {
        let retention_millis = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        self.creation_time_millis < now_millis.saturating_sub(retention_millis)
    }
}

/// Table of staged records keyed by user.
#[derive(Debug)]
pub struct StagedTable {
    store: StageFileStore,
    staged: BTreeMap<UserId, StagedData>,
    retention: Duration,
}

impl StagedTable {
    /// Load staged records from stage file store.
    ///
    /// Every entry of the staging directory that cannot be turned into a
    /// record is deleted, see [`inspect_entry`] for the reasons.
    pub fn load(store: StageFileStore, retention: Duration) -> Self {
        let mut staged = BTreeMap::new();

        let entries = match store.entries() {
            Ok(entries) => entries,
            Err(err) => {
                error!("cannot scan staging directory: {err:?}");
                Vec::new()
            }
        };

        for entry in entries {
            let name = entry
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let reason = match inspect_entry(&store, &entry) {
                Ok((user_id, record)) => {
                    debug!("loaded stage file {name} for user {user_id}");
                    staged.insert(user_id, record);
                    continue;
                }
                Err(reason) => reason,
            };

            if let Err(err) = store.remove_entry(&entry) {
                error!("cannot delete {name}: {err:?}");
                continue;
            }
            warn!("Deleted {name}. Reason: {reason}.");
        }

        Self {
            store,
            staged,
            retention,
        }
    }

    /// Stage file store backing this table.
    pub fn store(&self) -> &StageFileStore {
        &self.store
    }

    /// Retention period of staged records.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.staged.contains_key(&user_id)
    }

    pub fn get(&self, user_id: UserId) -> Option<&StagedData> {
        self.staged.get(&user_id)
    }

    pub fn get_mut(&mut self, user_id: UserId) -> Option<&mut StagedData> {
        self.staged.get_mut(&user_id)
    }

    /// Iterate through staged records in user order.
    pub fn iter(&self) -> impl Iterator<Item = (UserId, &StagedData)> {
        self.staged.iter().map(|(user_id, record)| (*user_id, record))
    }

    /// Replace record of user in memory.
    ///
    /// Call [`StagedTable::persist`] afterwards to mirror it on disk.
    pub fn insert(&mut self, user_id: UserId, record: StagedData) {
        self.staged.insert(user_id, record);
    }

    /// Mirror record of user on disk.
    ///
    /// A record without pending packages is removed from both memory and disk
    /// instead of being written. A user without a record is left alone.
    /// Failures are logged, and the previously committed stage file stays in
    /// place.
    pub fn persist(&mut self, user_id: UserId) {
        let Some(record) = self.staged.get(&user_id) else {
            return;
        };

        if record.package_states.is_empty() {
            self.remove(user_id);
            return;
        }

        let data = match codec::encode(&record.package_states, Some(record.creation_time_millis)) {
            Ok(data) => data,
            Err(err) => {
                error!("could not encode stage data for user {user_id}: {err:?}");
                return;
            }
        };

        match self.store.write(user_id, &data) {
            Ok(()) => debug!("stage file written for user {user_id}"),
            Err(err) => error!("could not write stage file for user {user_id}: {err:?}"),
        }
    }

    /// Remove record of user from memory and disk.
    ///
    /// Returns the removed record, if any.
    pub fn remove(&mut self, user_id: UserId) -> Option<StagedData> {
        if let Err(err) = self.store.delete(user_id) {
            error!("could not delete stage file for user {user_id}: {err:?}");
        }

        self.staged.remove(&user_id)
    }

    /// Remove every record that outlived the retention period.
    ///
    /// Returns users whose records were swept.
    pub fn sweep(&mut self, now_millis: i64) -> Vec<UserId> {
        let expired = self
            .staged
            .iter()
            .filter(|(_, record)| record.is_expired(now_millis, self.retention))
            .map(|(user_id, _)| *user_id)
            .collect::<Vec<_>>();

        for user_id in &expired {
            info!("staged data for user {user_id} expired");
            self.remove(*user_id);
        }

        expired
    }
}

/// Turn entry of staging directory into staged record without touching it.
///
/// # Errors
///
/// - Return reason why entry holds no usable record: unrecognized name, user
///   id that does not fit, content that cannot be decoded or lacks a creation
///   time, or a record without pending packages.
pub fn inspect_entry(
    store: &StageFileStore,
    entry: &StageEntry,
) -> Result<(UserId, StagedData), String> {
    let user_id = entry.user_id.map_err(|err| err.to_string())?;
    let record = read_record(store, entry).ok_or_else(|| "Could not read file".to_string())?;
    if record.package_states.is_empty() {
        return Err("No pending packages".into());
    }

    Ok((user_id, record))
}

fn read_record(store: &StageFileStore, entry: &StageEntry) -> Option<StagedData> {
    let data = match store.read_entry(entry) {
        Ok(Some(data)) => data,
        Ok(None) => return None,
        Err(err) => {
            error!("could not read stage file: {err:?}");
            return None;
        }
    };

    let document = match codec::decode(&data) {
        Ok(document) => document,
        Err(err) => {
            error!("could not parse stage file {:?}: {err}", entry.path.display());
            return None;
        }
    };

    Some(StagedData {
        creation_time_millis: document.creation_time_millis?,
        package_states: document.package_states,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;
    use std::fs;

    const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

    fn record(creation_time_millis: i64, entries: &[(&str, &str)]) -> StagedData {
        StagedData {
            creation_time_millis,
            package_states: entries
                .iter()
                .map(|(name, tags)| (name.to_string(), tags.to_string()))
                .collect(),
        }
    }

    fn table() -> (tempfile::TempDir, StagedTable) {
        let root = tempfile::tempdir().unwrap();
        let store = StageFileStore::open(root.path()).unwrap();
        (root, StagedTable::load(store, DEFAULT_RETENTION))
    }

    #[test_case(10 * DAY_MILLIS - 3 * DAY_MILLIS, false; "exactly at boundary")]
    #[test_case(10 * DAY_MILLIS - 3 * DAY_MILLIS - 1, true; "one milli past boundary")]
    #[test_case(10 * DAY_MILLIS - 4 * DAY_MILLIS, true; "four days old")]
    #[test_case(10 * DAY_MILLIS, false; "brand new")]
    #[test]
    fn staged_data_expiry(creation_time_millis: i64, expect: bool) {
        let record = StagedData::new(creation_time_millis);
        assert_eq!(record.is_expired(10 * DAY_MILLIS, DEFAULT_RETENTION), expect);
    }

    #[test]
    fn persist_writes_stage_file() -> anyhow::Result<()> {
        let (_root, mut table) = table();
        table.insert(4, record(100, &[("com.b", "fr-FR")]));
        table.persist(4);

        let document = codec::decode(&table.store().read(4)?.unwrap())?;
        assert_eq!(document.creation_time_millis, Some(100));
        assert_eq!(document.package_states, record(100, &[("com.b", "fr-FR")]).package_states);

        Ok(())
    }

    #[test]
    fn persist_empty_record_deletes_it() -> anyhow::Result<()> {
        let (_root, mut table) = table();
        table.insert(4, record(100, &[("com.b", "fr-FR")]));
        table.persist(4);

        table.get_mut(4).unwrap().package_states.remove("com.b");
        table.persist(4);

        assert!(!table.contains(4));
        assert_eq!(table.store().read(4)?, None);

        Ok(())
    }

    #[test]
    fn load_restores_persisted_records() -> anyhow::Result<()> {
        let (root, mut table) = table();
        table.insert(1, record(11, &[("com.a", "en-US")]));
        table.insert(2, record(22, &[("com.b", "fr-FR"), ("com.c", "de-DE")]));
        table.persist(1);
        table.persist(2);

        let reloaded = StagedTable::load(StageFileStore::open(root.path())?, DEFAULT_RETENTION);
        let result = reloaded.iter().map(|(u, r)| (u, r.clone())).collect::<Vec<_>>();
        let expect = vec![
            (1, record(11, &[("com.a", "en-US")])),
            (2, record(22, &[("com.b", "fr-FR"), ("com.c", "de-DE")])),
        ];
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn load_deletes_malformed_files() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let write = |name: &str, data: &str| fs::write(root.path().join(name), data);
        write("notes.txt", "hello")?;
        write("staged_locales_3.xml.tmp", "partial")?;
        write("staged_locales_99999999999.xml", r#"<locales creationTimeMillis="1"/>"#)?;
        write("staged_locales_4.xml", "<locales><package")?;
        write("staged_locales_5.xml", r#"<locales><package name="a" locales="b"/></locales>"#)?;
        write("staged_locales_8.xml", r#"<locales creationTimeMillis="1"/>"#)?;
        write(
            "staged_locales_6.xml",
            r#"<locales creationTimeMillis="6"><package name="a" locales="b"/></locales>"#,
        )?;

        let table = StagedTable::load(StageFileStore::open(root.path())?, DEFAULT_RETENTION);
        assert_eq!(table.iter().map(|(u, _)| u).collect::<Vec<_>>(), vec![6]);

        let names = fs::read_dir(root.path())?
            .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(names, vec!["staged_locales_6.xml".to_string()]);

        Ok(())
    }

    #[test]
    fn inspect_entry_leaves_files_alone() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        fs::write(root.path().join("staged_locales_8.xml"), r#"<locales creationTimeMillis="1"/>"#)?;
        fs::write(
            root.path().join("staged_locales_9.xml"),
            r#"<locales creationTimeMillis="9"><package name="a" locales="b"/></locales>"#,
        )?;

        let store = StageFileStore::open(root.path())?;
        let results = store
            .entries()?
            .iter()
            .map(|entry| inspect_entry(&store, entry))
            .collect::<Vec<_>>();
        assert_eq!(
            results,
            vec![
                Err("No pending packages".to_string()),
                Ok((9, record(9, &[("a", "b")]))),
            ]
        );
        assert!(store.read(8)?.is_some());

        Ok(())
    }

    #[test]
    fn sweep_drops_only_expired_records() -> anyhow::Result<()> {
        let now = 10 * DAY_MILLIS;
        let (_root, mut table) = table();
        table.insert(7, record(now - 4 * DAY_MILLIS, &[("com.old", "en-US")]));
        table.insert(8, record(now - 3 * DAY_MILLIS, &[("com.edge", "en-US")]));
        table.insert(9, record(now, &[("com.new", "en-US")]));
        for user_id in [7, 8, 9] {
            table.persist(user_id);
        }

        assert_eq!(table.sweep(now), vec![7]);
        assert_eq!(table.store().read(7)?, None);
        assert!(table.store().read(8)?.is_some());
        assert!(table.store().read(9)?.is_some());

        // Sweeping again changes nothing.
        assert_eq!(table.sweep(now), Vec::<UserId>::new());
        assert_eq!(table.iter().map(|(u, _)| u).collect::<Vec<_>>(), vec![8, 9]);

        Ok(())
    }

    #[test]
    fn remove_drops_record_and_file() -> anyhow::Result<()> {
        let (_root, mut table) = table();
        table.insert(3, record(1, &[("com.a", "en-US")]));
        table.persist(3);

        assert_eq!(table.remove(3), Some(record(1, &[("com.a", "en-US")])));
        assert_eq!(table.store().read(3)?, None);
        assert_eq!(table.remove(3), None);

        Ok(())
    }
}
