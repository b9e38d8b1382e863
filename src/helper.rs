// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup and restore of application locales.
//!
//! The [`LocaleBackupHelper`] is the face of the staging subsystem. It builds
//! backup payloads out of live locale preferences, ingests restore payloads,
//! and reconciles staged data whenever the host reports a new package.
//!
//! # Live Wins
//!
//! A restored preference never overwrites a preference the user has already
//! set. Whenever a restored value is about to be applied, the live preference
//! is checked first. If it is non-empty the restored value is discarded.
//!
//! # Locking
//!
//! Every operation that touches staged data holds one subsystem-wide lock for
//! its full duration. Restore ingestion, package reconciliation, retention
//! sweeps, and user removal are thus strictly serialized. Backup payload
//! generation only holds the lock for its opening sweep.
//!
//! # Failure Policy
//!
//! Nothing in here returns an error to the caller once constructed. File I/O
//! failures, malformed data, and failed host calls are logged, and the
//! subsystem degrades to having no staged or backup data.

use crate::{
    codec::{self, PackageStates},
    config::Settings,
    host::{
        user_id_of, BackupNotifier, Clock, LocaleList, LocaleService, PackageQuery, SystemClock,
        UserId,
    },
    monitor::PlatformEvent,
    path::NoWayHome,
    stage::{StagedData, StagedTable},
    store::{StageFileStore, StoreError},
};

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tracing::{debug, error, info, instrument};

/// Backup key under which the backup transport files locale data.
pub const SYSTEM_BACKUP_PACKAGE_KEY: &str = "android";

/// Staged locale backup and restore.
#[derive(Debug)]
pub struct LocaleBackupHelper<H, C = SystemClock>
where
    H: LocaleService + PackageQuery + BackupNotifier,
    C: Clock,
{
    host: H,
    clock: C,
    staged: Mutex<StagedTable>,
}

impl<H, C> LocaleBackupHelper<H, C>
where
    H: LocaleService + PackageQuery + BackupNotifier,
    C: Clock,
{
    /// Construct new helper.
    ///
    /// Loads all stage files currently in the store. Malformed stage files
    /// are deleted along the way.
    pub fn new(host: H, clock: C, store: StageFileStore, retention: Duration) -> Self {
        Self {
            host,
            clock,
            staged: Mutex::new(StagedTable::load(store, retention)),
        }
    }

    /// Construct new helper from settings.
    ///
    /// # Errors
    ///
    /// - Return [`HelperError::NoWayHome`] if no staging directory is
    ///   configured and the default cannot be determined.
    /// - Return [`HelperError::Store`] if staging directory cannot be created.
    pub fn with_settings(host: H, clock: C, settings: &Settings) -> Result<Self> {
        let store = StageFileStore::open(settings.staging_dir()?)?;
        Ok(Self::new(host, clock, store, settings.retention()))
    }

    /// Host collaborators.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Copy of staged record of user, if any.
    pub fn staged_data(&self, user_id: UserId) -> Option<StagedData> {
        self.lock().get(user_id).cloned()
    }

    /// Build backup payload of user.
    ///
    /// Collects the locale override of every installed application of the
    /// user. Applications without an override are left out, so are
    /// applications whose locales cannot be queried.
    ///
    /// Returns `None` when there is nothing to back up, which tells the backup
    /// transport to drop any previous backup entry.
    #[instrument(skip(self), level = "debug")]
    pub fn backup_payload(&self, user_id: UserId) -> Option<Vec<u8>> {
        self.sweep_expired();

        let mut package_states = PackageStates::new();
        for app in self.host.installed_applications(user_id) {
            match self.host.application_locales(&app.package_name, user_id) {
                Ok(locales) if !locales.is_empty() => {
                    debug!(
                        "add package={} locales={} to backup payload",
                        app.package_name, locales
                    );
                    package_states.insert(app.package_name, locales.to_language_tags());
                }
                Ok(_) => {}
                Err(err) => {
                    error!("could not get locales for package {}: {err}", app.package_name)
                }
            }
        }

        if package_states.is_empty() {
            debug!("no locale overrides to back up for user {user_id}");
            return None;
        }

        match codec::encode(&package_states, None) {
            Ok(payload) => Some(payload),
            Err(err) => {
                error!("could not encode backup payload: {err:?}");
                None
            }
        }
    }

    /// Ingest restore payload of user.
    ///
    /// Preferences of installed packages are applied right away, following
    /// the live wins rule. Preferences of packages that are not installed yet
    /// replace whatever was staged for the user before, and are persisted once
    /// the whole payload has been processed.
    ///
    /// A missing payload is ignored. A payload that cannot be parsed counts as
    /// a restore without any packages.
    #[instrument(skip(self, payload), level = "debug")]
    pub fn stage_and_apply_restored_payload(&self, payload: Option<&[u8]>, user_id: UserId) {
        let Some(payload) = payload else {
            error!("no payload to restore for user {user_id}");
            return;
        };

        let package_states = match codec::decode(payload) {
            Ok(document) => document.package_states,
            Err(err) => {
                error!("could not parse restore payload: {err}");
                PackageStates::new()
            }
        };

        let mut table = self.lock();
        let mut record = StagedData::new(self.clock.millis());
        for (package_name, tags) in package_states {
            if self.host.is_installed(&package_name, user_id) {
                self.apply_restore(&package_name, &tags, user_id);
            } else {
                debug!("stage locales={tags} package={package_name} for lazy restore");
                record.package_states.insert(package_name, tags);
            }
        }

        info!(
            "restore for user {user_id} staged {} package(s)",
            record.package_states.len()
        );
        table.insert(user_id, record);
        table.persist(user_id);
    }

    /// Reconcile staged data with newly added package.
    ///
    /// Does nothing unless the owning user has staged data for the package.
    #[instrument(skip(self), level = "debug")]
    pub fn on_package_added(&self, package_name: &str, uid: u32) {
        let user_id = user_id_of(uid);
        let mut table = self.lock();
        if !table.contains(user_id) {
            return;
        }

        if !self.host.is_installed(package_name, user_id) {
            error!(
                "{package_name} not installed for user {user_id}, could not restore locales from stage file"
            );
            return;
        }

        let Some(tags) = table
            .get(user_id)
            .and_then(|record| record.package_states.get(package_name))
            .cloned()
        else {
            return;
        };

        self.apply_restore(package_name, &tags, user_id);
        if let Some(record) = table.get_mut(user_id) {
            record.package_states.remove(package_name);
        }
        table.persist(user_id);
    }

    /// Package data was cleared, its locales are no longer worth backing up.
    pub fn on_package_data_cleared(&self, package_name: &str, uid: u32) {
        debug!("package {package_name} data cleared for uid {uid}");
        self.notify_backup_manager();
    }

    /// Package was fully removed, its locales are no longer worth backing up.
    pub fn on_package_removed(&self, package_name: &str, uid: u32) {
        debug!("package {package_name} removed for uid {uid}");
        self.notify_backup_manager();
    }

    /// Drop staged data of removed user right away.
    #[instrument(skip(self), level = "debug")]
    pub fn on_user_removed(&self, user_id: UserId) {
        if self.lock().remove(user_id).is_some() {
            info!("dropped staged data of removed user {user_id}");
        }
    }

    /// Dispatch platform event to its handler.
    pub fn handle_event(&self, event: &PlatformEvent) {
        match event {
            PlatformEvent::PackageAdded { package_name, uid } => {
                self.on_package_added(package_name, *uid)
            }
            PlatformEvent::PackageDataCleared { package_name, uid } => {
                self.on_package_data_cleared(package_name, *uid)
            }
            PlatformEvent::PackageRemoved { package_name, uid } => {
                self.on_package_removed(package_name, *uid)
            }
            PlatformEvent::UserRemoved { user_id } => self.on_user_removed(*user_id),
        }
    }

    /// Ask backup transport to include locale data in its next pass.
    pub fn notify_backup_manager(&self) {
        self.host.data_changed(SYSTEM_BACKUP_PACKAGE_KEY);
    }

    /// Drop staged records that outlived the retention period.
    ///
    /// Returns users whose records were swept.
    pub fn sweep_expired(&self) -> Vec<UserId> {
        let now = self.clock.millis();
        self.lock().sweep(now)
    }

    fn lock(&self) -> MutexGuard<'_, StagedTable> {
        // INVARIANT: Table is consistent between statements, so a panic while
        // holding the lock never leaves it half-updated.
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_restore(&self, package_name: &str, tags: &str, user_id: UserId) {
        match self.host.application_locales(package_name, user_id) {
            Ok(current) if !current.is_empty() => {
                debug!("keep locales={current} set by user for package={package_name}");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                error!("could not check current locales of {package_name} before restoring: {err}")
            }
        }

        let locales = LocaleList::from_language_tags(tags);
        match self
            .host
            .set_application_locales(package_name, user_id, &locales)
        {
            Ok(()) => info!("restored locales={locales} for package={package_name}"),
            Err(err) => error!("could not restore locales for {package_name}: {err}"),
        }
    }
}

/// Helper construction error types.
#[derive(Debug, thiserror::Error)]
pub enum HelperError {
    /// Default staging directory cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),

    /// Staging directory cannot be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Friendly result alias :3
type Result<T, E = HelperError> = std::result::Result<T, E>;
