// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use locale_backup::{
    codec::{self, PackageStates},
    host::{HostError, PER_USER_RANGE},
    ApplicationInfo, BackupNotifier, Clock, LocaleBackupHelper, LocaleList, LocaleService,
    PackageQuery, StageFileStore, UserId,
};

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    path::Path,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

pub(crate) const DAY: Duration = Duration::from_secs(24 * 60 * 60);
pub(crate) const RETENTION: Duration = Duration::from_secs(3 * 24 * 60 * 60);
pub(crate) const START_MILLIS: i64 = 1_700_000_000_000;

pub(crate) type TestHelper = LocaleBackupHelper<FakeHost, ManualClock>;

/// In-memory stand-in for the host platform.
#[derive(Debug, Default)]
pub(crate) struct FakeHost {
    state: Mutex<HostState>,
}

#[derive(Debug, Default)]
struct HostState {
    installed: BTreeMap<UserId, BTreeSet<String>>,
    locales: BTreeMap<(UserId, String), LocaleList>,
    failing: HashSet<String>,
    notifications: Vec<String>,
}

impl FakeHost {
    pub(crate) fn install(&self, package_name: &str, user_id: UserId) {
        let mut state = self.state.lock().unwrap();
        state
            .installed
            .entry(user_id)
            .or_default()
            .insert(package_name.into());
    }

    pub(crate) fn set_locales(&self, package_name: &str, user_id: UserId, tags: &str) {
        let mut state = self.state.lock().unwrap();
        state.locales.insert(
            (user_id, package_name.into()),
            LocaleList::from_language_tags(tags),
        );
    }

    pub(crate) fn locales(&self, package_name: &str, user_id: UserId) -> String {
        let state = self.state.lock().unwrap();
        state
            .locales
            .get(&(user_id, package_name.to_string()))
            .map(LocaleList::to_language_tags)
            .unwrap_or_default()
    }

    /// Make every locale query and update of package fail.
    pub(crate) fn fail_for(&self, package_name: &str) {
        let mut state = self.state.lock().unwrap();
        state.failing.insert(package_name.into());
    }

    pub(crate) fn notifications(&self) -> Vec<String> {
        self.state.lock().unwrap().notifications.clone()
    }
}

impl LocaleService for FakeHost {
    fn application_locales(
        &self,
        package_name: &str,
        user_id: UserId,
    ) -> Result<LocaleList, HostError> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(package_name) {
            return Err(HostError::Remote(format!("{package_name} is unreachable")));
        }

        Ok(state
            .locales
            .get(&(user_id, package_name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn set_application_locales(
        &self,
        package_name: &str,
        user_id: UserId,
        locales: &LocaleList,
    ) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(package_name) {
            return Err(HostError::Remote(format!("{package_name} is unreachable")));
        }

        state
            .locales
            .insert((user_id, package_name.into()), locales.clone());
        Ok(())
    }
}

impl PackageQuery for FakeHost {
    fn is_installed(&self, package_name: &str, user_id: UserId) -> bool {
        let state = self.state.lock().unwrap();
        state
            .installed
            .get(&user_id)
            .is_some_and(|packages| packages.contains(package_name))
    }

    fn installed_applications(&self, user_id: UserId) -> Vec<ApplicationInfo> {
        let state = self.state.lock().unwrap();
        state
            .installed
            .get(&user_id)
            .map(|packages| {
                packages
                    .iter()
                    .enumerate()
                    .map(|(app_id, name)| ApplicationInfo::new(name.clone(), uid(user_id, app_id as u32)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl BackupNotifier for FakeHost {
    fn data_changed(&self, backup_key: &str) {
        self.state
            .lock()
            .unwrap()
            .notifications
            .push(backup_key.into());
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub(crate) struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub(crate) fn new(millis: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(millis)),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Construct helper over staging directory with fresh fake host.
pub(crate) fn helper_at(dir: impl AsRef<Path>, clock: &ManualClock) -> TestHelper {
    let store = StageFileStore::open(dir.as_ref()).unwrap();
    LocaleBackupHelper::new(FakeHost::default(), clock.clone(), store, RETENTION)
}

/// Application uid of user.
pub(crate) fn uid(user_id: UserId, app_id: u32) -> u32 {
    user_id * PER_USER_RANGE + 10_000 + app_id
}

/// Encode restore payload the way the backup transport hands it over.
pub(crate) fn payload(entries: &[(&str, &str)]) -> Vec<u8> {
    codec::encode(&states(entries), None).unwrap()
}

pub(crate) fn states(entries: &[(&str, &str)]) -> PackageStates {
    entries
        .iter()
        .map(|(name, tags)| (name.to_string(), tags.to_string()))
        .collect()
}
