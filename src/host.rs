// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host platform collaborators.
//!
//! The staging subsystem never owns the live locale preferences of an
//! application, nor does it know which packages are installed for a user.
//! Both of these facts belong to the host platform. This module describes
//! the narrow surface the subsystem needs from the host as a small set of
//! traits, so the host can be swapped out for an in-memory fake in tests.
//!
//! # Users and UIDs
//!
//! Every staged record is keyed by a __user id__. Package events from the host
//! report the __uid__ of the application instead, which embeds the user id
//! through a fixed per-user range. Use [`user_id_of`] to map one to the other.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

/// Identifier of a user (or work profile) on the host.
pub type UserId = u32;

/// Size of the uid range reserved for each user.
pub const PER_USER_RANGE: u32 = 100_000;

/// Determine user id that owns an application uid.
pub fn user_id_of(uid: u32) -> UserId {
    uid / PER_USER_RANGE
}

/// Ordered list of locale language tags for an application.
///
/// Rendered as comma separated BCP-47 tags, e.g., "en-US,fr-FR". An empty
/// list means the application follows the system locale, i.e., the user has
/// not set an override for it.
#[derive(Default, Debug, PartialEq, Eq, Clone, Hash)]
pub struct LocaleList(Vec<String>);

impl LocaleList {
    /// Parse locale list from comma separated language tags.
    ///
    /// Blank segments are dropped, so "" and " , " both produce an empty list.
    pub fn from_language_tags(tags: impl AsRef<str>) -> Self {
        Self(
            tags.as_ref()
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    /// Render locale list back into comma separated language tags.
    pub fn to_language_tags(&self) -> String {
        self.0.join(",")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromStr for LocaleList {
    type Err = std::convert::Infallible;

    fn from_str(tags: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_language_tags(tags))
    }
}

impl Display for LocaleList {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.to_language_tags().as_str())
    }
}

/// Installed application as reported by the host.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ApplicationInfo {
    /// Package name of the application.
    pub package_name: String,

    /// Uid the application runs under.
    pub uid: u32,
}

impl ApplicationInfo {
    pub fn new(package_name: impl Into<String>, uid: u32) -> Self {
        Self {
            package_name: package_name.into(),
            uid,
        }
    }
}

/// Live per-application locale preferences.
pub trait LocaleService: Send + Sync + 'static {
    /// Get current locale override of package for given user.
    ///
    /// Returns an empty [`LocaleList`] if no override has been set.
    fn application_locales(&self, package_name: &str, user_id: UserId) -> Result<LocaleList>;

    /// Set locale override of package for given user.
    fn set_application_locales(
        &self,
        package_name: &str,
        user_id: UserId,
        locales: &LocaleList,
    ) -> Result<()>;
}

/// Package manager queries.
pub trait PackageQuery: Send + Sync + 'static {
    /// Check if package is installed for given user.
    fn is_installed(&self, package_name: &str, user_id: UserId) -> bool;

    /// List all installed applications of given user.
    fn installed_applications(&self, user_id: UserId) -> Vec<ApplicationInfo>;
}

/// Fire-and-forget signal to the backup transport.
pub trait BackupNotifier: Send + Sync + 'static {
    /// Mark data behind backup key as changed so it gets included in the
    /// next backup pass.
    fn data_changed(&self, backup_key: &str);
}

/// Wall-clock time source.
///
/// Small amounts of skew are tolerated, it only decides when staged data
/// becomes stale.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds since the Unix epoch.
    fn millis(&self) -> i64;
}

/// Clock backed by the system wall-clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Failures reported by the host.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// Call into host service failed.
    #[error("remote call to host failed: {0}")]
    Remote(String),
}

/// Friendly result alias :3
pub type Result<T, E = HostError> = std::result::Result<T, E>;
