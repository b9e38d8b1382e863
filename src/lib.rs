// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Staged backup and restore of per-application locale preferences.
//!
//! A backup of application locales can be restored onto a device before the
//! applications it mentions are installed. Preferences for installed
//! applications are applied immediately. The rest are __staged__ per user in
//! crash-safe stage files, and applied lazily when the host reports that the
//! matching package was installed. Staged data that goes unclaimed for longer
//! than the retention period is discarded.
//!
//! Start with [`LocaleBackupHelper`], and feed host events to it through an
//! [`EventMonitor`].

pub mod codec;
pub mod config;
pub mod helper;
pub mod host;
pub mod monitor;
pub mod path;
pub mod stage;
pub mod store;

pub use helper::{LocaleBackupHelper, SYSTEM_BACKUP_PACKAGE_KEY};
pub use host::{
    ApplicationInfo, BackupNotifier, Clock, LocaleList, LocaleService, PackageQuery, SystemClock,
    UserId,
};
pub use monitor::{EventMonitor, EventSender, PlatformEvent};
pub use stage::{StagedData, StagedTable};
pub use store::StageFileStore;
