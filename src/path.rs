// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine default locations of the files that the staging subsystem
//! persists, or reads its configuration from.

use std::path::PathBuf;

/// Determine default absolute path to staging directory.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/app_locales` as the default
/// absolute path for stage files. Does not check if the path returned
/// actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if data directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_staging_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("app_locales"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to configuration file.
///
/// Uses `$XDG_CONFIG_HOME/locale-backup/config.toml`. Does not check if the
/// path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory path cannot be
///   determined.
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("locale-backup").join("config.toml"))
        .ok_or(NoWayHome)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::data_dir`](https://docs.rs/dirs/latest/dirs/fn.data_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
