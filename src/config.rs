// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the configuration file to simplify the process of
//! serialization and deserialization. Every field is optional, so an empty
//! file, or no file at all, yields the defaults.
//!
//! ```toml
//! [staging]
//! dir = "$XDG_DATA_HOME/app_locales"
//! retention_days = 3
//!
//! [logging]
//! filter = "info"
//! ```

use crate::{
    path::{default_staging_dir, NoWayHome},
    stage::DEFAULT_RETENTION,
};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

const DAY_SECS: u64 = 24 * 60 * 60;

/// Top-level settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Stage file settings.
    pub staging: StagingSettings,

    /// Log output settings.
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from file.
    ///
    /// Returns default settings if the file does not exist.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file exists but cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file content is invalid.
    /// - Return [`ConfigError::ShellExpansion`] if staging directory cannot
    ///   be expanded.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match read_to_string(path.as_ref()) {
            Ok(data) => data.parse(),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Read {
                source: err,
                path: path.as_ref().into(),
            }),
        }
    }

    /// Resolve staging directory.
    ///
    /// Falls back to [`default_staging_dir`] when no directory is configured.
    ///
    /// # Errors
    ///
    /// - Return [`NoWayHome`] if default staging directory cannot be
    ///   determined.
    pub fn staging_dir(&self) -> Result<PathBuf, NoWayHome> {
        match &self.staging.dir {
            Some(dir) => Ok(dir.clone()),
            None => default_staging_dir(),
        }
    }

    /// Retention period of staged data.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.staging.retention_days.saturating_mul(DAY_SECS))
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on staging directory field.
        if let Some(dir) = settings.staging.dir.take() {
            settings.staging.dir = Some(PathBuf::from(
                shellexpand::full(dir.to_string_lossy().as_ref())
                    .map_err(ConfigError::ShellExpansion)?
                    .into_owned(),
            ));
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Stage file settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StagingSettings {
    /// Directory holding stage files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Days before unclaimed staged data is discarded.
    pub retention_days: u64,
}

impl Default for StagingSettings {
    fn default() -> Self {
        Self {
            dir: None,
            retention_days: DEFAULT_RETENTION.as_secs() / DAY_SECS,
        }
    }
}

/// Log output settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".into(),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("BLAH", "/home/blah/blah")])]
    fn deserialize_settings() -> anyhow::Result<()> {
        let result: Settings = r#"
            [staging]
            dir = "$BLAH/app_locales"
            retention_days = 5

            [logging]
            filter = "locale_backup=debug"
        "#
        .parse()?;

        let expect = Settings {
            staging: StagingSettings {
                dir: Some(PathBuf::from("/home/blah/blah/app_locales")),
                retention_days: 5,
            },
            logging: LoggingSettings {
                filter: "locale_backup=debug".into(),
            },
        };

        assert_eq!(result, expect);
        assert_eq!(result.retention(), Duration::from_secs(5 * DAY_SECS));

        Ok(())
    }

    #[test]
    fn deserialize_empty_settings_uses_defaults() -> anyhow::Result<()> {
        let result: Settings = "".parse()?;
        assert_eq!(result, Settings::default());
        assert_eq!(result.retention(), DEFAULT_RETENTION);

        Ok(())
    }

    #[test]
    fn serialize_settings() {
        let result = Settings {
            staging: StagingSettings {
                dir: Some(PathBuf::from("/var/lib/app_locales")),
                retention_days: 3,
            },
            logging: LoggingSettings::default(),
        }
        .to_string();

        let expect = indoc! {r#"
            [staging]
            dir = "/var/lib/app_locales"
            retention_days = 3

            [logging]
            filter = "info"
        "#};

        assert_eq!(result, expect);
    }

    #[test]
    fn load_missing_file_uses_defaults() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let result = Settings::load(root.path().join("config.toml"))?;
        assert_eq!(result, Settings::default());

        Ok(())
    }

    #[test]
    fn load_rejects_invalid_file() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let path = root.path().join("config.toml");
        std::fs::write(&path, "[staging]\nretention_days = \"three\"\n")?;
        assert!(matches!(Settings::load(&path), Err(ConfigError::Deserialize(_))));

        Ok(())
    }

    #[test]
    fn staging_dir_prefers_configured_path() -> anyhow::Result<()> {
        let mut settings = Settings::default();
        settings.staging.dir = Some(PathBuf::from("/srv/stage"));
        assert_eq!(settings.staging_dir()?, PathBuf::from("/srv/stage"));

        Ok(())
    }
}
