// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use locale_backup::{
    codec,
    config::Settings,
    host::{Clock, SystemClock, UserId},
    path::default_config_path,
    stage::{inspect_entry, StagedTable},
    store::StageFileStore,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{fs, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  locale-backup [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Path to staging directory, overrides configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub staging_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self, settings: &Settings) -> Result<()> {
        match self.command {
            Command::List(opts) => run_list(settings, opts),
            Command::Sweep => run_sweep(settings),
            Command::Drop(opts) => run_drop(settings, opts),
            Command::Decode(opts) => run_decode(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show staged restore data, leaves malformed stage files in place.
    #[command(override_usage = "locale-backup list [options]")]
    List(ListOptions),

    /// Discard staged data older than the retention period.
    #[command(override_usage = "locale-backup sweep [options]")]
    Sweep,

    /// Discard staged data of a user.
    #[command(override_usage = "locale-backup drop [options] <user_id>")]
    Drop(DropOptions),

    /// Show content of a backup payload or stage file.
    #[command(override_usage = "locale-backup decode [options] <file>")]
    Decode(DecodeOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ListOptions {
    /// Only show staged data of this user.
    #[arg(short, long, value_name = "user_id")]
    pub user: Option<UserId>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DropOptions {
    /// User whose staged data to discard.
    #[arg(required = true, value_name = "user_id")]
    pub user: UserId,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DecodeOptions {
    /// File holding locale XML.
    #[arg(required = true, value_name = "file")]
    pub file: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    let settings = load_settings(&cli);

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let directive = settings
        .as_ref()
        .map(|settings| settings.logging.filter.clone())
        .unwrap_or_else(|_| "info".into());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    let result = settings.and_then(|settings| cli.run(&settings));
    if let Err(error) = result {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let mut settings = Settings::load(&path)
        .with_context(|| format!("cannot load configuration from {:?}", path.display()))?;

    if let Some(dir) = &cli.staging_dir {
        settings.staging.dir = Some(dir.clone());
    }

    Ok(settings)
}

fn open_table(settings: &Settings) -> Result<StagedTable> {
    let store = StageFileStore::open(settings.staging_dir()?)?;
    Ok(StagedTable::load(store, settings.retention()))
}

fn run_list(settings: &Settings, opts: ListOptions) -> Result<()> {
    let store = StageFileStore::open(settings.staging_dir()?)?;
    let mut shown = 0usize;
    for entry in store.entries()? {
        let (user_id, record) = match inspect_entry(&store, &entry) {
            Ok(found) => found,
            Err(reason) => {
                warn!("{:?} is deleted on next load. Reason: {reason}.", entry.path.display());
                continue;
            }
        };

        if opts.user.is_some_and(|user| user != user_id) {
            continue;
        }

        println!(
            "user {user_id} (created {} ms since epoch)",
            record.creation_time_millis
        );
        for (package_name, tags) in &record.package_states {
            println!("  {package_name} = {tags}");
        }
        shown += 1;
    }

    if shown == 0 {
        info!("no staged data in {:?}", store.dir().display());
    }

    Ok(())
}

fn run_sweep(settings: &Settings) -> Result<()> {
    let mut table = open_table(settings)?;
    let swept = table.sweep(SystemClock.millis());
    if swept.is_empty() {
        info!("no staged data older than {:?}", table.retention());
    }
    for user_id in swept {
        println!("swept staged data of user {user_id}");
    }

    Ok(())
}

fn run_drop(settings: &Settings, opts: DropOptions) -> Result<()> {
    let mut table = open_table(settings)?;
    match table.remove(opts.user) {
        Some(record) => println!(
            "dropped {} staged package(s) of user {}",
            record.package_states.len(),
            opts.user
        ),
        None => warn!("user {} has no staged data", opts.user),
    }

    Ok(())
}

fn run_decode(opts: DecodeOptions) -> Result<()> {
    let data = fs::read(&opts.file)
        .with_context(|| format!("cannot read {:?}", opts.file.display()))?;
    let document = codec::decode(&data)
        .with_context(|| format!("cannot decode {:?}", opts.file.display()))?;

    if let Some(millis) = document.creation_time_millis {
        println!("created {millis} ms since epoch");
    }
    for (package_name, tags) in &document.package_states {
        println!("{package_name} = {tags}");
    }

    Ok(())
}
