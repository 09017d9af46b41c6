// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Subcommand to run a SQLite shell on a catalog.

use crate::config;
use crate::paths::Layout;
use base::{err, Error};
use bpaf::Bpaf;
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

/// Runs the `sqlite3` shell against the primary (or archive) catalog.
#[derive(Bpaf, Debug)]
#[bpaf(command("sql"))]
pub struct Args {
    /// Path to the YAML configuration file.
    #[bpaf(argument("PATH"), fallback(config::DEFAULT_CONFIG_PATH.into()))]
    config: PathBuf,

    /// Open the archive catalog at the backup root instead of the primary.
    #[bpaf(switch)]
    archive: bool,

    /// Arguments to pass to sqlite3.
    ///
    /// Use the -- separator to pass sqlite3 options, as in
    /// `memory-lane sql -- -line 'select count(*) from images'`.
    #[bpaf(positional("ARG"))]
    args: Vec<OsString>,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let config = config::load(&args.config)?;
    let layout = Layout::new(&config);
    let db = if args.archive {
        layout.backup_db_path()
    } else {
        layout.db_path()
    };
    let e = Command::new("sqlite3").arg(&db).args(&args.args).exec();
    Err(err!(Unknown, msg("couldn't exec sqlite3"), source(e)))
}
