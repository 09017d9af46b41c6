// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Subcommand to create the directory trees and both catalog schemas.

use crate::config;
use crate::paths::Layout;
use base::Error;
use bpaf::Bpaf;
use std::path::PathBuf;
use tracing::info;

/// Creates the asset/backup directory trees and initializes both catalogs.
#[derive(Bpaf, Debug)]
#[bpaf(command("init"))]
pub struct Args {
    /// Path to the YAML configuration file.
    #[bpaf(argument("PATH"), fallback(config::DEFAULT_CONFIG_PATH.into()))]
    config: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let config = config::load(&args.config)?;
    let layout = Layout::new(&config);
    layout.ensure_dirs()?;
    let conn = db::open(&layout.db_path(), db::OpenMode::Create)?;
    db::init(&conn)?;
    let conn = db::open(&layout.backup_db_path(), db::OpenMode::Create)?;
    db::init_archive(&conn)?;
    info!("initialized {}", config.paths.base_dir.display());
    Ok(0)
}
