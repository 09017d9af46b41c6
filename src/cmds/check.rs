// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Subcommand to check the catalog and asset tree against each other.

use crate::config;
use crate::lock::LOCK_FILE_NAME;
use crate::paths::Layout;
use base::Error;
use bpaf::Bpaf;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Checks that catalog rows and files on disk agree.
///
/// A row is fine as long as its file exists at the local *or* the backup
/// path; an image file in a session directory without a matching row is an
/// orphan (typically a crash between the file write and the index commit).
#[derive(Bpaf, Debug)]
#[bpaf(command("check"))]
pub struct Args {
    /// Path to the YAML configuration file.
    #[bpaf(argument("PATH"), fallback(config::DEFAULT_CONFIG_PATH.into()))]
    config: PathBuf,
}

fn resolves(local: &str, backup: &str) -> bool {
    (!local.is_empty() && Path::new(local).exists())
        || (!backup.is_empty() && Path::new(backup).exists())
}

pub fn run(args: Args) -> Result<i32, Error> {
    let config = config::load(&args.config)?;
    let layout = Layout::new(&config);
    let conn = db::open(&layout.db_path(), db::OpenMode::ReadOnly)?;

    let mut rows = 0usize;
    let mut missing = 0usize;
    let mut known = HashSet::new();
    db::raw::list_images(&conn, &mut |r| {
        rows += 1;
        known.insert(PathBuf::from(&r.local_path));
        if !resolves(&r.local_path, &r.backup_path) {
            error!("image {} {}: no file at {} or {}", r.day, r.session, r.local_path, r.backup_path);
            missing += 1;
        }
        Ok(())
    })?;
    db::raw::list_videos(&conn, &mut |r| {
        rows += 1;
        if !resolves(&r.local_path, &r.backup_path) {
            error!("video {} {}: no file at {} or {}", r.day, r.session, r.local_path, r.backup_path);
            missing += 1;
        }
        Ok(())
    })?;
    db::raw::list_summaries(&conn, &mut |r| {
        rows += 1;
        if !resolves(&r.local_path, &r.backup_path) {
            error!("summary {}: no file at {} or {}", r.day, r.local_path, r.backup_path);
            missing += 1;
        }
        Ok(())
    })?;

    let mut orphans = 0usize;
    for day in subdirs(&layout.images_dir()) {
        for session in subdirs(&day) {
            let Ok(files) = std::fs::read_dir(&session) else {
                continue;
            };
            for file in files.flatten() {
                if file.file_name() == LOCK_FILE_NAME || !file.path().is_file() {
                    continue;
                }
                if !known.contains(&file.path()) {
                    error!("orphaned file {}", file.path().display());
                    orphans += 1;
                }
            }
        }
    }

    if missing == 0 && orphans == 0 {
        info!("{rows} rows check out");
        Ok(0)
    } else {
        error!("{missing} rows missing files, {orphans} orphaned files (of {rows} rows)");
        Ok(1)
    }
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Err(_) => Vec::new(),
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect(),
    }
}
