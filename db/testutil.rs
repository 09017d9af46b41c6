// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Utilities for automated testing involving Memory Lane's persistence
//! library. Used for tests of both the `memory-lane-db` crate itself and the
//! `memory-lane` crate.

use crate::days::{Day, SessionId};
use crate::db::{self, ImageRow, SummaryRow, VideoRow};
use std::path::PathBuf;
use tempfile::TempDir;

static INIT: std::sync::Once = std::sync::Once::new();

/// Performs global initialization for tests: set up logging. (Note the
/// output can be confusing unless `RUST_TEST_THREADS=1` is set in the
/// program's environment prior to running.)
pub fn init() {
    INIT.call_once(|| {
        base::tracing_setup::install_for_tests();
    });
}

/// A temporary primary/archive catalog pair with bootstrapped schemas.
pub struct TestCatalogs {
    pub tmpdir: TempDir,
    pub primary: PathBuf,
    pub archive: PathBuf,
}

impl TestCatalogs {
    pub fn new() -> Self {
        let tmpdir = tempfile::Builder::new()
            .prefix("memory-lane-test")
            .tempdir()
            .unwrap();
        let primary = tmpdir.path().join("primary.db");
        let archive = tmpdir.path().join("archive.db");
        let conn = db::open(&primary, db::OpenMode::Create).unwrap();
        db::init(&conn).unwrap();
        let conn = db::open(&archive, db::OpenMode::Create).unwrap();
        db::init_archive(&conn).unwrap();
        Self {
            tmpdir,
            primary,
            archive,
        }
    }
}

impl Default for TestCatalogs {
    fn default() -> Self {
        Self::new()
    }
}

pub fn image_row(day: &str, session: &str, name: &str, created_ts: i64) -> ImageRow {
    ImageRow {
        day: Day::parse(day).unwrap(),
        session: SessionId::parse(session).unwrap(),
        local_path: format!("/local/Assets/Images/{day}/{session}/{name}"),
        backup_path: format!("/backup/Assets/Images/{day}/{session}/{name}"),
        win_title: "editor — main.rs".to_owned(),
        win_app: "editor".to_owned(),
        created_ts,
    }
}

pub fn video_row(day: &str, session: &str, created_ts: i64) -> VideoRow {
    VideoRow {
        day: Day::parse(day).unwrap(),
        session: SessionId::parse(session).unwrap(),
        local_path: format!("/local/Assets/Timelapse/Detailed/{day}/{day}_{session}.mp4"),
        backup_path: format!("/backup/Assets/Timelapse/Detailed/{day}/{day}_{session}.mp4"),
        created_ts,
    }
}

pub fn summary_row(day: &str, created_ts: i64) -> SummaryRow {
    let month = &day[..7];
    SummaryRow {
        day: Day::parse(day).unwrap(),
        local_path: format!("/local/Assets/Timelapse/Summary/{month}/{day}_summary.mp4"),
        backup_path: format!("/backup/Assets/Timelapse/Summary/{month}/{day}_summary.mp4"),
        created_ts,
    }
}
