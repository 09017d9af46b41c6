// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Catalog schema and connection management.
//!
//! Two SQLite files share the same three artifact tables: the *primary*
//! catalog next to the local asset tree and the *archive* catalog at the
//! backup root. The archive additionally carries unique indexes (which make
//! `INSERT OR IGNORE` archival idempotent) and the `archive_meta` key/value
//! table. See the `archive` module for the operations between the two.

use crate::days::{Day, SessionId};
use base::{err, Error, ErrorKind, ResultExt as _};
use std::path::Path;
use tracing::info;

/// Artifact tables, shared by the primary and archive catalogs.
const CREATE_TABLES_SQL: &str = r#"
    create table if not exists images (
        id integer primary key autoincrement,
        day text,          -- YYYY-MM-DD
        session text,      -- HHMM-HHMM
        local_path text,
        backup_path text,
        win_title text,
        win_app text,
        created_ts integer, -- milliseconds since epoch at capture
        processed integer default 0
    );
    create table if not exists videos (
        id integer primary key autoincrement,
        day text,          -- YYYY-MM-DD
        session text,      -- HHMM-HHMM
        local_path text,
        backup_path text,
        created_ts integer, -- milliseconds since epoch at assembly
        processed integer default 1
    );
    create table if not exists summaries (
        id integer primary key autoincrement,
        day text,          -- YYYY-MM-DD
        local_path text,
        backup_path text,
        created_ts integer, -- milliseconds since epoch at assembly
        processed integer default 1
    );
"#;

const CREATE_PRIMARY_INDEXES_SQL: &str = r#"
    create index if not exists idx_images_created_ts on images (created_ts);
    create index if not exists idx_images_day on images (day);
    create index if not exists idx_videos_day on videos (day);
    create index if not exists idx_summaries_day on summaries (day);
"#;

// The unique indexes are what make archival idempotent; see the archive module.
const CREATE_ARCHIVE_INDEXES_SQL: &str = r#"
    create table if not exists archive_meta (
        key text primary key,
        value text
    );
    create unique index if not exists ui_images_day_session_path
        on images (day, session, local_path);
    create unique index if not exists ui_videos_day_session_path
        on videos (day, session, local_path);
    create unique index if not exists ui_summaries_day_path
        on summaries (day, local_path);
    create index if not exists idx_archive_images_created_ts on images (created_ts);
    create index if not exists idx_archive_videos_created_ts on videos (created_ts);
    create index if not exists idx_archive_summaries_created_ts on summaries (created_ts);
"#;

/// A captured screenshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRow {
    pub day: Day,
    pub session: SessionId,
    pub local_path: String,
    pub backup_path: String,
    pub win_title: String,
    pub win_app: String,
    pub created_ts: i64,
}

/// A per-session detailed timelapse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoRow {
    pub day: Day,
    pub session: SessionId,
    pub local_path: String,
    pub backup_path: String,
    pub created_ts: i64,
}

/// A per-day summary timelapse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SummaryRow {
    pub day: Day,
    pub local_path: String,
    pub backup_path: String,
    pub created_ts: i64,
}

/// One catalog mutation, as carried on the index writer's queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CatalogRow {
    Image(ImageRow),
    Video(VideoRow),
    Summary(SummaryRow),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    Create,
}

/// Opens a catalog file, applying the write pragmas on writable connections.
///
/// Journal mode WAL with `synchronous=NORMAL` is a commitment: on power loss
/// the tail of the most recently committed transactions may be lost, which
/// the backlog sweep and mirror passes are designed to absorb.
pub fn open(path: &Path, mode: OpenMode) -> Result<rusqlite::Connection, Error> {
    if mode == OpenMode::Create {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                err!(
                    Unknown,
                    msg("unable to create catalog dir {}", parent.display()),
                    source(e)
                )
            })?;
        }
    }
    let conn = rusqlite::Connection::open_with_flags(
        path,
        match mode {
            OpenMode::ReadOnly => rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenMode::ReadWrite => rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::Create => {
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
            }
        } |
        // rusqlite::Connection is not Sync, so there's no reason to tell SQLite3 to use the
        // serialized threading mode.
        rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| err!(Unknown, msg("unable to open {}", path.display()), source(e)))?;
    conn.busy_timeout(std::time::Duration::from_secs(30))
        .err_kind(ErrorKind::Internal)?;
    if mode != OpenMode::ReadOnly {
        conn.execute_batch(
            r#"
            pragma journal_mode = wal;
            pragma synchronous = normal;
            pragma temp_store = memory;
            "#,
        )
        .err_kind(ErrorKind::Internal)?;
    }
    Ok(conn)
}

/// Initializes the primary catalog schema. Idempotent.
pub fn init(conn: &rusqlite::Connection) -> Result<(), Error> {
    conn.execute_batch(CREATE_TABLES_SQL)
        .err_kind(ErrorKind::Internal)?;
    conn.execute_batch(CREATE_PRIMARY_INDEXES_SQL)
        .err_kind(ErrorKind::Internal)?;
    info!(
        "primary catalog ready (SQLite {})",
        rusqlite::version()
    );
    Ok(())
}

/// Initializes the archive catalog schema. Idempotent.
pub fn init_archive(conn: &rusqlite::Connection) -> Result<(), Error> {
    conn.execute_batch(CREATE_TABLES_SQL)
        .err_kind(ErrorKind::Internal)?;
    conn.execute_batch(CREATE_ARCHIVE_INDEXES_SQL)
        .err_kind(ErrorKind::Internal)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn init_is_idempotent() {
        testutil::init();
        let tmpdir = tempfile::tempdir().unwrap();
        let path = tmpdir.path().join("catalog.db");
        let conn = open(&path, OpenMode::Create).unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();
        let n: i64 = conn
            .query_row("select count(*) from images", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn archive_unique_indexes() {
        testutil::init();
        let tmpdir = tempfile::tempdir().unwrap();
        let path = tmpdir.path().join("archive.db");
        let conn = open(&path, OpenMode::Create).unwrap();
        init_archive(&conn).unwrap();
        let insert = r#"
            insert or ignore into images (day, session, local_path, backup_path,
                                          win_title, win_app, created_ts, processed)
            values ('2025-01-10', '1000-1030', '/a/img.webp', '', 't', 'a', 1, 0)
        "#;
        assert_eq!(conn.execute(insert, []).unwrap(), 1);
        assert_eq!(conn.execute(insert, []).unwrap(), 0);
    }
}
