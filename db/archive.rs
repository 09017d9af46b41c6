// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Operations between the primary catalog and the archive catalog.
//!
//! Both operate over an `ATTACH`ed archive database and rely on the archive's
//! unique indexes for idempotency:
//!
//! * [`sync_to_archive`] copies the window `(last_archived_ts, up_to]` of
//!   primary rows into the archive, then advances
//!   `archive_meta.last_archived_ts`.
//! * [`archive_old_records`] copies rows older than a cutoff and then deletes
//!   them from the primary, but only rows for which a matching archive row
//!   demonstrably exists (the `EXISTS` predicate is the safety interlock).

use crate::db::{self, OpenMode};
use base::{err, Error, ErrorKind, ResultExt as _};
use rusqlite::params;
use std::path::Path;
use tracing::{info, warn};

const SYNC_IMAGES_SQL: &str = r#"
    insert or ignore into archive.images
        (day, session, local_path, backup_path, win_title, win_app, created_ts, processed)
    select day, session, local_path, backup_path, win_title, win_app, created_ts, processed
    from images
    where created_ts > ?1 and created_ts <= ?2
"#;

const SYNC_VIDEOS_SQL: &str = r#"
    insert or ignore into archive.videos
        (day, session, local_path, backup_path, created_ts, processed)
    select day, session, local_path, backup_path, created_ts, processed
    from videos
    where created_ts > ?1 and created_ts <= ?2
"#;

const SYNC_SUMMARIES_SQL: &str = r#"
    insert or ignore into archive.summaries
        (day, local_path, backup_path, created_ts, processed)
    select day, local_path, backup_path, created_ts, processed
    from summaries
    where created_ts > ?1 and created_ts <= ?2
"#;

const ARCHIVE_IMAGES_SQL: &str = r#"
    insert or ignore into archive.images
        (day, session, local_path, backup_path, win_title, win_app, created_ts, processed)
    select day, session, local_path, backup_path, win_title, win_app, created_ts, processed
    from images
    where created_ts < ?1
"#;

const ARCHIVE_VIDEOS_SQL: &str = r#"
    insert or ignore into archive.videos
        (day, session, local_path, backup_path, created_ts, processed)
    select day, session, local_path, backup_path, created_ts, processed
    from videos
    where created_ts < ?1
"#;

const ARCHIVE_SUMMARIES_SQL: &str = r#"
    insert or ignore into archive.summaries
        (day, local_path, backup_path, created_ts, processed)
    select day, local_path, backup_path, created_ts, processed
    from summaries
    where created_ts < ?1
"#;

const DELETE_IMAGES_SQL: &str = r#"
    delete from images
    where created_ts < ?1
      and exists (
          select 1 from archive.images a
          where a.day = images.day
            and a.session = images.session
            and a.local_path = images.local_path
      )
"#;

const DELETE_VIDEOS_SQL: &str = r#"
    delete from videos
    where created_ts < ?1
      and exists (
          select 1 from archive.videos a
          where a.day = videos.day
            and a.session = videos.session
            and a.local_path = videos.local_path
      )
"#;

const DELETE_SUMMARIES_SQL: &str = r#"
    delete from summaries
    where created_ts < ?1
      and exists (
          select 1 from archive.summaries a
          where a.day = summaries.day
            and a.local_path = summaries.local_path
      )
"#;

const LAST_ARCHIVED_TS_KEY: &str = "last_archived_ts";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub images: usize,
    pub videos: usize,
    pub summaries: usize,
}

impl SyncStats {
    pub fn total(&self) -> usize {
        self.images + self.videos + self.summaries
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub archived: usize,
    pub deleted: usize,
}

/// Reads `archive_meta.last_archived_ts` from an archive connection, or 0.
pub fn last_archived_ts(archive: &rusqlite::Connection) -> Result<i64, Error> {
    let mut stmt = archive
        .prepare_cached("select value from archive_meta where key = ?1")
        .err_kind(ErrorKind::Internal)?;
    let v: Option<String> = stmt
        .query_row(params![LAST_ARCHIVED_TS_KEY], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            e => Err(e),
        })
        .err_kind(ErrorKind::Internal)?;
    match v {
        None => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| err!(DataLoss, msg("non-integer last_archived_ts {v:?}"))),
    }
}

fn set_last_archived_ts(archive: &rusqlite::Connection, ts: i64) -> Result<(), Error> {
    archive
        .execute(
            "insert or replace into archive_meta (key, value) values (?1, ?2)",
            params![LAST_ARCHIVED_TS_KEY, ts.to_string()],
        )
        .err_kind(ErrorKind::Internal)?;
    Ok(())
}

fn path_str(path: &Path) -> Result<&str, Error> {
    path.to_str()
        .ok_or_else(|| err!(InvalidArgument, msg("non-UTF-8 archive path {path:?}")))
}

/// Runs `f` with the archive catalog attached as `archive`, detaching on
/// every exit path. `ATTACH` is not allowed inside a transaction, so `f`
/// manages its own.
fn with_archive<T>(
    conn: &mut rusqlite::Connection,
    archive_path: &Path,
    f: impl FnOnce(&mut rusqlite::Connection) -> Result<T, Error>,
) -> Result<T, Error> {
    conn.execute(
        "attach database ?1 as archive",
        params![path_str(archive_path)?],
    )
    .err_kind(ErrorKind::Internal)?;
    let result = f(conn);
    if let Err(e) = conn.execute_batch("detach database archive") {
        warn!(err = %e, "unable to detach archive database");
    }
    result
}

/// Ensures the archive file and schema exist, returning a direct connection.
fn open_archive(archive_path: &Path) -> Result<rusqlite::Connection, Error> {
    let archive = db::open(archive_path, OpenMode::Create)?;
    db::init_archive(&archive)?;
    Ok(archive)
}

/// Incrementally copies primary rows with `created_ts` in
/// `(last_archived_ts, up_to_ms]` into the archive catalog.
///
/// `archive_meta.last_archived_ts` advances only after every table has
/// synced, so a failed pass is retried in full on the next cycle; the unique
/// indexes make the retry harmless.
pub fn sync_to_archive(
    conn: &mut rusqlite::Connection,
    archive_path: &Path,
    up_to_ms: i64,
) -> Result<SyncStats, Error> {
    let archive = open_archive(archive_path)?;
    let last = last_archived_ts(&archive)?;
    if last >= up_to_ms {
        return Ok(SyncStats::default());
    }
    let stats = with_archive(conn, archive_path, |conn| {
        let mut stats = SyncStats::default();
        for (sql, count) in [
            (SYNC_IMAGES_SQL, &mut stats.images),
            (SYNC_VIDEOS_SQL, &mut stats.videos),
            (SYNC_SUMMARIES_SQL, &mut stats.summaries),
        ] {
            let tx = conn.transaction().err_kind(ErrorKind::Internal)?;
            *count = tx
                .execute(sql, params![last, up_to_ms])
                .err_kind(ErrorKind::Internal)?;
            tx.commit().err_kind(ErrorKind::Internal)?;
        }
        Ok(stats)
    })?;
    set_last_archived_ts(&archive, up_to_ms)?;
    info!(
        "synced ({last}, {up_to_ms}]: {} images, {} videos, {} summaries",
        stats.images, stats.videos, stats.summaries
    );
    Ok(stats)
}

/// Copies rows with `created_ts < cutoff_ms` into the archive, then deletes
/// from the primary exactly those rows whose archive counterpart exists, and
/// finally `VACUUM`s the primary store. Idempotent.
pub fn archive_old_records(
    conn: &mut rusqlite::Connection,
    archive_path: &Path,
    cutoff_ms: i64,
) -> Result<PruneStats, Error> {
    open_archive(archive_path)?;
    let stats = with_archive(conn, archive_path, |conn| {
        let mut stats = PruneStats::default();
        for (archive_sql, delete_sql) in [
            (ARCHIVE_IMAGES_SQL, DELETE_IMAGES_SQL),
            (ARCHIVE_VIDEOS_SQL, DELETE_VIDEOS_SQL),
            (ARCHIVE_SUMMARIES_SQL, DELETE_SUMMARIES_SQL),
        ] {
            let tx = conn.transaction().err_kind(ErrorKind::Internal)?;
            stats.archived += tx
                .execute(archive_sql, params![cutoff_ms])
                .err_kind(ErrorKind::Internal)?;
            stats.deleted += tx
                .execute(delete_sql, params![cutoff_ms])
                .err_kind(ErrorKind::Internal)?;
            tx.commit().err_kind(ErrorKind::Internal)?;
        }
        Ok(stats)
    })?;
    conn.execute_batch("vacuum").err_kind(ErrorKind::Internal)?;
    info!(
        "archived {} and pruned {} rows older than {cutoff_ms}",
        stats.archived, stats.deleted
    );
    Ok(stats)
}
