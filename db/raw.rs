// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Raw database access: SQLite statements which do not touch any cached state.

use crate::days::{Day, SessionId};
use crate::db::{CatalogRow, ImageRow, SummaryRow, VideoRow};
use base::{ErrorKind, ResultExt as _};
use rusqlite::named_params;

const INSERT_IMAGE_SQL: &str = r#"
    insert into images (day, session, local_path, backup_path, win_title, win_app, created_ts)
                values (:day, :session, :local_path, :backup_path, :win_title, :win_app,
                        :created_ts)
"#;

const INSERT_VIDEO_SQL: &str = r#"
    insert into videos (day, session, local_path, backup_path, created_ts, processed)
                values (:day, :session, :local_path, :backup_path, :created_ts, 1)
"#;

const INSERT_SUMMARY_SQL: &str = r#"
    insert into summaries (day, local_path, backup_path, created_ts, processed)
                   values (:day, :local_path, :backup_path, :created_ts, 1)
"#;

/// Sessions that have at least one image but no detailed video yet.
const PENDING_VIDEO_SESSIONS_SQL: &str = r#"
    select distinct day, session
    from images i
    where not exists (
        select 1 from videos v
        where v.day = i.day and v.session = i.session
    )
    order by day, session
"#;

/// Days that have at least one detailed video but no summary yet.
const PENDING_SUMMARY_DAYS_SQL: &str = r#"
    select day
    from videos
    where not exists (
        select 1 from summaries s where s.day = videos.day
    )
    group by day
    order by day
"#;

const LIST_IMAGES_SQL: &str = r#"
    select day, session, local_path, backup_path, win_title, win_app, created_ts
    from images
    order by id
"#;

const LIST_VIDEOS_SQL: &str = r#"
    select day, session, local_path, backup_path, created_ts
    from videos
    order by id
"#;

const LIST_SUMMARIES_SQL: &str = r#"
    select day, local_path, backup_path, created_ts
    from summaries
    order by id
"#;

/// Inserts one row; used by the index writer within a batch transaction.
pub fn insert_row(conn: &rusqlite::Connection, row: &CatalogRow) -> Result<(), base::Error> {
    match row {
        CatalogRow::Image(r) => {
            let mut stmt = conn
                .prepare_cached(INSERT_IMAGE_SQL)
                .err_kind(ErrorKind::Internal)?;
            stmt.execute(named_params! {
                ":day": r.day,
                ":session": r.session,
                ":local_path": r.local_path,
                ":backup_path": r.backup_path,
                ":win_title": r.win_title,
                ":win_app": r.win_app,
                ":created_ts": r.created_ts,
            })
            .err_kind(ErrorKind::Internal)?;
        }
        CatalogRow::Video(r) => {
            let mut stmt = conn
                .prepare_cached(INSERT_VIDEO_SQL)
                .err_kind(ErrorKind::Internal)?;
            stmt.execute(named_params! {
                ":day": r.day,
                ":session": r.session,
                ":local_path": r.local_path,
                ":backup_path": r.backup_path,
                ":created_ts": r.created_ts,
            })
            .err_kind(ErrorKind::Internal)?;
        }
        CatalogRow::Summary(r) => {
            let mut stmt = conn
                .prepare_cached(INSERT_SUMMARY_SQL)
                .err_kind(ErrorKind::Internal)?;
            stmt.execute(named_params! {
                ":day": r.day,
                ":local_path": r.local_path,
                ":backup_path": r.backup_path,
                ":created_ts": r.created_ts,
            })
            .err_kind(ErrorKind::Internal)?;
        }
    }
    Ok(())
}

/// Lists sessions whose detailed video hasn't been assembled, in ascending
/// order, passing them to a supplied function. Given that the function is
/// called with a statement open, it should be quick.
pub fn pending_video_sessions(
    conn: &rusqlite::Connection,
    f: &mut dyn FnMut(Day, SessionId) -> Result<(), base::Error>,
) -> Result<(), base::Error> {
    let mut stmt = conn
        .prepare_cached(PENDING_VIDEO_SESSIONS_SQL)
        .err_kind(ErrorKind::Internal)?;
    let mut rows = stmt.query([]).err_kind(ErrorKind::Internal)?;
    while let Some(row) = rows.next().err_kind(ErrorKind::Internal)? {
        f(
            row.get(0).err_kind(ErrorKind::Internal)?,
            row.get(1).err_kind(ErrorKind::Internal)?,
        )?;
    }
    Ok(())
}

/// Lists days whose summary hasn't been assembled, in ascending order.
pub fn pending_summary_days(
    conn: &rusqlite::Connection,
    f: &mut dyn FnMut(Day) -> Result<(), base::Error>,
) -> Result<(), base::Error> {
    let mut stmt = conn
        .prepare_cached(PENDING_SUMMARY_DAYS_SQL)
        .err_kind(ErrorKind::Internal)?;
    let mut rows = stmt.query([]).err_kind(ErrorKind::Internal)?;
    while let Some(row) = rows.next().err_kind(ErrorKind::Internal)? {
        f(row.get(0).err_kind(ErrorKind::Internal)?)?;
    }
    Ok(())
}

pub fn list_images(
    conn: &rusqlite::Connection,
    f: &mut dyn FnMut(ImageRow) -> Result<(), base::Error>,
) -> Result<(), base::Error> {
    let mut stmt = conn
        .prepare_cached(LIST_IMAGES_SQL)
        .err_kind(ErrorKind::Internal)?;
    let mut rows = stmt.query([]).err_kind(ErrorKind::Internal)?;
    while let Some(row) = rows.next().err_kind(ErrorKind::Internal)? {
        f(ImageRow {
            day: row.get(0).err_kind(ErrorKind::Internal)?,
            session: row.get(1).err_kind(ErrorKind::Internal)?,
            local_path: row.get(2).err_kind(ErrorKind::Internal)?,
            backup_path: row.get(3).err_kind(ErrorKind::Internal)?,
            win_title: row.get(4).err_kind(ErrorKind::Internal)?,
            win_app: row.get(5).err_kind(ErrorKind::Internal)?,
            created_ts: row.get(6).err_kind(ErrorKind::Internal)?,
        })?;
    }
    Ok(())
}

pub fn list_videos(
    conn: &rusqlite::Connection,
    f: &mut dyn FnMut(VideoRow) -> Result<(), base::Error>,
) -> Result<(), base::Error> {
    let mut stmt = conn
        .prepare_cached(LIST_VIDEOS_SQL)
        .err_kind(ErrorKind::Internal)?;
    let mut rows = stmt.query([]).err_kind(ErrorKind::Internal)?;
    while let Some(row) = rows.next().err_kind(ErrorKind::Internal)? {
        f(VideoRow {
            day: row.get(0).err_kind(ErrorKind::Internal)?,
            session: row.get(1).err_kind(ErrorKind::Internal)?,
            local_path: row.get(2).err_kind(ErrorKind::Internal)?,
            backup_path: row.get(3).err_kind(ErrorKind::Internal)?,
            created_ts: row.get(4).err_kind(ErrorKind::Internal)?,
        })?;
    }
    Ok(())
}

pub fn list_summaries(
    conn: &rusqlite::Connection,
    f: &mut dyn FnMut(SummaryRow) -> Result<(), base::Error>,
) -> Result<(), base::Error> {
    let mut stmt = conn
        .prepare_cached(LIST_SUMMARIES_SQL)
        .err_kind(ErrorKind::Internal)?;
    let mut rows = stmt.query([]).err_kind(ErrorKind::Internal)?;
    while let Some(row) = rows.next().err_kind(ErrorKind::Internal)? {
        f(SummaryRow {
            day: row.get(0).err_kind(ErrorKind::Internal)?,
            local_path: row.get(1).err_kind(ErrorKind::Internal)?,
            backup_path: row.get(2).err_kind(ErrorKind::Internal)?,
            created_ts: row.get(3).err_kind(ErrorKind::Internal)?,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::testutil;

    #[test]
    fn pending_queries() {
        testutil::init();
        let tmpdir = tempfile::tempdir().unwrap();
        let conn = db::open(&tmpdir.path().join("p.db"), db::OpenMode::Create).unwrap();
        db::init(&conn).unwrap();

        insert_row(
            &conn,
            &CatalogRow::Image(testutil::image_row("2025-01-10", "1000-1030", "a.webp", 1)),
        )
        .unwrap();
        insert_row(
            &conn,
            &CatalogRow::Image(testutil::image_row("2025-01-10", "1030-1100", "b.webp", 2)),
        )
        .unwrap();
        insert_row(
            &conn,
            &CatalogRow::Video(testutil::video_row("2025-01-10", "1000-1030", 3)),
        )
        .unwrap();

        let mut pending = Vec::new();
        pending_video_sessions(&conn, &mut |day, session| {
            pending.push((day.to_string(), session.to_string()));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            pending,
            vec![("2025-01-10".to_owned(), "1030-1100".to_owned())]
        );

        let mut days = Vec::new();
        pending_summary_days(&conn, &mut |day| {
            days.push(day.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(days, vec!["2025-01-10".to_owned()]);

        insert_row(
            &conn,
            &CatalogRow::Summary(testutil::summary_row("2025-01-10", 4)),
        )
        .unwrap();
        let mut days = Vec::new();
        pending_summary_days(&conn, &mut |day| {
            days.push(day.to_string());
            Ok(())
        })
        .unwrap();
        assert!(days.is_empty());
    }
}
