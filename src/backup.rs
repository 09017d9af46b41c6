// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The backup and archival worker.
//!
//! Each cycle mirrors finished artifacts to the backup root (manifest-driven,
//! so re-runs are cheap), synchronizes the catalog into the archive catalog,
//! prunes primary rows past the retention horizon (only where the archive
//! row exists), and finally evicts local folders past the horizon, but only
//! where the mirror folder carries a manifest, the positive proof that a
//! mirror pass ran against it. Every stage is idempotent, so a cycle
//! interrupted by shutdown or a crash is simply re-run later.

use crate::config::Config;
use crate::copier::{self, Copier, CopyStats};
use crate::lock::{self, ProcessProbe};
use crate::paths::{self, Layout};
use base::clock::{Clocks, TimerGuard};
use base::{err, shutdown, strutil, Error};
use db::archive;
use db::days::{Day, Month};
use db::writer::IndexChannel;
use jiff::tz::TimeZone;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct BackupWorker<C: Clocks> {
    layout: Layout,
    tz: TimeZone,
    clocks: C,
    shutdown_rx: shutdown::Receiver,
    /// Flushed before catalog sync so freshly enqueued rows are visible.
    index: IndexChannel,
    probe: Box<dyn ProcessProbe + Send>,
    retention_days: i64,
    period: Duration,
    lock_stale: Duration,
}

impl<C: Clocks> BackupWorker<C> {
    pub fn new(
        config: &Config,
        layout: Layout,
        tz: TimeZone,
        clocks: C,
        shutdown_rx: shutdown::Receiver,
        index: IndexChannel,
    ) -> Self {
        Self {
            layout,
            tz,
            clocks,
            shutdown_rx,
            index,
            probe: Box::new(lock::SystemProcesses),
            retention_days: i64::from(config.local_retention.days),
            period: config.backup_period(),
            lock_stale: config.lock_stale(),
        }
    }

    pub fn run(self) {
        info!("starting; mirroring every {:?}", self.period);
        loop {
            {
                let _t = TimerGuard::new(&self.clocks, || "backup pass");
                if let Err(e) = self.pass() {
                    error!(err = %e.chain(), "backup pass failed");
                }
            }
            if self.shutdown_rx.wait_for(self.period).is_err() {
                break;
            }
        }
        info!("ending");
    }

    /// One full cycle. Stages are individually isolated: a failure is logged
    /// and the rest of the pass continues.
    fn pass(&self) -> Result<(), Error> {
        let today = Day::from_date(self.clocks.realtime().to_zoned(self.tz.clone()).date());
        lock::sweep_stale(
            &self.layout.images_dir(),
            &*self.probe,
            self.clocks.realtime(),
            self.lock_stale,
        );

        let copier = Copier {
            clocks: &self.clocks,
        };
        let mut stats = CopyStats::default();
        for (what, result) in [
            ("images", self.mirror_images(&copier)),
            ("detailed videos", self.mirror_detailed(&copier, today)),
            ("summaries", self.mirror_summaries(&copier, today)),
        ] {
            match result {
                Ok(s) => stats.merge(s),
                Err(e) => warn!(err = %e.chain(), "unable to mirror {what}"),
            }
        }
        info!(
            "mirrored {} files ({}); {} refreshed, {} unchanged, {} failed",
            stats.copied,
            strutil::encode_size(stats.bytes as i64),
            stats.refreshed,
            stats.unchanged,
            stats.failed,
        );

        if let Err(e) = self.sync_catalog(today) {
            warn!(err = %e.chain(), "catalog archival failed");
        }
        self.evict(today);
        Ok(())
    }

    /// Mirrors every session folder except those a live writer holds locked
    /// (stale locks were already swept).
    fn mirror_images(&self, copier: &Copier<C>) -> Result<CopyStats, Error> {
        let mut stats = CopyStats::default();
        let images_dir = self.layout.images_dir();
        for day_entry in read_subdirs(&images_dir)? {
            let day_name = day_entry.file_name();
            for session_entry in read_subdirs(&day_entry.path())? {
                let session_dir = session_entry.path();
                if lock::is_locked(&session_dir) {
                    debug!("skipping live session {}", session_dir.display());
                    continue;
                }
                let dst = self
                    .layout
                    .backup_images_dir()
                    .join(&day_name)
                    .join(session_entry.file_name());
                stats.merge(copier.copy_dir_contents(&session_dir, &dst)?);
            }
        }
        Ok(stats)
    }

    /// Mirrors detailed day folders for days strictly before today.
    fn mirror_detailed(&self, copier: &Copier<C>, today: Day) -> Result<CopyStats, Error> {
        let mut stats = CopyStats::default();
        for entry in read_subdirs(&self.layout.detailed_dir())? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(day) = Day::parse(name) else { continue };
            if day >= today {
                continue;
            }
            let dst = self.layout.backup_detailed_dir().join(name);
            stats.merge(copier.copy_dir_contents(&entry.path(), &dst)?);
        }
        Ok(stats)
    }

    /// Mirrors past months wholesale; within the current month, only
    /// summaries at least two days old (today's file may still be written).
    fn mirror_summaries(&self, copier: &Copier<C>, today: Day) -> Result<CopyStats, Error> {
        let mut stats = CopyStats::default();
        let current_month = today.month();
        let settled = today.minus_days(2)?;
        for entry in read_subdirs(&self.layout.summary_dir())? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(month) = Month::parse(name) else { continue };
            if month > current_month {
                continue;
            }
            if month < current_month {
                let dst = self.layout.backup_summary_dir().join(name);
                stats.merge(copier.copy_dir_contents(&entry.path(), &dst)?);
                continue;
            }
            let dst = self.layout.backup_summary_dir().join(name);
            std::fs::create_dir_all(&dst)
                .map_err(|e| err!(Unknown, msg("unable to create {}", dst.display()), source(e)))?;
            let mut manifest = copier::load_manifest(&dst);
            let mut dirty = false;
            let files = std::fs::read_dir(entry.path()).map_err(|e| {
                err!(
                    Unknown,
                    msg("unable to list {}", entry.path().display()),
                    source(e)
                )
            })?;
            for file in files.flatten() {
                let file_name = file.file_name();
                let Some(file_name) = file_name.to_str() else {
                    continue;
                };
                let Some(day) = paths::summary_day(file_name) else {
                    continue;
                };
                if day > settled {
                    continue;
                }
                let size = file.metadata().map(|m| m.len()).unwrap_or(0);
                match copier.copy_file(&file.path(), &dst.join(file_name), &mut manifest) {
                    Ok(copier::CopyOutcome::Unchanged) => stats.unchanged += 1,
                    Ok(copier::CopyOutcome::Refreshed) => {
                        stats.refreshed += 1;
                        dirty = true;
                    }
                    Ok(copier::CopyOutcome::Copied) => {
                        stats.copied += 1;
                        stats.bytes += size;
                        dirty = true;
                    }
                    Err(e) => {
                        warn!(err = %e.chain(), "unable to mirror {}", file.path().display());
                        stats.failed += 1;
                    }
                }
            }
            if dirty {
                if let Err(e) = copier.save_manifest(&dst, &manifest) {
                    warn!(err = %e.chain(), "unable to save manifest in {}", dst.display());
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Incremental archive sync, then archive-and-prune past the horizon.
    fn sync_catalog(&self, today: Day) -> Result<(), Error> {
        self.index.flush();
        let mut conn = db::open(&self.layout.db_path(), db::OpenMode::ReadWrite)?;
        let archive_path = self.layout.backup_db_path();
        let now_ms = self.clocks.realtime().as_millisecond();
        archive::sync_to_archive(&mut conn, &archive_path, now_ms)?;
        let cutoff_ms = now_ms - self.retention_days * 86_400_000;
        archive::archive_old_records(&mut conn, &archive_path, cutoff_ms)?;
        debug!("catalog archival done (today {today}, cutoff {cutoff_ms})");
        Ok(())
    }

    /// Deletes local day/month folders past the retention horizon, but only
    /// where the mirror demonstrably ran (a manifest exists under it).
    fn evict(&self, today: Day) {
        let cutoff = match today.minus_days(self.retention_days) {
            Ok(d) => d,
            Err(e) => {
                warn!(err = %e.chain(), "unable to compute retention cutoff");
                return;
            }
        };
        evict_day_dirs(
            &self.layout.images_dir(),
            &self.layout.backup_images_dir(),
            cutoff,
        );
        evict_day_dirs(
            &self.layout.detailed_dir(),
            &self.layout.backup_detailed_dir(),
            cutoff,
        );
        evict_month_dirs(
            &self.layout.summary_dir(),
            &self.layout.backup_summary_dir(),
            cutoff.month(),
        );
    }
}

fn read_subdirs(dir: &Path) -> Result<Vec<std::fs::DirEntry>, Error> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| err!(Unknown, msg("unable to list {}", dir.display()), source(e)))?;
    Ok(entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .collect())
}

/// True iff `dir` or one of its immediate subdirectories carries a mirror
/// manifest: the proof that a mirror pass ran against this folder.
fn has_backup_manifest(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    if dir.join(copier::MANIFEST_NAME).is_file() {
        return true;
    }
    match std::fs::read_dir(dir) {
        Err(_) => false,
        Ok(entries) => entries
            .flatten()
            .any(|e| e.path().join(copier::MANIFEST_NAME).is_file()),
    }
}

/// Removes day folders strictly older than `cutoff` whose mirror is proven.
fn evict_day_dirs(root: &Path, mirror_root: &Path, cutoff: Day) {
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Ok(day) = Day::parse(name) else {
            continue;
        };
        if day >= cutoff || !entry.path().is_dir() {
            continue;
        }
        if !has_backup_manifest(&mirror_root.join(name)) {
            debug!("keeping {}; mirror not verified", entry.path().display());
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => info!("evicted {}", entry.path().display()),
            Err(e) => warn!("unable to evict {}: {e}", entry.path().display()),
        }
    }
}

/// Removes summary month folders strictly older than `cutoff_month` whose
/// mirror is proven.
fn evict_month_dirs(root: &Path, mirror_root: &Path, cutoff_month: Month) {
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Ok(month) = Month::parse(name) else {
            continue;
        };
        if month >= cutoff_month || !entry.path().is_dir() {
            continue;
        }
        if !has_backup_manifest(&mirror_root.join(name)) {
            debug!("keeping {}; mirror not verified", entry.path().display());
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => info!("evicted {}", entry.path().display()),
            Err(e) => warn!("unable to evict {}: {e}", entry.path().display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use base::clock::{RealClocks, SimulatedClocks};
    use db::testutil::{self, TestCatalogs};
    use db::writer;
    use db::CatalogRow;

    struct Harness {
        catalogs: TestCatalogs,
        layout: Layout,
        worker: BackupWorker<SimulatedClocks>,
        index_join: std::thread::JoinHandle<()>,
        _shutdown_tx: shutdown::Sender,
    }

    /// A worker whose layout's primary catalog *is* the test catalog, so
    /// `sync_catalog` operates on rows the tests insert.
    fn harness(now: &str) -> Harness {
        testutil::init();
        let catalogs = TestCatalogs::new();
        let base = catalogs.tmpdir.path().join("local");
        let backup = catalogs.tmpdir.path().join("backup");
        let config = config::load_str_for_tests(&format!(
            "paths:\n  base_dir: {}\n  backup_base_dir: {}\n",
            base.display(),
            backup.display()
        ));
        let layout = Layout::new(&config);
        layout.ensure_dirs().unwrap();
        let primary = db::open(&layout.db_path(), db::OpenMode::Create).unwrap();
        db::init(&primary).unwrap();
        let clocks = SimulatedClocks::new(now.parse().unwrap());
        let (index, index_join) = writer::start(
            RealClocks {},
            primary,
            writer::BATCH_SIZE,
            writer::FLUSH_INTERVAL,
        );
        let (_shutdown_tx, shutdown_rx) = shutdown::channel();
        let worker = BackupWorker::new(&config, layout.clone(), TimeZone::UTC, clocks, shutdown_rx, index);
        Harness {
            catalogs,
            layout,
            worker,
            index_join,
            _shutdown_tx,
        }
    }

    fn finish(h: Harness) {
        drop(h.worker);
        h.index_join.join().unwrap();
        drop(h.catalogs);
    }

    fn day(s: &str) -> Day {
        Day::parse(s).unwrap()
    }

    fn session(s: &str) -> db::days::SessionId {
        db::days::SessionId::parse(s).unwrap()
    }

    fn count(conn: &rusqlite::Connection, table: &str) -> i64 {
        conn.query_row(&format!("select count(*) from {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn full_pass_archives_and_evicts_backed_up_day() {
        // Retention 7, today 2025-01-10: an image of 2025-01-02 must end up
        // archived, mirrored, and locally gone after one pass.
        let h = harness("2025-01-10T12:00:00Z");
        let old_day = day("2025-01-02");
        let old_session = session("1000-1030");
        let session_dir = h.layout.session_dir(old_day, old_session);
        std::fs::create_dir_all(&session_dir).unwrap();
        let img = session_dir.join("SCREENSHOT_02_01_2025_10_00_00.webp");
        std::fs::write(&img, b"frame").unwrap();

        let old_ts = "2025-01-02T10:00:00Z"
            .parse::<jiff::Timestamp>()
            .unwrap()
            .as_millisecond();
        h.worker.index.insert(CatalogRow::Image(db::ImageRow {
            day: old_day,
            session: old_session,
            local_path: img.to_string_lossy().into_owned(),
            backup_path: h
                .layout
                .to_backup_equivalent(&img)
                .to_string_lossy()
                .into_owned(),
            win_title: String::new(),
            win_app: String::new(),
            created_ts: old_ts,
        }));

        h.worker.pass().unwrap();

        // Primary row moved to the archive.
        let primary = db::open(&h.layout.db_path(), db::OpenMode::ReadOnly).unwrap();
        assert_eq!(count(&primary, "images"), 0);
        let archive = db::open(&h.layout.backup_db_path(), db::OpenMode::ReadOnly).unwrap();
        assert_eq!(count(&archive, "images"), 1);

        // The mirror holds the file (plus its manifest); the local day is gone.
        let mirror_img = h.layout.to_backup_equivalent(&img);
        assert_eq!(std::fs::read(&mirror_img).unwrap(), b"frame");
        assert!(mirror_img
            .parent()
            .unwrap()
            .join(copier::MANIFEST_NAME)
            .is_file());
        assert!(!h.layout.images_dir().join(old_day.as_str()).exists());
        finish(h);
    }

    #[test]
    fn eviction_requires_manifest_proof() {
        let h = harness("2025-01-10T12:00:00Z");
        let cutoff = day("2025-01-03");

        // Mirror exists but carries no manifest: keep the local folder.
        let unproven = h.layout.images_dir().join("2025-01-01");
        std::fs::create_dir_all(unproven.join("1000-1030")).unwrap();
        std::fs::write(unproven.join("1000-1030").join("a.webp"), b"x").unwrap();
        let mirror = h.layout.backup_images_dir().join("2025-01-01");
        std::fs::create_dir_all(mirror.join("1000-1030")).unwrap();

        // Proven mirror: evict.
        let proven = h.layout.images_dir().join("2025-01-02");
        std::fs::create_dir_all(proven.join("1000-1030")).unwrap();
        let proven_mirror = h.layout.backup_images_dir().join("2025-01-02");
        std::fs::create_dir_all(proven_mirror.join("1000-1030")).unwrap();
        std::fs::write(
            proven_mirror.join("1000-1030").join(copier::MANIFEST_NAME),
            b"{}",
        )
        .unwrap();

        evict_day_dirs(
            &h.layout.images_dir(),
            &h.layout.backup_images_dir(),
            cutoff,
        );
        assert!(unproven.exists());
        assert!(!proven.exists());
        finish(h);
    }

    #[test]
    fn eviction_never_touches_days_within_retention() {
        let h = harness("2025-01-10T12:00:00Z");
        let cutoff = day("2025-01-03");
        // Exactly at the cutoff: kept, even with a proven mirror.
        let at_cutoff = h.layout.detailed_dir().join("2025-01-03");
        std::fs::create_dir_all(&at_cutoff).unwrap();
        let mirror = h.layout.backup_detailed_dir().join("2025-01-03");
        std::fs::create_dir_all(&mirror).unwrap();
        std::fs::write(mirror.join(copier::MANIFEST_NAME), b"{}").unwrap();

        evict_day_dirs(
            &h.layout.detailed_dir(),
            &h.layout.backup_detailed_dir(),
            cutoff,
        );
        assert!(at_cutoff.exists());
        finish(h);
    }

    #[test]
    fn live_session_is_skipped_by_mirror() {
        let h = harness("2025-01-10T12:00:00Z");
        let d = day("2025-01-10");
        let live = h.layout.session_dir(d, session("1030-1100"));
        let done = h.layout.session_dir(d, session("1000-1030"));
        std::fs::create_dir_all(&live).unwrap();
        std::fs::create_dir_all(&done).unwrap();
        std::fs::write(live.join("live.webp"), b"x").unwrap();
        std::fs::write(done.join("done.webp"), b"x").unwrap();
        // Lock written 30 s ago by this (live) process.
        lock::create(&live, h.worker.clocks.realtime() - jiff::SignedDuration::from_secs(30))
            .unwrap();

        let copier = Copier {
            clocks: &h.worker.clocks,
        };
        h.worker.mirror_images(&copier).unwrap();
        assert!(h
            .layout
            .to_backup_equivalent(&done.join("done.webp"))
            .is_file());
        assert!(!h
            .layout
            .to_backup_equivalent(&live.join("live.webp"))
            .exists());
        finish(h);
    }

    #[test]
    fn current_month_summaries_mirror_only_settled_days() {
        let h = harness("2025-01-10T12:00:00Z");
        let month_dir = h.layout.summary_dir().join("2025-01");
        std::fs::create_dir_all(&month_dir).unwrap();
        for name in [
            "2025-01-07_summary.mp4",
            "2025-01-08_summary.mp4",
            "2025-01-09_summary.mp4",
        ] {
            std::fs::write(month_dir.join(name), b"v").unwrap();
        }
        // A past month mirrors wholesale.
        let past = h.layout.summary_dir().join("2024-12");
        std::fs::create_dir_all(&past).unwrap();
        std::fs::write(past.join("2024-12-31_summary.mp4"), b"v").unwrap();

        let copier = Copier {
            clocks: &h.worker.clocks,
        };
        h.worker
            .mirror_summaries(&copier, day("2025-01-10"))
            .unwrap();

        let mirror_month = h.layout.backup_summary_dir().join("2025-01");
        assert!(mirror_month.join("2025-01-07_summary.mp4").is_file());
        assert!(mirror_month.join("2025-01-08_summary.mp4").is_file());
        // today − 1 is not yet settled.
        assert!(!mirror_month.join("2025-01-09_summary.mp4").exists());
        assert!(h
            .layout
            .backup_summary_dir()
            .join("2024-12")
            .join("2024-12-31_summary.mp4")
            .is_file());
        finish(h);
    }

    #[test]
    fn second_pass_is_cheap_and_safe() {
        let h = harness("2025-01-10T12:00:00Z");
        let d = day("2025-01-09");
        let dir = h.layout.session_dir(d, session("1000-1030"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.webp"), b"frame").unwrap();

        h.worker.pass().unwrap();
        let copier = Copier {
            clocks: &h.worker.clocks,
        };
        let stats = h.worker.mirror_images(&copier).unwrap();
        assert_eq!(stats.copied, 0);
        assert_eq!(stats.unchanged, 1);
        finish(h);
    }
}
