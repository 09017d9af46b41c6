// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Deterministic path derivation for the local asset tree and its backup
//! mirror. Both roots share one shape:
//!
//! ```text
//! <root>/Assets/Images/<day>/<session>/SCREENSHOT_dd_mm_YYYY_HH_MM_SS.webp
//! <root>/Assets/Timelapse/Detailed/<day>/<day>_<session>.mp4
//! <root>/Assets/Timelapse/Summary/<YYYY-MM>/<day>_summary.mp4
//! <root>/Database/<app>.db
//! ```

use crate::config::Config;
use base::{err, Error};
use db::days::{Day, Month, SessionId};
use std::path::{Path, PathBuf};

const IMAGES: &str = "Assets/Images";
const DETAILED: &str = "Assets/Timelapse/Detailed";
const SUMMARY: &str = "Assets/Timelapse/Summary";
const DATABASE: &str = "Database";

const SUMMARY_SUFFIX: &str = "_summary.mp4";

#[derive(Clone, Debug)]
pub struct Layout {
    base: PathBuf,
    backup: PathBuf,
    db_file: String,
}

impl Layout {
    pub fn new(config: &Config) -> Self {
        Self {
            base: config.paths.base_dir.clone(),
            backup: config.paths.backup_base_dir.clone(),
            db_file: format!("{}.db", config.app.name),
        }
    }

    pub fn images_dir(&self) -> PathBuf {
        self.base.join(IMAGES)
    }
    pub fn detailed_dir(&self) -> PathBuf {
        self.base.join(DETAILED)
    }
    pub fn summary_dir(&self) -> PathBuf {
        self.base.join(SUMMARY)
    }
    pub fn db_path(&self) -> PathBuf {
        self.base.join(DATABASE).join(&self.db_file)
    }

    pub fn backup_images_dir(&self) -> PathBuf {
        self.backup.join(IMAGES)
    }
    pub fn backup_detailed_dir(&self) -> PathBuf {
        self.backup.join(DETAILED)
    }
    pub fn backup_summary_dir(&self) -> PathBuf {
        self.backup.join(SUMMARY)
    }
    pub fn backup_db_path(&self) -> PathBuf {
        self.backup.join(DATABASE).join(&self.db_file)
    }

    /// Creates every directory of both trees, idempotently.
    pub fn ensure_dirs(&self) -> Result<(), Error> {
        for dir in [
            self.images_dir(),
            self.detailed_dir(),
            self.summary_dir(),
            self.base.join(DATABASE),
            self.backup_images_dir(),
            self.backup_detailed_dir(),
            self.backup_summary_dir(),
            self.backup.join(DATABASE),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                err!(Unknown, msg("unable to create {}", dir.display()), source(e))
            })?;
        }
        Ok(())
    }

    pub fn session_dir(&self, day: Day, session: SessionId) -> PathBuf {
        self.images_dir().join(day.as_str()).join(session.as_str())
    }

    pub fn detailed_day_dir(&self, day: Day) -> PathBuf {
        self.detailed_dir().join(day.as_str())
    }

    pub fn detailed_video_path(&self, day: Day, session: SessionId) -> PathBuf {
        self.detailed_day_dir(day)
            .join(format!("{day}_{session}.mp4"))
    }

    pub fn summary_month_dir(&self, month: Month) -> PathBuf {
        self.summary_dir().join(month.as_str())
    }

    pub fn summary_path(&self, day: Day) -> PathBuf {
        self.summary_month_dir(day.month())
            .join(format!("{day}{SUMMARY_SUFFIX}"))
    }

    /// Maps a path under the local root to the equivalent path under the
    /// backup root. Falls back to a flat basename placement if `local` is
    /// somehow outside the local root.
    pub fn to_backup_equivalent(&self, local: &Path) -> PathBuf {
        match local.strip_prefix(&self.base) {
            Ok(rel) => self.backup.join(rel),
            Err(_) => match local.file_name() {
                Some(name) => self.backup.join(name),
                None => self.backup.clone(),
            },
        }
    }
}

/// Filename for a frame captured at the given local time.
pub fn screenshot_name(now: &jiff::Zoned) -> String {
    now.strftime("SCREENSHOT_%d_%m_%Y_%H_%M_%S.webp").to_string()
}

/// Parses the day out of a `<day>_summary.mp4` filename.
pub fn summary_day(file_name: &str) -> Option<Day> {
    let day = file_name.strip_suffix(SUMMARY_SUFFIX)?;
    Day::parse(day).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn layout() -> Layout {
        let config = config::load_str_for_tests(
            r#"
app:
  name: pyrecall
paths:
  base_dir: /data/lane
  backup_base_dir: /mnt/backup/lane
"#,
        );
        Layout::new(&config)
    }

    #[test]
    fn derivation() {
        let l = layout();
        let day = Day::parse("2025-01-10").unwrap();
        let session = SessionId::parse("1000-1030").unwrap();
        assert_eq!(
            l.session_dir(day, session),
            PathBuf::from("/data/lane/Assets/Images/2025-01-10/1000-1030")
        );
        assert_eq!(
            l.detailed_video_path(day, session),
            PathBuf::from("/data/lane/Assets/Timelapse/Detailed/2025-01-10/2025-01-10_1000-1030.mp4")
        );
        assert_eq!(
            l.summary_path(day),
            PathBuf::from("/data/lane/Assets/Timelapse/Summary/2025-01/2025-01-10_summary.mp4")
        );
        assert_eq!(l.db_path(), PathBuf::from("/data/lane/Database/pyrecall.db"));
        assert_eq!(
            l.backup_db_path(),
            PathBuf::from("/mnt/backup/lane/Database/pyrecall.db")
        );
    }

    #[test]
    fn backup_equivalent() {
        let l = layout();
        assert_eq!(
            l.to_backup_equivalent(Path::new(
                "/data/lane/Assets/Images/2025-01-10/1000-1030/a.webp"
            )),
            PathBuf::from("/mnt/backup/lane/Assets/Images/2025-01-10/1000-1030/a.webp")
        );
        // Outside the local root: falls back to a basename placement.
        assert_eq!(
            l.to_backup_equivalent(Path::new("/elsewhere/a.webp")),
            PathBuf::from("/mnt/backup/lane/a.webp")
        );
    }

    #[test]
    fn screenshot_names_sort_chronologically() {
        let tz = jiff::tz::TimeZone::UTC;
        let a: jiff::Timestamp = "2025-01-10T09:59:59Z".parse().unwrap();
        let b: jiff::Timestamp = "2025-01-10T10:00:00Z".parse().unwrap();
        let a = screenshot_name(&a.to_zoned(tz.clone()));
        let b = screenshot_name(&b.to_zoned(tz));
        assert_eq!(a, "SCREENSHOT_10_01_2025_09_59_59.webp");
        assert!(a < b);
    }

    #[test]
    fn summary_day_parse() {
        assert_eq!(
            summary_day("2025-01-10_summary.mp4").unwrap().as_str(),
            "2025-01-10"
        );
        assert!(summary_day("2025-01-10.mp4").is_none());
        assert!(summary_day("junk_summary.mp4").is_none());
    }
}
