// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The capture engine.
//!
//! On a fixed cadence: sample the display, gate on novelty, persist kept
//! frames, and enqueue their index rows. Sessions are fixed-length
//! wall-clock windows; closing one enqueues its detailed video. Day
//! rollover enqueues the finished day's summary. The engine never blocks on
//! the catalog or the encoder; both sit behind channels.
//!
//! Capture is meant to be long-lived; a failed tick is logged and the next
//! tick retries cleanly with the novelty state preserved.

use crate::assembler::{AssemblerChannel, VideoJob};
use crate::config::Config;
use crate::lock::{self, ProcessProbe};
use crate::novelty::{CaptureState, NoveltyConfig, Verdict};
use crate::paths::{self, Layout};
use crate::platform::Desktop;
use crate::stamp::Stamper;
use base::clock::Clocks;
use base::{err, shutdown, Error};
use db::days::{Day, SessionId};
use db::writer::IndexChannel;
use db::{CatalogRow, ImageRow};
use jiff::tz::TimeZone;
use jiff::Zoned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const BACKLOG_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct Session {
    day: Day,
    id: SessionId,
    dir: PathBuf,
    /// Monotonic time at which the session opened.
    started: Duration,
}

pub struct Capture<C: Clocks, D: Desktop> {
    interval: Duration,
    session_len: Duration,
    session_minutes: i64,
    idle_threshold: f64,
    novelty: NoveltyConfig,
    lock_stale: Duration,
    layout: Layout,
    tz: TimeZone,
    clocks: C,
    desktop: D,
    index: IndexChannel,
    videos: AssemblerChannel,
    /// Read-only catalog connection for the backlog queries.
    catalog: rusqlite::Connection,
    shutdown_rx: shutdown::Receiver,
    probe: Box<dyn ProcessProbe + Send>,
    stamper: Stamper,
    state: CaptureState,
    day: Option<Day>,
    session: Option<Session>,
    last_sweep: Duration,
}

impl<C: Clocks, D: Desktop> Capture<C, D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        layout: Layout,
        tz: TimeZone,
        clocks: C,
        desktop: D,
        index: IndexChannel,
        videos: AssemblerChannel,
        catalog: rusqlite::Connection,
        shutdown_rx: shutdown::Receiver,
    ) -> Self {
        Self {
            interval: config.capture_interval(),
            session_len: Duration::from_secs(u64::from(config.session.minutes) * 60),
            session_minutes: i64::from(config.session.minutes),
            idle_threshold: config.session.idle_threshold,
            novelty: NoveltyConfig {
                hash_size: config.capture.hash_size,
                hamming_threshold: config.capture.hamming_threshold,
                persistence_frames: config.capture.persistence_frames,
                area_small: config.capture.area_small_pxl,
                area_frac_threshold: config.capture.area_frac_threshold,
            },
            lock_stale: config.lock_stale(),
            stamper: Stamper::new(
                config.capture.stamp_font.as_deref(),
                config.capture.webp_quality,
            ),
            layout,
            tz,
            clocks,
            desktop,
            index,
            videos,
            catalog,
            shutdown_rx,
            probe: Box::new(lock::SystemProcesses),
            state: CaptureState::default(),
            day: None,
            session: None,
            last_sweep: Duration::ZERO,
        }
    }

    pub fn run(&mut self) {
        if let Err(e) = self.startup() {
            error!(err = %e.chain(), "capture startup failed");
            return;
        }
        while self.shutdown_rx.wait_for(self.interval).is_ok() {
            if let Err(e) = self.tick() {
                warn!(err = %e.chain(), "capture tick failed");
            }
        }
        // The current session's lock stays behind deliberately; the
        // staleness sweep reclaims it on the next start.
        info!("shutting down");
    }

    fn startup(&mut self) -> Result<(), Error> {
        self.layout.ensure_dirs()?;
        let removed = lock::sweep_stale(
            &self.layout.images_dir(),
            &*self.probe,
            self.clocks.realtime(),
            self.lock_stale,
        );
        if removed > 0 {
            info!("recovered {removed} stale session locks");
        }
        if let Err(e) = self.process_backlog() {
            warn!(err = %e.chain(), "startup backlog sweep failed");
        }
        let now = self.now();
        self.day = Some(Day::from_date(now.date()));
        self.open_session(&now)?;
        self.last_sweep = self.clocks.monotonic();
        info!("capturing every {:?}", self.interval);
        Ok(())
    }

    fn now(&self) -> Zoned {
        self.clocks.realtime().to_zoned(self.tz.clone())
    }

    fn tick(&mut self) -> Result<(), Error> {
        let now = self.now();
        self.roll_day(&now);
        let captured = self.capture_frame(&now);
        self.roll_session(&now)?;
        self.sweep_backlog_if_idle();
        captured
    }

    /// On day rollover, enqueues the finished day's summary (at most once;
    /// the transition happens once and an existing file short-circuits).
    fn roll_day(&mut self, now: &Zoned) {
        let today = Day::from_date(now.date());
        let Some(previous) = self.day else {
            self.day = Some(today);
            return;
        };
        if previous == today {
            return;
        }
        self.day = Some(today);
        let out = self.layout.summary_path(previous);
        if out.exists() {
            debug!("summary for {previous} already exists");
            return;
        }
        info!("day rolled over; queueing summary for {previous}");
        self.enqueue_summary(previous, out);
    }

    fn enqueue_summary(&self, day: Day, out: PathBuf) {
        let backup = self.layout.to_backup_equivalent(&out);
        self.videos.send(VideoJob::Summary {
            day,
            detailed_dir: self.layout.detailed_day_dir(day),
            local_path: path_str(&out),
            backup_path: path_str(&backup),
            out,
        });
    }

    fn capture_frame(&mut self, now: &Zoned) -> Result<(), Error> {
        let frame = self.desktop.grab_frame()?;
        let window = self.desktop.foreground_window();
        let verdict = self.state.observe(&frame, &window, &self.novelty);
        let Verdict::Save(reason) = verdict else {
            return Ok(());
        };
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| err!(FailedPrecondition, msg("no open session")))?;
        let name = paths::screenshot_name(now);
        let path = session.dir.join(&name);
        let stamp = format!(
            "{} | {} | {}",
            window.1,
            window.0,
            now.strftime("%Y-%m-%d %H:%M:%S")
        );
        let mut frame = frame;
        self.stamper.annotate(&mut frame, &stamp);
        // A failed write produces no index row.
        self.stamper.write(&frame, &path)?;
        let backup = self.layout.to_backup_equivalent(&path);
        self.index.insert(CatalogRow::Image(ImageRow {
            day: session.day,
            session: session.id,
            local_path: path_str(&path),
            backup_path: path_str(&backup),
            win_title: window.0,
            win_app: window.1,
            created_ts: self.clocks.realtime().as_millisecond(),
        }));
        debug!(?reason, "saved {name}");
        Ok(())
    }

    fn roll_session(&mut self, now: &Zoned) -> Result<(), Error> {
        let elapsed = match &self.session {
            Some(s) => self.clocks.monotonic().saturating_sub(s.started),
            None => return self.open_session(now),
        };
        if elapsed < self.session_len {
            return Ok(());
        }
        self.close_session();
        self.open_session(now)
    }

    fn open_session(&mut self, now: &Zoned) -> Result<(), Error> {
        let day = Day::from_date(now.date());
        let id = SessionId::new(now.datetime(), self.session_minutes)?;
        let dir = self.layout.session_dir(day, id);
        lock::create(&dir, self.clocks.realtime())?;
        debug!("opened session {day} {id}");
        self.session = Some(Session {
            day,
            id,
            dir,
            started: self.clocks.monotonic(),
        });
        Ok(())
    }

    /// Enqueues the closing session's detailed video, then releases its lock.
    fn close_session(&mut self) {
        let Some(s) = self.session.take() else {
            return;
        };
        let out = self.layout.detailed_video_path(s.day, s.id);
        if out.exists() {
            debug!("detailed video {} already exists", out.display());
        } else {
            info!("session {} closed; queueing detailed video", s.id);
            let backup = self.layout.to_backup_equivalent(&out);
            self.videos.send(VideoJob::Detailed {
                images_dir: s.dir.clone(),
                day: s.day,
                session: s.id,
                local_path: path_str(&out),
                backup_path: path_str(&backup),
                out,
            });
        }
        lock::remove(&s.dir);
    }

    fn sweep_backlog_if_idle(&mut self) {
        let now_mono = self.clocks.monotonic();
        if now_mono.saturating_sub(self.last_sweep) < BACKLOG_SWEEP_INTERVAL {
            return;
        }
        self.last_sweep = now_mono;
        let idle = self.desktop.idle_seconds();
        if idle < self.idle_threshold {
            debug!("user active (idle {idle:.0}s); deferring backlog sweep");
            return;
        }
        if let Err(e) = self.process_backlog() {
            warn!(err = %e.chain(), "backlog sweep failed");
        }
    }

    /// Re-enqueues assembly work whose output rows never landed: sessions
    /// with images but no video, days with videos but no summary. The live
    /// session, locked sessions, and today's summary are left alone.
    fn process_backlog(&mut self) -> Result<(), Error> {
        let current = self.session.as_ref().map(|s| (s.day, s.id));
        let mut sessions = Vec::new();
        db::raw::pending_video_sessions(&self.catalog, &mut |day, id| {
            sessions.push((day, id));
            Ok(())
        })?;
        for (day, id) in sessions {
            if current == Some((day, id)) {
                continue;
            }
            let folder = self.layout.session_dir(day, id);
            if !folder.is_dir() {
                continue;
            }
            if lock::is_locked(&folder) {
                debug!("backlog: session {day} {id} is locked; skipping");
                continue;
            }
            info!("backlog: queueing detailed video for {day} {id}");
            let out = self.layout.detailed_video_path(day, id);
            let backup = self.layout.to_backup_equivalent(&out);
            self.videos.send(VideoJob::Detailed {
                images_dir: folder,
                day,
                session: id,
                local_path: path_str(&out),
                backup_path: path_str(&backup),
                out,
            });
        }

        let today = Day::from_date(self.now().date());
        let mut days = Vec::new();
        db::raw::pending_summary_days(&self.catalog, &mut |day| {
            days.push(day);
            Ok(())
        })?;
        for day in days {
            if day == today {
                continue;
            }
            info!("backlog: queueing summary for {day}");
            let out = self.layout.summary_path(day);
            self.enqueue_summary(day, out);
        }
        Ok(())
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
