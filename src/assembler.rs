// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The video assembler: a single worker draining encoding jobs in FIFO
//! order.
//!
//! A job that succeeds reports its completion row through the index writer.
//! A job that fails is logged and forgotten; no row means the backlog sweep
//! re-enqueues it on a later cycle. The worker exits after draining the
//! queue once every channel clone has been dropped.

use crate::encoder::Encoder;
use crate::lock;
use base::clock::{Clocks, TimerGuard};
use db::days::{Day, SessionId};
use db::writer::IndexChannel;
use db::{CatalogRow, SummaryRow, VideoRow};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use tracing::{info, warn};

#[derive(Debug)]
pub enum VideoJob {
    /// Build one detailed video from a session folder's images.
    Detailed {
        images_dir: PathBuf,
        out: PathBuf,
        day: Day,
        session: SessionId,
        local_path: String,
        backup_path: String,
    },
    /// Build one summary timelapse from a day's detailed videos.
    Summary {
        day: Day,
        detailed_dir: PathBuf,
        out: PathBuf,
        local_path: String,
        backup_path: String,
    },
}

/// A channel which can be used to send jobs to the assembler.
/// Can be cloned to allow multiple producers.
#[derive(Clone)]
pub struct AssemblerChannel(mpsc::Sender<VideoJob>);

impl AssemblerChannel {
    pub fn send(&self, job: VideoJob) {
        if self.0.send(job).is_err() {
            warn!("video assembler is gone; dropping job");
        }
    }

    pub(crate) fn pair() -> (Self, mpsc::Receiver<VideoJob>) {
        let (snd, rcv) = mpsc::channel();
        (AssemblerChannel(snd), rcv)
    }
}

pub fn start<C: Clocks>(
    clocks: C,
    encoder: Encoder,
    index: IndexChannel,
) -> (AssemblerChannel, thread::JoinHandle<()>) {
    let (channel, rcv) = AssemblerChannel::pair();
    let join = thread::Builder::new()
        .name("assembler".to_owned())
        .spawn(move || {
            info!("starting");
            // recv delivers everything already queued before reporting
            // disconnection, so shutdown drains the backlog synchronously.
            while let Ok(job) = rcv.recv() {
                process(&clocks, &encoder, &index, job);
            }
            info!("ending");
        })
        .expect("can't create thread");
    (channel, join)
}

fn process<C: Clocks>(clocks: &C, encoder: &Encoder, index: &IndexChannel, job: VideoJob) {
    match job {
        VideoJob::Detailed {
            images_dir,
            out,
            day,
            session,
            local_path,
            backup_path,
        } => {
            // A lock means the session is (or may be) live; the backlog will
            // offer it again once the writer is done.
            if lock::is_locked(&images_dir) {
                warn!("skipping locked session {day} {session}");
                return;
            }
            let _t = TimerGuard::new(clocks, || format!("encoding {}", out.display()));
            match encoder.encode_session_video(&images_dir, &out) {
                Ok(n) => {
                    info!("wrote {} from {n} images", out.display());
                    index.insert(CatalogRow::Video(VideoRow {
                        day,
                        session,
                        local_path,
                        backup_path,
                        created_ts: clocks.realtime().as_millisecond(),
                    }));
                }
                Err(e) => {
                    warn!(err = %e.chain(), "detailed video for {day} {session} failed");
                }
            }
        }
        VideoJob::Summary {
            day,
            detailed_dir,
            out,
            local_path,
            backup_path,
        } => {
            let _t = TimerGuard::new(clocks, || format!("encoding {}", out.display()));
            match encoder.encode_day_summary(&detailed_dir, &out) {
                Ok(n) => {
                    info!("wrote {} from {n} detailed videos", out.display());
                    index.insert(CatalogRow::Summary(SummaryRow {
                        day,
                        local_path,
                        backup_path,
                        created_ts: clocks.realtime().as_millisecond(),
                    }));
                }
                Err(e) => {
                    warn!(err = %e.chain(), "summary for {day} failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use base::clock::RealClocks;
    use db::testutil;
    use db::writer;

    fn bad_encoder() -> Encoder {
        let config = config::load_str_for_tests(
            r#"
paths:
  base_dir: /tmp/lane
  backup_base_dir: /tmp/lane-backup
video:
  ffmpeg: /no/such/ffmpeg
"#,
        );
        Encoder::from_config(&config)
    }

    fn video_count(path: &std::path::Path) -> i64 {
        let conn = db::open(path, db::OpenMode::ReadOnly).unwrap();
        conn.query_row("select count(*) from videos", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn locked_session_is_skipped() {
        testutil::init();
        let catalogs = testutil::TestCatalogs::new();
        let conn = db::open(&catalogs.primary, db::OpenMode::ReadWrite).unwrap();
        let (index, index_join) =
            writer::start(RealClocks {}, conn, writer::BATCH_SIZE, writer::FLUSH_INTERVAL);

        let session_dir = catalogs.tmpdir.path().join("1000-1030");
        std::fs::create_dir_all(&session_dir).unwrap();
        std::fs::write(session_dir.join("a.webp"), b"x").unwrap();
        lock::create(&session_dir, "2025-01-10T10:00:00Z".parse().unwrap()).unwrap();

        process(
            &RealClocks {},
            &bad_encoder(),
            &index,
            VideoJob::Detailed {
                images_dir: session_dir,
                out: catalogs.tmpdir.path().join("v.mp4"),
                day: db::days::Day::parse("2025-01-10").unwrap(),
                session: db::days::SessionId::parse("1000-1030").unwrap(),
                local_path: "v.mp4".to_owned(),
                backup_path: String::new(),
            },
        );
        index.flush();
        assert_eq!(video_count(&catalogs.primary), 0);
        drop(index);
        index_join.join().unwrap();
    }

    #[test]
    fn failed_job_writes_no_row() {
        testutil::init();
        let catalogs = testutil::TestCatalogs::new();
        let conn = db::open(&catalogs.primary, db::OpenMode::ReadWrite).unwrap();
        let (index, index_join) =
            writer::start(RealClocks {}, conn, writer::BATCH_SIZE, writer::FLUSH_INTERVAL);

        let session_dir = catalogs.tmpdir.path().join("1030-1100");
        std::fs::create_dir_all(&session_dir).unwrap();
        std::fs::write(session_dir.join("a.webp"), b"x").unwrap();

        process(
            &RealClocks {},
            &bad_encoder(),
            &index,
            VideoJob::Detailed {
                images_dir: session_dir,
                out: catalogs.tmpdir.path().join("v.mp4"),
                day: db::days::Day::parse("2025-01-10").unwrap(),
                session: db::days::SessionId::parse("1030-1100").unwrap(),
                local_path: "v.mp4".to_owned(),
                backup_path: String::new(),
            },
        );
        index.flush();
        assert_eq!(video_count(&catalogs.primary), 0);
        drop(index);
        index_join.join().unwrap();
    }

    #[test]
    fn worker_drains_queue_on_disconnect() {
        testutil::init();
        let catalogs = testutil::TestCatalogs::new();
        let conn = db::open(&catalogs.primary, db::OpenMode::ReadWrite).unwrap();
        let (index, index_join) =
            writer::start(RealClocks {}, conn, writer::BATCH_SIZE, writer::FLUSH_INTERVAL);
        let (channel, join) = start(RealClocks {}, bad_encoder(), index.clone());
        for i in 0..3 {
            channel.send(VideoJob::Summary {
                day: db::days::Day::parse("2025-01-10").unwrap(),
                detailed_dir: catalogs.tmpdir.path().join(format!("missing{i}")),
                out: catalogs.tmpdir.path().join("s.mp4"),
                local_path: "s.mp4".to_owned(),
                backup_path: String::new(),
            });
        }
        drop(channel);
        join.join().unwrap();
        drop(index);
        index_join.join().unwrap();
    }
}
