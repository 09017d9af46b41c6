// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Subcommand to run the recorder: one thread per component, coordinated by
//! a broadcast stop flag.

use crate::assembler;
use crate::backup::BackupWorker;
use crate::capture::Capture;
use crate::config;
use crate::encoder::Encoder;
use crate::paths::Layout;
use crate::platform;
use base::clock::RealClocks;
use base::{err, Error, ErrorKind, ResultExt as _};
use bpaf::Bpaf;
use db::writer;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use tracing::{error, info, warn};

/// Runs the recorder until SIGINT/SIGTERM.
#[derive(Bpaf, Debug)]
#[bpaf(command("run"))]
pub struct Args {
    /// Path to the YAML configuration file.
    #[bpaf(argument("PATH"), fallback(config::DEFAULT_CONFIG_PATH.into()))]
    config: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let config = config::load(&args.config)?;
    let layout = Layout::new(&config);
    layout.ensure_dirs()?;
    let tz = jiff::tz::TimeZone::system();
    let clocks = RealClocks {};

    // Bootstrap both catalogs before anything concurrent starts.
    let writer_conn = db::open(&layout.db_path(), db::OpenMode::Create)?;
    db::init(&writer_conn)?;
    {
        let archive_conn = db::open(&layout.backup_db_path(), db::OpenMode::Create)?;
        db::init_archive(&archive_conn)?;
    }

    let encoder = Encoder::from_config(&config);
    if !encoder.is_available() {
        warn!(
            "{} is not runnable; video assembly will fail until it is installed",
            config.video.ffmpeg.display()
        );
    }

    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();
    let (index, index_join) = writer::start(
        clocks,
        writer_conn,
        writer::BATCH_SIZE,
        writer::FLUSH_INTERVAL,
    );
    let (videos, assembler_join) = assembler::start(clocks, encoder, index.clone());

    let backup = BackupWorker::new(
        &config,
        layout.clone(),
        tz.clone(),
        clocks,
        shutdown_rx.clone(),
        index.clone(),
    );
    let backup_join = thread::Builder::new()
        .name("backup".to_owned())
        .spawn(move || backup.run())
        .expect("can't create thread");

    let capture_conn = db::open(&layout.db_path(), db::OpenMode::ReadOnly)?;
    let mut capture = Capture::new(
        &config,
        layout,
        tz,
        clocks,
        platform::PrimaryDisplay::default(),
        index.clone(),
        videos.clone(),
        capture_conn,
        shutdown_rx.clone(),
    );
    let capture_join = thread::Builder::new()
        .name("capture".to_owned())
        .spawn(move || capture.run())
        .expect("can't create thread");

    // Wait for a termination signal.
    let (sig_snd, sig_rcv) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = sig_snd.send(());
    })
    .err_kind(ErrorKind::Internal)?;
    let _ = sig_rcv.recv();
    info!("shutdown requested");

    // Stop the loops, then drain the pipelines producer-first: capture and
    // backup exit their waits; with every job channel dropped the assembler
    // drains; with every row channel dropped the index writer commits a
    // final batch.
    drop(shutdown_tx);
    join("capture", capture_join)?;
    join("backup", backup_join)?;
    drop(videos);
    join("assembler", assembler_join)?;
    drop(index);
    join("index-writer", index_join)?;
    info!("exiting");
    Ok(0)
}

fn join(name: &str, handle: thread::JoinHandle<()>) -> Result<(), Error> {
    handle.join().map_err(|_| {
        error!("{name} thread panicked");
        err!(Internal, msg("{name} thread panicked"))
    })
}
