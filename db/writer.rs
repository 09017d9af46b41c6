// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The index writer: the single thread allowed to mutate the primary catalog.
//!
//! Producers hand it typed rows over a channel; it converts the bursty
//! stream into batched transactions to keep write-amplification on the
//! SQLite file low. A batch commits when `BATCH_SIZE` rows have accumulated
//! or when `FLUSH_INTERVAL` passes without further input. A failed batch is
//! rolled back and dropped: losing one batch of index rows on a persistently
//! broken catalog beats retrying into it forever.

use crate::db::CatalogRow;
use crate::raw;
use base::clock::Clocks;
use base::{Error, ErrorKind, ResultExt as _};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const BATCH_SIZE: usize = 200;
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

enum Command {
    Insert(CatalogRow),

    /// Commit everything received so far, then drop the sender to signal
    /// completion to the caller blocked in [`IndexChannel::flush`].
    Flush(mpsc::Sender<std::convert::Infallible>),
}

/// A channel which can be used to send rows to the index writer.
/// Can be cloned to allow multiple producers.
#[derive(Clone)]
pub struct IndexChannel(mpsc::Sender<Command>);

impl IndexChannel {
    /// Enqueues a row without blocking. If the writer is gone (shutdown
    /// race), the row is dropped with a warning.
    pub fn insert(&self, row: CatalogRow) {
        if self.0.send(Command::Insert(row)).is_err() {
            warn!("index writer is gone; dropping row");
        }
    }

    /// Blocks until every previously enqueued row has been committed.
    pub fn flush(&self) {
        let (snd, rcv) = mpsc::channel();
        if self.0.send(Command::Flush(snd)).is_ok() {
            rcv.recv().unwrap_err(); // the writer just drops the channel, closing it.
        }
    }
}

/// Starts the index writer on the given (already bootstrapped) primary
/// connection.
///
/// The thread exits after a final drain once every [`IndexChannel`] clone
/// has been dropped; join the handle to wait for that.
pub fn start<C: Clocks>(
    clocks: C,
    conn: rusqlite::Connection,
    batch_size: usize,
    flush_interval: Duration,
) -> (IndexChannel, thread::JoinHandle<()>) {
    let (snd, rcv) = mpsc::channel();
    let join = thread::Builder::new()
        .name("index-writer".to_owned())
        .spawn(move || {
            info!("starting");
            let mut w = Writer {
                clocks,
                conn,
                batch_size,
                flush_interval,
            };
            w.run(rcv);
            info!("ending");
        })
        .expect("can't create thread");
    (IndexChannel(snd), join)
}

struct Writer<C: Clocks> {
    clocks: C,
    conn: rusqlite::Connection,
    batch_size: usize,
    flush_interval: Duration,
}

impl<C: Clocks> Writer<C> {
    fn run(&mut self, rcv: mpsc::Receiver<Command>) {
        loop {
            let first = match self.clocks.recv_timeout(&rcv, self.flush_interval) {
                Ok(cmd) => cmd,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            };
            let mut rows = Vec::new();
            let mut flush_acks = Vec::new();
            let mut disconnected = false;
            match first {
                Command::Insert(r) => rows.push(r),
                Command::Flush(snd) => flush_acks.push(snd),
            }
            while rows.len() < self.batch_size {
                match rcv.try_recv() {
                    Ok(Command::Insert(r)) => rows.push(r),
                    Ok(Command::Flush(snd)) => flush_acks.push(snd),
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }
            if !rows.is_empty() {
                if let Err(e) = self.commit(&rows) {
                    error!(err = %e.chain(), "dropping batch of {} rows", rows.len());
                }
            }
            drop(flush_acks); // acknowledge flushes after the commit.
            if disconnected {
                return;
            }
        }
    }

    fn commit(&mut self, rows: &[CatalogRow]) -> Result<(), Error> {
        let tx = self.conn.transaction().err_kind(ErrorKind::Internal)?;
        for row in rows {
            raw::insert_row(&tx, row)?;
        }
        tx.commit().err_kind(ErrorKind::Internal)?;
        debug!("committed batch of {} rows", rows.len());
        Ok(())
    }
}
