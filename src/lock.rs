// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The session lock protocol.
//!
//! A `session.lock` file inside a session directory means "writer active or
//! recently crashed". The backup mirror and the assembler's backlog path
//! refuse to enter locked sessions; the stale predicate lets the system
//! recover the lock after a crash. A session directory carries at most one
//! lock file, created atomically.

use base::{err, Error};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const LOCK_FILE_NAME: &str = "session.lock";

#[derive(Debug, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub ts: jiff::Timestamp,
}

/// Answers "does this pid refer to a live process?". A trait so tests can
/// simulate crashed writers without racing real pids.
pub trait ProcessProbe {
    fn is_alive(&self, pid: u32) -> bool;
}

/// The real probe: signal 0 via `kill(2)`. `EPERM` means the process exists
/// but belongs to someone else, which still counts as alive.
pub struct SystemProcesses;

impl ProcessProbe for SystemProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        let Ok(pid) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

pub fn path_for(session_dir: &Path) -> PathBuf {
    session_dir.join(LOCK_FILE_NAME)
}

pub fn is_locked(session_dir: &Path) -> bool {
    path_for(session_dir).exists()
}

/// Writes this process's lock into `session_dir` atomically (tmp + rename).
pub fn create(session_dir: &Path, now: jiff::Timestamp) -> Result<(), Error> {
    std::fs::create_dir_all(session_dir)
        .map_err(|e| err!(Unknown, msg("unable to create {}", session_dir.display()), source(e)))?;
    let info = LockInfo {
        pid: std::process::id(),
        ts: now,
    };
    let bytes = serde_json::to_vec(&info).map_err(|e| err!(Internal, source(e)))?;
    let path = path_for(session_dir);
    let tmp = session_dir.join("session.lock.tmp");
    std::fs::write(&tmp, &bytes)
        .map_err(|e| err!(Unknown, msg("unable to write {}", tmp.display()), source(e)))?;
    std::fs::rename(&tmp, &path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        err!(Unknown, msg("unable to place {}", path.display()), source(e))
    })?;
    Ok(())
}

/// Best-effort removal; a missing lock is fine.
pub fn remove(session_dir: &Path) {
    let path = path_for(session_dir);
    if let Err(e) = std::fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("unable to remove session lock {}: {e}", path.display());
        }
    }
}

/// Reads the lock, or `None` if it's absent or unparseable.
pub fn read(session_dir: &Path) -> Option<LockInfo> {
    let bytes = std::fs::read(path_for(session_dir)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// The stale predicate: unreadable lock, dead pid, or too old. The timestamp
/// wins over a live pid.
pub fn is_stale(
    session_dir: &Path,
    probe: &dyn ProcessProbe,
    now: jiff::Timestamp,
    stale_after: Duration,
) -> bool {
    let Some(info) = read(session_dir) else {
        return true;
    };
    if !probe.is_alive(info.pid) {
        return true;
    }
    let age_ms = now.as_millisecond() - info.ts.as_millisecond();
    age_ms > stale_after.as_millis() as i64
}

/// Walks `images/<day>/<session>` under `images_root` and removes stale
/// locks. Returns how many were removed.
pub fn sweep_stale(
    images_root: &Path,
    probe: &dyn ProcessProbe,
    now: jiff::Timestamp,
    stale_after: Duration,
) -> usize {
    let mut removed = 0;
    let Ok(days) = std::fs::read_dir(images_root) else {
        return 0;
    };
    for day in days.flatten() {
        let day_path = day.path();
        if !day_path.is_dir() {
            continue;
        }
        let Ok(sessions) = std::fs::read_dir(&day_path) else {
            continue;
        };
        for session in sessions.flatten() {
            let session_path = session.path();
            if !session_path.is_dir() || !is_locked(&session_path) {
                continue;
            }
            if is_stale(&session_path, probe, now, stale_after) {
                warn!(
                    "removing stale lock: {}",
                    path_for(&session_path).display()
                );
                remove(&session_path);
                removed += 1;
            } else {
                debug!("leaving live lock: {}", path_for(&session_path).display());
            }
        }
    }
    removed
}
