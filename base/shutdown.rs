// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Tools for propagating a graceful shutdown signal through the program.
//!
//! The receiver can be cloned, checked cheaply between work items, and
//! blocked on with a timeout in place of a plain sleep.

use crate::Condvar;
use crate::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct ShutdownError;

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("shutdown requested")
    }
}

impl std::error::Error for ShutdownError {}

struct Inner {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

pub struct Sender(Arc<Inner>);

impl Drop for Sender {
    fn drop(&mut self) {
        // Note sequencing: modify the lock state, then notify waiters.
        // The opposite order would create a race in which something might never wake.
        *self.0.stopped.lock() = true;
        self.0.condvar.notify_all();
    }
}

#[derive(Clone)]
pub struct Receiver(Arc<Inner>);

impl Receiver {
    pub fn check(&self) -> Result<(), ShutdownError> {
        if *self.0.stopped.lock() {
            Err(ShutdownError)
        } else {
            Ok(())
        }
    }

    /// Sleeps for up to `timeout`, waking early on shutdown.
    ///
    /// Returns `Ok(())` if the full timeout elapsed, `Err(ShutdownError)` if
    /// shutdown was requested before or during the wait.
    pub fn wait_for(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let l = self.0.stopped.lock();
        let result = self
            .0
            .condvar
            .wait_timeout_while(l, timeout, |stopped| !*stopped);
        if result.1.timed_out() {
            Ok(())
        } else {
            Err(ShutdownError)
        }
    }
}

/// Returns a sender and receiver for graceful shutdown.
///
/// Dropping the sender will request shutdown.
pub fn channel() -> (Sender, Receiver) {
    let inner = Arc::new(Inner {
        stopped: Mutex::new(false),
        condvar: Condvar::new(),
    });
    (Sender(inner.clone()), Receiver(inner))
}

#[cfg(test)]
mod tests {
    #[test]
    fn simple_check() {
        let (tx, rx) = super::channel();
        rx.check().unwrap();
        drop(tx);
        rx.check().unwrap_err();
    }

    #[test]
    fn blocking() {
        let (tx, rx) = super::channel();
        rx.wait_for(std::time::Duration::from_secs(0)).unwrap();
        let h = std::thread::spawn(move || {
            rx.wait_for(std::time::Duration::from_secs(1000))
                .unwrap_err()
        });

        // Make it likely that rx has done its initial check and is waiting on the Condvar.
        std::thread::sleep(std::time::Duration::from_millis(10));

        drop(tx);
        h.join().unwrap();
    }
}
