// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

pub mod clock;
mod error;
pub mod shutdown;
pub mod strutil;
pub mod tracing_setup;

pub use crate::error::{Error, ErrorKind, ResultExt};

/// [`std::sync::Mutex`] wrapper which always panics on poison.
#[derive(Default)]
pub struct Mutex<T>(std::sync::Mutex<T>);

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self(std::sync::Mutex::new(value))
    }

    #[track_caller]
    pub fn lock(&self) -> std::sync::MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(|_| panic!("mutex poisoned"))
    }
}

/// [`std::sync::Condvar`] wrapper which always panics on poison.
#[derive(Default)]
pub struct Condvar(std::sync::Condvar);

impl Condvar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_all(&self) {
        self.0.notify_all()
    }

    #[track_caller]
    pub fn wait_timeout_while<'a, T, F: FnMut(&mut T) -> bool>(
        &self,
        guard: std::sync::MutexGuard<'a, T>,
        dur: std::time::Duration,
        condition: F,
    ) -> (std::sync::MutexGuard<'a, T>, std::sync::WaitTimeoutResult) {
        self.0
            .wait_timeout_while(guard, dur, condition)
            .unwrap_or_else(|_| panic!("mutex poisoned"))
    }
}
