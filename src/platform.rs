// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! OS integration points for the capture engine.
//!
//! The capture loop only needs three things from the platform: the current
//! frame, the identity of the foreground window, and how long the user has
//! been idle. They're bundled into one trait so tests can drive the loop
//! with synthetic frames.

use base::{err, Error};
use image::RgbImage;

pub trait Desktop: Send + 'static {
    /// Grabs the primary display as an RGB frame.
    fn grab_frame(&mut self) -> Result<RgbImage, Error>;

    /// Returns `(window_title, app_name)` for the foreground window, or
    /// empty strings where the platform offers no answer. Empty identity
    /// disables the window-change save trigger; the hash gate still works.
    fn foreground_window(&mut self) -> (String, String);

    /// Seconds since the last user input, or 0.0 where unsupported.
    /// 0.0 keeps the loop correct but means the idle-gated backlog sweep
    /// never fires.
    fn idle_seconds(&mut self) -> f64;
}

/// The shipped implementation: grabs the primary monitor via `xcap` (behind
/// the `screen-capture` feature, which needs the platform's display
/// libraries at build time).
#[derive(Default)]
pub struct PrimaryDisplay {}

impl Desktop for PrimaryDisplay {
    #[cfg(feature = "screen-capture")]
    fn grab_frame(&mut self) -> Result<RgbImage, Error> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| err!(Unavailable, msg("unable to enumerate monitors"), source(e)))?;
        let monitor = monitors
            .into_iter()
            .reduce(|best, m| if m.is_primary() { m } else { best })
            .ok_or_else(|| err!(Unavailable, msg("no monitors found")))?;
        let raw = monitor
            .capture_image()
            .map_err(|e| err!(Unavailable, msg("screen grab failed"), source(e)))?;
        let (width, height) = (raw.width(), raw.height());
        let rgba = image::RgbaImage::from_raw(width, height, raw.into_raw())
            .ok_or_else(|| err!(Internal, msg("malformed {width}x{height} frame")))?;
        Ok(image::DynamicImage::ImageRgba8(rgba).to_rgb8())
    }

    #[cfg(not(feature = "screen-capture"))]
    fn grab_frame(&mut self) -> Result<RgbImage, Error> {
        Err(err!(
            Unimplemented,
            msg("built without screen-capture support")
        ))
    }

    fn foreground_window(&mut self) -> (String, String) {
        // No portable focused-window API.
        (String::new(), String::new())
    }

    fn idle_seconds(&mut self) -> f64 {
        // No portable last-input API.
        0.0
    }
}
