// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The human-readable stamp composited onto saved frames, and the lossy
//! encoding of the result.

use ab_glyph::{FontVec, PxScale};
use base::{err, Error};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::path::Path;
use tracing::{debug, warn};

const FONT_PX: f32 = 16.0;
const MARGIN: i32 = 8;
const PADDING: i32 = 10;

/// Fraction of original brightness kept under the stamp strip.
const STRIP_KEEP: u16 = 89; // of 255, ~35%

pub struct Stamper {
    font: Option<FontVec>,
    quality: f32,
}

impl Stamper {
    /// Loads the stamp font, if configured. A missing or unparseable font
    /// downgrades to stampless frames rather than failing capture.
    pub fn new(font_path: Option<&Path>, quality: u8) -> Self {
        let font = font_path.and_then(|p| match std::fs::read(p) {
            Ok(bytes) => match FontVec::try_from_vec(bytes) {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!("ignoring unparseable stamp font {}: {e}", p.display());
                    None
                }
            },
            Err(e) => {
                warn!("ignoring unreadable stamp font {}: {e}", p.display());
                None
            }
        });
        if font.is_none() {
            debug!("no stamp font; frames will be saved without an overlay");
        }
        Stamper {
            font,
            quality: f32::from(quality),
        }
    }

    /// Draws `text` centered on a dimmed strip along the bottom of `frame`.
    pub fn annotate(&self, frame: &mut RgbImage, text: &str) {
        let Some(font) = &self.font else { return };
        let scale = PxScale::from(FONT_PX);
        let (tw, th) = text_size(scale, font, text);
        let (tw, th) = (tw as i32, th as i32);
        let (w, h) = (frame.width() as i32, frame.height() as i32);
        let x = ((w - tw) / 2).max(MARGIN);
        let y = (h - th - MARGIN).max(0);

        let strip_top = (y - PADDING).max(0);
        for sy in strip_top..h {
            for sx in 0..w {
                let p = frame.get_pixel_mut(sx as u32, sy as u32);
                for c in p.0.iter_mut() {
                    *c = (u16::from(*c) * STRIP_KEEP / 255) as u8;
                }
            }
        }
        draw_text_mut(frame, Rgb([255, 255, 255]), x, y, scale, font, text);
    }

    /// Encodes `frame` as lossy WebP at the configured quality and writes it
    /// to `path`. No file is left behind on failure.
    pub fn write(&self, frame: &RgbImage, path: &Path) -> Result<(), Error> {
        let encoded =
            webp::Encoder::from_rgb(frame.as_raw(), frame.width(), frame.height())
                .encode(self.quality);
        std::fs::write(path, &*encoded).map_err(|e| {
            err!(
                Unknown,
                msg("unable to write frame {}", path.display()),
                source(e)
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stampless_annotate_is_identity() {
        let stamper = Stamper::new(None, 70);
        let mut frame = RgbImage::from_pixel(32, 32, Rgb([10, 20, 30]));
        let before = frame.clone();
        stamper.annotate(&mut frame, "app | title | 2025-01-10 10:00:00");
        assert_eq!(frame, before);
    }

    #[test]
    fn missing_font_downgrades() {
        let stamper = Stamper::new(Some(Path::new("/no/such/font.ttf")), 70);
        assert!(stamper.font.is_none());
    }

    #[test]
    fn write_produces_webp() {
        let tmpdir = tempfile::tempdir().unwrap();
        let path = tmpdir.path().join("frame.webp");
        let frame = RgbImage::from_pixel(64, 48, Rgb([200, 50, 50]));
        Stamper::new(None, 70).write(&frame, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
    }
}
