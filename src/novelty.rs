// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Perceptual-change gating: decides which sampled frames are worth keeping.
//!
//! The gate combines a difference hash (structure), a changed-area fraction
//! (magnitude), and a persistence counter (slow drift the Hamming gate alone
//! misses). Between two kept frames in one session, either the window
//! identity changed, the Hamming distance cleared the threshold with enough
//! changed area, or the persistence counter ran out.

use image::{imageops, GrayImage, RgbImage};

/// Luminance delta above which a downsized pixel counts as changed.
const LUMA_DELTA: u8 = 15;

#[derive(Clone, Copy, Debug)]
pub struct NoveltyConfig {
    pub hash_size: u32,
    pub hamming_threshold: u32,
    pub persistence_frames: u32,
    pub area_small: u32,
    pub area_frac_threshold: f64,
}

/// A difference hash: `hash_size²` bits from comparing adjacent columns of a
/// small grayscale rescale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dhash(Box<[u8]>);

impl Dhash {
    pub fn of(gray: &GrayImage, hash_size: u32) -> Self {
        let small = imageops::resize(
            gray,
            hash_size + 1,
            hash_size,
            imageops::FilterType::Triangle,
        );
        let nbits = (hash_size * hash_size) as usize;
        let mut packed = vec![0u8; nbits.div_ceil(8)];
        let mut i = 0;
        for y in 0..hash_size {
            for x in 0..hash_size {
                if small.get_pixel(x + 1, y).0[0] > small.get_pixel(x, y).0[0] {
                    packed[i / 8] |= 1 << (i % 8);
                }
                i += 1;
            }
        }
        Dhash(packed.into_boxed_slice())
    }

    /// Hamming distance; differently-sized hashes are maximally distant.
    pub fn distance(&self, other: &Dhash) -> u32 {
        if self.0.len() != other.0.len() {
            return u32::MAX;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Fraction of pixels whose luminance moved by more than [`LUMA_DELTA`],
/// measured on `small × small` rescales of both frames.
pub fn changed_area_fraction(a: &GrayImage, b: &GrayImage, small: u32) -> f64 {
    let a = imageops::resize(a, small, small, imageops::FilterType::Triangle);
    let b = imageops::resize(b, small, small, imageops::FilterType::Triangle);
    let total = (small * small) as f64;
    if total == 0.0 {
        return 0.0;
    }
    let changed = a
        .pixels()
        .zip(b.pixels())
        .filter(|(pa, pb)| pa.0[0].abs_diff(pb.0[0]) > LUMA_DELTA)
        .count();
    changed as f64 / total
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SaveReason {
    FirstFrame,
    WindowChanged,
    Changed,
    Persistence,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Save(SaveReason),
    Skip,
}

/// Trailing state of the novelty gate. One per capture loop; never global.
#[derive(Default)]
pub struct CaptureState {
    last_hash: Option<Dhash>,
    last_frame: Option<GrayImage>,
    consecutive_diff: u32,
    last_window: Option<(String, String)>,
}

impl CaptureState {
    /// Judges one sampled frame and rolls the trailing state forward.
    pub fn observe(
        &mut self,
        frame: &RgbImage,
        window: &(String, String),
        config: &NoveltyConfig,
    ) -> Verdict {
        let gray = imageops::grayscale(frame);
        let hash = Dhash::of(&gray, config.hash_size);
        let verdict = self.decide(&gray, &hash, window, config);
        if matches!(verdict, Verdict::Save(_)) {
            self.consecutive_diff = 0;
        }
        self.last_hash = Some(hash);
        self.last_frame = Some(gray);
        self.last_window = Some(window.clone());
        verdict
    }

    fn decide(
        &mut self,
        gray: &GrayImage,
        hash: &Dhash,
        window: &(String, String),
        config: &NoveltyConfig,
    ) -> Verdict {
        let (Some(last_hash), Some(last_frame), Some(last_window)) =
            (&self.last_hash, &self.last_frame, &self.last_window)
        else {
            return Verdict::Save(SaveReason::FirstFrame);
        };
        if window != last_window {
            return Verdict::Save(SaveReason::WindowChanged);
        }
        let distance = hash.distance(last_hash);
        if distance >= config.hamming_threshold {
            if changed_area_fraction(last_frame, gray, config.area_small)
                >= config.area_frac_threshold
            {
                return Verdict::Save(SaveReason::Changed);
            }
            self.consecutive_diff = 0;
        } else if distance > config.hamming_threshold / 2
            && changed_area_fraction(last_frame, gray, config.area_small)
                >= config.area_frac_threshold
        {
            self.consecutive_diff += 1;
        } else {
            self.consecutive_diff = 0;
        }
        if self.consecutive_diff >= config.persistence_frames {
            return Verdict::Save(SaveReason::Persistence);
        }
        Verdict::Skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn config() -> NoveltyConfig {
        NoveltyConfig {
            hash_size: 8,
            hamming_threshold: 6,
            persistence_frames: 4,
            area_small: 8,
            area_frac_threshold: 0.05,
        }
    }

    fn window() -> (String, String) {
        ("main.rs — editor".to_owned(), "editor".to_owned())
    }

    /// A 9×8 frame: with `hash_size` 8 the dhash rescale is the identity, so
    /// pixel patterns control the hash bits directly.
    fn solid(l: u8) -> RgbImage {
        RgbImage::from_pixel(9, 8, Rgb([l, l, l]))
    }

    /// All black except column 1 set to white in the first `rows` rows.
    /// Relative to `solid(0)` this flips exactly `rows` hash bits.
    fn col1_white(rows: u32) -> RgbImage {
        let mut img = solid(0);
        for y in 0..rows {
            img.put_pixel(1, y, Rgb([255, 255, 255]));
        }
        img
    }

    /// Left half black, right half white: one high-contrast edge, about half
    /// the area changed versus `solid(0)`.
    fn half_white() -> RgbImage {
        let mut img = solid(0);
        for y in 0..8 {
            for x in 5..9 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        img
    }

    #[test]
    fn dhash_bit_count() {
        let gray = imageops::grayscale(&col1_white(8));
        let base = imageops::grayscale(&solid(0));
        let a = Dhash::of(&gray, 8);
        let b = Dhash::of(&base, 8);
        assert_eq!(a.distance(&b), 8);
        assert_eq!(a.distance(&a), 0);
    }

    #[test]
    fn area_fraction_bounds() {
        let black = imageops::grayscale(&solid(0));
        let white = imageops::grayscale(&solid(255));
        assert_eq!(changed_area_fraction(&black, &black, 8), 0.0);
        assert_eq!(changed_area_fraction(&black, &white, 8), 1.0);
        let half = imageops::grayscale(&half_white());
        let frac = changed_area_fraction(&black, &half, 8);
        assert!(frac > 0.3 && frac < 0.7, "frac = {frac}");
    }

    #[test]
    fn first_frame_always_saves() {
        let mut state = CaptureState::default();
        let v = state.observe(&solid(0), &window(), &config());
        assert_eq!(v, Verdict::Save(SaveReason::FirstFrame));
    }

    #[test]
    fn duplicate_frames_save_once() {
        // 600 identical grabs with unchanged window identity: exactly one save.
        let mut state = CaptureState::default();
        let frame = solid(40);
        let mut saves = 0;
        for _ in 0..600 {
            if matches!(
                state.observe(&frame, &window(), &config()),
                Verdict::Save(_)
            ) {
                saves += 1;
            }
        }
        assert_eq!(saves, 1);
    }

    #[test]
    fn window_change_saves() {
        let mut state = CaptureState::default();
        let frame = solid(40);
        state.observe(&frame, &window(), &config());
        let other = ("inbox — mail".to_owned(), "mail".to_owned());
        assert_eq!(
            state.observe(&frame, &other, &config()),
            Verdict::Save(SaveReason::WindowChanged)
        );
    }

    #[test]
    fn large_change_saves() {
        let mut state = CaptureState::default();
        state.observe(&solid(0), &window(), &config());
        assert_eq!(
            state.observe(&half_white(), &window(), &config()),
            Verdict::Save(SaveReason::Changed)
        );
    }

    #[test]
    fn large_distance_with_small_area_resets() {
        // Distance clears the threshold but the changed area doesn't: skip,
        // and the persistence counter goes back to zero.
        let mut config = config();
        config.area_frac_threshold = 0.9;
        let mut state = CaptureState::default();
        state.observe(&solid(0), &window(), &config);
        state.consecutive_diff = 3;
        assert_eq!(
            state.observe(&col1_white(8), &window(), &config),
            Verdict::Skip
        );
        assert_eq!(state.consecutive_diff, 0);
    }

    #[test]
    fn persistence_counter_catches_drift() {
        // Alternating frames 4 hash bits apart: in the (threshold/2,
        // threshold) band with enough area, so each tick increments the
        // counter until it trips.
        let config = config();
        let a = solid(0);
        let b = col1_white(4);
        let mut state = CaptureState::default();
        assert_eq!(
            state.observe(&a, &window(), &config),
            Verdict::Save(SaveReason::FirstFrame)
        );
        assert_eq!(state.observe(&b, &window(), &config), Verdict::Skip);
        assert_eq!(state.observe(&a, &window(), &config), Verdict::Skip);
        assert_eq!(state.observe(&b, &window(), &config), Verdict::Skip);
        assert_eq!(
            state.observe(&a, &window(), &config),
            Verdict::Save(SaveReason::Persistence)
        );
        // The save reset the counter.
        assert_eq!(state.consecutive_diff, 0);
    }
}
