// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Configuration: a YAML file, loaded once at startup.
//!
//! A missing or invalid file is fatal; every other piece of the system
//! assumes a validated `Config`.

use base::{bail, err, Error};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = ".config.yml";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppSection,
    pub paths: PathsSection,
    #[serde(default)]
    pub capture: CaptureSection,
    #[serde(default)]
    pub video: VideoSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub local_retention: RetentionSection,
    #[serde(default)]
    pub client: ClientSection,
}

#[derive(Debug, Deserialize)]
pub struct AppSection {
    #[serde(default = "d_app_name")]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PathsSection {
    pub base_dir: PathBuf,
    pub backup_base_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct CaptureSection {
    /// Seconds between screen samples.
    #[serde(default = "d_interval")]
    pub interval: f64,
    #[serde(default = "d_webp_quality")]
    pub webp_quality: u8,
    /// Difference-hash edge length; the hash carries `hash_size²` bits.
    #[serde(default = "d_hash_size")]
    pub hash_size: u32,
    #[serde(default = "d_hamming_threshold")]
    pub hamming_threshold: u32,
    #[serde(default = "d_persistence_frames")]
    pub persistence_frames: u32,
    /// Edge length of the downsized frames compared for changed area.
    #[serde(default = "d_area_small_pxl")]
    pub area_small_pxl: u32,
    #[serde(default = "d_area_frac_threshold")]
    pub area_frac_threshold: f64,
    /// TrueType font for the timestamp stamp; frames are written without a
    /// stamp when absent or unloadable.
    #[serde(default)]
    pub stamp_font: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct VideoSection {
    #[serde(default = "d_ffmpeg")]
    pub ffmpeg: PathBuf,
    /// Defaults to `ffprobe` next to `ffmpeg`.
    #[serde(default)]
    pub ffprobe: Option<PathBuf>,
    /// Images per second in detailed session videos.
    #[serde(default = "d_fps")]
    pub fps: u32,
    #[serde(default = "d_summary_fps")]
    pub summary_video_fps: u32,
}

#[derive(Debug, Deserialize)]
pub struct SessionSection {
    #[serde(default = "d_session_minutes")]
    pub minutes: u32,
    /// Seconds of user inactivity before the backlog sweep may run.
    #[serde(default = "d_idle_threshold")]
    pub idle_threshold: f64,
    #[serde(default = "d_lock_stale_minutes")]
    pub lock_stale_minutes: u64,
}

#[derive(Debug, Deserialize)]
pub struct RetentionSection {
    #[serde(default = "d_retention_days")]
    pub days: u32,
    #[serde(default = "d_backup_freq_hrs")]
    pub backup_freq_hrs: f64,
}

/// Consumed by the HTTP query layer, which lives outside this process's core;
/// carried here so one file configures everything.
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "d_client_port")]
    pub port: u16,
    #[serde(default = "d_timeline_limit")]
    pub timeline_limit: u32,
}

fn d_app_name() -> String {
    "pyrecall".to_owned()
}
fn d_interval() -> f64 {
    2.0
}
fn d_webp_quality() -> u8 {
    70
}
fn d_hash_size() -> u32 {
    8
}
fn d_hamming_threshold() -> u32 {
    6
}
fn d_persistence_frames() -> u32 {
    4
}
fn d_area_small_pxl() -> u32 {
    64
}
fn d_area_frac_threshold() -> f64 {
    0.05
}
fn d_ffmpeg() -> PathBuf {
    "ffmpeg".into()
}
fn d_fps() -> u32 {
    2
}
fn d_summary_fps() -> u32 {
    16
}
fn d_session_minutes() -> u32 {
    30
}
fn d_idle_threshold() -> f64 {
    120.0
}
fn d_lock_stale_minutes() -> u64 {
    10
}
fn d_retention_days() -> u32 {
    7
}
fn d_backup_freq_hrs() -> f64 {
    3.0
}
fn d_client_port() -> u16 {
    8776
}
fn d_timeline_limit() -> u32 {
    500
}

impl Default for AppSection {
    fn default() -> Self {
        Self { name: d_app_name() }
    }
}
impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            interval: d_interval(),
            webp_quality: d_webp_quality(),
            hash_size: d_hash_size(),
            hamming_threshold: d_hamming_threshold(),
            persistence_frames: d_persistence_frames(),
            area_small_pxl: d_area_small_pxl(),
            area_frac_threshold: d_area_frac_threshold(),
            stamp_font: None,
        }
    }
}
impl Default for VideoSection {
    fn default() -> Self {
        Self {
            ffmpeg: d_ffmpeg(),
            ffprobe: None,
            fps: d_fps(),
            summary_video_fps: d_summary_fps(),
        }
    }
}
impl Default for SessionSection {
    fn default() -> Self {
        Self {
            minutes: d_session_minutes(),
            idle_threshold: d_idle_threshold(),
            lock_stale_minutes: d_lock_stale_minutes(),
        }
    }
}
impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            days: d_retention_days(),
            backup_freq_hrs: d_backup_freq_hrs(),
        }
    }
}
impl Default for ClientSection {
    fn default() -> Self {
        Self {
            port: d_client_port(),
            timeline_limit: d_timeline_limit(),
        }
    }
}

impl Config {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs_f64(self.capture.interval)
    }

    pub fn lock_stale(&self) -> Duration {
        Duration::from_secs(self.session.lock_stale_minutes * 60)
    }

    pub fn backup_period(&self) -> Duration {
        Duration::from_secs_f64(self.local_retention.backup_freq_hrs * 3600.0)
    }

    pub fn ffprobe(&self) -> PathBuf {
        if let Some(p) = &self.video.ffprobe {
            return p.clone();
        }
        match self.video.ffmpeg.parent() {
            Some(dir) if dir != Path::new("") => dir.join("ffprobe"),
            _ => "ffprobe".into(),
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if !(self.capture.interval > 0.0) {
            bail!(InvalidArgument, msg("capture.interval must be positive"));
        }
        if self.capture.webp_quality > 100 {
            bail!(InvalidArgument, msg("capture.webp_quality must be 0-100"));
        }
        if self.capture.hash_size < 2 {
            bail!(InvalidArgument, msg("capture.hash_size must be at least 2"));
        }
        if self.capture.area_small_pxl < 8 {
            bail!(
                InvalidArgument,
                msg("capture.area_small_pxl must be at least 8")
            );
        }
        if !(self.capture.area_frac_threshold > 0.0 && self.capture.area_frac_threshold <= 1.0) {
            bail!(
                InvalidArgument,
                msg("capture.area_frac_threshold must be in (0, 1]")
            );
        }
        if self.video.fps == 0 || self.video.summary_video_fps == 0 {
            bail!(InvalidArgument, msg("video rates must be positive"));
        }
        if self.session.minutes == 0 {
            bail!(InvalidArgument, msg("session.minutes must be positive"));
        }
        if self.local_retention.days == 0 {
            bail!(InvalidArgument, msg("local_retention.days must be positive"));
        }
        if !(self.local_retention.backup_freq_hrs > 0.0) {
            bail!(
                InvalidArgument,
                msg("local_retention.backup_freq_hrs must be positive")
            );
        }
        Ok(())
    }
}

pub fn load(path: &Path) -> Result<Config, Error> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        err!(
            NotFound,
            msg("unable to read config {}", path.display()),
            source(e)
        )
    })?;
    parse(&text)
}

fn parse(text: &str) -> Result<Config, Error> {
    let config: Config =
        serde_yaml::from_str(text).map_err(|e| err!(InvalidArgument, source(e)))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
pub(crate) fn load_str_for_tests(text: &str) -> Config {
    parse(text).unwrap()
}
