// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Shelling out to ffmpeg/ffprobe.
//!
//! The core issues command lines and interprets exit status; it does not
//! implement encoding. Each invocation is a short-lived child whose output
//! is drained and surfaced on failure. Every transient file (sequence
//! staging dir, concat list) is owned by `tempfile` and removed on every
//! exit path.

use crate::config::Config;
use base::{bail, err, Error};
use itertools::Itertools as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

const IMAGE_EXTS: [&str; 4] = ["webp", "png", "jpg", "jpeg"];

/// How much child stderr to carry into an error message.
const STDERR_LIMIT: usize = 2000;

pub struct Encoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    session_fps: u32,
    summary_fps: u32,
}

impl Encoder {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ffmpeg: config.video.ffmpeg.clone(),
            ffprobe: config.ffprobe(),
            session_fps: config.video.fps,
            summary_fps: config.video.summary_video_fps,
        }
    }

    /// Cheap startup probe so a missing binary is reported once, loudly,
    /// instead of once per job.
    pub fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Builds one detailed video from the session folder's images, in
    /// lexicographic order (filenames carry a fixed-width timestamp, so
    /// lexicographic is chronological). Returns the number of images used.
    pub fn encode_session_video(&self, images_dir: &Path, out: &Path) -> Result<usize, Error> {
        let images = list_by_extension(images_dir, &IMAGE_EXTS)?;
        if images.is_empty() {
            bail!(NotFound, msg("no images in {}", images_dir.display()));
        }
        ensure_parent(out)?;

        if images.len() == 1 {
            // Single frame: loop it so the video still has a duration.
            let per_image = 1.0 / f64::from(self.session_fps);
            let mut cmd = Command::new(&self.ffmpeg);
            cmd.arg("-y")
                .arg("-loop")
                .arg("1")
                .arg("-i")
                .arg(images_dir.join(&images[0]))
                .arg("-t")
                .arg(format!("{per_image:.6}"))
                .args(["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p"])
                .arg(out);
            self.run(cmd, "single-image session video")?;
            return Ok(1);
        }

        // ffmpeg's image2 demuxer wants a %06d pattern; stage the ordered
        // set as numbered hardlinks (copies on filesystems without links).
        let staging = tempfile::Builder::new()
            .prefix(".seq-")
            .tempdir_in(out.parent().unwrap_or(Path::new(".")))
            .map_err(|e| err!(Unknown, msg("unable to create staging dir"), source(e)))?;
        let pattern = stage_sequence(images_dir, &images, staging.path())?;

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y")
            .arg("-framerate")
            .arg(self.session_fps.to_string())
            .arg("-i")
            .arg(&pattern)
            .args(["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p"])
            .arg(out);
        self.run(cmd, "session video")?;
        Ok(images.len())
    }

    /// Builds the day summary by concatenating the day's detailed videos and
    /// speeding them up to the summary rate. Returns the number of videos.
    pub fn encode_day_summary(&self, detailed_day_dir: &Path, out: &Path) -> Result<usize, Error> {
        let videos = list_by_extension(detailed_day_dir, &["mp4"])?;
        if videos.is_empty() {
            bail!(
                NotFound,
                msg("no detailed videos in {}", detailed_day_dir.display())
            );
        }
        ensure_parent(out)?;

        let detailed_fps = match self.probe_avg_frame_rate(&detailed_day_dir.join(&videos[0])) {
            Ok(fps) if fps > 0.0 => fps,
            Ok(fps) => {
                warn!("ffprobe reported rate {fps}; falling back to session rate");
                f64::from(self.session_fps)
            }
            Err(e) => {
                warn!(err = %e.chain(), "ffprobe failed; falling back to session rate");
                f64::from(self.session_fps)
            }
        };
        // Never slow the day down.
        let speed = (f64::from(self.summary_fps) / detailed_fps).max(1.0);
        debug!(
            "summary: detailed_fps={detailed_fps:.3} summary_fps={} speed={speed:.3}",
            self.summary_fps
        );

        let mut list = tempfile::Builder::new()
            .prefix(".concat-")
            .suffix(".ffconcat")
            .tempfile_in(detailed_day_dir)
            .map_err(|e| err!(Unknown, msg("unable to create concat list"), source(e)))?;
        for name in &videos {
            list.write_all(ffconcat_line(&detailed_day_dir.join(name)).as_bytes())
                .map_err(|e| err!(Unknown, msg("unable to write concat list"), source(e)))?;
        }
        list.flush()
            .map_err(|e| err!(Unknown, msg("unable to write concat list"), source(e)))?;

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y")
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(list.path())
            .arg("-filter:v")
            .arg(format!("setpts=PTS/{speed:.6}"))
            .arg("-r")
            .arg(self.summary_fps.to_string())
            .arg("-an")
            .arg(out);
        self.run(cmd, "day summary")?;
        Ok(videos.len())
    }

    /// `avg_frame_rate` of the first video stream, as reported by ffprobe.
    pub fn probe_avg_frame_rate(&self, input: &Path) -> Result<f64, Error> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=avg_frame_rate",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input)
            .output()
            .map_err(|e| {
                err!(
                    Unavailable,
                    msg("unable to run {}", self.ffprobe.display()),
                    source(e)
                )
            })?;
        if !output.status.success() {
            bail!(
                Unknown,
                msg(
                    "{} failed on {}: {}",
                    self.ffprobe.display(),
                    input.display(),
                    trimmed_stderr(&output.stderr)
                )
            );
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().next().unwrap_or_default().trim();
        parse_frame_rate(line)
            .ok_or_else(|| err!(Unknown, msg("unparseable avg_frame_rate {line:?}")))
    }

    fn run(&self, mut cmd: Command, what: &str) -> Result<(), Error> {
        debug!("running {cmd:?}");
        let output = cmd.output().map_err(|e| {
            err!(
                Unavailable,
                msg("unable to run {}", self.ffmpeg.display()),
                source(e)
            )
        })?;
        if !output.status.success() {
            bail!(
                Unknown,
                msg(
                    "{what}: {} exited with {}: {}",
                    self.ffmpeg.display(),
                    output.status,
                    trimmed_stderr(&output.stderr)
                )
            );
        }
        Ok(())
    }
}

/// Files in `dir` with one of the given extensions (case-insensitive),
/// sorted by name.
fn list_by_extension(dir: &Path, exts: &[&str]) -> Result<Vec<String>, Error> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| err!(Unknown, msg("unable to list {}", dir.display()), source(e)))?;
    Ok(entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| {
            Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| exts.iter().any(|want| e.eq_ignore_ascii_case(want)))
        })
        .sorted()
        .collect())
}

/// Hardlinks (or copies) the ordered images into `staging` as
/// `000001.<ext>`..., returning the `%06d` input pattern.
fn stage_sequence(images_dir: &Path, images: &[String], staging: &Path) -> Result<PathBuf, Error> {
    let ext = Path::new(&images[0])
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("webp")
        .to_ascii_lowercase();
    for (i, name) in images.iter().enumerate() {
        let src = images_dir.join(name);
        let dst = staging.join(format!("{:06}.{ext}", i + 1));
        if std::fs::hard_link(&src, &dst).is_err() {
            std::fs::copy(&src, &dst).map_err(|e| {
                err!(
                    Unknown,
                    msg("unable to stage {}", src.display()),
                    source(e)
                )
            })?;
        }
    }
    Ok(staging.join(format!("%06d.{ext}")))
}

fn ensure_parent(out: &Path) -> Result<(), Error> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            err!(
                Unknown,
                msg("unable to create {}", parent.display()),
                source(e)
            )
        })?;
    }
    Ok(())
}

/// Parses ffprobe's `avg_frame_rate`: either `num/den` or a bare float.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }
    s.parse().ok()
}

/// One `file '...'` line for the concat demuxer, single quotes escaped.
fn ffconcat_line(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\'', r"\'");
    format!("file '{escaped}'\n")
}

fn trimmed_stderr(stderr: &[u8]) -> String {
    let s = String::from_utf8_lossy(stderr);
    let s = s.trim_end();
    if s.len() <= STDERR_LIMIT {
        return s.to_owned();
    }
    let mut cut = s.len() - STDERR_LIMIT;
    while !s.is_char_boundary(cut) {
        cut += 1;
    }
    format!("...{}", &s[cut..])
}
