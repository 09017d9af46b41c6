// This file is part of Memory Lane, a personal screen activity recorder.
// Copyright (C) 2025 The Memory Lane Authors; see LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Manifest-driven incremental mirroring.
//!
//! Each destination folder carries a `.hashes.json` manifest mapping
//! filename to `{size, mtime, hash, last_backup}`. Copying is three-tiered:
//! matching size+mtime short-circuits, a matching SHA-256 refreshes the
//! entry without copying, and only genuinely new content moves bytes
//! (`.part` + atomic rename). Re-running a pass over unchanged trees copies
//! nothing; the manifest's presence also serves as the eviction pass's proof
//! that a folder has been mirrored.

use base::clock::Clocks;
use base::{err, strutil, Error};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write as _};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const MANIFEST_NAME: &str = ".hashes.json";

const HASH_CHUNK: usize = 8192;
const RENAME_ATTEMPTS: u32 = 4;
const OVERWRITE_ATTEMPTS: u32 = 3;
const BACKOFF_START: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub size: u64,
    pub mtime: u64,
    pub hash: String,
    pub last_backup: String,
}

/// Sorted so the serialized manifest is stable across passes.
pub type Manifest = BTreeMap<String, ManifestEntry>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Size and mtime matched the manifest; nothing read.
    Unchanged,
    /// Content hash matched; manifest entry refreshed without copying.
    Refreshed,
    /// Bytes copied.
    Copied,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub copied: usize,
    pub refreshed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub bytes: u64,
}

impl CopyStats {
    pub fn merge(&mut self, other: CopyStats) {
        self.copied += other.copied;
        self.refreshed += other.refreshed;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
        self.bytes += other.bytes;
    }
}

/// Streamed SHA-256 of a file, lowercase hex.
pub fn file_sha256(path: &Path) -> Result<String, Error> {
    let mut f = std::fs::File::open(path)
        .map_err(|e| err!(Unknown, msg("unable to open {}", path.display()), source(e)))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_CHUNK];
    loop {
        let n = f
            .read(&mut buf)
            .map_err(|e| err!(Unknown, msg("unable to read {}", path.display()), source(e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(strutil::hex(&hasher.finalize()))
}

/// Loads a folder's manifest; corrupt or missing manifests start empty
/// (the hash tier re-verifies everything, so this is safe, just slow).
pub fn load_manifest(dir: &Path) -> Manifest {
    let path = dir.join(MANIFEST_NAME);
    match std::fs::read(&path) {
        Err(_) => Manifest::new(),
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!("corrupt manifest {} ({e}); recreating", path.display());
                Manifest::new()
            }
        },
    }
}

pub struct Copier<'a, C: Clocks> {
    pub clocks: &'a C,
}

impl<'a, C: Clocks> Copier<'a, C> {
    /// Copies `src` to `dst` under the three-tier protocol, updating
    /// `manifest` (keyed by `dst`'s basename) in memory. The caller persists
    /// the manifest with [`Copier::save_manifest`].
    pub fn copy_file(
        &self,
        src: &Path,
        dst: &Path,
        manifest: &mut Manifest,
    ) -> Result<CopyOutcome, Error> {
        let meta = std::fs::metadata(src)
            .map_err(|e| err!(Unknown, msg("unable to stat {}", src.display()), source(e)))?;
        let size = meta.len();
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let name = dst
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| err!(InvalidArgument, msg("bad destination {}", dst.display())))?
            .to_owned();

        if let Some(entry) = manifest.get(&name) {
            if entry.size == size && entry.mtime == mtime {
                return Ok(CopyOutcome::Unchanged);
            }
        }

        let hash = file_sha256(src)?;
        let last_backup = self.clocks.realtime().to_string();
        if let Some(entry) = manifest.get_mut(&name) {
            if entry.hash == hash {
                entry.size = size;
                entry.mtime = mtime;
                entry.last_backup = last_backup;
                return Ok(CopyOutcome::Refreshed);
            }
        }

        let part = dst.with_file_name(format!("{name}.part"));
        std::fs::copy(src, &part).map_err(|e| {
            err!(
                Unknown,
                msg("unable to copy {} -> {}", src.display(), part.display()),
                source(e)
            )
        })?;
        std::fs::rename(&part, dst).map_err(|e| {
            let _ = std::fs::remove_file(&part);
            err!(
                Unknown,
                msg("unable to place {}", dst.display()),
                source(e)
            )
        })?;
        manifest.insert(
            name,
            ManifestEntry {
                size,
                mtime,
                hash,
                last_backup,
            },
        );
        Ok(CopyOutcome::Copied)
    }

    /// Mirrors everything inside `src_dir` into `dst_dir`, recursing into
    /// subdirectories (each destination folder keeps its own manifest).
    /// Individual file failures are logged and counted, not propagated.
    pub fn copy_dir_contents(&self, src_dir: &Path, dst_dir: &Path) -> Result<CopyStats, Error> {
        std::fs::create_dir_all(dst_dir).map_err(|e| {
            err!(
                Unknown,
                msg("unable to create {}", dst_dir.display()),
                source(e)
            )
        })?;
        let mut stats = CopyStats::default();
        let mut manifest = load_manifest(dst_dir);
        let mut dirty = false;
        let entries = std::fs::read_dir(src_dir)
            .map_err(|e| err!(Unknown, msg("unable to list {}", src_dir.display()), source(e)))?;
        for entry in entries.flatten() {
            let src = entry.path();
            let name = entry.file_name();
            if src.is_dir() {
                match self.copy_dir_contents(&src, &dst_dir.join(&name)) {
                    Ok(sub) => stats.merge(sub),
                    Err(e) => {
                        warn!(err = %e.chain(), "unable to mirror {}", src.display());
                        stats.failed += 1;
                    }
                }
                continue;
            }
            if name == MANIFEST_NAME {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            match self.copy_file(&src, &dst_dir.join(&name), &mut manifest) {
                Ok(CopyOutcome::Unchanged) => stats.unchanged += 1,
                Ok(CopyOutcome::Refreshed) => {
                    stats.refreshed += 1;
                    dirty = true;
                }
                Ok(CopyOutcome::Copied) => {
                    stats.copied += 1;
                    stats.bytes += size;
                    dirty = true;
                }
                Err(e) => {
                    warn!(err = %e.chain(), "unable to mirror {}", src.display());
                    stats.failed += 1;
                }
            }
        }
        if dirty {
            if let Err(e) = self.save_manifest(dst_dir, &manifest) {
                warn!(err = %e.chain(), "unable to save manifest in {}", dst_dir.display());
                stats.failed += 1;
            }
        }
        Ok(stats)
    }

    /// Persists a manifest atomically: `.part` + fsync + rename. Cloud-sync
    /// tools can transiently lock the destination, so a `PermissionDenied`
    /// rename retries with exponential backoff before falling back to an
    /// in-place overwrite; the parent directory is fsynced last.
    pub fn save_manifest(&self, dir: &Path, manifest: &Manifest) -> Result<(), Error> {
        let bytes =
            serde_json::to_vec_pretty(manifest).map_err(|e| err!(Internal, source(e)))?;
        let path = dir.join(MANIFEST_NAME);
        let part = dir.join(".hashes.json.part");
        {
            let mut f = std::fs::File::create(&part).map_err(|e| {
                err!(Unknown, msg("unable to create {}", part.display()), source(e))
            })?;
            f.write_all(&bytes)
                .map_err(|e| err!(Unknown, msg("unable to write {}", part.display()), source(e)))?;
            f.sync_all()
                .map_err(|e| err!(Unknown, msg("unable to sync {}", part.display()), source(e)))?;
        }

        let mut placed = false;
        let mut delay = BACKOFF_START;
        for attempt in 1..=RENAME_ATTEMPTS {
            match std::fs::rename(&part, &path) {
                Ok(()) => {
                    placed = true;
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    warn!(
                        "manifest rename blocked (attempt {attempt}/{RENAME_ATTEMPTS}): {e}"
                    );
                    self.clocks.sleep(delay);
                    delay *= 2;
                }
                Err(e) => {
                    let _ = std::fs::remove_file(&part);
                    return Err(err!(
                        Unknown,
                        msg("unable to place {}", path.display()),
                        source(e)
                    ));
                }
            }
        }
        if !placed {
            let _ = std::fs::remove_file(&part);
            let mut last_err = None;
            for _ in 0..OVERWRITE_ATTEMPTS {
                match std::fs::write(&path, &bytes) {
                    Ok(()) => {
                        placed = true;
                        break;
                    }
                    Err(e) => {
                        last_err = Some(e);
                        self.clocks.sleep(delay);
                        delay *= 2;
                    }
                }
            }
            if !placed {
                let mut e = err!(
                    PermissionDenied,
                    msg("unable to save manifest {}", path.display())
                );
                if let Some(source) = last_err {
                    e = e.with_source(source);
                }
                return Err(e);
            }
        }
        if let Ok(d) = std::fs::File::open(dir) {
            let _ = d.sync_all();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::clock::SimulatedClocks;

    fn clocks() -> SimulatedClocks {
        SimulatedClocks::new("2025-01-10T10:00:00Z".parse().unwrap())
    }

    #[test]
    fn second_pass_copies_nothing() {
        let clocks = clocks();
        let copier = Copier { clocks: &clocks };
        let tmpdir = tempfile::tempdir().unwrap();
        let src = tmpdir.path().join("src");
        let dst = tmpdir.path().join("dst");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("a.webp"), b"aaaa").unwrap();
        std::fs::write(src.join("b.webp"), b"bbbb").unwrap();
        std::fs::write(src.join("sub").join("c.mp4"), b"cccc").unwrap();

        let first = copier.copy_dir_contents(&src, &dst).unwrap();
        assert_eq!(first.copied, 3);
        assert_eq!(first.bytes, 12);
        assert_eq!(
            std::fs::read(dst.join("sub").join("c.mp4")).unwrap(),
            b"cccc"
        );
        assert!(dst.join(MANIFEST_NAME).is_file());
        assert!(dst.join("sub").join(MANIFEST_NAME).is_file());

        let second = copier.copy_dir_contents(&src, &dst).unwrap();
        assert_eq!(second.copied, 0);
        assert_eq!(second.bytes, 0);
        assert_eq!(second.unchanged, 3);
    }

    #[test]
    fn touched_but_identical_file_is_refreshed() {
        let clocks = clocks();
        let copier = Copier { clocks: &clocks };
        let tmpdir = tempfile::tempdir().unwrap();
        let src = tmpdir.path().join("src");
        let dst = tmpdir.path().join("dst");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.webp"), b"aaaa").unwrap();
        copier.copy_dir_contents(&src, &dst).unwrap();

        // Same content, different mtime: hash tier catches it without a copy.
        filetime::set_file_mtime(
            src.join("a.webp"),
            filetime::FileTime::from_unix_time(1_700_000_000, 0),
        )
        .unwrap();
        let stats = copier.copy_dir_contents(&src, &dst).unwrap();
        assert_eq!(stats.refreshed, 1);
        assert_eq!(stats.copied, 0);

        // And the refreshed mtime short-circuits the next pass.
        let stats = copier.copy_dir_contents(&src, &dst).unwrap();
        assert_eq!(stats.unchanged, 1);
    }

    #[test]
    fn changed_content_is_recopied() {
        let clocks = clocks();
        let copier = Copier { clocks: &clocks };
        let tmpdir = tempfile::tempdir().unwrap();
        let src = tmpdir.path().join("src");
        let dst = tmpdir.path().join("dst");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.webp"), b"old").unwrap();
        copier.copy_dir_contents(&src, &dst).unwrap();

        std::fs::write(src.join("a.webp"), b"newer").unwrap();
        filetime::set_file_mtime(
            src.join("a.webp"),
            filetime::FileTime::from_unix_time(1_700_000_000, 0),
        )
        .unwrap();
        let stats = copier.copy_dir_contents(&src, &dst).unwrap();
        assert_eq!(stats.copied, 1);
        assert_eq!(std::fs::read(dst.join("a.webp")).unwrap(), b"newer");
        let manifest = load_manifest(&dst);
        assert_eq!(manifest["a.webp"].hash, file_sha256(&src.join("a.webp")).unwrap());
    }

    #[test]
    fn manifest_format() {
        let clocks = clocks();
        let copier = Copier { clocks: &clocks };
        let tmpdir = tempfile::tempdir().unwrap();
        let src = tmpdir.path().join("src");
        let dst = tmpdir.path().join("dst");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.webp"), b"aaaa").unwrap();
        copier.copy_dir_contents(&src, &dst).unwrap();

        let raw = std::fs::read_to_string(dst.join(MANIFEST_NAME)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &parsed["a.webp"];
        assert_eq!(entry["size"], 4);
        assert!(entry["mtime"].as_u64().is_some());
        assert_eq!(
            entry["hash"].as_str().unwrap(),
            file_sha256(&src.join("a.webp")).unwrap()
        );
        // RFC 3339 UTC stamp from the (simulated) clock.
        assert_eq!(entry["last_backup"], "2025-01-10T10:00:00Z");
    }

    #[test]
    fn corrupt_manifest_recovers() {
        let clocks = clocks();
        let copier = Copier { clocks: &clocks };
        let tmpdir = tempfile::tempdir().unwrap();
        let src = tmpdir.path().join("src");
        let dst = tmpdir.path().join("dst");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(&dst).unwrap();
        std::fs::write(src.join("a.webp"), b"aaaa").unwrap();
        std::fs::write(dst.join(MANIFEST_NAME), b"{ not json").unwrap();

        let stats = copier.copy_dir_contents(&src, &dst).unwrap();
        assert_eq!(stats.copied, 1);
        assert!(load_manifest(&dst).contains_key("a.webp"));
    }

    #[test]
    fn no_part_files_left_behind() {
        let clocks = clocks();
        let copier = Copier { clocks: &clocks };
        let tmpdir = tempfile::tempdir().unwrap();
        let src = tmpdir.path().join("src");
        let dst = tmpdir.path().join("dst");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.webp"), b"aaaa").unwrap();
        copier.copy_dir_contents(&src, &dst).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(&dst)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }
}
