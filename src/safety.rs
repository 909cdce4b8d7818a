//! Backup, regression guard and atomic replace for the save on disk.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use walkdir::WalkDir;

use crate::config::RetryPolicy;
use crate::error::PatchError;

const BACKUP_DIR: &str = "Backups";
const THUMBNAIL_EXT: &str = "png";
const SWAP_SUFFIX: &str = ".swapbak";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub thumbnail: Option<PathBuf>,
    pub stamp: String,
}

impl BackupEntry {
    /// `YYYY-MM-DD HH:MM:SS` for display, or the raw stamp when it does not parse.
    pub fn display_time(&self) -> String {
        let raw = self.stamp.split('_').take(2).collect::<Vec<_>>().join("_");
        let parsed = PrimitiveDateTime::parse(
            &raw,
            format_description!("[year][month][day]_[hour][minute][second]"),
        );
        match parsed {
            Ok(dt) => dt
                .format(format_description!(
                    "[year]-[month]-[day] [hour]:[minute]:[second]"
                ))
                .unwrap_or_else(|_| self.stamp.clone()),
            Err(_) => self.stamp.clone(),
        }
    }
}

pub fn thumbnail_for(document: &Path) -> PathBuf {
    document.with_extension(THUMBNAIL_EXT)
}

pub fn backup_dir(document: &Path) -> PathBuf {
    document
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(BACKUP_DIR)
}

fn stem_and_ext(document: &Path) -> (String, String) {
    let stem = document
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("save")
        .to_string();
    let ext = document
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("prison")
        .to_string();
    (stem, ext)
}

fn now_stamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))
    .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

fn is_stamp(candidate: &str) -> bool {
    let mut parts = candidate.splitn(3, '_');
    let date = parts.next().unwrap_or("");
    let clock = parts.next().unwrap_or("");
    let counter = parts.next();
    date.len() == 8
        && clock.len() == 6
        && date.chars().chain(clock.chars()).all(|ch| ch.is_ascii_digit())
        && counter.is_none_or(|c| !c.is_empty() && c.chars().all(|ch| ch.is_ascii_digit()))
}

/// Copy the document (and its thumbnail) into the backup directory.
pub fn create_backup(document: &Path) -> Result<BackupEntry> {
    let dir = backup_dir(document);
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let (stem, ext) = stem_and_ext(document);
    let base_stamp = now_stamp();

    let mut attempt = 0usize;
    let (path, stamp) = loop {
        let stamp = if attempt == 0 {
            base_stamp.clone()
        } else {
            format!("{base_stamp}_{attempt}")
        };
        let candidate = dir.join(format!("{stem}-{stamp}.{ext}"));
        if !candidate.exists() {
            break (candidate, stamp);
        }
        attempt += 1;
    };

    fs::copy(document, &path).with_context(|| format!("creating backup {}", path.display()))?;

    let source_thumb = thumbnail_for(document);
    let thumbnail = if source_thumb.is_file() {
        let target = path.with_extension(THUMBNAIL_EXT);
        fs::copy(&source_thumb, &target)
            .with_context(|| format!("copying thumbnail to {}", target.display()))?;
        Some(target)
    } else {
        None
    };

    Ok(BackupEntry {
        path,
        thumbnail,
        stamp,
    })
}

/// Backups of `document`, newest first.
pub fn list_backups(document: &Path) -> Result<Vec<BackupEntry>> {
    let dir = backup_dir(document);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let (stem, ext) = stem_and_ext(document);
    let prefix = format!("{stem}-");
    let suffix = format!(".{ext}");

    let mut entries = Vec::new();
    for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let Some(stamp) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(&suffix))
        else {
            continue;
        };
        if !is_stamp(stamp) {
            continue;
        }
        let stamp = stamp.to_string();
        let path = entry.into_path();
        let thumb = path.with_extension(THUMBNAIL_EXT);
        entries.push(BackupEntry {
            thumbnail: thumb.is_file().then_some(thumb),
            path,
            stamp,
        });
    }
    entries.sort_by(|a, b| sort_key(&b.stamp).cmp(&sort_key(&a.stamp)));
    Ok(entries)
}

fn sort_key(stamp: &str) -> (String, u64) {
    let mut parts = stamp.splitn(3, '_');
    let date = parts.next().unwrap_or("");
    let clock = parts.next().unwrap_or("");
    let counter = parts.next().and_then(|c| c.parse().ok()).unwrap_or(0);
    (format!("{date}{clock}"), counter)
}

/// Delete the oldest backups beyond `retention`. At least one is always kept.
pub fn prune_backups(document: &Path, retention: usize) -> Result<Vec<PathBuf>> {
    prune_backups_except(document, retention, None)
}

/// Like [`prune_backups`], but never deletes `protected`.
fn prune_backups_except(
    document: &Path,
    retention: usize,
    protected: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    let entries = list_backups(document)?;
    let keep = retention.max(1);
    let mut removed = Vec::new();
    for entry in entries.into_iter().skip(keep) {
        if protected == Some(entry.path.as_path()) {
            continue;
        }
        fs::remove_file(&entry.path)
            .with_context(|| format!("removing backup {}", entry.path.display()))?;
        if let Some(thumb) = &entry.thumbnail {
            let _ = fs::remove_file(thumb);
        }
        removed.push(entry.path);
    }
    Ok(removed)
}

/// Refuse enabling output that shrank below 75% of the original.
pub fn guard_regression(
    original_len: usize,
    new_len: usize,
    enabling: bool,
) -> Result<(), PatchError> {
    if enabling && new_len.saturating_mul(4) < original_len.saturating_mul(3) {
        return Err(PatchError::RegressionGuard {
            original_len,
            new_len,
        });
    }
    Ok(())
}

pub fn with_retry<T>(policy: RetryPolicy, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(_) if attempt < attempts => {
                thread::sleep(Duration::from_millis(policy.delay_ms));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    dir.join(format!(
        ".wardenpatch-tmp-{}-{}",
        std::process::id(),
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    ))
}

fn swap_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("wardenpatch_file");
    path.with_file_name(format!("{name}{SWAP_SUFFIX}"))
}

fn write_failure(path: &Path, reason: impl ToString, rollback: impl Into<String>) -> PatchError {
    PatchError::Write {
        path: path.to_path_buf(),
        reason: reason.to_string(),
        rollback: rollback.into(),
    }
}

/// Write `data` to a temp file, then swap it over `path` while a transient
/// copy of the old file is kept. On failure the transient copy is put back.
pub fn write_atomic(path: &Path, data: &[u8], retry: RetryPolicy) -> Result<(), PatchError> {
    write_atomic_with(path, data, retry, |from, to| fs::rename(from, to))
}

/// [`write_atomic`] with the final `temp -> path` replace step supplied by the caller.
fn write_atomic_with(
    path: &Path,
    data: &[u8],
    retry: RetryPolicy,
    mut replace: impl FnMut(&Path, &Path) -> io::Result<()>,
) -> Result<(), PatchError> {
    let temp = temp_sibling(path);
    let written = fs::File::create(&temp).and_then(|mut file| {
        file.write_all(data)?;
        file.sync_all()
    });
    if let Err(err) = written {
        let _ = fs::remove_file(&temp);
        return Err(write_failure(path, format!("temp file: {err}"), "original untouched"));
    }

    let swap = swap_path(path);
    let had_original = path.exists();
    if had_original {
        if let Err(err) = fs::copy(path, &swap) {
            let _ = fs::remove_file(&temp);
            return Err(write_failure(
                path,
                format!("transient backup: {err}"),
                "original untouched",
            ));
        }
    }

    match with_retry(retry, || replace(&temp, path)) {
        Ok(()) => {
            if had_original {
                let _ = fs::remove_file(&swap);
            }
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(&temp);
            let rollback = if !had_original {
                "no original to restore".to_string()
            } else {
                match with_retry(retry, || fs::copy(&swap, path).map(|_| ())) {
                    Ok(()) => {
                        let _ = fs::remove_file(&swap);
                        "original restored".to_string()
                    }
                    Err(restore_err) => format!(
                        "rollback failed ({restore_err}); previous content kept at {}",
                        swap.display()
                    ),
                }
            };
            Err(write_failure(path, err, rollback))
        }
    }
}

/// Bump the thumbnail's modification time through the same replace path.
/// Returns `false` when there is no thumbnail.
pub fn refresh_thumbnail(document: &Path, retry: RetryPolicy) -> Result<bool> {
    let thumb = thumbnail_for(document);
    if !thumb.is_file() {
        return Ok(false);
    }
    let data = fs::read(&thumb).with_context(|| format!("reading {}", thumb.display()))?;
    write_atomic(&thumb, &data, retry)?;
    Ok(true)
}

pub struct CommitRequest<'a> {
    pub path: &'a Path,
    pub original_len: usize,
    pub new_text: &'a str,
    pub enabling: bool,
    pub retention: usize,
    pub retry: RetryPolicy,
}

#[derive(Debug)]
pub struct CommitReport {
    pub backup: BackupEntry,
    pub pruned: Vec<PathBuf>,
    /// Thumbnail refresh is best effort; the error text is reported, not raised.
    pub thumbnail: std::result::Result<bool, String>,
}

/// Guard, back up, prune, then replace the document on disk.
pub fn commit(req: &CommitRequest<'_>) -> Result<CommitReport> {
    guard_regression(req.original_len, req.new_text.len(), req.enabling)?;
    let backup = create_backup(req.path)?;
    let pruned = prune_backups(req.path, req.retention)?;
    write_atomic(req.path, req.new_text.as_bytes(), req.retry)?;
    let thumbnail = refresh_thumbnail(req.path, req.retry).map_err(|err| format!("{err:#}"));
    Ok(CommitReport {
        backup,
        pruned,
        thumbnail,
    })
}

#[derive(Debug)]
pub struct RestoreReport {
    pub restored: BackupEntry,
    /// Copy of the save as it was just before the restore.
    pub backup: Option<BackupEntry>,
    pub pruned: Vec<PathBuf>,
}

/// Put backup `index` (1 = newest) back in place of the document. The current
/// save is backed up first; the restored backup itself is never pruned.
pub fn restore_backup(
    document: &Path,
    index: usize,
    retention: usize,
    retry: RetryPolicy,
) -> Result<RestoreReport> {
    let entries = list_backups(document)?;
    let entry = index
        .checked_sub(1)
        .and_then(|idx| entries.get(idx))
        .cloned()
        .ok_or_else(|| PatchError::BackupNotFound {
            path: document.to_path_buf(),
            index,
        })?;
    let data = fs::read(&entry.path).with_context(|| format!("reading {}", entry.path.display()))?;
    let thumbnail = match &entry.thumbnail {
        Some(thumb) => {
            Some(fs::read(thumb).with_context(|| format!("reading {}", thumb.display()))?)
        }
        None => None,
    };

    let backup = if document.is_file() {
        Some(create_backup(document)?)
    } else {
        None
    };
    write_atomic(document, &data, retry)?;
    if let Some(bytes) = &thumbnail {
        write_atomic(&thumbnail_for(document), bytes, retry)?;
    }
    let pruned = prune_backups_except(document, retention, Some(&entry.path))?;
    Ok(RestoreReport {
        restored: entry,
        backup,
        pruned,
    })
}
