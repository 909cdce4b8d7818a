use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::PatchError;

const SAVE_EXT: &str = "prison";
const MAX_ASCENT: usize = 64;
const MAX_SIBLINGS: usize = 256;

/// Turn the user's `--save` argument into a concrete save file.
///
/// A directory resolves to its most recently modified save. A missing path
/// fails with a nearby file of the same name as a suggestion.
pub fn resolve_save(path: &Path) -> Result<PathBuf, PatchError> {
    if path.is_dir() {
        return newest_save_in(path).ok_or_else(|| PatchError::SaveNotFound {
            path: path.to_path_buf(),
            suggestion: None,
        });
    }
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    Err(PatchError::SaveNotFound {
        path: path.to_path_buf(),
        suggestion: suggest_path(path),
    })
}

fn is_save(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(SAVE_EXT))
        .unwrap_or(false)
}

fn newest_save_in(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file() && is_save(entry.path()))
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|meta| meta.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.into_path())
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)))
        .map(|(_, path)| path)
}

fn suggest_path(original: &Path) -> Option<PathBuf> {
    let file_name = original.file_name()?;
    let base = match original.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) if parent.is_absolute() => parent.to_path_buf(),
        Some(parent) => std::env::current_dir().ok()?.join(parent),
        None => std::env::current_dir().ok()?,
    };
    suggest_from(&base, Path::new(file_name))
}

/// Walk up from `base`, looking for `name` in each ancestor and its subdirectories.
fn suggest_from(base: &Path, name: &Path) -> Option<PathBuf> {
    let mut current = base.to_path_buf();
    let mut checked = HashSet::new();
    for _ in 0..MAX_ASCENT {
        if let Some(hit) = check_candidate(current.join(name), &mut checked) {
            return Some(hit);
        }
        if let Ok(iter) = fs::read_dir(&current) {
            for entry in iter.flatten().take(MAX_SIBLINGS) {
                let path = entry.path();
                if path.is_dir() {
                    if let Some(hit) = check_candidate(path.join(name), &mut checked) {
                        return Some(hit);
                    }
                }
            }
        }
        if !current.pop() {
            break;
        }
    }
    None
}

fn check_candidate(candidate: PathBuf, checked: &mut HashSet<PathBuf>) -> Option<PathBuf> {
    if checked.insert(candidate.clone()) && candidate.is_file() {
        return Some(candidate);
    }
    None
}
