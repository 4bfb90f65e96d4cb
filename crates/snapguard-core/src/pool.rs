//! Snapshot pool: hash-keyed deduplication of snapshot content in exported
//! scripts.
//!
//! `optimize` moves inline content into `snapshotPool` and leaves each step
//! with a reference (hash plus metadata). `restore` reverses that and drops
//! the pool. Both return new scripts and leave their input untouched.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::domain::{ContentHash, PoolEntry, Result, Script, SnapguardError};

/// Deduplication summary of a pooled script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub unique_contents: usize,
    pub references: u64,
    /// Bytes that would be repeated if every reference carried its content.
    pub bytes_saved: u64,
}

/// Move step content into the pool. Running it twice changes nothing.
///
/// A step whose hash is already pooled with different content keeps its
/// content inline, so a collision can never substitute content.
pub fn optimize(script: &Script) -> Script {
    let mut out = script.clone();
    let mut pool: BTreeMap<ContentHash, PoolEntry> = out.snapshot_pool.take().unwrap_or_default();

    for step in &mut out.steps {
        let Some(snapshot) = step.snapshot.as_mut() else {
            continue;
        };
        if !snapshot.has_content() {
            continue;
        }

        let hash = ContentHash::of(&snapshot.content);
        match pool.get_mut(&hash) {
            Some(entry) if entry.content == snapshot.content => {
                entry.usage_count = entry.usage_count.saturating_add(1);
            }
            Some(_) => {
                tracing::warn!(
                    event = "pool.hash_collision",
                    step_id = %step.id,
                    hash = %hash.short(),
                );
                continue;
            }
            None => {
                pool.insert(
                    hash.clone(),
                    PoolEntry {
                        content: snapshot.content.clone(),
                        captured_at: snapshot.captured_at,
                        usage_count: 1,
                    },
                );
            }
        }
        snapshot.content_hash = hash;
        *snapshot = snapshot.as_reference();
    }

    if !pool.is_empty() {
        out.snapshot_pool = Some(pool);
    }
    out
}

/// Inline pooled content back into each referencing step and drop the pool.
///
/// References with no pool entry, or whose pool content does not hash to the
/// key, stay empty and are reported by validation.
pub fn restore(script: &Script) -> Script {
    let mut out = script.clone();
    let Some(pool) = out.snapshot_pool.take() else {
        return out;
    };

    for step in &mut out.steps {
        let Some(snapshot) = step.snapshot.as_mut() else {
            continue;
        };
        if snapshot.has_content() || snapshot.content_hash.is_empty() {
            continue;
        }
        match pool.get(&snapshot.content_hash) {
            Some(entry) if snapshot.content_hash.matches(&entry.content) => {
                snapshot.content = entry.content.clone();
            }
            Some(_) => {
                tracing::warn!(
                    event = "pool.content_mismatch",
                    step_id = %step.id,
                    hash = %snapshot.content_hash.short(),
                );
            }
            None => {
                tracing::warn!(
                    event = "pool.missing_entry",
                    step_id = %step.id,
                    hash = %snapshot.content_hash.short(),
                );
            }
        }
    }
    out
}

pub fn pool_stats(script: &Script) -> PoolStats {
    let Some(pool) = script.snapshot_pool.as_ref() else {
        return PoolStats::default();
    };
    pool.values().fold(
        PoolStats {
            unique_contents: pool.len(),
            ..PoolStats::default()
        },
        |mut stats, entry| {
            let uses = u64::from(entry.usage_count);
            stats.references += uses;
            stats.bytes_saved += entry.content.len() as u64 * uses.saturating_sub(1);
            stats
        },
    )
}

/// Serialize `script` in portable (pooled) form.
pub fn export_script(script: &Script) -> Result<String> {
    Ok(serde_json::to_string_pretty(&optimize(script))?)
}

/// Parse a portable script and inline its pool.
///
/// Text that is not JSON is a serialization error; JSON that is not a
/// script is [`SnapguardError::InvalidScript`].
pub fn import_script(json: &str) -> Result<Script> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    if !value.get("steps").is_some_and(serde_json::Value::is_array) {
        return Err(SnapguardError::InvalidScript(
            "script has no steps array".to_string(),
        ));
    }
    let script: Script = serde_json::from_value(value)
        .map_err(|e| SnapguardError::InvalidScript(e.to_string()))?;
    Ok(restore(&script))
}

/// Export to `path` atomically.
pub fn write_script_file(script: &Script, path: &Path) -> Result<()> {
    write_atomic(&export_script(script)?, path)
}

/// Write `json` to a temp file beside `path`, then rename it into place.
pub fn write_atomic(json: &str, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn read_script_file(path: &Path) -> Result<Script> {
    let raw = fs::read_to_string(path)?;
    import_script(&raw)
}
