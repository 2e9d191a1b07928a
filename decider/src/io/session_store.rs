//! Persisted run records: one JSON file per run, written once.
//!
//! File names are `<created_at with '-' for ':'>_<short id>.json`, e.g.
//! `2026-10-16T15-30-10_1a2b3c4d.json`, so lexical order is chronological order.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::context::DecisionContext;

const RECORD_EXTENSION: &str = "json";

/// One persisted record found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub file_name: String,
    pub path: PathBuf,
    pub display_name: String,
}

/// Portable file name for the record of `ctx`.
pub fn record_file_name(ctx: &DecisionContext) -> String {
    let meta = ctx.meta();
    let stamp = meta.created_at.trim_end_matches('Z').replace(':', "-");
    format!("{stamp}_{}.{RECORD_EXTENSION}", meta.short_id())
}

/// Human label for a record file name: `2026-10-16 15:30:10 (1a2b3c4d)`.
///
/// Names that do not follow the record pattern are shown as their stem.
pub fn display_name(file_name: &str) -> String {
    let stem = file_name
        .strip_suffix(&format!(".{RECORD_EXTENSION}"))
        .unwrap_or(file_name);
    let Some((stamp, short_id)) = stem.rsplit_once('_') else {
        return stem.to_string();
    };
    let Some((date, time)) = stamp.split_once('T') else {
        return stem.to_string();
    };
    format!("{date} {} ({short_id})", time.replace('-', ":"))
}

/// Write `ctx` as a new record under `dir`. Never overwrites an existing record.
#[instrument(skip_all, fields(run_id = %ctx.meta().run_id))]
pub fn write_record(dir: &Path, ctx: &DecisionContext) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create sessions dir {}", dir.display()))?;
    let path = dir.join(record_file_name(ctx));
    let mut payload = serde_json::to_string_pretty(ctx).context("serialize run record")?;
    payload.push('\n');

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("create record {} (records are write-once)", path.display()))?;
    file.write_all(payload.as_bytes())
        .with_context(|| format!("write record {}", path.display()))?;
    info!(path = %path.display(), "run record written");
    Ok(path)
}

/// Records under `dir`, newest first, at most `limit`. A missing directory lists nothing.
pub fn list_records(dir: &Path, limit: usize) -> Result<Vec<RecordEntry>> {
    if !dir.exists() {
        debug!(dir = %dir.display(), "sessions dir missing; no records");
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read sessions dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            names.push(name.to_string());
        }
    }
    names.sort_unstable_by(|a, b| b.cmp(a));
    Ok(names
        .into_iter()
        .take(limit)
        .map(|file_name| RecordEntry {
            path: dir.join(&file_name),
            display_name: display_name(&file_name),
            file_name,
        })
        .collect())
}

/// Raw JSON of a record, for callers that check structure themselves.
pub fn load_record_value(path: &Path) -> Result<Value> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read record {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse record {}", path.display()))
}

/// Load a record back into a context. Reordered or duplicated stage outputs are rejected.
pub fn load_record(path: &Path) -> Result<DecisionContext> {
    let value = load_record_value(path)?;
    serde_json::from_value(value).with_context(|| format!("deserialize record {}", path.display()))
}
