//! Recent-project and pinned-assay lists.
//!
//! Both files belong to the GUI collaborator; the core only defines their
//! shape. The recent list is a CSV of previously opened projects, newest
//! first; the pinned list is a single CSV row of assay shorthand codes. The
//! caller owns the file locations.

use std::path::{Path, PathBuf};

use csv::ReaderBuilder;

use crate::error::Result;

/// One previously opened project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentEntry {
    pub file_name: String,
    pub assay_category: String,
    /// Assay shorthand code (EPDR, NDSF, ...).
    pub shorthand: String,
    pub full_path: PathBuf,
    /// ISO-8601 timestamp; ordering is lexicographic.
    pub date_time: String,
}

/// Reads the recent list, dropping entries whose project no longer exists.
///
/// A missing list file reads as empty. Entries come back newest first
/// regardless of the order on disk.
pub fn read_recent(path: &Path) -> Result<Vec<RecentEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        let get = |i: usize| record.get(i).unwrap_or("").trim().to_string();
        let full_path = PathBuf::from(get(3));
        if !full_path.exists() {
            continue;
        }
        entries.push(RecentEntry {
            file_name: get(0),
            assay_category: get(1),
            shorthand: get(2),
            full_path,
            date_time: get(4),
        });
    }
    sort_newest_first(&mut entries);
    Ok(entries)
}

/// Writes the recent list, newest first.
pub fn write_recent(path: &Path, entries: &[RecentEntry]) -> Result<()> {
    let mut sorted = entries.to_vec();
    sort_newest_first(&mut sorted);
    let mut w = csv::Writer::from_path(path)?;
    w.write_record(["FileName", "AssayCategory", "Shorthand", "FullPath", "DateTime"])?;
    for entry in &sorted {
        w.write_record(&[
            entry.file_name.clone(),
            entry.assay_category.clone(),
            entry.shorthand.clone(),
            entry.full_path.to_string_lossy().to_string(),
            entry.date_time.clone(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

/// Inserts or refreshes one entry and rewrites the list.
///
/// An existing entry for the same project path is replaced, so reopening a
/// project moves it to the top instead of duplicating it.
pub fn record_recent(path: &Path, entry: RecentEntry) -> Result<()> {
    let mut entries = read_recent(path)?;
    entries.retain(|e| e.full_path != entry.full_path);
    entries.push(entry);
    write_recent(path, &entries)
}

fn sort_newest_first(entries: &mut [RecentEntry]) {
    entries.sort_by(|a, b| b.date_time.cmp(&a.date_time));
}

/// Reads the pinned shorthand codes; a missing file reads as none pinned.
pub fn read_pinned(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut pinned = Vec::new();
    if let Some(record) = reader.records().next() {
        for field in record?.iter() {
            let code = field.trim();
            if !code.is_empty() {
                pinned.push(code.to_string());
            }
        }
    }
    Ok(pinned)
}

/// Writes the pinned shorthand codes as a single CSV row.
pub fn write_pinned(path: &Path, codes: &[String]) -> Result<()> {
    let mut w = csv::Writer::from_path(path)?;
    w.write_record(codes)?;
    w.flush()?;
    Ok(())
}
