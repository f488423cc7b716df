use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::store::LakeStore;

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"20\d{2}").unwrap());

#[derive(Debug, Default)]
pub struct DvfReport {
    pub uploaded: u32,
    pub failed: u32,
}

/// Copies the raw DVF text files into the Bronze bucket under a year-keyed
/// prefix, without touching their content.
pub struct DvfIngestor<'a> {
    store: &'a LakeStore,
    config: &'a PipelineConfig,
}

/// All `.txt`/`.csv` files (either case) directly under the source directory.
pub fn find_source_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if matches!(ext.as_deref(), Some("txt") | Some("csv")) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Vintage year of a DVF file: the first `20xx` in the filename that matches
/// a configured year, else any `20xx`, else the file's modification year.
pub fn year_for_file(path: &Path, configured_years: &[i32]) -> i32 {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let candidates: Vec<i32> = YEAR_RE
        .find_iter(name)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    if let Some(year) = candidates.iter().find(|y| configured_years.contains(y)) {
        return *year;
    }
    if let Some(year) = candidates.first() {
        return *year;
    }
    let modified = path
        .metadata()
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    modified.year()
}

impl<'a> DvfIngestor<'a> {
    pub fn new(store: &'a LakeStore, config: &'a PipelineConfig) -> Self {
        Self { store, config }
    }

    async fn upload_file(&self, path: &Path, year: i32) -> Result<String> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("dvf.txt");
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let key = format!("dvf/{year}/dvf_{year}_{timestamp}_{name}");
        let bytes = std::fs::read(path)?;
        let size_mb = bytes.len() as f64 / (1024.0 * 1024.0);
        self.store
            .put_object(&self.config.buckets.bronze, &key, bytes)
            .await?;
        info!(file = name, year, key, size_mb, "DVF file uploaded");
        Ok(key)
    }

    /// Upload every source file; a failed upload is logged and the rest
    /// still go through.
    pub async fn ingest_all(&self) -> Result<DvfReport> {
        self.store
            .ensure_bucket(&self.config.buckets.bronze)
            .await?;

        let source_dir = Path::new(&self.config.dvf.source_dir);
        let files = find_source_files(source_dir)?;
        info!(count = files.len(), dir = %source_dir.display(), "found DVF source files");
        if files.is_empty() {
            warn!(dir = %source_dir.display(), "no DVF files to ingest");
        }

        let mut report = DvfReport::default();
        for path in &files {
            let year = year_for_file(path, &self.config.dvf.years);
            match self.upload_file(path, year).await {
                Ok(_) => report.uploaded += 1,
                Err(e) => {
                    error!(file = %path.display(), error = %e, "DVF upload failed");
                    report.failed += 1;
                }
            }
        }
        info!(uploaded = report.uploaded, failed = report.failed, "DVF ingestion complete");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn finds_only_delimited_text_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a_2020.txt", "b_2021.CSV", "notes.md", "archive.zip"] {
            File::create(dir.path().join(name)).unwrap();
        }
        let files = find_source_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a_2020.txt", "b_2021.CSV"]);
    }

    #[test]
    fn year_prefers_configured_years() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("valeursfoncieres-2021_extract_2099.txt");
        File::create(&path).unwrap().write_all(b"x").unwrap();
        assert_eq!(year_for_file(&path, &[2020, 2021]), 2021);
    }

    #[test]
    fn year_falls_back_to_any_match_then_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let with_year = dir.path().join("dvf_2019.txt");
        File::create(&with_year).unwrap();
        assert_eq!(year_for_file(&with_year, &[2020, 2021]), 2019);

        let without = dir.path().join("dvf.txt");
        File::create(&without).unwrap();
        assert_eq!(year_for_file(&without, &[2020, 2021]), Utc::now().year());
    }
}
