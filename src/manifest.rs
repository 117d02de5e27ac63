/*!
 * Manifest scanning
 *
 * Every `.bin` file under `meta/` is a CSV listing objects as
 * `name,size[,extension]`, with an optional `sign,size,extn` header row.
 * The scan seeds pull batches and gives progress its totals up front.
 */

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, ShardlineError};
use crate::layout::{DatasetLayout, META_DIR};

/// One object listed in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub name: String,
    pub size: Option<u64>,
    pub extension: Option<String>,
}

/// Result of reading every manifest under `meta/`
#[derive(Debug, Default, Clone)]
pub struct ManifestScan {
    pub files: Vec<PathBuf>,
    pub entries: Vec<ManifestEntry>,
}

impl ManifestScan {
    /// Sum of every known entry size
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().filter_map(|e| e.size).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sorted `meta/*.bin` paths
pub fn manifest_files(meta_dir: &Path) -> Result<Vec<PathBuf>> {
    if !meta_dir.is_dir() {
        return Err(ShardlineError::Config(format!(
            "manifest directory not found: {}",
            meta_dir.display()
        )));
    }

    let pattern = meta_dir.join("*.bin");
    let pattern = pattern.to_str().ok_or_else(|| {
        ShardlineError::Config(format!("non UTF-8 manifest path: {}", meta_dir.display()))
    })?;

    let mut files = Vec::new();
    for entry in glob::glob(pattern)
        .map_err(|e| ShardlineError::Config(format!("bad manifest pattern: {}", e)))?
    {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("skipping unreadable manifest entry: {}", e);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Names of the manifests relative to the dataset root, for push batches
pub fn manifest_push_names(layout: &DatasetLayout) -> Result<Vec<String>> {
    let files = manifest_files(&layout.meta_dir())?;
    Ok(files
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
        .map(|n| format!("{}/{}", META_DIR, n))
        .collect())
}

/// Read every record of one manifest
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| manifest_error(path, 0, e.to_string()))?;

    let mut entries = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            let line = e.position().map(|p| p.line()).unwrap_or(0);
            manifest_error(path, line, e.to_string())
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        if idx == 0 && is_header(&record) {
            tracing::debug!("{}: skipping header row", path.display());
            continue;
        }

        let name = record.get(0).unwrap_or("");
        if name.is_empty() {
            if record.iter().all(|field| field.is_empty()) {
                continue;
            }
            return Err(manifest_error(path, line, "empty object name".to_string()));
        }

        let size = match record.get(1) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                manifest_error(path, line, format!("size {:?} is not a byte count", raw))
            })?),
        };

        let extension = record
            .get(2)
            .filter(|ext| !ext.is_empty())
            .map(str::to_string);

        entries.push(ManifestEntry {
            name: name.to_string(),
            size,
            extension,
        });
    }

    Ok(entries)
}

/// Read all manifests under `meta_dir`
pub fn scan_manifests(meta_dir: &Path) -> Result<ManifestScan> {
    let files = manifest_files(meta_dir)?;
    let mut scan = ManifestScan::default();

    for file in &files {
        let entries = read_manifest(file)?;
        tracing::debug!("manifest {}: {} entries", file.display(), entries.len());
        scan.entries.extend(entries);
    }
    scan.files = files;

    tracing::info!(
        "manifest scan: {} files, {} objects, {} bytes",
        scan.files.len(),
        scan.entries.len(),
        scan.total_bytes()
    );
    Ok(scan)
}

/// A first row whose size column is not a number, e.g. `sign,size,extn`
fn is_header(record: &csv::StringRecord) -> bool {
    match record.get(1) {
        Some(raw) if !raw.is_empty() => raw.parse::<u64>().is_err(),
        _ => false,
    }
}

fn manifest_error(path: &Path, line: u64, reason: String) -> ShardlineError {
    ShardlineError::Manifest {
        path: path.to_path_buf(),
        line,
        reason,
    }
}
