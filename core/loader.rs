use crate::error::{AppError, Result};
use crate::tokens::TokenEstimator;
use log;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub last_modified_ms: i64,
    pub content: String,
    pub rendered_block: String,
    pub estimated_tokens: usize,
}

/// Wraps content in a path-tagged block. Content is copied verbatim; a file
/// that itself contains `</file>` will break the outer structure.
pub fn render_block(path: &str, content: &str) -> String {
    format!("<file path=\"{}\">\n{}\n</file>", path, content)
}

/// Reads every path (relative to `root`) in parallel. Output order follows
/// `paths`; the first failure aborts the whole load.
pub fn load_files(
    root: &Path,
    paths: &[String],
    estimator: &TokenEstimator,
) -> Result<Vec<FileRecord>> {
    log::info!("Reading content for {} files...", paths.len());
    let records = paths
        .par_iter()
        .map(|relative| load_one(root, relative, estimator))
        .collect::<Result<Vec<_>>>()?;
    log::info!("File reading complete.");
    Ok(records)
}

fn load_one(root: &Path, relative: &str, estimator: &TokenEstimator) -> Result<FileRecord> {
    let path = root.join(relative);
    let read_err = |source| AppError::FileRead {
        path: path.clone(),
        source,
    };
    let content = fs::read_to_string(&path).map_err(read_err)?;
    let modified = fs::metadata(&path)
        .and_then(|meta| meta.modified())
        .map_err(read_err)?;
    // Pre-epoch timestamps clamp to zero; they land in the oldest bucket anyway.
    let last_modified_ms = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    let estimated_tokens = estimator.estimate(&content);
    log::trace!("Loaded {} ({} est. tokens)", relative, estimated_tokens);
    Ok(FileRecord {
        path: relative.to_string(),
        last_modified_ms,
        rendered_block: render_block(relative, &content),
        content,
        estimated_tokens,
    })
}
