//! Bounded parallel file reads for multi-file tools.
//!
//! Reads run concurrently up to `max_concurrent`, results come back in
//! input order, and a batch larger than `max_total` is refused before
//! any I/O starts.

use std::path::PathBuf;

use futures_util::stream::{self, StreamExt};

use bv_domain::config::ParallelConfig;
use bv_domain::error::{Error, Result};

/// One file's read result, position-matched to the input list.
pub type FileReadResult = std::result::Result<String, String>;

/// Read many files concurrently, rejoining results in input order.
pub async fn read_files(
    paths: Vec<PathBuf>,
    config: &ParallelConfig,
) -> Result<Vec<FileReadResult>> {
    if paths.len() > config.max_total {
        return Err(Error::Budget(format!(
            "batch of {} files exceeds parallel.max_total ({})",
            paths.len(),
            config.max_total
        )));
    }

    let concurrency = config.max_concurrent.max(1);
    let results = stream::iter(paths)
        .map(|path| async move {
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| format!("{}: {e}", path.display()))
        })
        // `buffered` preserves input order while reading ahead.
        .buffered(concurrency)
        .collect::<Vec<FileReadResult>>()
        .await;

    Ok(results)
}
