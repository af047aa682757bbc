use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::resolver::LinkOutcome;
use crate::store::{self, Layout, Paper, MERGED_FILE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub rows: usize,
    pub found: usize,
    pub files_read: usize,
    pub files_skipped: usize,
    pub output: PathBuf,
}

/// Concatenate every checkpoint batch in `dir`, ordered by batch id, and write
/// the result to [`MERGED_FILE`] next to them. Unreadable batches are skipped.
pub fn merge(dir: &Path) -> Result<(Vec<Paper>, MergeReport)> {
    let chunks = store::list_chunks(dir)?;
    if chunks.is_empty() {
        bail!("No checkpoint files found in {}", dir.display());
    }
    info!("Merging {} checkpoint files", chunks.len());

    let mut papers = Vec::new();
    let mut files_read = 0;
    let mut files_skipped = 0;
    for (id, path) in &chunks {
        match store::read_papers(path) {
            Ok(batch) => {
                info!("Read chunk {}: {} papers", id, batch.len());
                papers.extend(batch);
                files_read += 1;
            }
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                files_skipped += 1;
            }
        }
    }
    if files_read == 0 {
        bail!("None of the {} checkpoint files in {} could be read", chunks.len(), dir.display());
    }

    let output = dir.join(MERGED_FILE);
    store::write_papers(&output, Layout::Checkpoint, &papers)?;

    let found = papers
        .iter()
        .filter(|p| LinkOutcome::parse(&p.arxiv_link).is_found())
        .count();
    info!(
        "Merged {} papers ({} with arXiv links) into {}",
        papers.len(),
        found,
        output.display()
    );

    let report = MergeReport {
        rows: papers.len(),
        found,
        files_read,
        files_skipped,
        output,
    };
    Ok((papers, report))
}
