use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::warn;

pub const SCRAPED_FILE: &str = "all_papers.csv";
pub const CLEANED_FILE: &str = "cleaned_papers.csv";
pub const ANALYZED_FILE: &str = "papers_analyzed.csv";
pub const MERGED_FILE: &str = "papers_with_arxiv.csv";
pub const LOG_FILE: &str = "conf_papers.log";

const PAGE_PREFIX: &str = "neurips_papers_";
const CHUNK_PREFIX: &str = "papers_with_arxiv_chunk_";

/// One conference submission as it moves through the pipeline.
///
/// `title` is the identity of a record: resume and dedup compare it raw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paper {
    pub title: String,
    pub clean_title: String,
    pub authors: Option<String>,
    pub abstract_text: Option<String>,
    pub arxiv_link: String,
    pub overview: String,
    pub relevance: String,
}

impl Paper {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    fn column(&self, name: &str) -> &str {
        match name {
            "title" => &self.title,
            "clean_title" => &self.clean_title,
            "authors" => self.authors.as_deref().unwrap_or(""),
            "abstract" => self.abstract_text.as_deref().unwrap_or(""),
            "arxiv_link" => &self.arxiv_link,
            "overview" => &self.overview,
            "relevance" => &self.relevance,
            _ => "",
        }
    }
}

/// Column set written for each pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Scraped,
    Cleaned,
    Checkpoint,
    Analyzed,
}

impl Layout {
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Layout::Scraped => &["title", "authors", "abstract"],
            Layout::Cleaned => &["title", "clean_title", "authors", "abstract"],
            Layout::Checkpoint => &["title", "clean_title", "authors", "abstract", "arxiv_link"],
            Layout::Analyzed => &[
                "title",
                "clean_title",
                "authors",
                "abstract",
                "arxiv_link",
                "overview",
                "relevance",
            ],
        }
    }
}

// ── Tabular files ──

pub fn write_papers(path: &Path, layout: Layout, papers: &[Paper]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let columns = layout.columns();
    writer.write_record(columns)?;
    for paper in papers {
        writer.write_record(columns.iter().map(|c| paper.column(c)))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Read a paper table by header name. Unknown columns are ignored and absent
/// optional columns read as empty; a table without a title column is an error.
pub fn read_papers(path: &Path) -> Result<Vec<Paper>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let index: HashMap<String, usize> = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim_start_matches('\u{feff}').trim().to_string(), i))
        .collect();

    let Some(title_idx) = title_column(&index) else {
        let mut names: Vec<&str> = index.keys().map(String::as_str).collect();
        names.sort_unstable();
        bail!("{} has no title column (columns: {:?})", path.display(), names);
    };

    let mut papers = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Malformed row in {}", path.display()))?;
        let cell = |name: &str| -> Option<String> {
            index
                .get(name)
                .and_then(|&i| record.get(i))
                .map(str::to_string)
        };
        papers.push(Paper {
            title: record.get(title_idx).unwrap_or("").to_string(),
            clean_title: cell("clean_title").unwrap_or_default(),
            authors: cell("authors").filter(|s| !s.is_empty()),
            abstract_text: cell("abstract").filter(|s| !s.is_empty()),
            arxiv_link: cell("arxiv_link").unwrap_or_default(),
            overview: cell("overview").unwrap_or_default(),
            relevance: cell("relevance").unwrap_or_default(),
        });
    }
    Ok(papers)
}

fn title_column(index: &HashMap<String, usize>) -> Option<usize> {
    if let Some(&i) = index.get("title") {
        return Some(i);
    }
    let mut candidates: Vec<(&String, &usize)> = index
        .iter()
        .filter(|(name, _)| {
            let lower = name.to_lowercase();
            lower.contains("title") && lower != "clean_title"
        })
        .collect();
    candidates.sort_by_key(|(_, i)| **i);
    let &(name, &i) = candidates.first()?;
    warn!("No 'title' column, using '{}' instead", name);
    Some(i)
}

// ── Per-page scrape files ──

pub fn page_path(dir: &Path, page_no: usize) -> PathBuf {
    dir.join(format!("{}{}.csv", PAGE_PREFIX, page_no))
}

// ── Checkpoints ──

pub fn chunk_path(dir: &Path, chunk_id: u32) -> PathBuf {
    dir.join(format!("{}{}.csv", CHUNK_PREFIX, chunk_id))
}

/// Existing checkpoint batches as `(chunk_id, path)`, ascending by id.
/// A missing directory holds no batches.
pub fn list_chunks(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut chunks = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(id) = name
            .strip_prefix(CHUNK_PREFIX)
            .and_then(|rest| rest.strip_suffix(".csv"))
        else {
            continue;
        };
        match id.parse::<u32>() {
            Ok(id) => chunks.push((id, path)),
            Err(_) => warn!("Ignoring checkpoint with unexpected name: {}", name),
        }
    }
    chunks.sort_by_key(|(id, _)| *id);
    Ok(chunks)
}
