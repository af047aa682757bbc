use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::resolver::{jittered, TitleLookup};
use crate::sanitize::{self, truncate};
use crate::store::{self, Layout, Paper};

/// Harvest stats returned after completion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HarvestStats {
    pub resolved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks_written: usize,
}

/// What earlier runs left on disk.
struct Resume {
    processed: HashSet<String>,
    next_chunk_id: u32,
}

/// Resolves links for input rows chunk by chunk, flushing each chunk to its
/// own checkpoint file. Titles found in existing checkpoints are skipped, so
/// an interrupted run picks up where it stopped.
pub struct Harvester<L> {
    config: HarvestConfig,
    lookup: L,
}

impl<L: TitleLookup> Harvester<L> {
    pub fn new(config: HarvestConfig, lookup: L) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, lookup })
    }

    pub async fn run(&self, rows: &[Paper]) -> Result<HarvestStats> {
        let dir = &self.config.checkpoint_dir;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create checkpoint directory {}", dir.display()))?;

        let Resume {
            mut processed,
            mut next_chunk_id,
        } = load_checkpoints(dir)?;
        if !processed.is_empty() {
            info!("Already processed {} papers", processed.len());
        }

        let pb = ProgressBar::new(rows.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );

        let mut stats = HarvestStats::default();
        for chunk in rows.chunks(self.config.chunk_size) {
            info!("Processing chunk {} ({} papers)", next_chunk_id, chunk.len());
            let mut batch = Vec::with_capacity(chunk.len());

            for row in chunk {
                if processed.contains(&row.title) {
                    debug!("Skipping already processed: {}", truncate(&row.title, 30));
                    stats.skipped += 1;
                    pb.inc(1);
                    continue;
                }

                info!("Processing: {}", truncate(&row.title, 50));
                match self.resolve_row(row).await {
                    Ok(paper) => {
                        info!("Link: {}", paper.arxiv_link);
                        processed.insert(paper.title.clone());
                        batch.push(paper);
                        stats.resolved += 1;
                    }
                    Err(e) => {
                        warn!("Failed to process {:?}: {:#}", truncate(&row.title, 50), e);
                        stats.failed += 1;
                    }
                }

                self.pause().await;
                pb.inc(1);
            }

            if !batch.is_empty() {
                let path = store::chunk_path(dir, next_chunk_id);
                store::write_papers(&path, Layout::Checkpoint, &batch)?;
                info!("Saved {} papers to {}", batch.len(), path.display());
                next_chunk_id += 1;
                stats.chunks_written += 1;
            }
            info!(
                "Processed {}/{} papers ({} skipped, {} failed)",
                stats.resolved, rows.len(), stats.skipped, stats.failed
            );
        }

        pb.finish_and_clear();
        Ok(stats)
    }

    async fn resolve_row(&self, row: &Paper) -> Result<Paper> {
        let clean_title = sanitize::clean(&row.title);
        debug!("Clean title: {}", truncate(&clean_title, 50));
        let outcome = self.lookup.lookup(&clean_title).await?;
        Ok(Paper {
            title: row.title.clone(),
            clean_title,
            authors: row.authors.clone(),
            abstract_text: row.abstract_text.clone(),
            arxiv_link: outcome.to_string(),
            ..Default::default()
        })
    }

    /// Rate limit between rows, applied after every row that hit the network.
    async fn pause(&self) {
        let spread = self.config.delay_max.saturating_sub(self.config.delay_min);
        let delay = jittered(self.config.delay_min, &(0.0..=spread.as_secs_f64()));
        debug!("Waiting {:.2}s", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
    }
}

/// Union of titles across existing checkpoint batches. A batch that cannot be
/// read is reported and left out; its rows will be resolved again.
fn load_checkpoints(dir: &Path) -> Result<Resume> {
    let chunks = store::list_chunks(dir)?;
    let mut processed = HashSet::new();
    if !chunks.is_empty() {
        info!("Found {} checkpoint files", chunks.len());
    }
    for (_, path) in &chunks {
        match store::read_papers(path) {
            Ok(papers) => processed.extend(papers.into_iter().map(|p| p.title)),
            Err(e) => warn!("Failed to read checkpoint {}: {:#}", path.display(), e),
        }
    }
    let highest = chunks.last().map_or(0, |(id, _)| *id);
    let next_chunk_id = (chunks.len() as u32).max(highest) + 1;
    Ok(Resume {
        processed,
        next_chunk_id,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::anyhow;
    use tokio::time::Instant;

    use super::*;
    use crate::resolver::LinkOutcome;

    #[derive(Default)]
    struct FakeLookup {
        seen: Mutex<Vec<String>>,
        failing: HashSet<String>,
    }

    impl FakeLookup {
        fn failing(titles: &[&str]) -> Self {
            Self {
                failing: titles.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl TitleLookup for FakeLookup {
        async fn lookup(&self, clean_title: &str) -> Result<LinkOutcome> {
            self.seen.lock().unwrap().push(clean_title.to_string());
            if self.failing.contains(clean_title) {
                return Err(anyhow!("lookup exploded"));
            }
            Ok(LinkOutcome::Found(format!("https://arxiv.org/abs/{}", clean_title.len())))
        }
    }

    fn config(dir: &Path, chunk_size: usize) -> HarvestConfig {
        HarvestConfig {
            chunk_size,
            delay_min: Duration::from_secs(10),
            delay_max: Duration::from_secs(15),
            checkpoint_dir: dir.to_path_buf(),
        }
    }

    fn rows(titles: &[&str]) -> Vec<Paper> {
        titles.iter().map(|t| Paper::new(*t)).collect()
    }

    fn titles_in(path: &Path) -> Vec<String> {
        store::read_papers(path).unwrap().into_iter().map(|p| p.title).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn resume_skips_checkpointed_titles() {
        let dir = tempfile::tempdir().unwrap();
        let mut done = Paper::new("Paper A");
        done.arxiv_link = "https://arxiv.org/abs/1".into();
        store::write_papers(&store::chunk_path(dir.path(), 1), Layout::Checkpoint, &[done]).unwrap();

        let h = Harvester::new(config(dir.path(), 5), FakeLookup::default()).unwrap();
        let stats = h.run(&rows(&["Paper A", "Paper B"])).await.unwrap();

        assert_eq!(h.lookup.seen(), vec!["Paper B"]);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(titles_in(&store::chunk_path(dir.path(), 2)), vec!["Paper B"]);
        // The earlier batch is left untouched.
        assert_eq!(titles_in(&store::chunk_path(dir.path(), 1)), vec!["Paper A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_over_same_input_resolves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = rows(&["One", "Two", "Three"]);

        let first = Harvester::new(config(dir.path(), 2), FakeLookup::default()).unwrap();
        first.run(&input).await.unwrap();
        let second = Harvester::new(config(dir.path(), 2), FakeLookup::default()).unwrap();
        let stats = second.run(&input).await.unwrap();

        assert!(second.lookup.seen().is_empty());
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.chunks_written, 0);
        assert_eq!(store::list_chunks(dir.path()).unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_flush_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = rows(&["a", "b", "c", "d", "e", "f", "g"]);
        let h = Harvester::new(config(dir.path(), 3), FakeLookup::default()).unwrap();
        let stats = h.run(&input).await.unwrap();

        assert_eq!(stats.chunks_written, 3);
        assert_eq!(titles_in(&store::chunk_path(dir.path(), 1)), vec!["a", "b", "c"]);
        assert_eq!(titles_in(&store::chunk_path(dir.path(), 2)), vec!["d", "e", "f"]);
        assert_eq!(titles_in(&store::chunk_path(dir.path(), 3)), vec!["g"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rows_are_cleaned_before_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut row = Paper::new("Deep\nNets [PDF12] [Kimi]");
        row.authors = Some("X".into());
        let h = Harvester::new(config(dir.path(), 5), FakeLookup::default()).unwrap();
        h.run(&[row]).await.unwrap();

        assert_eq!(h.lookup.seen(), vec!["Deep Nets"]);
        let saved = store::read_papers(&store::chunk_path(dir.path(), 1)).unwrap();
        assert_eq!(saved[0].title, "Deep\nNets [PDF12] [Kimi]");
        assert_eq!(saved[0].clean_title, "Deep Nets");
        assert_eq!(saved[0].authors.as_deref(), Some("X"));
        assert!(saved[0].arxiv_link.starts_with("https://arxiv.org/abs/"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_row_is_retried_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let input = rows(&["Good", "Bad", "Also Good"]);

        let first = Harvester::new(config(dir.path(), 5), FakeLookup::failing(&["Bad"])).unwrap();
        let stats = first.run(&input).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.resolved, 2);
        assert_eq!(titles_in(&store::chunk_path(dir.path(), 1)), vec!["Good", "Also Good"]);

        let second = Harvester::new(config(dir.path(), 5), FakeLookup::default()).unwrap();
        second.run(&input).await.unwrap();
        assert_eq!(second.lookup.seen(), vec!["Bad"]);
        assert_eq!(titles_in(&store::chunk_path(dir.path(), 2)), vec!["Bad"]);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_after_every_processed_row() {
        let dir = tempfile::tempdir().unwrap();
        store::write_papers(
            &store::chunk_path(dir.path(), 1),
            Layout::Checkpoint,
            &[Paper::new("done")],
        )
        .unwrap();

        let h = Harvester::new(config(dir.path(), 2), FakeLookup::failing(&["boom"])).unwrap();
        let start = Instant::now();
        h.run(&rows(&["done", "x", "boom"])).await.unwrap();
        let waited = start.elapsed();

        // Two network rows (one failing), one skipped: two pauses of 10..=15s.
        assert!(waited >= Duration::from_secs(20), "waited {:?}", waited);
        assert!(waited <= Duration::from_millis(30_020), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_checkpoint_is_ignored_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(store::chunk_path(dir.path(), 1), "not,a\ncheckpoint").unwrap();
        store::write_papers(&store::chunk_path(dir.path(), 2), Layout::Checkpoint, &[Paper::new("A")])
            .unwrap();

        let h = Harvester::new(config(dir.path(), 5), FakeLookup::default()).unwrap();
        h.run(&rows(&["A", "B"])).await.unwrap();

        assert_eq!(h.lookup.seen(), vec!["B"]);
        assert_eq!(titles_in(&store::chunk_path(dir.path(), 3)), vec!["B"]);
    }

    #[tokio::test]
    async fn next_chunk_id_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        for id in [1, 3] {
            store::write_papers(&store::chunk_path(dir.path(), id), Layout::Checkpoint, &[]).unwrap();
        }
        let resume = load_checkpoints(dir.path()).unwrap();
        assert_eq!(resume.next_chunk_id, 4);
    }

    #[tokio::test]
    async fn unusable_checkpoint_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        fs::write(&file, "x").unwrap();

        let h = Harvester::new(config(&file, 5), FakeLookup::default()).unwrap();
        assert!(h.run(&rows(&["A"])).await.is_err());
        assert!(h.lookup.seen().is_empty());
    }

    #[test]
    fn invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Harvester::new(config(dir.path(), 0), FakeLookup::default()).is_err());
    }
}
