use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

pub const DEFAULT_DATA_DIR: &str = "data";

pub const DEFAULT_SOURCE_URLS: &[&str] = &[
    "https://papers.cool/venue/NeurIPS.2023?group=Spotlight&show=392",
    "https://papers.cool/venue/NeurIPS.2023?group=Oral&show=75",
    "https://papers.cool/venue/NeurIPS.2024?group=Spotlight&show=327",
    "https://papers.cool/venue/NeurIPS.2024?group=Oral&show=61",
];

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Knobs for the chunked link-resolution loop.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub chunk_size: usize,
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub checkpoint_dir: PathBuf,
}

impl HarvestConfig {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            chunk_size: 5,
            delay_min: Duration::from_secs(10),
            delay_max: Duration::from_secs(15),
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk size must be at least 1");
        }
        if self.delay_min > self.delay_max {
            bail!(
                "delay bounds are inverted: min {:.1}s > max {:.1}s",
                self.delay_min.as_secs_f64(),
                self.delay_max.as_secs_f64()
            );
        }
        Ok(())
    }
}

/// Attempt budget and backoff for one search request.
///
/// Jitter ranges are in seconds and are added on top of `base_delay`. The
/// wait happens only between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub status_jitter: RangeInclusive<f64>,
    pub transport_jitter: RangeInclusive<f64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            base_delay: Duration::from_secs(10),
            status_jitter: 1.0..=5.0,
            transport_jitter: 3.0..=8.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub query_prefix: usize,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://arxiv.org".to_string(),
            query_prefix: 60,
            timeout: Duration::from_secs(20),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub concurrency: usize,
    /// Pages yielding fewer records than this go through the render fallback.
    pub min_viable: usize,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            min_viable: 10,
            timeout: Duration::from_secs(60),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = HarvestConfig::new("data");
        assert_eq!(cfg.chunk_size, 5);
        assert!(cfg.validate().is_ok());
        assert_eq!(RetryPolicy::default().attempts, 2);
    }

    #[test]
    fn rejects_zero_chunk_and_inverted_delays() {
        let mut cfg = HarvestConfig::new("data");
        cfg.chunk_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = HarvestConfig::new("data");
        cfg.delay_min = Duration::from_secs(20);
        assert!(cfg.validate().is_err());
    }
}
