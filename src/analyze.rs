use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::store::Paper;

pub const DEFAULT_ENDPOINT: &str = "https://api.deepseek.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_TOPIC: &str = "optimal audio clip length and efficient training-data selection \
                                 for audio pretraining (keywords: self-supervised, pretraining, \
                                 scaling, data selection, information bottleneck)";

const OVERVIEW_MARKER: &str = "Overview:";
const RELEVANCE_MARKER: &str = "Relevance:";
const PARSE_FAILED: &str = "parse failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub overview: String,
    pub relevance: String,
}

impl Analysis {
    fn failed(reason: impl std::fmt::Display) -> Self {
        let marker = format!("analysis failed: {}", reason);
        Self {
            overview: marker.clone(),
            relevance: marker,
        }
    }

    fn unparsed() -> Self {
        Self {
            overview: PARSE_FAILED.to_string(),
            relevance: PARSE_FAILED.to_string(),
        }
    }
}

/// Summarizes a paper and rates it against a research topic. Never fails:
/// problems come back as marker text in the analysis fields.
pub trait Analyst {
    fn analyze(&self, paper: &Paper) -> impl Future<Output = Analysis>;
}

// ── Chat-completions analyst ──

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub topic: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl ChatConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key,
            topic: DEFAULT_TOPIC.to_string(),
            temperature: 0.1,
            max_tokens: 2048,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: String,
}

pub struct ChatAnalyst {
    client: reqwest::Client,
    config: ChatConfig,
}

impl ChatAnalyst {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build analysis HTTP client")?;
        Ok(Self { client, config })
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are an assistant for analysing academic papers. Do two things:\n\
             1. Summarise the paper's main content and contribution in one sentence.\n\
             2. In one sentence, assess how relevant the paper is to this research direction: {}\n\n\
             Answer in exactly this format:\n\
             {} <one-sentence overview>\n\
             {} <one sentence with the relevance level (high/medium/low) and the concrete reason>",
            self.config.topic, OVERVIEW_MARKER, RELEVANCE_MARKER
        )
    }

    async fn complete(&self, user_text: String) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": self.system_prompt() },
                { "role": "user", "content": user_text },
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        let response: ChatResponse = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Unexpected chat-completions response")?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("Chat-completions response has no choices")
    }
}

impl Analyst for ChatAnalyst {
    async fn analyze(&self, paper: &Paper) -> Analysis {
        match self.complete(user_prompt(paper)).await {
            Ok(reply) => parse_reply(&reply).unwrap_or_else(Analysis::unparsed),
            Err(e) => {
                warn!("Analysis request failed: {:#}", e);
                Analysis::failed(format!("{:#}", e))
            }
        }
    }
}

fn display_title(paper: &Paper) -> &str {
    if paper.clean_title.is_empty() {
        &paper.title
    } else {
        &paper.clean_title
    }
}

fn user_prompt(paper: &Paper) -> String {
    let mut text = format!("Title: {}\n\n", display_title(paper));
    if let Some(authors) = &paper.authors {
        text.push_str(&format!("Authors: {}\n\n", authors));
    }
    text.push_str(&format!(
        "Abstract: {}\n\n",
        paper.abstract_text.as_deref().unwrap_or("")
    ));
    text.push_str("Analyse the paper's main content and its relevance to the research direction.");
    text
}

/// Split a reply into overview and relevance. With both markers present the
/// text is cut at them; otherwise the first two non-empty lines are used.
/// `None` when the reply holds nothing usable.
pub fn parse_reply(reply: &str) -> Option<Analysis> {
    if let (Some(_), Some(rel_at)) = (reply.find(OVERVIEW_MARKER), reply.find(RELEVANCE_MARKER)) {
        let head = &reply[..rel_at];
        let overview = match head.find(OVERVIEW_MARKER) {
            Some(at) => &head[at + OVERVIEW_MARKER.len()..],
            None => head,
        };
        let relevance = &reply[rel_at + RELEVANCE_MARKER.len()..];
        return Some(Analysis {
            overview: overview.trim().to_string(),
            relevance: relevance.trim().to_string(),
        });
    }

    let mut lines = reply.lines().map(str::trim).filter(|l| !l.is_empty());
    let overview = lines.next()?.to_string();
    let relevance = lines.next().unwrap_or_default().to_string();
    Some(Analysis {
        overview,
        relevance,
    })
}

/// Analyse each paper in turn, pausing between requests.
pub async fn analyze_papers<A: Analyst>(analyst: &A, mut papers: Vec<Paper>, pause: Duration) -> Vec<Paper> {
    let pb = ProgressBar::new(papers.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let total = papers.len();
    for (i, paper) in papers.iter_mut().enumerate() {
        info!("Analysing {}/{}: {}", i + 1, total, display_title(paper));
        let analysis = analyst.analyze(paper).await;
        paper.overview = analysis.overview;
        paper.relevance = analysis.relevance;
        pb.inc(1);
        if i + 1 < total {
            tokio::time::sleep(pause).await;
        }
    }
    pb.finish_and_clear();
    papers
}

/// Random subset of `n` rows, kept in input order.
pub fn sample(papers: Vec<Paper>, n: usize) -> Vec<Paper> {
    if n >= papers.len() {
        return papers;
    }
    let mut picked = rand::seq::index::sample(&mut rand::thread_rng(), papers.len(), n).into_vec();
    picked.sort_unstable();
    let mut picked = picked.into_iter().peekable();
    papers
        .into_iter()
        .enumerate()
        .filter_map(|(i, p)| {
            if picked.peek() == Some(&i) {
                picked.next();
                Some(p)
            } else {
                None
            }
        })
        .collect()
}

pub fn is_high_relevance(paper: &Paper) -> bool {
    paper.relevance.to_lowercase().contains("high")
}
