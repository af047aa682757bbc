use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use reqwest::StatusCode;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use crate::config::FetchConfig;
use crate::parser;
use crate::render::Renderer;
use crate::store::Paper;

const MAX_RETRIES: u32 = 2;
const BASE_BACKOFF_MS: u64 = 2000;

/// One listing page as fetched. Exactly one of `html` and `error` is set.
#[derive(Debug)]
pub struct FetchedPage {
    pub index: usize,
    pub url: String,
    pub html: Option<String>,
    pub error: Option<String>,
    pub latency_ms: u128,
}

/// Fetch stats returned after completion.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

/// Records extracted from one listing page.
#[derive(Debug)]
pub struct PageRecords {
    pub url: String,
    pub papers: Vec<Paper>,
    pub rendered: bool,
}

/// Fetch pages concurrently. Results come back in input order whatever order
/// the requests finish in; a failed page is reported, never fatal.
pub async fn fetch_pages(urls: &[String], config: &FetchConfig) -> Result<(Vec<FetchedPage>, FetchStats)> {
    let client = reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(config.user_agent.as_str())
        .build()
        .context("Failed to build HTTP client")?;
    let concurrency = config.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let total = urls.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let (tx, mut rx) = mpsc::channel::<FetchedPage>(concurrency * 2);

    for (index, url) in urls.iter().cloned().enumerate() {
        let client = client.clone();
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };
            let start = Instant::now();
            let (html, error) = match fetch_with_retry(&client, &url).await {
                Ok(html) => (Some(html), None),
                Err(e) => {
                    warn!("Fetch failed for {}: {:#}", url, e);
                    (None, Some(format!("{:#}", e)))
                }
            };
            let _ = tx
                .send(FetchedPage {
                    index,
                    url,
                    html,
                    error,
                    latency_ms: start.elapsed().as_millis(),
                })
                .await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut slots: Vec<Option<FetchedPage>> = (0..total).map(|_| None).collect();
    let mut stats = FetchStats {
        total,
        ..Default::default()
    };
    while let Some(page) = rx.recv().await {
        if page.error.is_some() {
            stats.errors += 1;
        } else {
            stats.ok += 1;
        }
        let index = page.index;
        slots[index] = Some(page);
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Fetched {} pages ({} ok, {} errors)", stats.total, stats.ok, stats.errors);

    Ok((slots.into_iter().flatten().collect(), stats))
}

async fn fetch_with_retry(client: &reqwest::Client, url: &str) -> Result<String> {
    let mut attempt = 0;
    loop {
        let response = client.get(url).send().await?;
        let status = response.status();
        let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();

        if !retryable || attempt == MAX_RETRIES {
            let response = response
                .error_for_status()
                .with_context(|| format!("Fetching {}", url))?;
            return Ok(response.text().await?);
        }

        let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
        warn!(
            "Status {} on {} (attempt {}/{}), backing off {:.1}s",
            status.as_u16(),
            url,
            attempt + 1,
            MAX_RETRIES,
            backoff.as_secs_f64()
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}

/// Fetch every listing page and extract its records. Pages yielding fewer
/// than `min_viable` records are rendered through `renderer`, when one is
/// available, and the rendered result is kept only if it is strictly richer.
pub async fn collect_papers(
    urls: &[String],
    config: &FetchConfig,
    renderer: Option<&Renderer>,
) -> Result<Vec<PageRecords>> {
    if urls.is_empty() {
        bail!("No listing pages to fetch");
    }

    let (pages, _) = fetch_pages(urls, config).await?;

    let extracted: Vec<Vec<Paper>> = pages
        .par_iter()
        .map(|page| page.html.as_deref().map(parser::extract).unwrap_or_default())
        .collect();

    let mut results = Vec::with_capacity(pages.len());
    for (page, papers) in pages.into_iter().zip(extracted) {
        info!("{}: {} papers ({} ms)", page.url, papers.len(), page.latency_ms);
        let mut record = PageRecords {
            url: page.url,
            papers,
            rendered: false,
        };

        if record.papers.len() < config.min_viable {
            if let Some(renderer) = renderer {
                info!(
                    "Only {} papers on {}, trying rendered page",
                    record.papers.len(),
                    record.url
                );
                match renderer.render(&record.url).await {
                    Ok(html) => {
                        let rendered = parser::extract(&html);
                        let (papers, used) = prefer_richer(std::mem::take(&mut record.papers), rendered);
                        record.papers = papers;
                        record.rendered = used;
                    }
                    Err(e) => warn!("Render fallback failed for {}: {:#}", record.url, e),
                }
            }
        }
        results.push(record);
    }
    Ok(results)
}

/// Keep the fallback result only when it has strictly more records.
fn prefer_richer(primary: Vec<Paper>, fallback: Vec<Paper>) -> (Vec<Paper>, bool) {
    if fallback.len() > primary.len() {
        (fallback, true)
    } else {
        (primary, false)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Minimal HTTP server answering every request with `status` and `body`.
    async fn serve(status: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = sock.write_all(reply.as_bytes()).await;
            }
        });
        format!("http://{}/", addr)
    }

    fn config() -> FetchConfig {
        FetchConfig {
            concurrency: 2,
            timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn keeps_input_order_and_reports_failures() {
        let a = serve("200 OK", "<p>a</p>".into()).await;
        let missing = serve("404 Not Found", "gone".into()).await;
        let b = serve("200 OK", "<p>b</p>".into()).await;

        let urls = vec![a.clone(), missing.clone(), b.clone()];
        let (pages, stats) = fetch_pages(&urls, &config()).await.unwrap();

        assert_eq!(stats, FetchStats { total: 3, ok: 2, errors: 1 });
        let order: Vec<&str> = pages.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(order, vec![a.as_str(), missing.as_str(), b.as_str()]);
        assert_eq!(pages[0].html.as_deref(), Some("<p>a</p>"));
        assert!(pages[1].html.is_none());
        assert!(pages[1].error.as_deref().unwrap().contains("404"));
    }

    #[tokio::test]
    async fn extracts_records_from_fetched_pages() {
        let html = std::fs::read_to_string("tests/fixtures/numbered_headings.html").unwrap();
        let url = serve("200 OK", html).await;

        let pages = collect_papers(&[url], &config(), None).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].papers.len(), 3);
        assert!(!pages[0].rendered);
    }

    #[tokio::test]
    async fn no_urls_is_an_error() {
        assert!(collect_papers(&[], &config(), None).await.is_err());
    }

    #[test]
    fn fallback_must_be_strictly_richer() {
        let one = vec![Paper::new("a")];
        let two = vec![Paper::new("b"), Paper::new("c")];

        let (kept, used) = prefer_richer(one.clone(), two.clone());
        assert!(used);
        assert_eq!(kept, two);

        let (kept, used) = prefer_richer(one.clone(), vec![Paper::new("z")]);
        assert!(!used);
        assert_eq!(kept, one);

        let (kept, used) = prefer_richer(Vec::new(), Vec::new());
        assert!(!used && kept.is_empty());
    }
}
