pub mod containers;
pub mod dom;
pub mod headings;

use scraper::Html;
use tracing::debug;

use crate::store::Paper;

/// One extraction heuristic over a parsed page.
pub type Strategy = fn(&Html) -> Vec<Paper>;

/// Tried in order; the first strategy yielding any record wins.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("class-prefix containers", containers::by_class_prefix),
    ("paper-class containers", containers::by_paper_class),
    ("paper-id headings", headings::by_heading_id),
    ("heading scan", headings::by_heading_text),
];

/// Extract paper records from a listing page. Never fails: a page with no
/// recognizable structure yields an empty list.
pub fn extract(html: &str) -> Vec<Paper> {
    let document = Html::parse_document(html);
    for (name, strategy) in STRATEGIES {
        let papers = strategy(&document);
        if !papers.is_empty() {
            debug!("Strategy '{}' found {} papers", name, papers.len());
            return papers;
        }
        debug!("Strategy '{}' found nothing", name);
    }
    Vec::new()
}

// ── Tests ──
