use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use super::dom::{authors_text, find_next, is_named, next_element_siblings, non_empty, text_of};
use crate::store::Paper;

static ID_HEADING_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2[id], h3[id]").unwrap());
static ANY_HEADING_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1, h2, h3").unwrap());

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#\d+").unwrap());
static LEADING_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#\d+\s+").unwrap());

const SECTION_BREAKS: &[&str] = &["h1", "h2", "h3"];
const ABSTRACT_MIN_CHARS: usize = 100;

/// `h2`/`h3` whose id looks like a paper anchor (`paper-12`, `#12`). The next
/// paragraph is the authors line when it carries the `Authors` marker; the
/// paragraph after it is the abstract.
pub fn by_heading_id(document: &Html) -> Vec<Paper> {
    document
        .select(&ID_HEADING_SEL)
        .filter(|h| {
            h.value()
                .attr("id")
                .is_some_and(|id| id.contains("paper-") || id.contains('#'))
        })
        .map(|header| {
            let mut paper = Paper::new(text_of(header));
            let authors_p = find_next(header, "p");
            if let Some(p) = authors_p {
                let text = text_of(p);
                if text.contains("Authors") {
                    paper.authors = non_empty(authors_text(&text));
                }
                paper.abstract_text = find_next(p, "p").map(text_of).and_then(non_empty);
            }
            paper
        })
        .collect()
}

/// Any `h1`-`h3` numbered like `#12` or mentioning "paper". Siblings up to the
/// next heading are scanned: one with an authors marker is the authors line,
/// the first long one is the abstract.
pub fn by_heading_text(document: &Html) -> Vec<Paper> {
    document
        .select(&ANY_HEADING_SEL)
        .filter(|h| {
            let text = text_of(*h);
            NUMBER_RE.is_match(&text) || text.to_lowercase().contains("paper")
        })
        .map(|entry| {
            let title = LEADING_NUMBER_RE.replace(&text_of(entry), "").into_owned();
            let mut paper = Paper::new(title);

            for sibling in next_element_siblings(entry).take_while(|e| !is_named(*e, SECTION_BREAKS)) {
                let text = text_of(sibling);
                if text.to_lowercase().contains("authors") {
                    paper.authors = non_empty(authors_text(&text));
                } else if paper.abstract_text.is_none() && text.chars().count() > ABSTRACT_MIN_CHARS {
                    paper.abstract_text = Some(text);
                }
            }
            paper
        })
        .collect()
}
