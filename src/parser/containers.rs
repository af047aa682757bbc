use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::dom::{authors_text, has_class_token, is_named, non_empty, own_text, text_of};
use crate::store::Paper;

static CLASS_PREFIX_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r##"div[class^="#"]"##).unwrap());
static DIV_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div").unwrap());

const HEADINGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];
const ABSTRACT_MIN_CHARS: usize = 100;

/// Containers whose class attribute starts with `#`.
pub fn by_class_prefix(document: &Html) -> Vec<Paper> {
    let containers: Vec<ElementRef> = document.select(&CLASS_PREFIX_SEL).collect();
    parse_containers(&innermost(containers, |el| {
        el.value().attr("class").is_some_and(|c| c.starts_with('#'))
    }))
}

/// `div`s carrying a class token that names a paper (`paper-…`, `paper`).
pub fn by_paper_class(document: &Html) -> Vec<Paper> {
    let containers: Vec<ElementRef> = document
        .select(&DIV_SEL)
        .filter(|el| is_paper_div(*el))
        .collect();
    parse_containers(&innermost(containers, is_paper_div))
}

fn is_paper_div(el: ElementRef<'_>) -> bool {
    el.value().name() == "div"
        && has_class_token(el, |c| c.starts_with("paper-") || c.contains("paper"))
}

/// Drop containers that wrap another match (list wrappers such as `papers-list`).
fn innermost<'a>(
    containers: Vec<ElementRef<'a>>,
    matches: impl Fn(ElementRef<'a>) -> bool,
) -> Vec<ElementRef<'a>> {
    containers
        .into_iter()
        .filter(|c| {
            !c.descendants()
                .skip(1)
                .filter_map(ElementRef::wrap)
                .any(|d| matches(d))
        })
        .collect()
}

/// Position of a field among a container's descendant elements, plus the tag
/// and class found there so a differently shaped container can be detected.
#[derive(Debug, Clone, Copy)]
struct Slot<'a> {
    index: usize,
    tag: &'a str,
    class: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
struct Layout<'a> {
    title: Slot<'a>,
    authors: Option<Slot<'a>>,
    abstract_text: Option<Slot<'a>>,
}

/// Learn the field layout from the first container, then read every container
/// by the same positions. A container that does not fit is re-learned alone.
fn parse_containers(containers: &[ElementRef<'_>]) -> Vec<Paper> {
    let Some(first) = containers.first() else {
        return Vec::new();
    };
    let Some(layout) = learn_layout(*first) else {
        return Vec::new();
    };

    containers
        .iter()
        .filter_map(|c| {
            read_with(*c, &layout).or_else(|| learn_layout(*c).and_then(|own| read_with(*c, &own)))
        })
        .collect()
}

fn elements_of(container: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    container
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .collect()
}

fn learn_layout(container: ElementRef<'_>) -> Option<Layout<'_>> {
    let elements = elements_of(container);
    let slot = |index: usize| Slot {
        index,
        tag: elements[index].value().name(),
        class: elements[index].value().attr("class"),
    };

    let title = elements
        .iter()
        .position(|e| is_named(*e, HEADINGS) || has_class_token(*e, |c| c.contains("title")))
        .or_else(|| elements.iter().position(|e| e.value().name() == "a"))
        .map(slot)?;

    let authors = elements
        .iter()
        .position(|e| has_class_token(*e, |c| c.contains("author")))
        .or_else(|| {
            elements
                .iter()
                .position(|e| own_text(*e).to_lowercase().contains("authors"))
        })
        .filter(|&i| i != title.index)
        .map(slot);

    let free = |i: &usize| *i != title.index && authors.map_or(true, |a| a.index != *i);
    let abstract_text = (0..elements.len())
        .filter(free)
        .find(|&i| has_class_token(elements[i], |c| c.contains("abstract") || c.contains("summary")))
        .or_else(|| {
            (0..elements.len())
                .filter(free)
                .find(|&i| own_text(elements[i]).chars().count() > ABSTRACT_MIN_CHARS)
        })
        .map(slot);

    Some(Layout {
        title,
        authors,
        abstract_text,
    })
}

fn read_with(container: ElementRef<'_>, layout: &Layout<'_>) -> Option<Paper> {
    let elements = elements_of(container);
    let at = |slot: Slot<'_>| {
        elements
            .get(slot.index)
            .copied()
            .filter(|e| e.value().name() == slot.tag && e.value().attr("class") == slot.class)
    };

    let title = text_of(at(layout.title)?);
    if title.is_empty() {
        return None;
    }
    // Every learned slot has to fit, otherwise the caller re-learns.
    let authors = match layout.authors {
        Some(slot) => non_empty(authors_text(&text_of(at(slot)?))),
        None => None,
    };
    let abstract_text = match layout.abstract_text {
        Some(slot) => non_empty(text_of(at(slot)?)),
        None => None,
    };

    Some(Paper {
        title,
        authors,
        abstract_text,
        ..Default::default()
    })
}
