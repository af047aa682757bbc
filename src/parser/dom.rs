use scraper::ElementRef;

/// Full text content of an element, trimmed.
pub fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Text from the element's direct text children only.
pub fn own_text(el: ElementRef<'_>) -> String {
    el.children()
        .filter_map(|c| c.value().as_text().map(|t| str::to_owned(t)))
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn is_named(el: ElementRef<'_>, names: &[&str]) -> bool {
    names.contains(&el.value().name())
}

pub fn has_class_token(el: ElementRef<'_>, pred: impl Fn(&str) -> bool) -> bool {
    el.value().classes().any(|c| pred(&c.to_ascii_lowercase()))
}

/// Elements after `el` in document order, starting with its own descendants.
pub fn following<'a>(el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    let node = *el;
    let inside = node.descendants().skip(1);
    let after = std::iter::once(node)
        .chain(node.ancestors())
        .flat_map(|n| n.next_siblings())
        .flat_map(|s| s.descendants());
    inside.chain(after).filter_map(ElementRef::wrap)
}

/// First following element with the given tag name.
pub fn find_next<'a>(el: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    following(el).find(|e| e.value().name() == name)
}

/// Element siblings after `el`.
pub fn next_element_siblings<'a>(el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    el.next_siblings().filter_map(ElementRef::wrap)
}

/// Strip an `Authors:` label from an authors line.
pub fn authors_text(raw: &str) -> String {
    raw.replace("Authors:", "").trim().to_string()
}

pub fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
