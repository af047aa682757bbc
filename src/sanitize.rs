use std::sync::LazyLock;

use regex::Regex;

static BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\[[^\]]*\]\s*").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Normalize a scraped title into the search/dedup key.
///
/// Drops bracketed annotations such as `[PDF20]` or `[Kimi]` and collapses
/// line breaks and whitespace runs to single spaces.
pub fn clean(raw: &str) -> String {
    let joined = raw.replace(['\r', '\n'], " ");
    let stripped = BRACKET_RE.replace_all(&joined, " ");
    SPACE_RE.replace_all(&stripped, " ").trim().to_string()
}

/// Shorten `s` to `max` characters for log lines.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "   ",
        "Plain Title",
        "#12 Attention Is All You Need [PDF20] [Copy] [Kimi26] [REL]",
        "Multi\nline\r\ntitle",
        "[PDF]Leading tag",
        "Nested [a [b] c] brackets",
        "Unclosed [bracket here",
        "Stray ] closer",
        "Tabs\tand   spaces  ",
        "[][]",
    ];

    #[test]
    fn strips_annotation_tokens() {
        assert_eq!(
            clean("Attention Is All You Need [PDF20] [Copy] [Kimi26] [REL]"),
            "Attention Is All You Need"
        );
        assert_eq!(clean("[PDF]Leading tag"), "Leading tag");
        assert_eq!(clean("Mid[x]word"), "Mid word");
    }

    #[test]
    fn joins_lines_and_collapses_whitespace() {
        assert_eq!(clean("Multi\nline\r\ntitle"), "Multi line title");
        assert_eq!(clean("  Tabs\tand   spaces  "), "Tabs and spaces");
        assert_eq!(clean("   "), "");
    }

    #[test]
    fn no_bracket_tokens_or_breaks_survive() {
        for s in SAMPLES {
            let c = clean(s);
            assert!(!BRACKET_RE.is_match(&c), "{:?} -> {:?}", s, c);
            assert!(!c.contains('\n') && !c.contains('\r'), "{:?} -> {:?}", s, c);
            assert_eq!(c, c.trim());
        }
    }

    #[test]
    fn unpaired_brackets_are_kept() {
        assert_eq!(clean("Unclosed [bracket"), "Unclosed [bracket");
        assert_eq!(clean("Stray ] closer"), "Stray ] closer");
        assert_eq!(clean("Tags [PDF3] then [unclosed"), "Tags then [unclosed");
    }

    #[test]
    fn truncates_by_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }

    #[test]
    fn idempotent() {
        for s in SAMPLES {
            let once = clean(s);
            assert_eq!(clean(&once), once, "not a fixed point for {:?}", s);
        }
    }
}
