//! Text cleanup for free-form product fields (`name`, `description`).

use std::sync::LazyLock;

use regex::Regex;

static MARKUP_TAG: LazyLock<Regex> = LazyLock::new(|| compile(r"<[^>]+>"));

// Attribute names left behind when tags are malformed or escaped.
static LEFTOVER_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)\b(p|img|id|style|src)\b"));

static DISALLOWED_CHAR: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"[^a-zA-Z0-9À-ỹ\s.,!?():;"'-]"#));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|err| panic!("invalid normalizer pattern {pattern}: {err}"))
}

/// Normalize a raw text field.
///
/// Steps, in order: replace markup tags with spaces, drop leftover attribute
/// words, replace characters outside the allow-list (ASCII alphanumerics,
/// Vietnamese/Latin accented letters, whitespace and `.,!?():;"'-`), lowercase,
/// then collapse whitespace. `None` and empty input yield an empty string.
pub fn normalize(text: Option<&str>) -> String {
    let Some(text) = text.filter(|text| !text.is_empty()) else {
        return String::new();
    };
    let text = MARKUP_TAG.replace_all(text, " ");
    let text = LEFTOVER_ATTRIBUTE.replace_all(&text, " ");
    let text = DISALLOWED_CHAR.replace_all(&text, " ");
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_collapses_whitespace() {
        assert_eq!(normalize(Some("<p>Hello   World</p>")), "hello world");
    }

    #[test]
    fn none_and_empty_become_empty() {
        assert_eq!(normalize(None), "");
        assert_eq!(normalize(Some("")), "");
    }

    #[test]
    fn keeps_extended_latin() {
        assert_eq!(normalize(Some("Price: 10đ")), "price: 10đ");
        assert_eq!(normalize(Some("Điện Thoại")), "điện thoại");
    }
}
