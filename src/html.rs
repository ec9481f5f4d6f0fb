//! Word and link extraction from fetched pages.

use scraper::{Html, Selector};
use url::Url;

/// Extract the readable words of an HTML page.
///
/// Text inside `script` and `style` elements is skipped. Tokens are split
/// on whitespace, stripped of leading and trailing punctuation, rejected if
/// anything non-alphabetic remains inside, and lowercased.
pub fn extract_words(page: &str) -> Vec<String> {
    let document = Html::parse_document(page);
    let mut words = Vec::new();
    for node in document.tree.nodes() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skipped = node
            .parent()
            .and_then(|parent| parent.value().as_element().map(|el| el.name().to_string()))
            .is_some_and(|name| name == "script" || name == "style");
        if skipped {
            continue;
        }
        for token in text.split_whitespace() {
            if let Some(word) = sanitize_word(token) {
                words.push(word);
            }
        }
    }
    words
}

/// Extract the absolute `http(s)` link targets of an HTML page.
pub fn extract_links(page: &str) -> Vec<String> {
    let document = Html::parse_document(page);
    let selector = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };
    document
        .select(&selector)
        .filter_map(|element| element.value().attr("href"))
        .filter(|href| is_valid_url(href))
        .map(str::to_string)
        .collect()
}

/// Whether `raw` parses as an absolute http(s) URL with a host.
fn is_valid_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => {
            (url.scheme() == "http" || url.scheme() == "https") && url.host_str().is_some()
        }
        Err(_) => false,
    }
}

fn sanitize_word(token: &str) -> Option<String> {
    let word = token
        .trim_start_matches(|c: char| !c.is_alphabetic())
        .trim_end_matches(|c: char| !c.is_alphabetic());
    if word.is_empty() || word.chars().any(|c| !c.is_alphabetic()) {
        return None;
    }
    Some(word.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <!doctype html>
        <html>
          <head>
            <title>Example title</title>
            <style>body { color: red; }</style>
            <script>var skipped = "entirely";</script>
          </head>
          <body>
            <p>Hello, World &amp; friends!</p>
            <a href="https://go.dev">valid</a>
            <a href="/relative">relative</a>
            <a href="godoc.org">schemeless</a>
          </body>
        </html>
    "#;

    #[test]
    fn extracts_sanitized_lowercase_words() {
        let words = extract_words(PAGE);
        assert!(words.contains(&"example".to_string()));
        assert!(words.contains(&"hello".to_string()));
        assert!(words.contains(&"world".to_string()));
        assert!(words.contains(&"friends".to_string()));
        // Script and style bodies never leak into the word stream.
        assert!(!words.iter().any(|w| w == "skipped" || w == "color"));
    }

    #[test]
    fn extracts_only_absolute_http_links() {
        assert_eq!(extract_links(PAGE), vec!["https://go.dev".to_string()]);
    }

    #[test]
    fn url_validation() {
        assert!(is_valid_url("https://go.dev"));
        assert!(is_valid_url("http://godoc.org"));
        assert!(!is_valid_url("https//go.dev"));
        assert!(!is_valid_url("godoc.org"));
        assert!(!is_valid_url("godoc"));
    }
}
