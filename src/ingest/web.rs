// src/ingest/web.rs
//! Link extraction for sites without a usable feed.
//!
//! Pulls `<a href>` anchors out of the page, keeps same-host links whose path
//! looks like a post, and falls back to every anchor when that heuristic
//! finds nothing. Each link carries a short snippet from the text that follows
//! it. Pages behind anti-bot interstitials fail the sub-source; good pages are
//! kept in a [`PageCache`] for a day so repeated runs don't re-scrape them.

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use once_cell::sync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::analyze::dedup::normalize_url;
use crate::http::{FetchClient, PageCache};
use crate::ingest::types::{Signal, SourceKind};
use crate::ingest::{normalize_text, truncate_chars};

pub const MIN_ANCHOR_TEXT: usize = 8;
pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_SNIPPET_CHARS: usize = 240;
const MIN_SNIPPET_CHARS: usize = 30;
/// How far past an anchor the snippet search looks.
const SNIPPET_WINDOW_BYTES: usize = 2_000;
/// Interstitial markers only count near the top of the document.
pub const BLOCK_SCAN_CHARS: usize = 5_000;

const POST_PATH_HINTS: &[&str] = &[
    "blog", "post", "posts", "updates", "news", "announc", "grants", "article",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedLink {
    pub title: String,
    pub url: String,
    /// First paragraph-ish text after the anchor, empty when none qualifies.
    pub snippet: String,
}

/// Enforces a minimum gap between requests to the same host.
#[derive(Debug)]
pub struct DomainPacer {
    min_gap: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl DomainPacer {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve the next slot for `host` and sleep until it opens.
    pub async fn wait(&self, host: &str) {
        let wait_until = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.get(host).copied().filter(|t| *t > now).unwrap_or(now);
            slots.insert(host.to_string(), slot + self.min_gap);
            slot
        };
        tokio::time::sleep_until(wait_until).await;
    }
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_ascii_lowercase()))
}

pub fn looks_like_feed(body: &str) -> bool {
    let head: String = body
        .trim_start()
        .chars()
        .take(200)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<?xml") || head.starts_with("<rss") || head.starts_with("<feed")
}

/// Challenge pages: a "just a moment" / "attention required" title, or the
/// challenge script and form markers, within the first [`BLOCK_SCAN_CHARS`].
/// Ordinary `/cdn-cgi/` links (e.g. email protection) don't count.
pub fn looks_blocked(body: &str) -> bool {
    static RE_TITLE: OnceCell<regex::Regex> = OnceCell::new();
    let re_title =
        RE_TITLE.get_or_init(|| regex::Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

    let head: String = body.chars().take(BLOCK_SCAN_CHARS).collect::<String>().to_lowercase();
    let title = re_title
        .captures(&head)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or_default();

    title.contains("just a moment")
        || title.contains("attention required")
        || head.contains("cf-browser-verification")
        || head.contains("/cdn-cgi/challenge-platform")
        || head.contains("id=\"challenge-form\"")
        || (head.contains("captcha") && head.contains("cloudflare"))
}

/// Paragraph or span text after `from`, up to the next anchor or the end of
/// the enclosing list item / card, whichever comes first.
fn snippet_after(html: &str, from: usize, title: &str) -> String {
    static RE_NEXT_ANCHOR: OnceCell<regex::Regex> = OnceCell::new();
    static RE_BLOCK: OnceCell<regex::Regex> = OnceCell::new();
    let re_next = RE_NEXT_ANCHOR.get_or_init(|| {
        regex::Regex::new(r"(?i)<a\b|</(?:li|article|div|section)\s*>").unwrap()
    });
    let re_block = RE_BLOCK.get_or_init(|| {
        regex::Regex::new(r"(?is)<(?:p|span)\b[^>]*>(.*?)</(?:p|span)>").unwrap()
    });

    let rest = &html[from..];
    let mut end = rest.len().min(SNIPPET_WINDOW_BYTES);
    while !rest.is_char_boundary(end) {
        end -= 1;
    }
    let mut window = &rest[..end];
    if let Some(m) = re_next.find(window) {
        window = &window[..m.start()];
    }

    re_block
        .captures_iter(window)
        .take(3)
        .filter_map(|c| c.get(1))
        .map(|m| normalize_text(m.as_str()))
        .find(|t| t.chars().count() >= MIN_SNIPPET_CHARS && t != title)
        .map(|t| truncate_chars(&t, MAX_SNIPPET_CHARS))
        .unwrap_or_default()
}

fn looks_like_post(link: &url::Url) -> bool {
    let path = link.path().to_ascii_lowercase();
    path.len() > 1 && POST_PATH_HINTS.iter().any(|h| path.contains(h))
}

/// Pure extraction step over an already fetched page.
pub fn extract_links(html: &str, page_url: &str, max_items: usize) -> Vec<ScrapedLink> {
    static RE_STRIP: OnceCell<regex::Regex> = OnceCell::new();
    static RE_ANCHOR: OnceCell<regex::Regex> = OnceCell::new();
    let re_strip = RE_STRIP.get_or_init(|| {
        regex::Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<!--.*?-->").unwrap()
    });
    let re_anchor = RE_ANCHOR.get_or_init(|| {
        regex::Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap()
    });

    let Ok(base) = url::Url::parse(page_url) else {
        return Vec::new();
    };
    let base_host = host_of(page_url);
    let cleaned = re_strip.replace_all(html, " ");

    let mut seen = HashSet::new();
    let mut all = Vec::new();
    let mut posts = Vec::new();

    for cap in re_anchor.captures_iter(&cleaned) {
        let href = cap.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let lower = href.to_ascii_lowercase();
        if href.is_empty()
            || href.starts_with('#')
            || lower.starts_with("mailto:")
            || lower.starts_with("javascript:")
            || lower.starts_with("tel:")
        {
            continue;
        }

        let text = normalize_text(cap.get(2).map(|m| m.as_str()).unwrap_or_default());
        if text.chars().count() < MIN_ANCHOR_TEXT {
            continue;
        }

        let Ok(abs) = base.join(href) else {
            continue;
        };
        if !matches!(abs.scheme(), "http" | "https") {
            continue;
        }
        let canonical = normalize_url(abs.as_str());
        if !seen.insert(canonical.clone()) {
            continue;
        }

        let end = cap.get(0).map(|m| m.end()).unwrap_or(cleaned.len());
        let link = ScrapedLink {
            snippet: snippet_after(&cleaned, end, &text),
            title: truncate_chars(&text, MAX_TITLE_CHARS),
            url: canonical,
        };
        let same_host = host_of(abs.as_str()) == base_host;
        if same_host && looks_like_post(&abs) {
            posts.push(link.clone());
        }
        all.push(link);
    }

    let mut chosen = if posts.is_empty() { all } else { posts };
    chosen.truncate(max_items);
    chosen
}

/// Everything a scrape needs besides the page itself.
pub struct PageFetcher<'a> {
    pub client: &'a FetchClient,
    pub pacer: &'a DomainPacer,
    pub cache: Option<&'a dyn PageCache>,
    pub cache_ttl: chrono::Duration,
}

impl PageFetcher<'_> {
    /// Cached body if still fresh, else a paced fetch that is checked for
    /// feeds and interstitials before it is cached. `Ok(None)` means the URL
    /// serves a feed, not a page.
    pub async fn fetch_page(&self, page_url: &str) -> Result<Option<String>> {
        if let Some(cache) = self.cache {
            if let Some(html) = cache.get_page(page_url, self.cache_ttl).await {
                debug!(target: "ingest", url = page_url, "page served from cache");
                return Ok(Some(html));
            }
        }

        if let Some(host) = host_of(page_url) {
            self.pacer.wait(&host).await;
        }
        let html = self
            .client
            .get_text(
                page_url,
                &[("Accept", "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")],
                &[],
            )
            .await?;

        if looks_like_feed(&html) {
            return Ok(None);
        }
        if looks_blocked(&html) {
            return Err(anyhow!("blocked by anti-bot interstitial"));
        }
        if let Some(cache) = self.cache {
            cache.put_page(page_url, &html).await;
        }
        Ok(Some(html))
    }
}

/// Fetch a page and turn its post links into signals.
pub async fn scrape_page(
    fetcher: &PageFetcher<'_>,
    page_url: &str,
    max_items: usize,
    source: SourceKind,
    now: NaiveDateTime,
) -> Result<Vec<Signal>> {
    let Some(html) = fetcher.fetch_page(page_url).await? else {
        return Ok(Vec::new());
    };

    Ok(extract_links(&html, page_url, max_items)
        .into_iter()
        .map(|l| {
            Signal::new(source, page_url)
                .with_content(l.title, l.snippet, l.url)
                .published(Some(now))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
<html><head><script>var a = "<a href='/blog/fake'>Script link text</a>";</script></head>
<body>
  <nav><a href="/about">About the foundation</a></nav>
  <a href="#top">Back to top of page</a>
  <a href="mailto:hi@example.com">Email the team today</a>
  <a href="/blog/stage-1?utm_source=home#c">Optimism reaches <b>Stage 1</b></a>
  <a href="https://example.com/blog/stage-1">Optimism reaches Stage 1 again</a>
  <a href="/news/x">Short</a>
  <a href="https://other.org/blog/elsewhere">Cross-domain blog post</a>
  <a href='/posts/superchain'>Superchain interop update</a>
</body></html>"##;

    #[test]
    fn keeps_same_host_post_links() {
        let links = extract_links(PAGE, "https://www.example.com/", 10);
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.example.com/blog/stage-1",
                "https://example.com/blog/stage-1",
                "https://www.example.com/posts/superchain",
            ]
        );
        assert_eq!(links[0].title, "Optimism reaches Stage 1");
    }

    #[test]
    fn falls_back_to_all_anchors() {
        let html = r#"<a href="/team">Meet the whole team</a><a href="/careers">Open positions here</a>"#;
        let links = extract_links(html, "https://example.com/", 10);
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn caps_items() {
        let links = extract_links(PAGE, "https://www.example.com/", 1);
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn detects_interstitials_and_feeds() {
        assert!(looks_blocked("<title>Just a moment...</title>"));
        assert!(looks_blocked(
            "<script src=\"/cdn-cgi/challenge-platform/h/b/orchestrate/jsch/v1\"></script>"
        ));
        assert!(looks_blocked("<div id=\"cf-browser-verification\"></div>"));
        assert!(!looks_blocked("<html>regular page</html>"));
        assert!(looks_like_feed("  <?xml version=\"1.0\"?><rss>"));
        assert!(!looks_like_feed("<!doctype html>"));
    }

    #[test]
    fn ordinary_cloudflare_pages_are_not_blocked() {
        let page = r#"<html><head><title>Rollup weekly</title></head><body>
            <article><p>Just a moment ago the sequencer upgrade went live.</p></article>
            <footer><a href="/cdn-cgi/l/email-protection#abc">[email&#160;protected]</a></footer>
            </body></html>"#;
        assert!(!looks_blocked(page));

        // markers past the scanned head are ignored
        let late = format!("<p>{}</p><div id=\"cf-browser-verification\"></div>", "x".repeat(BLOCK_SCAN_CHARS));
        assert!(!looks_blocked(&late));
    }

    #[test]
    fn snippet_comes_from_following_text() {
        let html = r#"
          <li><a href="/blog/zk">ZK prover upgrade announced</a>
              <span>3 min</span>
              <p>The prover now verifies recursive proofs in under a second on commodity GPUs.</p></li>
          <li><a href="/blog/grants">Grants round three opens</a></li>
          <li><p>Orphan paragraph that belongs to no link at all, long enough.</p></li>"#;
        let links = extract_links(html, "https://example.com/", 10);
        assert_eq!(links.len(), 2);
        assert_eq!(
            links[0].snippet,
            "The prover now verifies recursive proofs in under a second on commodity GPUs."
        );
        assert_eq!(links[1].snippet, "", "text outside the link's item is not borrowed");

        let long = format!(r#"<a href="/blog/a">A long enough title</a><p>{}</p>"#, "word ".repeat(100));
        let links = extract_links(&long, "https://example.com/", 10);
        assert_eq!(links[0].snippet.chars().count(), MAX_SNIPPET_CHARS);
    }

    #[tokio::test]
    async fn pacer_spaces_same_host() {
        let pacer = DomainPacer::new(Duration::from_millis(80));
        let t0 = Instant::now();
        pacer.wait("a.com").await;
        pacer.wait("b.com").await;
        assert!(t0.elapsed() < Duration::from_millis(80));
        pacer.wait("a.com").await;
        assert!(t0.elapsed() >= Duration::from_millis(80));
    }
}
