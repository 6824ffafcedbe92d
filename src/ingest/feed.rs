// src/ingest/feed.rs
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime};
use metrics::histogram;
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::http::{Conditional, FeedCache, FetchClient};
use crate::ingest::types::{Signal, SourceKind};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

/// RSS 1.0: items sit directly under `rdf:RDF`.
#[derive(Debug, Deserialize)]
struct Rdf {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "dc:date")]
    dc_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

/// Format-independent view of one feed entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published: Option<NaiveDateTime>,
}

/// Outcome of one RSS sub-source fetch.
#[derive(Debug, Default)]
pub struct FeedFetch {
    pub signals: Vec<Signal>,
    pub not_modified: bool,
}

/// RFC 2822 (RSS), RFC 3339 (Atom) and a few naive ISO variants, normalized to naive UTC.
pub fn parse_feed_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc2822) {
        return DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
            .map(|d| d.naive_utc());
    }
    // obsolete zone names (EST, PDT, ...) that `time` rejects
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(t);
        }
    }
    None
}

fn root_element(s: &str) -> Option<String> {
    static RE_ROOT: OnceCell<regex::Regex> = OnceCell::new();
    let re = RE_ROOT.get_or_init(|| regex::Regex::new(r"<([A-Za-z][\w:.\-]*)").unwrap());
    re.captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

fn looks_like_html(s: &str) -> bool {
    let head: String = s.trim_start().chars().take(256).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

/// Parse an RSS 2.0, RSS 1.0 or Atom document.
pub fn parse_feed(body: &str) -> Result<Vec<FeedEntry>> {
    let t0 = std::time::Instant::now();
    if looks_like_html(body) {
        return Err(anyhow!("not a feed: received an HTML page"));
    }
    let xml = scrub_html_entities_for_xml(body);
    let root = root_element(&xml).ok_or_else(|| anyhow!("not a feed: no root element"))?;

    let entries = match root.as_str() {
        "rss" => {
            let rss: Rss = from_str(&xml).context("parsing rss xml")?;
            rss.channel.items.into_iter().map(rss_entry).collect()
        }
        "rdf:rdf" => {
            let rdf: Rdf = from_str(&xml).context("parsing rdf xml")?;
            rdf.items.into_iter().map(rss_entry).collect()
        }
        "feed" => {
            let atom: AtomFeed = from_str(&xml).context("parsing atom xml")?;
            atom.entries.into_iter().map(atom_entry).collect()
        }
        other => return Err(anyhow!("not a feed: unexpected root <{other}>")),
    };

    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(entries)
}

fn rss_entry(it: RssItem) -> FeedEntry {
    let published = it
        .pub_date
        .as_deref()
        .or(it.dc_date.as_deref())
        .and_then(parse_feed_datetime);
    FeedEntry {
        title: it.title.unwrap_or_default(),
        link: it.link.unwrap_or_default().trim().to_string(),
        summary: it.description.unwrap_or_default(),
        published,
    }
}

fn atom_entry(e: AtomEntry) -> FeedEntry {
    let link = e
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| e.links.first())
        .and_then(|l| l.href.clone())
        .unwrap_or_default();
    let published = e
        .published
        .as_deref()
        .or(e.updated.as_deref())
        .and_then(parse_feed_datetime);
    let summary = e
        .summary
        .or(e.content)
        .map(|t| t.value)
        .unwrap_or_default();
    FeedEntry {
        title: e.title.map(|t| t.value).unwrap_or_default(),
        link: link.trim().to_string(),
        summary,
        published,
    }
}

/// Entries at or after `since` become signals. Undated entries are kept and
/// later stamped with the ingestion time.
pub fn entries_to_signals(
    entries: Vec<FeedEntry>,
    since: NaiveDateTime,
    source: SourceKind,
    feed_url: &str,
) -> Vec<Signal> {
    entries
        .into_iter()
        .filter(|e| e.published.map_or(true, |p| p >= since))
        .map(|e| {
            Signal::new(source, feed_url)
                .with_content(e.title, e.summary, e.link)
                .published(e.published)
        })
        .collect()
}

/// Conditional fetch + parse + window filter for one feed URL.
pub async fn fetch_feed_signals(
    client: &FetchClient,
    cache: Option<&dyn FeedCache>,
    feed_url: &str,
    since: NaiveDateTime,
    source: SourceKind,
) -> Result<FeedFetch> {
    match client.get_conditional(feed_url, cache).await? {
        Conditional::NotModified => Ok(FeedFetch {
            signals: Vec::new(),
            not_modified: true,
        }),
        Conditional::Modified(body) => {
            let entries = parse_feed(&body).with_context(|| format!("feed {feed_url}"))?;
            Ok(FeedFetch {
                signals: entries_to_signals(entries, since, source, feed_url),
                not_modified: false,
            })
        }
    }
}

/// quick-xml only knows the five XML entities; map common HTML ones first.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
