// src/ingest/api_sources.rs
//! Named REST/GraphQL sub-sources used by the news, funding and ecosystem adapters.

use anyhow::Result;
use chrono::NaiveDateTime;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::config::Endpoints;
use crate::http::FetchClient;
use crate::ingest::envelope::{date_field, str_field, Envelope, PublishedAt, DEFAULT_WRAPPER_KEYS};
use crate::ingest::truncate_chars;
use crate::ingest::types::{Signal, SourceKind};

pub const CRYPTOCURRENCY_CV: &str = "cryptocurrency_cv";
pub const COINMARKETCAP_POSTS: &str = "coinmarketcap_posts_latest";
pub const DEFILLAMA_RAISES: &str = "defillama_raises";
pub const SNAPSHOT_PROPOSALS: &str = "snapshot_proposals";

const SNAPSHOT_BODY_MAX: usize = 8000;
const DEFILLAMA_FALLBACK_URL: &str = "https://defillama.com/raises";

const SNAPSHOT_QUERY: &str = r#"
query Proposals($spaces: [String!], $created_gte: Int!) {
  proposals(first: 50, where: { space_in: $spaces, created_gte: $created_gte }, orderBy: "created", orderDirection: desc) {
    id
    title
    body
    created
    link
    space { id }
  }
}
"#;

/// Records inside the window. Undated records are dropped: without a date an
/// API item can't be placed in the rolling window.
fn dated_in_window<'a>(
    records: Vec<Map<String, Value>>,
    date_keys: &'a [&'a str],
    since: NaiveDateTime,
) -> impl Iterator<Item = (Map<String, Value>, PublishedAt)> + 'a {
    records.into_iter().filter_map(move |rec| {
        let at = date_field(&rec, date_keys)?;
        at.covers_since(since).then_some((rec, at))
    })
}

pub async fn news_from_cryptocurrency_cv(
    client: &FetchClient,
    endpoints: &Endpoints,
    since: NaiveDateTime,
) -> Result<Vec<Signal>> {
    let payload = client
        .get_json(&endpoints.cryptocurrency_cv, &[], &[])
        .await?;
    let records = Envelope::negotiate(payload, DEFAULT_WRAPPER_KEYS).into_records(CRYPTOCURRENCY_CV);

    Ok(
        dated_in_window(records, &["published_at", "created_at", "updated_at"], since)
            .map(|(rec, at)| {
                Signal::new(SourceKind::News, CRYPTOCURRENCY_CV)
                    .with_content(
                        str_field(&rec, &["title"]).unwrap_or_default(),
                        str_field(&rec, &["description", "body"]).unwrap_or_default(),
                        str_field(&rec, &["url", "link"]).unwrap_or_default(),
                    )
                    .published(Some(at.timestamp()))
            })
            .collect(),
    )
}

/// Needs an API key; without one the sub-source is disabled.
pub async fn news_from_coinmarketcap(
    client: &FetchClient,
    endpoints: &Endpoints,
    since: NaiveDateTime,
    api_key: Option<&str>,
) -> Result<Vec<Signal>> {
    let Some(key) = api_key.filter(|k| !k.is_empty()) else {
        info!(target: "ingest", "CoinMarketCap API disabled (missing COINMARKETCAP_API_KEY)");
        return Ok(Vec::new());
    };
    let payload = client
        .get_json(
            &endpoints.coinmarketcap_posts,
            &[("X-CMC_PRO_API_KEY", key)],
            &[],
        )
        .await?;
    let records = Envelope::negotiate(payload, &["data"]).into_records(COINMARKETCAP_POSTS);

    Ok(dated_in_window(records, &["created_at", "released_at"], since)
        .map(|(rec, at)| {
            Signal::new(SourceKind::News, COINMARKETCAP_POSTS)
                .with_content(
                    str_field(&rec, &["title"]).unwrap_or_default(),
                    str_field(&rec, &["subtitle", "meta"]).unwrap_or_default(),
                    str_field(&rec, &["url", "source_url"]).unwrap_or_default(),
                )
                .published(Some(at.timestamp()))
        })
        .collect())
}

pub async fn funding_from_defillama_raises(
    client: &FetchClient,
    endpoints: &Endpoints,
    since: NaiveDateTime,
) -> Result<Vec<Signal>> {
    let payload = client.get_json(&endpoints.defillama_raises, &[], &[]).await?;
    let records = Envelope::negotiate(payload, &["raises", "articles", "data", "results"])
        .into_records(DEFILLAMA_RAISES);

    Ok(dated_in_window(records, &["date", "announcedAt"], since)
        .map(|(rec, at)| raise_to_signal(&rec, at))
        .collect())
}

fn raise_to_signal(rec: &Map<String, Value>, at: PublishedAt) -> Signal {
    let name = str_field(rec, &["name", "project"]).unwrap_or_default();
    let mut title = format!("Funding: {name}");
    if let Some(round) = str_field(rec, &["round"]) {
        title.push_str(&format!(" ({round})"));
    }
    let description = str_field(rec, &["amount", "amountUsd"])
        .map(|a| format!("Amount: {a}"))
        .unwrap_or_default();
    let url = str_field(rec, &["link", "url"]).unwrap_or_else(|| DEFILLAMA_FALLBACK_URL.to_string());

    let mut s = Signal::new(SourceKind::Funding, DEFILLAMA_RAISES)
        .with_content(title, description, url)
        .published(Some(at.timestamp()));
    s.external_id = str_field(rec, &["id", "defillamaId"]);
    s
}

pub async fn governance_from_snapshot(
    client: &FetchClient,
    endpoints: &Endpoints,
    since: NaiveDateTime,
    spaces: &[String],
) -> Result<Vec<Signal>> {
    if spaces.is_empty() {
        return Ok(Vec::new());
    }
    let body = json!({
        "query": SNAPSHOT_QUERY,
        "variables": {
            "spaces": spaces,
            "created_gte": since.and_utc().timestamp(),
        }
    });
    let payload = client.post_json(&endpoints.snapshot_graphql, &body, &[]).await?;
    let proposals = payload
        .get("data")
        .and_then(|d| d.get("proposals"))
        .cloned()
        .unwrap_or(Value::Null);
    let records = Envelope::negotiate(proposals, &[]).into_records(SNAPSHOT_PROPOSALS);

    Ok(dated_in_window(records, &["created"], since)
        .map(|(rec, at)| {
            let space = rec
                .get("space")
                .and_then(|s| s.get("id"))
                .and_then(Value::as_str)
                .unwrap_or("snapshot")
                .to_string();
            let title = str_field(&rec, &["title"]).unwrap_or_default();
            let body = str_field(&rec, &["body"]).unwrap_or_default();
            let mut s = Signal::new(SourceKind::Ecosystem, SNAPSHOT_PROPOSALS)
                .with_content(
                    format!("Governance ({space}): {title}"),
                    truncate_chars(&body, SNAPSHOT_BODY_MAX),
                    str_field(&rec, &["link"]).unwrap_or_default(),
                )
                .published(Some(at.timestamp()));
            s.external_id = str_field(&rec, &["id"]);
            s
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn raise_title_and_fallback_url() {
        let rec = json!({"name": "Acme", "round": "Seed", "amount": 12, "date": "2024-01-05"});
        let Value::Object(map) = rec else { unreachable!() };
        let when = date_field(&map, &["date"]).unwrap();
        let s = raise_to_signal(&map, when);
        assert_eq!(s.title, "Funding: Acme (Seed)");
        assert_eq!(s.description, "Amount: 12");
        assert_eq!(s.url, DEFILLAMA_FALLBACK_URL);
        assert_eq!(s.published_at, Some(at("2024-01-05T00:00:00")));
    }

    #[test]
    fn window_keeps_full_day_dates_and_drops_undated() {
        let recs: Vec<Map<String, Value>> = [
            json!({"name": "a", "date": "2024-01-05"}),
            json!({"name": "b", "date": "2024-01-04"}),
            json!({"name": "c"}),
            json!({"name": "d", "announcedAt": "2024-01-06T01:00:00Z"}),
        ]
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(m) => Some(m),
            _ => None,
        })
        .collect();
        let kept: Vec<String> = dated_in_window(recs, &["date", "announcedAt"], at("2024-01-05T23:00:00"))
            .filter_map(|(r, _)| str_field(&r, &["name"]))
            .collect();
        assert_eq!(kept, vec!["a", "d"]);
    }
}
