// src/ingest/envelope.rs
//! Schema negotiation for third-party JSON payloads.
//!
//! APIs disagree on whether they return a bare list or wrap it
//! (`{"articles": [...]}`, `{"data": [...]}`, `{"results": [...]}`).
//! [`Envelope::negotiate`] tries the known shapes in order and reports which
//! one matched; anything else becomes [`Envelope::Unrecognized`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Map, Value};
use tracing::warn;

pub const DEFAULT_WRAPPER_KEYS: &[&str] = &["articles", "data", "results"];

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    List(Vec<Value>),
    Wrapped { key: String, items: Vec<Value> },
    Unrecognized,
}

impl Envelope {
    pub fn negotiate(payload: Value, wrapper_keys: &[&str]) -> Self {
        match payload {
            Value::Array(items) => Envelope::List(items),
            Value::Object(mut map) => {
                for key in wrapper_keys {
                    if let Some(Value::Array(items)) = map.remove(*key) {
                        return Envelope::Wrapped {
                            key: key.to_string(),
                            items,
                        };
                    }
                }
                Envelope::Unrecognized
            }
            _ => Envelope::Unrecognized,
        }
    }

    /// Object records only; non-object entries are skipped.
    pub fn into_records(self, source: &str) -> Vec<Map<String, Value>> {
        let items = match self {
            Envelope::List(items) | Envelope::Wrapped { items, .. } => items,
            Envelope::Unrecognized => {
                warn!(target: "ingest", source, "unexpected payload shape, no records");
                return Vec::new();
            }
        };
        items
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(m) => Some(m),
                _ => None,
            })
            .collect()
    }
}

/// First non-empty string among `keys`.
pub fn str_field(rec: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match rec.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub fn u64_field(rec: &Map<String, Value>, key: &str) -> u64 {
    match rec.get(key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// A published time as precise as the upstream gave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishedAt {
    Instant(NaiveDateTime),
    /// Date without a time of day; covers the whole day.
    Day(NaiveDate),
}

impl PublishedAt {
    /// Inclusive window check. A bare date counts until the end of that day.
    pub fn covers_since(&self, since: NaiveDateTime) -> bool {
        match self {
            PublishedAt::Instant(t) => *t >= since,
            PublishedAt::Day(d) => end_of_day(*d) >= since,
        }
    }

    /// Stored timestamp: bare dates land on midnight.
    pub fn timestamp(&self) -> NaiveDateTime {
        match self {
            PublishedAt::Instant(t) => *t,
            PublishedAt::Day(d) => d.and_time(NaiveTime::MIN),
        }
    }
}

fn end_of_day(d: NaiveDate) -> NaiveDateTime {
    d.and_time(NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(NaiveTime::MIN))
}

/// Parse the date formats seen across the APIs: RFC 3339, naive ISO,
/// `YYYY-MM-DD`, or unix seconds (number or numeric string).
pub fn parse_api_datetime(v: &Value) -> Option<PublishedAt> {
    match v {
        Value::Number(n) => {
            let secs = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            from_unix(secs)
        }
        Value::String(s) => parse_api_datetime_str(s),
        _ => None,
    }
}

pub fn parse_api_datetime_str(s: &str) -> Option<PublishedAt> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(PublishedAt::Instant(dt.naive_utc()));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(PublishedAt::Instant(t));
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(PublishedAt::Day(d));
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return from_unix(s.parse().ok()?);
    }
    None
}

fn from_unix(secs: i64) -> Option<PublishedAt> {
    // millisecond timestamps
    let secs = if secs > 100_000_000_000 { secs / 1000 } else { secs };
    DateTime::from_timestamp(secs, 0).map(|dt| PublishedAt::Instant(dt.naive_utc()))
}

/// First parseable date among `keys`.
pub fn date_field(rec: &Map<String, Value>, keys: &[&str]) -> Option<PublishedAt> {
    keys.iter()
        .filter_map(|k| rec.get(*k))
        .find_map(parse_api_datetime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn negotiates_known_shapes() {
        let list = Envelope::negotiate(json!([{"a": 1}, 3]), DEFAULT_WRAPPER_KEYS);
        assert_eq!(list.into_records("t").len(), 1);

        let wrapped = Envelope::negotiate(json!({"data": [{"a": 1}, {"b": 2}]}), DEFAULT_WRAPPER_KEYS);
        assert!(matches!(&wrapped, Envelope::Wrapped { key, .. } if key == "data"));
        assert_eq!(wrapped.into_records("t").len(), 2);

        let odd = Envelope::negotiate(json!({"items": [{"a": 1}]}), DEFAULT_WRAPPER_KEYS);
        assert_eq!(odd, Envelope::Unrecognized);
        assert!(odd.into_records("t").is_empty());

        assert_eq!(
            Envelope::negotiate(json!("nope"), DEFAULT_WRAPPER_KEYS),
            Envelope::Unrecognized
        );
    }

    #[test]
    fn wrapper_key_order_is_respected() {
        let env = Envelope::negotiate(
            json!({"results": [{"r": 1}], "articles": [{"a": 1}]}),
            DEFAULT_WRAPPER_KEYS,
        );
        assert!(matches!(env, Envelope::Wrapped { key, .. } if key == "articles"));
    }

    #[test]
    fn date_only_covers_whole_day() {
        let d = parse_api_datetime(&json!("2024-01-05")).unwrap();
        assert!(matches!(d, PublishedAt::Day(_)));
        assert!(d.covers_since(at("2024-01-05T23:00:00")));
        assert!(!d.covers_since(at("2024-01-06T00:00:01")));
        assert_eq!(d.timestamp(), at("2024-01-05T00:00:00"));
    }

    #[test]
    fn parses_other_formats() {
        assert_eq!(
            parse_api_datetime(&json!("2024-01-05T10:00:00+02:00")).map(|p| p.timestamp()),
            Some(at("2024-01-05T08:00:00"))
        );
        assert_eq!(
            parse_api_datetime(&json!("2024-01-05T10:00:00.123Z")).map(|p| p.timestamp()),
            Some(at("2024-01-05T10:00:00") + chrono::Duration::milliseconds(123))
        );
        assert_eq!(
            parse_api_datetime(&json!(1704448800)).map(|p| p.timestamp()),
            Some(at("2024-01-05T10:00:00"))
        );
        assert_eq!(parse_api_datetime(&json!("soon")), None);
        assert_eq!(parse_api_datetime(&json!(null)), None);
    }
}
