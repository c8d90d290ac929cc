use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::{PortalError, PortalResult};

pub(crate) fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Pretty JSON with a four-space indent, the layout of downloaded files.
/// Non-ASCII characters are written as `\uXXXX` escapes.
pub(crate) fn to_json_indented<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(escape_non_ascii(&String::from_utf8_lossy(&buf)))
}

// Outside string literals serialized JSON is pure ASCII, so every non-ASCII
// character sits inside a string and can be escaped in place.
fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut units = [0u16; 2];
    for ch in json.chars() {
        if ch.is_ascii() {
            out.push(ch);
            continue;
        }
        for unit in ch.encode_utf16(&mut units) {
            out.push_str(&format!("\\u{unit:04x}"));
        }
    }
    out
}

/// `days` days before `now`.
pub(crate) fn days_before(now: DateTime<Utc>, days: i64) -> PortalResult<DateTime<Utc>> {
    TimeDelta::try_days(days)
        .and_then(|delta| now.checked_sub_signed(delta))
        .ok_or_else(|| PortalError::OutOfRange {
            what: "days",
            value: days.to_string(),
        })
}

/// Cache lifetime from a configured number of seconds.
pub(crate) fn ttl_from_secs(secs: u64) -> PortalResult<TimeDelta> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| PortalError::OutOfRange {
            what: "cache seconds",
            value: secs.to_string(),
        })
}

/// First language tag of an `Accept-Language` header value.
pub(crate) fn primary_language(accept_language: &str) -> Option<&str> {
    accept_language
        .split(',')
        .next()
        .and_then(|tag| tag.split(';').next())
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && *tag != "*")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn indented_json_uses_four_spaces() {
        let text = to_json_indented(&vec![("Health", 3)]).unwrap();
        assert_eq!(text, "[\n    [\n        \"Health\",\n        3\n    ]\n]");
    }

    #[test]
    fn indented_json_escapes_non_ascii() {
        let text = to_json_indented(&vec![("Tax\u{6c49}", 1), ("\u{1f600}", 2)]).unwrap();
        assert_eq!(
            text,
            "[\n    [\n        \"Tax\\u6c49\",\n        1\n    ],\n    [\n        \"\\ud83d\\ude00\",\n        2\n    ]\n]"
        );
        let back: Vec<(String, i64)> = serde_json::from_str(&text).unwrap();
        assert_eq!(back[0].0, "Tax\u{6c49}");
    }

    #[test]
    fn days_before_rejects_huge_windows() {
        let now = Utc::now();
        assert_eq!(days_before(now, 2).unwrap(), now - TimeDelta::days(2));
        assert!(matches!(
            days_before(now, i64::MAX),
            Err(PortalError::OutOfRange { what: "days", .. })
        ));
        assert!(matches!(
            days_before(now, 100_000_000),
            Err(PortalError::OutOfRange { .. })
        ));
    }

    #[test]
    fn ttl_rejects_huge_values() {
        assert_eq!(ttl_from_secs(300).unwrap(), TimeDelta::minutes(5));
        assert!(matches!(
            ttl_from_secs(u64::MAX),
            Err(PortalError::OutOfRange { what: "cache seconds", .. })
        ));
    }

    #[test]
    fn language_from_header() {
        assert_eq!(primary_language("fr-BE,fr;q=0.8,en;q=0.5"), Some("fr-BE"));
        assert_eq!(primary_language("de;q=0.9"), Some("de"));
        assert_eq!(primary_language("*"), None);
        assert_eq!(primary_language(""), None);
    }
}
