//! Serializes a container listing to plain text, JSON, or XML, and decides
//! which of the three a given request asked for.

use chrono::{
    SecondsFormat,
    TimeZone,
    Utc,
};
use container_broker::ListingRow;
use errors::ErrorMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Plain,
    Json,
    Xml,
}

impl Format {
    pub fn content_type(self) -> &'static str {
        match self {
            Format::Plain => "text/plain; charset=utf-8",
            Format::Json => "application/json; charset=utf-8",
            Format::Xml => "application/xml; charset=utf-8",
        }
    }
}

/// `?format=` wins outright; otherwise the first of `text/plain`,
/// `application/json`, `application/xml` that appears in `Accept` is used.
/// Anything else (including no signal at all) falls back to plain text,
/// matching the listing endpoint's historical default.
pub fn negotiate_format(query_format: Option<&str>, accept: Option<&str>) -> anyhow::Result<Format> {
    if let Some(q) = query_format {
        return match q {
            "plain" | "text" => Ok(Format::Plain),
            "json" => Ok(Format::Json),
            "xml" => Ok(Format::Xml),
            other => anyhow::bail!(ErrorMetadata::bad_request(
                "InvalidFormat",
                format!("unsupported format '{other}'"),
            )),
        };
    }
    if let Some(accept) = accept {
        if accept.contains("application/json") {
            return Ok(Format::Json);
        }
        if accept.contains("application/xml") {
            return Ok(Format::Xml);
        }
        if accept.contains("text/plain") {
            return Ok(Format::Plain);
        }
    }
    Ok(Format::Plain)
}

pub fn serialize(format: Format, container: &str, rows: &[ListingRow]) -> String {
    match format {
        Format::Plain => serialize_plain(rows),
        Format::Json => serialize_json(rows),
        Format::Xml => serialize_xml(container, rows),
    }
}

fn serialize_plain(rows: &[ListingRow]) -> String {
    let mut out = String::new();
    for row in rows {
        out.push_str(row.name());
        out.push('\n');
    }
    out
}

fn serialize_json(rows: &[ListingRow]) -> String {
    let values: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| match row {
            ListingRow::Object {
                name,
                created_at,
                size,
                content_type,
                etag,
            } => serde_json::json!({
                "name": name,
                "hash": etag,
                "bytes": size,
                "content_type": content_type,
                "last_modified": iso8601(*created_at),
            }),
            ListingRow::Subdir { name } => serde_json::json!({ "subdir": name }),
        })
        .collect();
    serde_json::to_string(&values).expect("listing rows always serialize")
}

fn serialize_xml(container: &str, rows: &[ListingRow]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!("<container name=\"{}\">\n", xml_escape(container)));
    for row in rows {
        match row {
            ListingRow::Object {
                name,
                created_at,
                size,
                content_type,
                etag,
            } => {
                out.push_str("<object>\n");
                out.push_str(&format!("<name>{}</name>\n", xml_escape(name)));
                out.push_str(&format!("<hash>{}</hash>\n", xml_escape(etag)));
                out.push_str(&format!("<bytes>{size}</bytes>\n"));
                out.push_str(&format!("<content_type>{}</content_type>\n", xml_escape(content_type)));
                out.push_str(&format!("<last_modified>{}</last_modified>\n", iso8601(*created_at)));
                out.push_str("</object>\n");
            },
            ListingRow::Subdir { name } => {
                out.push_str(&format!("<subdir name=\"{}\" />\n", xml_escape(name)));
            },
        }
    }
    out.push_str("</container>\n");
    out
}

fn iso8601(created_at: f64) -> String {
    let secs = created_at.trunc() as i64;
    let nanos = (created_at.fract() * 1e9).round() as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"))
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<ListingRow> {
        vec![
            ListingRow::Object {
                name: "a/1".to_string(),
                created_at: 1_700_000_000.0,
                size: 5,
                content_type: "text/plain".to_string(),
                etag: "abc".to_string(),
            },
            ListingRow::Subdir {
                name: "a/2/".to_string(),
            },
        ]
    }

    #[test]
    fn query_format_wins_over_accept() {
        let fmt = negotiate_format(Some("json"), Some("text/plain")).unwrap();
        assert_eq!(fmt, Format::Json);
    }

    #[test]
    fn accept_header_is_consulted_in_fixed_order() {
        assert_eq!(negotiate_format(None, Some("application/xml")).unwrap(), Format::Xml);
        assert_eq!(negotiate_format(None, Some("application/json")).unwrap(), Format::Json);
        assert_eq!(negotiate_format(None, None).unwrap(), Format::Plain);
    }

    #[test]
    fn unknown_query_format_is_rejected() {
        assert!(negotiate_format(Some("yaml"), None).is_err());
    }

    #[test]
    fn plain_listing_has_one_name_per_line() {
        assert_eq!(serialize_plain(&rows()), "a/1\na/2/\n");
    }

    #[test]
    fn json_listing_distinguishes_objects_and_subdirs() {
        let text = serialize_json(&rows());
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["bytes"], 5);
        assert_eq!(parsed[0]["hash"], "abc");
        assert_eq!(parsed[1]["subdir"], "a/2/");
    }

    #[test]
    fn xml_listing_escapes_special_characters() {
        let rows = vec![ListingRow::Object {
            name: "a&b".to_string(),
            created_at: 1.0,
            size: 1,
            content_type: "text/plain".to_string(),
            etag: "x".to_string(),
        }];
        let text = serialize_xml("cont", &rows);
        assert!(text.contains("<name>a&amp;b</name>"));
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
    }
}
