use anyhow::{Context, Result};
use chrono::DateTime;
use serde_json::Value;

/// Millisecond timestamp rendered in UTC, the zone cron schedules use.
pub fn format_timestamp(timestamp: Option<i64>) -> String {
    timestamp
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let head: String = s.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

pub fn parse_schema(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("--schema must be valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(None), "-");
        assert_eq!(format_timestamp(Some(0)), "1970-01-01 00:00:00 UTC");
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn test_parse_schema() {
        assert!(parse_schema(r#"{"type":"object"}"#).is_ok());
        assert!(parse_schema("{not json").is_err());
    }
}
