//! Shared HTTP utilities for the smartlink workspace.
//!
//! Provides common response builders, click-context normalization helpers,
//! and time utilities used by api-server.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::SystemTime;

// ============================================================================
// JSON Response Helpers (framework-agnostic)
// ============================================================================

/// Create a structured error JSON with a default message based on the code.
///
/// Returns: `{"error": {"code": "<code>", "message": "<default message>"}}`
pub fn json_err(code: &str) -> serde_json::Value {
    let message = match code {
        "not_found" => "Resource not found",
        "bad_request" => "Bad request",
        "invalid_link_id" => "Invalid link id format",
        "unauthorized" => "Authentication required",
        "forbidden" => "Access denied",
        "expired" => "Link is no longer active",
        "no_match" => "No target matched this request",
        "error" | "internal" => "Internal server error",
        _ => code, // Fallback to code as message for unknown codes
    };
    serde_json::json!({"error": {"code": code, "message": message}})
}

/// Create a structured error JSON with a custom message.
///
/// Returns: `{"error": {"code": "<code>", "message": "<message>"}}`
pub fn json_error_with_message(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({"error": {"code": code, "message": message}})
}

// ============================================================================
// Click Context Normalization
// ============================================================================

/// Parse an `Accept-Language` header value and return the primary language
/// code. Example: `"en-US,en;q=0.9,de;q=0.8"` -> `"en"`.
pub fn parse_language(accept_language: Option<&str>) -> Option<String> {
    let header = accept_language?;
    let prefix: String = header
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .take(2)
        .collect();
    if prefix.len() == 2 {
        Some(prefix.to_ascii_lowercase())
    } else {
        None
    }
}

/// Classify a `User-Agent` header value as `mobile`, `tablet`, or `desktop`.
///
/// Simple substring heuristic; an absent header counts as desktop (curl,
/// monitoring probes and the like).
pub fn parse_device(user_agent: Option<&str>) -> String {
    let ua = match user_agent {
        Some(v) => v.to_ascii_lowercase(),
        None => return "desktop".to_string(),
    };
    if ua.contains("mobile") || ua.contains("android") || ua.contains("iphone") || ua.contains("ipod")
    {
        return "mobile".to_string();
    }
    if ua.contains("tablet") || ua.contains("ipad") {
        return "tablet".to_string();
    }
    "desktop".to_string()
}

// ============================================================================
// Time Utilities
// ============================================================================

/// Convert SystemTime to RFC3339 string (seconds precision, UTC).
pub fn system_time_to_rfc3339(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC3339 string to SystemTime.
///
/// Returns an error if the string is not a valid RFC3339 timestamp.
pub fn rfc3339_to_system_time(s: &str) -> Result<SystemTime, chrono::ParseError> {
    let dt = DateTime::parse_from_rfc3339(s)?;
    Ok(dt.with_timezone(&Utc).into())
}

/// Parse an RFC3339 string to SystemTime (alias for ergonomic use).
pub fn parse_rfc3339(s: &str) -> Result<SystemTime, chrono::ParseError> {
    rfc3339_to_system_time(s)
}

/// Generate a unique ID string.
///
/// Combines a millisecond timestamp, a per-process sequence number, and a
/// mixed hex component. The sequence number guarantees distinct ids even
/// when many are generated within the same millisecond (episode ids key one
/// row per click).
/// Format: `{timestamp_hex}_{seq_hex}_{mixed_hex}` (e.g., "18d4f1234_2a_a3b2c1d4")
pub fn generate_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);

    // Simple mixing step; uniqueness comes from the timestamp + sequence.
    let mixed: u32 = ((timestamp ^ seq ^ 0xDEAD_BEEF) as u32)
        .wrapping_mul(1103515245)
        .wrapping_add(12345);

    format!("{:x}_{:x}_{:08x}", timestamp, seq, mixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_err() {
        let err = json_err("not_found");
        assert_eq!(err, serde_json::json!({"error": {"code": "not_found", "message": "Resource not found"}}));

        // Unknown code falls back to code as message
        let err = json_err("custom_error");
        assert_eq!(err, serde_json::json!({"error": {"code": "custom_error", "message": "custom_error"}}));
    }

    #[test]
    fn test_json_error_with_message() {
        let err = json_error_with_message("bad_request", "Invalid input");
        assert_eq!(
            err,
            serde_json::json!({"error": {"code": "bad_request", "message": "Invalid input"}})
        );
    }

    #[test]
    fn test_parse_language() {
        assert_eq!(
            parse_language(Some("en-US,en;q=0.9,de;q=0.8")),
            Some("en".to_string())
        );
        assert_eq!(parse_language(Some("DE")), Some("de".to_string()));
        assert_eq!(parse_language(Some("*")), None);
        assert_eq!(parse_language(None), None);
    }

    #[test]
    fn test_parse_device() {
        assert_eq!(
            parse_device(Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)")),
            "mobile"
        );
        assert_eq!(
            parse_device(Some("Mozilla/5.0 (Linux; Android 14) Mobile Safari")),
            "mobile"
        );
        assert_eq!(parse_device(Some("Mozilla/5.0 (iPad; CPU OS 17_0)")), "tablet");
        assert_eq!(
            parse_device(Some("Mozilla/5.0 (X11; Linux x86_64) Firefox/130.0")),
            "desktop"
        );
        // Absent user agent counts as desktop
        assert_eq!(parse_device(None), "desktop");
    }

    #[test]
    fn test_generate_id_unique_within_millisecond() {
        // Back-to-back calls land in the same millisecond; the sequence
        // number must still keep the ids distinct.
        assert_ne!(generate_id(), generate_id());

        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(generate_id()), "duplicate id generated");
        }
    }

    #[test]
    fn test_rfc3339_round_trip() {
        let t = rfc3339_to_system_time("2026-03-01T12:00:00Z").unwrap();
        assert_eq!(system_time_to_rfc3339(t), "2026-03-01T12:00:00Z");
        assert!(rfc3339_to_system_time("not a timestamp").is_err());
    }

}
