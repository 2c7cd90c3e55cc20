//! Minimal case-insensitive header carrier used by `update_from_headers`.
//!
//! This crate has no HTTP dependency; callers adapt whatever header map
//! their transport uses into a [`Headers`] with [`Headers::from_pairs`].

use std::collections::HashMap;

/// A small, case-insensitive bag of header name/value pairs.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    values: HashMap<String, String>,
}

impl Headers {
    /// Builds a [`Headers`] from `(name, value)` pairs. Names are
    /// lowercased for lookup.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into().to_ascii_lowercase(), v.into()))
                .collect(),
        }
    }

    /// Looks up a header by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Parsed `X-RateLimit-*` header values. Every field is best-effort: a
/// missing or unparseable header leaves the corresponding field `None`,
/// and parsing never fails (spec §4.4: "parsing failures are non-fatal").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// `X-RateLimit-Limit`.
    pub limit: Option<u64>,
    /// `X-RateLimit-Remaining`.
    pub remaining: Option<u64>,
    /// `X-RateLimit-Reset-After`, in seconds.
    pub reset_after_secs: Option<f64>,
    /// `X-RateLimit-Global`.
    pub global: bool,
    /// `X-RateLimit-Bucket`.
    pub bucket: Option<String>,
}

impl RateLimitHeaders {
    /// Parses the subset of `X-RateLimit-*` headers this limiter acts on.
    pub fn parse(headers: &Headers) -> Self {
        Self {
            limit: headers.get("x-ratelimit-limit").and_then(|v| v.parse().ok()),
            remaining: headers.get("x-ratelimit-remaining").and_then(|v| v.parse().ok()),
            reset_after_secs: headers.get("x-ratelimit-reset-after").and_then(|v| v.parse().ok()),
            global: headers
                .get("x-ratelimit-global")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            bucket: headers.get("x-ratelimit-bucket").map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_headers() {
        let headers = Headers::from_pairs([
            ("X-RateLimit-Limit", "10"),
            ("X-RateLimit-Remaining", "3"),
            ("X-RateLimit-Reset-After", "1.5"),
            ("X-RateLimit-Global", "true"),
            ("X-RateLimit-Bucket", "abc123"),
        ]);
        let parsed = RateLimitHeaders::parse(&headers);
        assert_eq!(parsed.limit, Some(10));
        assert_eq!(parsed.remaining, Some(3));
        assert_eq!(parsed.reset_after_secs, Some(1.5));
        assert!(parsed.global);
        assert_eq!(parsed.bucket.as_deref(), Some("abc123"));
    }

    #[test]
    fn malformed_values_are_non_fatal() {
        let headers = Headers::from_pairs([("X-RateLimit-Limit", "not-a-number")]);
        let parsed = RateLimitHeaders::parse(&headers);
        assert_eq!(parsed.limit, None);
    }

    #[test]
    fn missing_headers_default_to_absent() {
        let headers = Headers::from_pairs::<_, &str, &str>([]);
        let parsed = RateLimitHeaders::parse(&headers);
        assert_eq!(parsed, RateLimitHeaders::default());
    }
}
