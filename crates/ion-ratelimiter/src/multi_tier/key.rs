//! Route and resource key derivation for the multi-tier limiter (spec §4.4).

use std::collections::BTreeMap;

/// Replaces every run of decimal digits with the literal `{id}`, collapses
/// repeated slashes, and strips a trailing slash.
pub(super) fn normalize_endpoint(endpoint: &str) -> String {
    let mut out = String::with_capacity(endpoint.len());
    let mut chars = endpoint.chars().peekable();
    let mut prev_was_slash = false;

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            while matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
                chars.next();
            }
            out.push_str("{id}");
            prev_was_slash = false;
        } else if c == '/' {
            if !prev_was_slash {
                out.push('/');
            }
            prev_was_slash = true;
        } else {
            out.push(c);
            prev_was_slash = false;
        }
    }

    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Deterministic 64-bit FNV-1a hash of `params`' `key=value` pairs, fed in
/// lexicographic key order (guaranteed by the `BTreeMap` iteration order).
pub(super) fn hash_major_parameters(params: &BTreeMap<String, String>) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for (k, v) in params {
        for byte in k
            .bytes()
            .chain(std::iter::once(b'='))
            .chain(v.bytes())
            .chain(std::iter::once(b'&'))
        {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

/// The key used to look up a configured route pattern: `METHOD:/normalized/path`.
pub(super) fn match_key(method: &str, endpoint: &str) -> String {
    format!("{}:{}", method.to_ascii_uppercase(), normalize_endpoint(endpoint))
}

/// The key used to memoize a route's bucket: the match key, plus a hash
/// suffix when major parameters are present.
pub(super) fn bucket_key(match_key: &str, major_parameters: &BTreeMap<String, String>) -> String {
    if major_parameters.is_empty() {
        match_key.to_string()
    } else {
        format!("{}:{:016x}", match_key, hash_major_parameters(major_parameters))
    }
}

/// First non-empty of `resource_id`, `sub_resource_id`, `user_id`, prefixed
/// with a class tag. `None` if all are absent or empty.
pub(super) fn resource_key(
    resource_id: Option<&str>,
    sub_resource_id: Option<&str>,
    user_id: Option<&str>,
) -> Option<String> {
    if let Some(id) = resource_id.filter(|s| !s.is_empty()) {
        return Some(format!("resource:{id}"));
    }
    if let Some(id) = sub_resource_id.filter(|s| !s.is_empty()) {
        return Some(format!("sub_resource:{id}"));
    }
    if let Some(id) = user_id.filter(|s| !s.is_empty()) {
        return Some(format!("user:{id}"));
    }
    None
}

/// Splits a `match_key` (`METHOD:/path`) into its method and path segments.
fn split_key(key: &str) -> Option<(&str, Vec<&str>)> {
    let (method, path) = key.split_once(':')?;
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    Some((method, segments))
}

/// True if `pattern` matches `key` positionally: same method, same segment
/// count, and each segment either matches literally or the pattern segment
/// is the `{id}` wildcard.
pub(super) fn positional_match(pattern: &str, key: &str) -> bool {
    let (Some((p_method, p_segments)), Some((k_method, k_segments))) =
        (split_key(pattern), split_key(key))
    else {
        return false;
    };
    if p_method != k_method || p_segments.len() != k_segments.len() {
        return false;
    }
    p_segments
        .iter()
        .zip(k_segments.iter())
        .all(|(p, k)| *p == "{id}" || p == k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_replaces_digit_runs() {
        assert_eq!(
            normalize_endpoint("/channels/111/messages"),
            "/channels/{id}/messages"
        );
        assert_eq!(normalize_endpoint("/v2/users/42"), "/v2/users/{id}");
    }

    #[test]
    fn normalize_collapses_slashes_and_strips_trailing() {
        assert_eq!(normalize_endpoint("//a//b/"), "/a/b");
    }

    #[test]
    fn match_key_shares_across_route_normalization_s6() {
        let a = match_key("GET", "/channels/111/messages");
        let b = match_key("GET", "/channels/222/messages");
        assert_eq!(a, b);
        assert_eq!(a, "GET:/channels/{id}/messages");
    }

    #[test]
    fn hash_is_deterministic_and_order_independent_input_order() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), "2".to_string());
        a.insert("a".to_string(), "1".to_string());

        let mut b = BTreeMap::new();
        b.insert("a".to_string(), "1".to_string());
        b.insert("b".to_string(), "2".to_string());

        assert_eq!(hash_major_parameters(&a), hash_major_parameters(&b));
    }

    #[test]
    fn resource_key_prefers_resource_over_sub_resource_over_user() {
        assert_eq!(
            resource_key(Some("r1"), Some("s1"), Some("u1")),
            Some("resource:r1".to_string())
        );
        assert_eq!(
            resource_key(None, Some("s1"), Some("u1")),
            Some("sub_resource:s1".to_string())
        );
        assert_eq!(resource_key(None, None, Some("u1")), Some("user:u1".to_string()));
        assert_eq!(resource_key(None, None, None), None);
        assert_eq!(resource_key(Some(""), None, Some("u1")), Some("user:u1".to_string()));
    }

    #[test]
    fn positional_match_accepts_wildcard_segments() {
        assert!(positional_match(
            "GET:/channels/{id}/messages",
            "GET:/channels/{id}/messages"
        ));
        assert!(!positional_match("GET:/channels/{id}/messages", "POST:/channels/{id}/messages"));
        assert!(!positional_match("GET:/channels/{id}", "GET:/channels/{id}/messages"));
    }
}
