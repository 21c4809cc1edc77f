//! URL canonicalization for fingerprinting.
//!
//! Job boards decorate links with campaign and click-tracking parameters, so
//! the same posting arrives under many URLs. Normalizing strips those and
//! removes the remaining cosmetic differences (fragment, query order, default
//! port, trailing slash, host case).

use url::Url;

/// Query parameters removed during normalization (compared case-insensitively).
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "msclkid", "yclid", "igshid", "mc_cid", "mc_eid", "_hsenc", "_hsmi",
    "ref", "referrer", "refid", "trk", "trkinfo", "trackingid",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Normalize a URL for identity comparison.
///
/// Unparseable input falls back to its trimmed, lowercased form so that the
/// result is still deterministic.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut parsed) = Url::parse(trimmed) else {
        return trimmed.to_lowercase();
    };

    parsed.set_fragment(None);

    // Url::parse already lowercases the host and drops the scheme's default port.
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        pairs.sort();
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }

    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_utm_and_click_ids() {
        let a = normalize_url("https://boards.example.com/jobs/42?utm_source=mail&utm_medium=x&gclid=abc");
        let b = normalize_url("https://boards.example.com/jobs/42");
        assert_eq!(a, b);
    }

    #[test]
    fn keeps_meaningful_params_sorted() {
        let a = normalize_url("https://example.com/search?q=rust&page=2&utm_campaign=z");
        let b = normalize_url("https://example.com/search?page=2&q=rust");
        assert_eq!(a, b);
        assert!(a.contains("page=2"));
        assert!(a.contains("q=rust"));
    }

    #[test]
    fn drops_fragment_trailing_slash_and_default_port() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM:443/jobs/7/#apply"),
            "https://example.com/jobs/7"
        );
    }

    #[test]
    fn root_path_keeps_its_slash() {
        assert_eq!(normalize_url("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn unparseable_input_is_lowercased() {
        assert_eq!(normalize_url("  Not A URL  "), "not a url");
    }

    #[test]
    fn tracking_param_match_is_case_insensitive() {
        assert_eq!(
            normalize_url("https://example.com/j?UTM_Source=x&FBCLID=y"),
            "https://example.com/j"
        );
    }
}
