//! Turns an attacker-controlled request path into an upstream URL.
//!
//! Order is fixed: normalize, reject traversal on the normalized value,
//! match the allow-list, then build the URL from that same normalized value.

use itertools::Itertools;

use super::errors::ProxyError;
use super::immich;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedTarget {
    pub(crate) path: String,
    pub(crate) prefix: String,
    pub(crate) url: String,
}

/// POSIX style normalization of an absolute path. `.` segments and empty
/// segments vanish, `..` pops the previous segment and is dropped at the
/// root. A trailing slash survives.
pub(crate) fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }

    let trailing_slash = path.ends_with('/') && !segments.is_empty();
    format!(
        "/{}{}",
        segments.iter().join("/"),
        if trailing_slash { "/" } else { "" }
    )
}

/// Rejects a normalized path that could still climb out of the API once
/// the upstream URL parser decodes it.
pub(crate) fn reject_traversal(normalized: &str) -> Result<(), ProxyError> {
    let lowercase = normalized.to_ascii_lowercase();
    let smuggled = normalized.contains("..")
        || normalized.contains('\\')
        || ["%2e", "%2f", "%5c"]
            .iter()
            .any(|encoded| lowercase.contains(encoded));
    match smuggled {
        true => Err(ProxyError::BadRequest),
        false => Ok(()),
    }
}

/// The allow-list entry equal to the first segment, if any.
pub(crate) fn match_prefix<'a>(normalized: &str, allowed: &'a [String]) -> Option<&'a str> {
    let first_segment = normalized.trim_start_matches('/').split('/').next()?;
    allowed
        .iter()
        .find(|prefix| prefix.as_str() == first_segment)
        .map(String::as_str)
}

/// Base every upstream URL hangs off: the origin without trailing slashes,
/// ending in `/api` exactly once. `None` when no origin is configured.
pub(crate) fn api_base(origin: &str) -> Option<String> {
    let origin = origin.trim().trim_end_matches('/');
    if origin.is_empty() {
        return None;
    }
    match origin.ends_with(immich::API_PATH_SUFFIX) {
        true => Some(origin.to_string()),
        false => Some(format!("{origin}{}", immich::API_PATH_SUFFIX)),
    }
}

pub(crate) fn resolve(
    raw_path: &str,
    query: Option<&str>,
    allowed: &[String],
    api_base: Option<&str>,
) -> Result<ResolvedTarget, ProxyError> {
    let path = normalize(raw_path);
    reject_traversal(&path)?;

    let prefix = match_prefix(&path, allowed)
        .ok_or(ProxyError::Forbidden)?
        .to_string();

    let api_base = api_base.ok_or_else(|| {
        ProxyError::BadGateway(anyhow::Error::msg("Upstream origin is not configured."))
    })?;

    let url = match query {
        Some(query) if !query.is_empty() => format!("{api_base}{path}?{query}"),
        _ => format!("{api_base}{path}"),
    };

    Ok(ResolvedTarget { path, prefix, url })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        ["albums", "asset", "assets"].map(String::from).to_vec()
    }

    #[test]
    fn normalizes_dot_segments_and_slashes() {
        assert_eq!(normalize("/albums/123"), "/albums/123");
        assert_eq!(normalize("/albums/./123"), "/albums/123");
        assert_eq!(normalize("//albums///123"), "/albums/123");
        assert_eq!(normalize("/assets/x/../y"), "/assets/y");
        assert_eq!(normalize("/albums/../../../etc/passwd"), "/etc/passwd");
        assert_eq!(normalize("/albums/"), "/albums/");
        assert_eq!(normalize("/albums/.."), "/");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn traversal_markers_surviving_normalization_are_rejected() {
        for raw in [
            "/albums/..%2f..%2fadmin",
            "/albums/%2e%2e/%2e%2e/admin",
            "/albums/%2E%2E/users",
            "/albums/.%2e/users",
            "/albums/a..b",
            "/albums/...",
            "/albums\\..\\users",
            "/albums/%5c..%5cusers",
        ] {
            let normalized = normalize(raw);
            assert!(
                matches!(reject_traversal(&normalized), Err(ProxyError::BadRequest)),
                "{raw} should be rejected"
            );
            assert!(matches!(
                resolve(raw, None, &allowed(), Some("http://host/api")),
                Err(ProxyError::BadRequest)
            ));
        }
    }

    #[test]
    fn resolved_dot_segments_are_not_traversal() {
        assert!(reject_traversal(&normalize("/albums/x/../y")).is_ok());
    }

    #[test]
    fn allow_list_matches_whole_first_segment() {
        let allowed = allowed();
        assert_eq!(match_prefix("/albums/123", &allowed), Some("albums"));
        assert_eq!(match_prefix("/asset", &allowed), Some("asset"));
        assert_eq!(match_prefix("/assets/1/original", &allowed), Some("assets"));
        assert_eq!(match_prefix("/assetsadmin", &allowed), None);
        assert_eq!(match_prefix("/users/me", &allowed), None);
        assert_eq!(match_prefix("/", &allowed), None);
    }

    #[test]
    fn unlisted_prefix_is_forbidden_even_after_climbing() {
        assert!(matches!(
            resolve("/albums/../users/me", None, &allowed(), Some("http://host/api")),
            Err(ProxyError::Forbidden)
        ));
        assert!(matches!(
            resolve("/server/version", None, &allowed(), Some("http://host/api")),
            Err(ProxyError::Forbidden)
        ));
    }

    #[test]
    fn api_segment_is_appended_exactly_once() {
        assert_eq!(api_base("http://host").as_deref(), Some("http://host/api"));
        assert_eq!(api_base("http://host/").as_deref(), Some("http://host/api"));
        assert_eq!(api_base("http://host/api").as_deref(), Some("http://host/api"));
        assert_eq!(api_base("http://host/api/").as_deref(), Some("http://host/api"));
        assert_eq!(api_base(""), None);

        let once = api_base("http://host:2283").unwrap();
        assert_eq!(api_base(&once), Some(once.clone()));
    }

    #[test]
    fn builds_target_url_from_normalized_path() {
        for origin in ["http://host", "http://host/api"] {
            let base = api_base(origin);
            let target = resolve("/albums/123", None, &allowed(), base.as_deref()).unwrap();
            assert_eq!(target.url, "http://host/api/albums/123");
            assert_eq!(target.prefix, "albums");
            assert_eq!(target.path, "/albums/123");
        }
    }

    #[test]
    fn query_string_is_carried_verbatim() {
        let target = resolve(
            "/asset",
            Some("take=100&isFavorite=true"),
            &allowed(),
            Some("http://host/api"),
        )
        .unwrap();
        assert_eq!(target.url, "http://host/api/asset?take=100&isFavorite=true");
    }

    #[test]
    fn missing_origin_is_a_bad_gateway_after_validation() {
        assert!(matches!(
            resolve("/albums/1", None, &allowed(), None),
            Err(ProxyError::BadGateway(_))
        ));
        assert!(matches!(
            resolve("/users", None, &allowed(), None),
            Err(ProxyError::Forbidden)
        ));
    }
}
