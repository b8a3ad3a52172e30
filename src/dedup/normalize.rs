//! URL normalization for the dedup ledger.

use url::Url;

/// Hosts whose first two path segments identify a repository.
pub const DEFAULT_FORGE_HOSTS: &[&str] =
    &["github.com", "gitlab.com", "codeberg.org", "bitbucket.org"];

/// Reduce a URL to the identifier used for duplicate detection.
///
/// Input is trimmed, lowercased and stripped of trailing slashes. Repository
/// URLs on a forge host collapse to `host/owner/repo`, so
/// `https://github.com/Foo/Bar/tree/main` and `http://www.github.com/foo/bar`
/// are the same tool. Other URLs become `host + path`; scheme, query and
/// fragment are dropped. Input without a scheme is read as https, and input
/// that still does not parse is returned in its cleaned form.
pub fn normalize_url<S: AsRef<str>>(url: &str, forge_hosts: &[S]) -> String {
    let cleaned = url.trim().to_lowercase();
    let cleaned = cleaned.trim_end_matches('/');
    if cleaned.is_empty() {
        return String::new();
    }

    let parsed = if cleaned.contains("://") {
        Url::parse(cleaned)
    } else {
        Url::parse(&format!("https://{}", cleaned))
    };
    let parsed = match parsed {
        Ok(parsed) => parsed,
        Err(_) => return cleaned.to_string(),
    };
    let Some(host) = parsed.host_str() else {
        return cleaned.to_string();
    };

    let bare_host = host.strip_prefix("www.").unwrap_or(host);
    if forge_hosts.iter().any(|h| h.as_ref() == bare_host) {
        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        if segments.len() >= 2 {
            return format!("{}/{}/{}", bare_host, segments[0], segments[1]);
        }
    }

    let authority = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    format!("{}{}", authority, parsed.path().trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(url: &str) -> String {
        normalize_url(url, DEFAULT_FORGE_HOSTS)
    }

    #[test]
    fn test_forge_urls_collapse_to_repository() {
        assert_eq!(norm("https://github.com/Foo/Bar/tree/main"), "github.com/foo/bar");
        assert_eq!(
            norm("https://github.com/Foo/Bar/tree/main"),
            norm("https://github.com/foo/bar")
        );
        assert_eq!(norm("http://www.github.com/foo/bar/"), "github.com/foo/bar");
        assert_eq!(
            norm("https://gitlab.com/group/project/-/issues"),
            "gitlab.com/group/project"
        );
        assert_eq!(norm("github.com/foo/bar?tab=readme"), "github.com/foo/bar");
    }

    #[test]
    fn test_forge_profile_pages_keep_path() {
        assert_eq!(norm("https://github.com/foo"), "github.com/foo");
        assert_eq!(norm("https://github.com/"), "github.com");
    }

    #[test]
    fn test_generic_urls_drop_scheme_query_and_fragment() {
        assert_eq!(norm("  https://Example.com/Tools/  "), "example.com/tools");
        assert_eq!(norm("http://example.com/a?b=c#d"), "example.com/a");
        assert_eq!(norm("https://example.com"), "example.com");
        assert_eq!(norm("http://localhost:8080/x"), "localhost:8080/x");
        assert_eq!(
            norm("https://www.producthunt.com/posts/x"),
            "www.producthunt.com/posts/x"
        );
    }

    #[test]
    fn test_custom_forge_hosts() {
        let hosts = ["git.example.org".to_string()];
        assert_eq!(
            normalize_url("https://git.example.org/team/tool/src", &hosts),
            "git.example.org/team/tool"
        );
        assert_eq!(
            normalize_url("https://github.com/foo/bar/tree/main", &hosts),
            "github.com/foo/bar/tree/main"
        );
    }

    #[test]
    fn test_unparseable_input_is_cleaned() {
        assert_eq!(norm("   "), "");
        assert_eq!(norm("Not A URL/"), "not a url");
    }
}
