use url::Url;

/// Extracts the domain key of a URL: the lowercase host, plus `:port` when the
/// URL names a non-default port
///
/// Rate limits, circuit breakers and robots.txt caches are all keyed by this
/// value, so `http://127.0.0.1:8080` and `http://127.0.0.1:9090` are distinct
/// domains.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use crawl_warden::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("http://localhost:8080/").unwrap();
/// assert_eq!(extract_domain(&url), Some("localhost:8080".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}

/// Returns the bare lowercase host, used for allow/block pattern matching
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Location of the robots.txt document governing `url`
pub fn robots_url(url: &Url) -> Option<Url> {
    let mut robots = url.clone();
    robots.host_str()?;
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    Some(robots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_subdomain() {
        let url = Url::parse("https://blog.example.com/post").unwrap();
        assert_eq!(extract_domain(&url), Some("blog.example.com".to_string()));
    }

    #[test]
    fn test_default_port_is_dropped() {
        let url = Url::parse("https://example.com:443/").unwrap();
        assert_eq!(extract_domain(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_explicit_port_is_kept() {
        let url = Url::parse("http://127.0.0.1:3000/a").unwrap();
        assert_eq!(extract_domain(&url), Some("127.0.0.1:3000".to_string()));
        assert_eq!(extract_host(&url), Some("127.0.0.1".to_string()));
    }

    #[test]
    fn test_no_host() {
        let url = Url::parse("mailto:someone@example.com").unwrap();
        assert_eq!(extract_domain(&url), None);
        assert_eq!(robots_url(&url), None);
    }

    #[test]
    fn test_robots_url() {
        let url = Url::parse("https://example.com:8443/deep/page?x=1#frag").unwrap();
        assert_eq!(
            robots_url(&url).unwrap().as_str(),
            "https://example.com:8443/robots.txt"
        );
    }
}
