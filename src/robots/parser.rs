//! robots.txt evaluation backed by the `robotstxt` crate

use robotstxt::DefaultMatcher;

/// A site's robots.txt document, or the permissive stand-in used when the
/// site has none or it could not be fetched
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    content: String,
    allow_all: bool,
}

impl ParsedRobots {
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            allow_all: content.trim().is_empty(),
        }
    }

    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            allow_all: true,
        }
    }

    pub fn is_allow_all(&self) -> bool {
        self.allow_all
    }

    /// Checks whether `url` (absolute) may be fetched by `agent`
    ///
    /// `agent` is the product token, e.g. `CrawlWarden`, not the full header.
    pub fn is_allowed(&self, url: &str, agent: &str) -> bool {
        if self.allow_all {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, agent, url)
    }

    /// `Crawl-delay` in seconds for `agent`, preferring a group that names the
    /// agent over the `*` group
    pub fn crawl_delay(&self, agent: &str) -> Option<f64> {
        if self.allow_all {
            return None;
        }

        let agent = agent.to_lowercase();
        let mut group: Vec<String> = Vec::new();
        let mut in_rules = false;
        let mut wildcard_delay = None;
        let mut agent_delay = None;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim().to_lowercase().as_str() {
                "user-agent" => {
                    if in_rules {
                        group.clear();
                        in_rules = false;
                    }
                    group.push(value.to_lowercase());
                }
                "crawl-delay" => {
                    in_rules = true;
                    let Ok(delay) = value.parse::<f64>() else {
                        continue;
                    };
                    if group.iter().any(|ua| ua != "*" && agent.contains(ua.as_str())) {
                        agent_delay = Some(delay);
                    } else if group.iter().any(|ua| ua == "*") {
                        wildcard_delay = Some(delay);
                    }
                }
                _ => in_rules = true,
            }
        }

        agent_delay.or(wildcard_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT: &str = "CrawlWarden";

    #[test]
    fn test_allow_all_variants() {
        assert!(ParsedRobots::allow_all().is_allowed("https://a.com/x", AGENT));
        assert!(ParsedRobots::from_content("   \n").is_allow_all());
    }

    #[test]
    fn test_disallow_path() {
        let robots = ParsedRobots::from_content("User-agent: *\nDisallow: /private/\n");
        assert!(robots.is_allowed("https://a.com/public/page", AGENT));
        assert!(!robots.is_allowed("https://a.com/private/page", AGENT));
    }

    #[test]
    fn test_agent_specific_group() {
        let content = "User-agent: crawlwarden\nDisallow: /\n\nUser-agent: *\nAllow: /\n";
        let robots = ParsedRobots::from_content(content);
        assert!(!robots.is_allowed("https://a.com/anything", AGENT));
        assert!(robots.is_allowed("https://a.com/anything", "OtherBot"));
    }

    #[test]
    fn test_crawl_delay_prefers_named_agent() {
        let content = "User-agent: *\nCrawl-delay: 5\n\nUser-agent: CrawlWarden\nCrawl-delay: 2\n";
        let robots = ParsedRobots::from_content(content);
        assert_eq!(robots.crawl_delay(AGENT), Some(2.0));
        assert_eq!(robots.crawl_delay("OtherBot"), Some(5.0));
    }

    #[test]
    fn test_crawl_delay_absent() {
        let robots = ParsedRobots::from_content("User-agent: *\nDisallow: /tmp\n");
        assert_eq!(robots.crawl_delay(AGENT), None);
    }
}
