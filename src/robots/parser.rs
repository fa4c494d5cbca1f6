//! Robots.txt parsing
//!
//! Allow/disallow checks delegate to the robotstxt crate. Crawl-delay is
//! not exposed by that crate, so the directive is extracted here with a
//! small line parser that honors user-agent groups.

use robotstxt::DefaultMatcher;
use serde::{Deserialize, Serialize};

/// Parsed robots.txt rules for one host
///
/// Serializable so a fetched snapshot can be cached in the coordination
/// store and shared between workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotsRules {
    /// Raw robots.txt content (empty means allow all)
    content: String,
    /// Explicit allow-all, used when the robots fetch failed
    allow_all: bool,
}

impl RobotsRules {
    /// Creates rules from raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            allow_all: false,
        }
    }

    /// Permissive rules, the fallback when robots.txt cannot be fetched
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            allow_all: true,
        }
    }

    /// Checks whether a URL is allowed for the given user agent
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.allow_all || self.content.is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Crawl-delay in seconds for the given user agent, if specified
    ///
    /// A group naming the agent wins over the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        if self.allow_all || self.content.is_empty() {
            return None;
        }

        let ua = user_agent.to_lowercase();
        let mut wildcard_delay = None;
        let mut agent_delay = None;

        // Groups are runs of user-agent lines followed by directives.
        let mut group_agents: Vec<String> = Vec::new();
        let mut in_agent_run = false;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_lowercase();
            let value = value.trim();

            if field == "user-agent" {
                if !in_agent_run {
                    group_agents.clear();
                }
                group_agents.push(value.to_lowercase());
                in_agent_run = true;
                continue;
            }
            in_agent_run = false;

            if field == "crawl-delay" {
                let Ok(delay) = value.parse::<f64>() else {
                    continue;
                };
                if delay < 0.0 {
                    continue;
                }
                for agent in &group_agents {
                    if agent == "*" {
                        wildcard_delay.get_or_insert(delay);
                    } else if ua.contains(agent.as_str()) {
                        agent_delay.get_or_insert(delay);
                    }
                }
            }
        }

        agent_delay.or(wildcard_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let robots = RobotsRules::allow_all();
        assert!(robots.is_allowed("/any/path", "TestBot"));
        assert!(robots.is_allowed("/admin", "TestBot"));
    }

    #[test]
    fn test_parse_disallow_all() {
        let robots = RobotsRules::from_content("User-agent: *\nDisallow: /");
        assert!(!robots.is_allowed("/", "TestBot"));
        assert!(!robots.is_allowed("/page", "TestBot"));
    }

    #[test]
    fn test_parse_disallow_specific() {
        let robots = RobotsRules::from_content("User-agent: *\nDisallow: /admin");
        assert!(robots.is_allowed("/", "TestBot"));
        assert!(robots.is_allowed("/page", "TestBot"));
        assert!(!robots.is_allowed("/admin", "TestBot"));
        assert!(!robots.is_allowed("/admin/users", "TestBot"));
    }

    #[test]
    fn test_parse_allow_and_disallow() {
        let robots =
            RobotsRules::from_content("User-agent: *\nDisallow: /private\nAllow: /private/public");
        assert!(robots.is_allowed("/", "TestBot"));
        assert!(!robots.is_allowed("/private", "TestBot"));
        assert!(robots.is_allowed("/private/public", "TestBot"));
    }

    #[test]
    fn test_parse_specific_user_agent() {
        let robots =
            RobotsRules::from_content("User-agent: BadBot\nDisallow: /\n\nUser-agent: *\nAllow: /");
        assert!(robots.is_allowed("/page", "GoodBot"));
        assert!(!robots.is_allowed("/page", "BadBot"));
    }

    #[test]
    fn test_empty_robots_txt() {
        let robots = RobotsRules::from_content("");
        assert!(robots.is_allowed("/any/path", "TestBot"));
    }

    #[test]
    fn test_crawl_delay_wildcard() {
        let robots = RobotsRules::from_content("User-agent: *\nCrawl-delay: 5");
        assert_eq!(robots.crawl_delay("TestBot"), Some(5.0));
    }

    #[test]
    fn test_crawl_delay_fractional() {
        let robots = RobotsRules::from_content("User-agent: *\nCrawl-delay: 0.5");
        assert_eq!(robots.crawl_delay("TestBot"), Some(0.5));
    }

    #[test]
    fn test_crawl_delay_specific_agent_wins() {
        let robots = RobotsRules::from_content(
            "User-agent: TestBot\nCrawl-delay: 10\n\nUser-agent: *\nCrawl-delay: 2",
        );
        assert_eq!(robots.crawl_delay("TestBot"), Some(10.0));
        assert_eq!(robots.crawl_delay("OtherBot"), Some(2.0));
    }

    #[test]
    fn test_crawl_delay_grouped_agents() {
        let robots = RobotsRules::from_content(
            "User-agent: AlphaBot\nUser-agent: BetaBot\nCrawl-delay: 3\nDisallow: /x",
        );
        assert_eq!(robots.crawl_delay("BetaBot"), Some(3.0));
        assert_eq!(robots.crawl_delay("GammaBot"), None);
    }

    #[test]
    fn test_crawl_delay_none_when_absent() {
        let robots = RobotsRules::from_content("User-agent: *\nDisallow: /admin");
        assert_eq!(robots.crawl_delay("TestBot"), None);
    }

    #[test]
    fn test_crawl_delay_ignores_garbage() {
        let robots = RobotsRules::from_content(
            "User-agent: *\nCrawl-delay: soon\nCrawl-delay: -3\nCrawl-delay: 2 # ok",
        );
        assert_eq!(robots.crawl_delay("TestBot"), Some(2.0));
    }

    #[test]
    fn test_serde_roundtrip() {
        let robots = RobotsRules::from_content("User-agent: *\nDisallow: /admin");
        let json = serde_json::to_string(&robots).unwrap();
        let back: RobotsRules = serde_json::from_str(&json).unwrap();
        assert!(!back.is_allowed("/admin", "TestBot"));
        assert!(back.is_allowed("/page", "TestBot"));
    }
}
