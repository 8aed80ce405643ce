//! robots.txt rules for the `*` group, cached per host.

use parking_lot::RwLock;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Robots {
    allows: Vec<String>,
    disallows: Vec<String>,
    pub crawl_delay: Option<Duration>,
}

pub fn parse_robots(txt: &str) -> Robots {
    let mut active = false;
    let mut robots = Robots::default();
    for line in txt.lines() {
        let l = line.split('#').next().unwrap_or("").trim();
        if l.is_empty() {
            continue;
        }
        let Some((k, v)) = l.split_once(':') else {
            continue;
        };
        let val = v.trim();
        match k.trim().to_lowercase().as_str() {
            "user-agent" => active = val == "*",
            "allow" if active && !val.is_empty() => robots.allows.push(val.to_string()),
            "disallow" if active && !val.is_empty() => robots.disallows.push(val.to_string()),
            "crawl-delay" if active => {
                if let Some(delay) = parse_delay(val) {
                    robots.crawl_delay = Some(delay);
                }
            }
            _ => {}
        }
    }
    robots
}

/// Seconds as a `Duration`; values too large to represent saturate.
fn parse_delay(val: &str) -> Option<Duration> {
    let secs = val.parse::<f64>().ok().filter(|n| *n >= 0.0)?;
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

impl Robots {
    /// Longest matching rule wins; ties go to Allow.
    pub fn allows_path(&self, path: &str) -> bool {
        let longest = |rules: &[String]| {
            rules.iter().filter(|r| path.starts_with(r.as_str())).map(String::len).max()
        };
        match (longest(&self.allows), longest(&self.disallows)) {
            (Some(a), Some(d)) => a >= d,
            (_, None) => true,
            (None, Some(_)) => false,
        }
    }
}

#[derive(Default)]
pub struct RobotsCache {
    hosts: RwLock<HashMap<String, Robots>>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn host_key(url: &Url) -> Option<String> {
        let host = url.host_str()?;
        Some(match url.port() {
            Some(p) => format!("{host}:{p}"),
            None => host.to_string(),
        })
    }

    /// Rules already fetched for the URL's host.
    pub fn cached(&self, url: &Url) -> Option<Robots> {
        let key = Self::host_key(url)?;
        self.hosts.read().get(&key).cloned()
    }

    /// Rules for the URL's host, fetching robots.txt on first use.
    /// Fetch failures mean "allow all".
    pub async fn rules(&self, client: &Client, url: &Url) -> Robots {
        let Some(key) = Self::host_key(url) else {
            return Robots::default();
        };
        if let Some(r) = self.hosts.read().get(&key).cloned() {
            return r;
        }
        let robots_url = format!("{}://{}/robots.txt", url.scheme(), key);
        let txt = match client.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
            _ => String::new(),
        };
        let parsed = parse_robots(&txt);
        tracing::debug!(host = %key, crawl_delay = ?parsed.crawl_delay, "robots.txt cached");
        self.hosts.write().insert(key, parsed.clone());
        parsed
    }
}
