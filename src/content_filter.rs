//! Request filtering for captured pages.
//!
//! Two layers are chained with deny-wins semantics: an Adblock-style
//! subscription list fetched once per process, and a static denylist matched
//! by substring.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use regex::Regex;
use reqwest::Url;

pub const DEFAULT_SUBSCRIPTION_LIST: &str = "https://secure.fanboy.co.nz/fanboy-cookiemonster.txt";

lazy_static! {
    pub static ref DEFAULT_DENYLIST: Vec<&'static str> = vec![
        "googletagmanager.com",
        "google-analytics.com",
        "doubleclick.net",
        "googlesyndication.com",
        "connect.facebook.net",
        "hotjar.com",
        "clarity.ms",
        "cookielaw.org",
        "cookiebot.com",
        "consensu.org",
        "privacy-mgmt.com",
        "usercentrics.eu",
        "trustarc.com",
        "intercom.io",
        "hs-scripts.com",
    ];
    // successfully parsed lists, keyed by list url
    static ref SUBSCRIPTIONS: Mutex<HashMap<String, Arc<SubscriptionFilter>>> =
        Mutex::new(HashMap::new());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

pub trait RequestFilter: Send + Sync {
    fn decide(&self, request_url: &str) -> Decision;
}

pub trait ListFetcher {
    fn fetch(&self, url: &str) -> anyhow::Result<String>;
}

impl<F> ListFetcher for F
where
    F: Fn(&str) -> anyhow::Result<String>,
{
    fn fetch(&self, url: &str) -> anyhow::Result<String> {
        self(url)
    }
}

pub struct HttpListFetcher {
    client: reqwest::blocking::Client,
}

impl HttpListFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("could not build http client for subscription lists")?;
        Ok(HttpListFetcher { client })
    }
}

impl ListFetcher for HttpListFetcher {
    fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let res = self
            .client
            .get(url)
            .send()
            .context(format!("could not fetch subscription list {}", url))?
            .error_for_status()?;
        Ok(res.text()?)
    }
}

enum Rule {
    Host(String),
    Pattern(Regex),
}

#[derive(Default)]
struct RuleSet {
    hosts: HashSet<String>,
    patterns: Vec<Regex>,
}

impl RuleSet {
    fn insert(&mut self, rule: Rule) {
        match rule {
            Rule::Host(h) => {
                self.hosts.insert(h);
            }
            Rule::Pattern(p) => self.patterns.push(p),
        }
    }

    fn matches(&self, url: &str, host: Option<&str>) -> bool {
        if let Some(host) = host {
            let mut h = host;
            loop {
                if self.hosts.contains(h) {
                    return true;
                }
                match h.split_once('.') {
                    Some((_, rest)) if !rest.is_empty() => h = rest,
                    _ => break,
                }
            }
        }
        self.patterns.iter().any(|p| p.is_match(url))
    }

    fn len(&self) -> usize {
        self.hosts.len() + self.patterns.len()
    }
}

/// Network rules of an Adblock Plus formatted list.
#[derive(Default)]
pub struct SubscriptionFilter {
    block: RuleSet,
    allow: RuleSet,
}

impl SubscriptionFilter {
    pub fn allow_all() -> Self {
        SubscriptionFilter::default()
    }

    pub fn parse(list: &str) -> Self {
        let mut filter = SubscriptionFilter::default();
        for line in list.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('!') || line.starts_with('[') {
                continue;
            }
            // cosmetic rules only hide elements
            if line.contains("##") || line.contains("#@#") || line.contains("#?#") {
                continue;
            }
            let (exception, line) = match line.strip_prefix("@@") {
                Some(rest) => (true, rest),
                None => (false, line),
            };
            let Some(rule) = parse_rule(line) else {
                continue;
            };
            if exception {
                filter.allow.insert(rule);
            } else {
                filter.block.insert(rule);
            }
        }
        filter
    }

    pub fn rule_count(&self) -> usize {
        self.block.len() + self.allow.len()
    }

    fn extend(&mut self, other: &SubscriptionFilter) {
        self.block.hosts.extend(other.block.hosts.iter().cloned());
        self.block.patterns.extend(other.block.patterns.iter().cloned());
        self.allow.hosts.extend(other.allow.hosts.iter().cloned());
        self.allow.patterns.extend(other.allow.patterns.iter().cloned());
    }
}

impl RequestFilter for SubscriptionFilter {
    fn decide(&self, request_url: &str) -> Decision {
        let host = Url::parse(request_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()));
        let host = host.as_deref();
        if self.allow.matches(request_url, host) {
            return Decision::Allow;
        }
        if self.block.matches(request_url, host) {
            return Decision::Deny;
        }
        Decision::Allow
    }
}

fn parse_rule(line: &str) -> Option<Rule> {
    // regex rules are not supported
    if line.len() > 1 && line.starts_with('/') && line.ends_with('/') {
        return None;
    }
    let (pattern, options) = match line.split_once('$') {
        Some((p, o)) => (p, o),
        None => (line, ""),
    };
    // decide() never sees the initiating page or the resource type, so any
    // option that narrows a rule to either can't be honoured
    for option in options.split(',').map(str::trim).filter(|o| !o.is_empty()) {
        if option != "important" {
            return None;
        }
    }
    if pattern.is_empty() || pattern == "*" {
        return None;
    }

    // without the trailing separator `||host` is a prefix, not a whole host
    if let Some(host) = pattern.strip_prefix("||").and_then(|r| r.strip_suffix('^')) {
        if !host.is_empty()
            && host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Some(Rule::Host(host.to_ascii_lowercase()));
        }
    }

    let mut re = String::from("(?i)");
    let mut body = pattern;
    if let Some(rest) = body.strip_prefix("||") {
        re.push_str(r"^[a-z][a-z0-9+.\-]*://([^/?#]*\.)?");
        body = rest;
    } else if let Some(rest) = body.strip_prefix('|') {
        re.push('^');
        body = rest;
    }
    let anchored_end = body.ends_with('|');
    let body = body.strip_suffix('|').unwrap_or(body);
    for c in body.chars() {
        match c {
            '*' => re.push_str(".*"),
            '^' => re.push_str(r"(?:[^\w\-.%]|$)"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    if anchored_end {
        re.push('$');
    }
    Regex::new(&re).ok().map(Rule::Pattern)
}

/// Static list of domains that are always denied (substring match).
#[derive(Debug, Clone)]
pub struct DomainDenylist {
    domains: Vec<String>,
}

impl DomainDenylist {
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        DomainDenylist {
            domains: domains
                .iter()
                .map(|d| d.as_ref().trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    pub fn default_list() -> Self {
        DomainDenylist::new(DEFAULT_DENYLIST.as_slice())
    }
}

impl RequestFilter for DomainDenylist {
    fn decide(&self, request_url: &str) -> Decision {
        let url = request_url.to_ascii_lowercase();
        if self.domains.iter().any(|d| url.contains(d.as_str())) {
            Decision::Deny
        } else {
            Decision::Allow
        }
    }
}

/// Filters evaluated in order; the first deny wins.
pub struct FilterChain {
    layers: Vec<Arc<dyn RequestFilter>>,
}

impl FilterChain {
    pub fn new(layers: Vec<Arc<dyn RequestFilter>>) -> Self {
        FilterChain { layers }
    }
}

impl RequestFilter for FilterChain {
    fn decide(&self, request_url: &str) -> Decision {
        for layer in &self.layers {
            if layer.decide(request_url) == Decision::Deny {
                return Decision::Deny;
            }
        }
        Decision::Allow
    }
}

pub struct ContentFilterPolicy {
    lists: Vec<String>,
    denylist: Arc<DomainDenylist>,
    chain: Arc<FilterChain>,
    prepared: bool,
}

impl ContentFilterPolicy {
    pub fn new(lists: Vec<String>, denylist: DomainDenylist) -> Self {
        let denylist = Arc::new(denylist);
        let chain = Arc::new(FilterChain::new(vec![denylist.clone()]));
        ContentFilterPolicy {
            lists,
            denylist,
            chain,
            prepared: false,
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Loads the subscription layer. Lists already fetched by this process are
    /// reused; a list that can't be fetched is treated as allowing everything.
    pub fn prepare(&mut self, fetcher: &dyn ListFetcher) {
        if self.prepared {
            return;
        }
        let mut subscription = SubscriptionFilter::allow_all();
        for list in &self.lists {
            match load_subscription(list, fetcher) {
                Ok(filter) => subscription.extend(&filter),
                Err(e) => {
                    warn!(
                        "subscription list {} unavailable, not filtering with it: {:#}",
                        list, e
                    );
                }
            }
        }
        debug!(
            "content filter prepared with {} subscription rules",
            subscription.rule_count()
        );
        self.chain = Arc::new(FilterChain::new(vec![
            Arc::new(subscription),
            self.denylist.clone(),
        ]));
        self.prepared = true;
    }

    pub fn request_filter(&self) -> Arc<dyn RequestFilter> {
        self.chain.clone()
    }
}

impl RequestFilter for ContentFilterPolicy {
    fn decide(&self, request_url: &str) -> Decision {
        self.chain.decide(request_url)
    }
}

fn load_subscription(
    list_url: &str,
    fetcher: &dyn ListFetcher,
) -> anyhow::Result<Arc<SubscriptionFilter>> {
    if let Some(cached) = SUBSCRIPTIONS
        .lock()
        .map_err(|_| anyhow::anyhow!("subscription cache poisoned"))?
        .get(list_url)
    {
        return Ok(cached.clone());
    }

    debug!("fetching subscription list {}", list_url);
    let body = fetcher.fetch(list_url)?;
    let filter = Arc::new(SubscriptionFilter::parse(&body));

    SUBSCRIPTIONS
        .lock()
        .map_err(|_| anyhow::anyhow!("subscription cache poisoned"))?
        .insert(list_url.to_string(), filter.clone());
    Ok(filter)
}
