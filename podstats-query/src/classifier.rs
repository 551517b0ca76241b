// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Collaborators consumed by the download aggregator
//!
//! - [`UserAgentClassifier`]: user agent and referrer metadata
//! - [`ShowLookup`]: destination URL to show and episode

use async_trait::async_trait;
use once_cell::sync::Lazy;
use podstats_core::urls::hostname_of;
use podstats_core::{PodstatsError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Device a request came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub category: String,
    pub name: Option<String>,
}

/// Where a browser request was referred from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferrerInfo {
    pub category: String,
    pub name: String,
}

/// Classification of one user agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgentEntity {
    /// `app`, `browser`, `library`, `bot`, ...
    pub agent_type: String,
    pub name: Option<String>,
    pub device: Option<DeviceInfo>,
    pub referrer: Option<ReferrerInfo>,
}

pub trait UserAgentClassifier: Send + Sync {
    fn classify(&self, user_agent: &str, referer: Option<&str>) -> Option<UserAgentEntity>;
}

struct AgentRule {
    pattern: Regex,
    agent_type: &'static str,
    name: &'static str,
}

struct DeviceRule {
    pattern: Regex,
    category: &'static str,
    name: Option<&'static str>,
}

fn rule(pattern: &str, agent_type: &'static str, name: &'static str) -> AgentRule {
    AgentRule {
        pattern: Regex::new(pattern).expect("valid agent pattern"),
        agent_type,
        name,
    }
}

fn device(pattern: &str, category: &'static str, name: Option<&'static str>) -> DeviceRule {
    DeviceRule {
        pattern: Regex::new(pattern).expect("valid device pattern"),
        category,
        name,
    }
}

// first match wins
static AGENT_RULES: Lazy<Vec<AgentRule>> = Lazy::new(|| {
    vec![
        rule(r"(?i)bot\b|crawler|spider|^curl/|^wget/", "bot", "Bot"),
        rule(r"^(Podcasts|iTunes|AppleCoreMedia)/|Apple ?Podcasts", "app", "Apple Podcasts"),
        rule(r"^Spotify/", "app", "Spotify"),
        rule(r"^Overcast/", "app", "Overcast"),
        rule(r"^PocketCasts/|Pocket Casts", "app", "Pocket Casts"),
        rule(r"^Castro ", "app", "Castro"),
        rule(r"(?i)^(lavf|libvlc|python-requests|okhttp|axios)", "library", "Library"),
        rule(r"Edg/", "browser", "Edge"),
        rule(r"Firefox/", "browser", "Firefox"),
        rule(r"Chrome/", "browser", "Chrome"),
        rule(r"Safari/", "browser", "Safari"),
    ]
});

static DEVICE_RULES: Lazy<Vec<DeviceRule>> = Lazy::new(|| {
    vec![
        device(r"iPhone", "smartphone", Some("iPhone")),
        device(r"iPad", "tablet", Some("iPad")),
        device(r"Watch", "watch", Some("Apple Watch")),
        device(r"Android.*Mobile", "smartphone", None),
        device(r"Android", "tablet", None),
        device(r"Macintosh|Windows|X11|Linux", "computer", None),
    ]
});

static SEARCH_REFERRERS: &[(&str, &str)] = &[
    ("google.com", "Google"),
    ("bing.com", "Bing"),
    ("duckduckgo.com", "DuckDuckGo"),
];

/// Rule-table classifier covering common podcast apps, browsers and bots.
#[derive(Debug, Default, Clone)]
pub struct PatternClassifier;

impl UserAgentClassifier for PatternClassifier {
    fn classify(&self, user_agent: &str, referer: Option<&str>) -> Option<UserAgentEntity> {
        let rule = AGENT_RULES.iter().find(|r| r.pattern.is_match(user_agent))?;
        let device = DEVICE_RULES
            .iter()
            .find(|d| d.pattern.is_match(user_agent))
            .map(|d| DeviceInfo {
                category: d.category.to_string(),
                name: d.name.map(str::to_string),
            });
        let referrer = (rule.agent_type == "browser")
            .then(|| referer.and_then(registrable_domain))
            .flatten()
            .and_then(|domain| {
                SEARCH_REFERRERS
                    .iter()
                    .find(|(d, _)| *d == domain)
                    .map(|(_, name)| ReferrerInfo {
                        category: "search".to_string(),
                        name: name.to_string(),
                    })
            });
        Some(UserAgentEntity {
            agent_type: rule.agent_type.to_string(),
            name: Some(rule.name.to_string()),
            device,
            referrer,
        })
    }
}

/// Host of a referer reduced to its last two labels.
pub fn registrable_domain(referer: &str) -> Option<String> {
    let host = hostname_of(referer)?;
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 || host.parse::<std::net::IpAddr>().is_ok() {
        return None;
    }
    Some(labels[labels.len() - 2..].join("."))
}

/// Show and episode a destination URL belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowEpisode {
    pub show_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
}

#[async_trait]
pub trait ShowLookup: Send + Sync {
    async fn lookup(&self, url: &str) -> Result<Option<ShowEpisode>>;
}

/// Lookup over a fixed URL table.
#[derive(Debug, Default)]
pub struct StaticShowLookup {
    shows: BTreeMap<String, ShowEpisode>,
    calls: AtomicUsize,
}

impl StaticShowLookup {
    pub fn new(shows: BTreeMap<String, ShowEpisode>) -> Self {
        Self {
            shows,
            calls: AtomicUsize::new(0),
        }
    }

    /// Parse `{ "<url>": { "showUuid": ..., "episodeId": ... } }`.
    pub fn from_json(json: &str) -> Result<Self> {
        let shows: BTreeMap<String, ShowEpisode> = serde_json::from_str(json)
            .map_err(|e| PodstatsError::Validation(format!("bad show table: {}", e)))?;
        Ok(Self::new(shows))
    }

    /// Number of lookups served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ShowLookup for StaticShowLookup {
    async fn lookup(&self, url: &str) -> Result<Option<ShowEpisode>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.shows.get(url).cloned())
    }
}
