//! Browser-like user-agent profiles with sticky or per-call rotation.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::traits::fetcher::{HeaderSet, UserAgentProvider};

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

const DESKTOP_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

const MOBILE_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 14; SM-S921B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Desktop,
    Mobile,
}

/// One browser identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub user_agent: String,
    pub device: DeviceKind,
}

impl AgentProfile {
    pub fn new(user_agent: impl Into<String>, device: DeviceKind) -> Self {
        Self {
            user_agent: user_agent.into(),
            device,
        }
    }

    /// Full header set for this identity.
    pub fn headers(&self) -> HeaderSet {
        let mobile = match self.device {
            DeviceKind::Desktop => "?0",
            DeviceKind::Mobile => "?1",
        };

        let mut headers = HeaderSet::new();
        headers.insert("User-Agent".to_string(), self.user_agent.clone());
        headers.insert("Accept".to_string(), ACCEPT.to_string());
        headers.insert("Accept-Language".to_string(), ACCEPT_LANGUAGE.to_string());
        headers.insert("Sec-CH-UA-Mobile".to_string(), mobile.to_string());
        headers.insert("Upgrade-Insecure-Requests".to_string(), "1".to_string());
        headers
    }
}

/// Rotating pool of browser identities.
///
/// Sticky pools keep one identity until [`rotate`](Self::rotate) is
/// called; non-sticky pools advance on every `headers()` call.
#[derive(Debug)]
pub struct RotatingAgents {
    profiles: Vec<AgentProfile>,
    cursor: AtomicUsize,
    sticky: bool,
}

impl RotatingAgents {
    /// Desktop browsers only.
    pub fn desktop() -> Self {
        Self::from_agents(DESKTOP_AGENTS, DeviceKind::Desktop)
    }

    /// Mobile browsers only.
    pub fn mobile() -> Self {
        Self::from_agents(MOBILE_AGENTS, DeviceKind::Mobile)
    }

    /// Desktop and mobile browsers.
    pub fn all() -> Self {
        let mut profiles = Self::desktop().profiles;
        profiles.extend(Self::mobile().profiles);
        Self::with_profiles(profiles)
    }

    /// Custom pool; an empty list falls back to the desktop pool.
    pub fn with_profiles(profiles: Vec<AgentProfile>) -> Self {
        if profiles.is_empty() {
            return Self::desktop();
        }
        Self {
            profiles,
            cursor: AtomicUsize::new(0),
            sticky: true,
        }
    }

    fn from_agents(agents: &[&str], device: DeviceKind) -> Self {
        Self::with_profiles(
            agents
                .iter()
                .map(|ua| AgentProfile::new(*ua, device))
                .collect(),
        )
    }

    /// Keep one identity per session (default) or rotate per call.
    pub fn sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    pub fn is_sticky(&self) -> bool {
        self.sticky
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Always false: a pool has at least one profile.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// The identity the next sticky call will use.
    pub fn current(&self) -> &AgentProfile {
        &self.profiles[self.cursor.load(Ordering::Relaxed) % self.profiles.len()]
    }

    /// Switch to the next identity and return it.
    pub fn rotate(&self) -> &AgentProfile {
        let next = self.cursor.fetch_add(1, Ordering::Relaxed) + 1;
        &self.profiles[next % self.profiles.len()]
    }
}

impl Default for RotatingAgents {
    fn default() -> Self {
        Self::desktop()
    }
}

impl UserAgentProvider for RotatingAgents {
    fn headers(&self) -> HeaderSet {
        let index = if self.sticky {
            self.cursor.load(Ordering::Relaxed)
        } else {
            self.cursor.fetch_add(1, Ordering::Relaxed)
        };
        self.profiles[index % self.profiles.len()].headers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_agent(agents: &RotatingAgents) -> String {
        agents.headers()["User-Agent"].clone()
    }

    #[test]
    fn test_sticky_keeps_identity_until_rotate() {
        let agents = RotatingAgents::desktop();
        let first = user_agent(&agents);

        assert_eq!(user_agent(&agents), first);
        assert_eq!(user_agent(&agents), first);

        let rotated = agents.rotate().user_agent.clone();
        assert_ne!(rotated, first);
        assert_eq!(user_agent(&agents), rotated);
    }

    #[test]
    fn test_round_robin_rotates_per_call() {
        let agents = RotatingAgents::mobile().sticky(false);
        let seen: Vec<String> = (0..agents.len() + 1).map(|_| user_agent(&agents)).collect();

        assert_ne!(seen[0], seen[1]);
        assert_eq!(seen[0], seen[agents.len()]);
    }

    #[test]
    fn test_device_headers() {
        let mobile = RotatingAgents::mobile().headers();
        assert_eq!(mobile["Sec-CH-UA-Mobile"], "?1");
        assert!(mobile["User-Agent"].contains("Mobile"));

        let desktop = RotatingAgents::desktop().headers();
        assert_eq!(desktop["Sec-CH-UA-Mobile"], "?0");
        assert!(desktop.contains_key("Accept-Language"));
    }

    #[test]
    fn test_pools() {
        assert_eq!(
            RotatingAgents::all().len(),
            DESKTOP_AGENTS.len() + MOBILE_AGENTS.len()
        );
        assert_eq!(RotatingAgents::with_profiles(vec![]).len(), DESKTOP_AGENTS.len());
    }
}
