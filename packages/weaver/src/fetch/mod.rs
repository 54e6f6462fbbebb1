//! Fetch layer: transports, sufficiency heuristic and the fallback controller.

pub mod agents;
pub mod controller;
#[cfg(feature = "firecrawl")]
pub mod firecrawl;
pub mod http;
pub mod rate_limited;
pub mod sufficiency;

pub use agents::{AgentProfile, DeviceKind, RotatingAgents};
pub use controller::{
    FetchFallbackController, FetchOptions, FetchOutcome, FetchSession, FetchState, Transition,
};
#[cfg(feature = "firecrawl")]
pub use firecrawl::FirecrawlRenderer;
pub use http::HttpFetcher;
pub use rate_limited::RateLimitedFetcher;
pub use sufficiency::{Insufficiency, SufficiencyCheck};
