//! Globally defined agent used to fetch remote (`gh:`/`http(s):`) modules.

use std::sync::OnceLock;
use std::time::Duration;
use ureq::{Agent, AgentBuilder};

static AGENT: OnceLock<Agent> = OnceLock::new();

/// Get or initialize the global static agent used for remote module fetches.
///
/// 2s connect / 20s total timeout, per the concurrency model's remote-fetch
/// bound.
pub fn agent() -> &'static Agent {
    AGENT.get_or_init(|| {
        AgentBuilder::new()
            .timeout_connect(Duration::from_secs(2))
            .timeout(Duration::from_secs(20))
            .build()
    })
}
