//! Trust policy configuration.

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_DAILY_RATE_LIMIT, DEFAULT_TIMESTAMP_WINDOW_SECS};

/// What happens when a node whose connection was declined asks again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclinedRequestPolicy {
    /// The declined record stays; a repeat request just reports `DECLINED`.
    #[default]
    Terminal,
    /// The declined record is replaced with a fresh `PENDING` one.
    AllowRerequest,
}

/// Knobs governing request authentication and connection admission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodePolicy {
    /// Accepted clock skew for request timestamps, in seconds.
    pub timestamp_window_secs: i64,
    /// Quota granted to connections approved without an explicit value.
    pub default_daily_rate_limit: u32,
    /// Handling of connection requests from previously declined nodes.
    #[serde(default)]
    pub declined_requests: DeclinedRequestPolicy,
}

impl Default for NodePolicy {
    fn default() -> Self {
        Self {
            timestamp_window_secs: DEFAULT_TIMESTAMP_WINDOW_SECS,
            default_daily_rate_limit: DEFAULT_DAILY_RATE_LIMIT,
            declined_requests: DeclinedRequestPolicy::Terminal,
        }
    }
}
