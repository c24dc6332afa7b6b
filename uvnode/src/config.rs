//! Node configuration

use crate::core::NodeId;
use crate::time::Duration;

/// Deadline applied to requests that have no explicit one
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Node configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub struct Config {
    /// Local address, used as the source of every outbound transfer
    pub node_id: NodeId,
    /// Time a request waits for its response before the continuation receives a timeout
    pub request_timeout: Duration,
}

impl Config {
    pub const fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(NodeId::MIN)
    }
}
