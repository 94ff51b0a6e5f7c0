//! Gateway configuration.

use std::time::Duration;

/// What a creation request hitting a live token does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenReusePolicy {
    /// Reject the new creation with 409. Draft guidance, and the default.
    #[default]
    Reject,
    /// Terminate the existing upload and start over under the same token.
    Replace,
}

/// Tuning knobs for the upload gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// URL path of the upload collection. Creations POST here; individual
    /// uploads live at `{collection_path}/{token}`.
    pub collection_path: String,

    /// Upper bound on bytes buffered per upload between producer and
    /// downstream consumer. Producers suspend above this bound.
    pub max_buffered_bytes: usize,

    /// How long an Idle record (no producer, not complete) survives before
    /// the reaper evicts it. Also bounds how long Complete and Terminated
    /// tombstones stay queryable.
    pub idle_timeout: Duration,

    /// How long a transfer may go without delivering a byte before the
    /// producer is aborted back to Idle.
    pub transfer_timeout: Duration,

    /// How often the reaper sweeps the registry.
    pub reap_interval: Duration,

    /// Creation against an existing token: reject or replace.
    pub token_reuse: TokenReusePolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            collection_path: "/uploads".to_string(),
            max_buffered_bytes: 256 * 1024,
            idle_timeout: Duration::from_secs(300),
            transfer_timeout: Duration::from_secs(60),
            reap_interval: Duration::from_secs(10),
            token_reuse: TokenReusePolicy::Reject,
        }
    }
}

impl GatewayConfig {
    /// Collection path with any trailing slash removed, so path matching
    /// has one canonical form.
    pub fn normalized_collection_path(&self) -> &str {
        self.collection_path.trim_end_matches('/')
    }
}
