//! Engine configuration.

use statewallet_store::RetryPolicy;
use std::time::Duration;

/// Tuning knobs for a wallet engine. `Default` suits tests and small
/// deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletConfig {
    /// Chain the adjudicator lives on; stamped into created channels.
    pub chain_id: u64,
    /// Worker threads. `1` runs everything on the calling thread; more
    /// spins up the sharded engine with channel-affinity routing.
    pub workers: usize,
    /// Backoff for per-channel lock acquisition.
    pub lock_policy: RetryPolicy,
    /// Retransmission budget per objective: how often and how many times
    /// `tick` resends our latest signatures.
    pub retransmit_policy: RetryPolicy,
    /// An approved objective that makes no progress for this long
    /// resolves as timed out.
    pub objective_timeout: Duration,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            workers: 1,
            lock_policy: RetryPolicy::default(),
            retransmit_policy: RetryPolicy {
                number_of_attempts: 100,
                initial_delay: Duration::from_millis(50),
                multiple: 1,
            },
            objective_timeout: Duration::from_secs(3600),
        }
    }
}
