//! Chain service seam.

use statewallet_types::ChainRequest;

/// The on-chain adjudicator, consumed as an opaque transaction sink.
/// Observed events come back through `WalletApi::push_chain_event`,
/// driven by whoever polls the chain.
pub trait ChainService: Send + Sync {
    /// Submit a transaction. Fire-and-forget: the engine has already
    /// recorded the request in its dedup ledger, so a lost submission is
    /// recovered by operator intervention, not by resubmitting.
    fn submit_request(&self, request: ChainRequest);
}
