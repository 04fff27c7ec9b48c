//! Wallet engine: objective orchestration over the store.
//!
//! Two implementations of one [`WalletApi`]: the single-worker
//! [`WalletEngine`] cranks on the calling thread, while the
//! [`ShardedWalletEngine`] routes jobs across a fixed pool of worker
//! threads by channel affinity. [`create`] picks between them from
//! configuration.

mod api;
mod chain;
mod config;
mod events;
mod message;
mod sharded;
mod wallet;

pub use api::{ApiResponse, ChannelParams, EngineError, WalletApi};
pub use chain::ChainService;
pub use config::WalletConfig;
pub use events::{ObjectiveDoneResult, ObjectiveResult, WalletEvent};
pub use message::{decode_payload, encode_payload, CodecError, Message, Payload};
pub use sharded::ShardedWalletEngine;
pub use wallet::WalletEngine;

use statewallet_types::Keypair;
use std::sync::Arc;

/// Configuration-driven factory: one worker runs everything on the
/// caller's thread, more spin up the sharded engine.
pub fn create(
    config: WalletConfig,
    keypair: Keypair,
    chain: Arc<dyn ChainService>,
) -> Box<dyn WalletApi> {
    if config.workers <= 1 {
        Box::new(WalletEngine::new(config, keypair, chain))
    } else {
        Box::new(ShardedWalletEngine::new(config, keypair, chain))
    }
}
