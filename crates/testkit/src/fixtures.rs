//! Deterministic keys and channel parameters for tests.

use statewallet_engine::ChannelParams;
use statewallet_types::{
    Address, Allocation, Destination, FundingStrategy, Keypair, Participant,
};

const SEED_MIX: u64 = 0x517cc1b727220a95;

/// A keypair derived deterministically from an index.
pub fn seeded_keypair(index: u64) -> Keypair {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&index.wrapping_mul(SEED_MIX).wrapping_add(1).to_le_bytes());
    Keypair::from_seed(&seed)
}

/// A participant paying out directly to its signing address.
pub fn participant(name: &str, keypair: &Keypair) -> Participant {
    Participant {
        participant_id: name.to_string(),
        signing_address: keypair.address(),
        destination: Destination::from_address(keypair.address()),
    }
}

/// Directly funded two-party channel parameters, proposer first.
pub fn direct_channel_params(
    names: [&str; 2],
    keys: &[Keypair; 2],
    channel_nonce: u64,
    allocations: Vec<Allocation>,
) -> ChannelParams {
    ChannelParams {
        participants: vec![
            participant(names[0], &keys[0]),
            participant(names[1], &keys[1]),
        ],
        channel_nonce,
        app_definition: Address::ZERO,
        challenge_duration: 300,
        allocations,
        app_data: Vec::new(),
        funding_strategy: FundingStrategy::Direct,
    }
}
