//! Core types for the state-channel wallet.
//!
//! This crate provides the foundational types used throughout the wallet
//! implementation:
//!
//! - **Primitives**: Hash, cryptographic keys and signatures
//! - **Channel model**: FixedPart, State, SignedState, allocations
//! - **Outcome math**: transfer and claim payout computations
//! - **Objectives**: durable protocol-goal records with deterministic ids
//! - **Chain interface**: requests submitted to and events observed from
//!   the adjudicator
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not
//! depend on any other workspace crates, making it the foundation layer.

mod chain;
mod crypto;
mod hash;
mod objective;
mod outcome;
mod signing;
mod state;

pub use chain::{
    ChainEvent, ChainRequest, ChainRequestKind, ChallengeClearedKind,
};
pub use crypto::{Address, Keypair, Signature};
pub use hash::{Hash, HexError};
pub use objective::{Objective, ObjectiveData, ObjectiveId, ObjectiveStatus};
pub use outcome::{
    compute_claim_effects, compute_transfer_effects, ClaimEffects, OutcomeError,
    TransferEffects,
};
pub use signing::{channel_state_message, DOMAIN_CHANNEL_STATE};
pub use state::{
    decode_guarantee_data, encode_guarantee_data, Allocation, AllocationType,
    ChannelId, Destination, FixedPart, FundingStrategy, Participant, SignedState,
    State, StateError,
};
