//! Public wallet API, implemented by both engine flavors.

use crate::{CodecError, Message, ObjectiveResult, WalletEvent};
use statewallet_channel::ChannelResult;
use statewallet_protocols::ProtocolError;
use statewallet_store::StoreError;
use statewallet_types::{
    Address, Allocation, ChainEvent, ChannelId, FundingStrategy, ObjectiveId,
    Participant,
};
use std::time::Duration;

/// Everything needed to create a channel. The caller lists participants
/// in seat order with the proposer first; turn-taking gives seat zero
/// the right to create the prefund state.
#[derive(Debug, Clone)]
pub struct ChannelParams {
    /// Parties in seat order, proposer first.
    pub participants: Vec<Participant>,
    /// Distinguishes channels between the same parties.
    pub channel_nonce: u64,
    /// Application contract address.
    pub app_definition: Address,
    /// Challenge window in seconds.
    pub challenge_duration: u64,
    /// Initial outcome.
    pub allocations: Vec<Allocation>,
    /// Initial app data.
    pub app_data: Vec<u8>,
    /// How the channel gets funded.
    pub funding_strategy: FundingStrategy,
}

/// What every mutating call returns: the channels it touched, the
/// messages the caller must relay, and completion handles for any
/// objectives the call started.
#[derive(Debug, Default)]
pub struct ApiResponse {
    /// Snapshots of affected channels.
    pub channel_results: Vec<ChannelResult>,
    /// Messages to relay to counterparties.
    pub outbox: Vec<Message>,
    /// Handles for objectives this call created or approved.
    pub objective_results: Vec<ObjectiveResult>,
}

/// The wallet's public surface. One store transaction per call: lock →
/// mutate → crank the affected objectives → collect side effects →
/// release, then dispatch chain requests and hand back the outbox.
pub trait WalletApi: Send + Sync {
    /// Propose a channel: store it, sign the prefund, start an approved
    /// OpenChannel objective.
    fn create_channel(&self, params: ChannelParams) -> Result<ApiResponse, EngineError>;

    /// Approve a proposed channel we were invited to and start driving
    /// its OpenChannel objective.
    fn join_channel(&self, channel_id: ChannelId) -> Result<ApiResponse, EngineError>;

    /// Sign the next turn with a new outcome and app data. Fails with
    /// `NotMyTurn` off-turn.
    fn update_channel(
        &self,
        channel_id: ChannelId,
        allocations: Vec<Allocation>,
        app_data: Vec<u8>,
    ) -> Result<ApiResponse, EngineError>;

    /// Start closing: sign the final state (or fail with `NotMyTurn` if
    /// no final state exists and the turn is not ours).
    fn close_channel(&self, channel_id: ChannelId) -> Result<ApiResponse, EngineError>;

    /// Ingest a message from a counterparty.
    fn push_message(&self, message: Message) -> Result<ApiResponse, EngineError>;

    /// Ingest an observed chain event.
    fn push_chain_event(&self, event: ChainEvent) -> Result<ApiResponse, EngineError>;

    /// Snapshot every channel.
    fn get_channels(&self) -> Result<Vec<ChannelResult>, EngineError>;

    /// Approve pending objectives, crank them, and return their
    /// completion handles in `objective_results`.
    fn approve_objectives(&self, ids: &[ObjectiveId]) -> Result<ApiResponse, EngineError>;

    /// Heartbeat: retransmit for quiet objectives and expire the ones
    /// out of retry budget. `now` is any monotonic clock the caller
    /// keeps.
    fn tick(&self, now: Duration) -> Result<ApiResponse, EngineError>;

    /// Drain pending wallet events.
    fn poll_events(&self) -> Vec<WalletEvent>;
}

/// Errors surfaced by the wallet API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The wallet's signing address is not among the participants.
    #[error("Wallet address {address} is not a participant of the channel")]
    NotParticipant {
        /// The wallet's address.
        address: Address,
    },

    /// A worker thread went away before replying.
    #[error("Engine worker shut down mid-call")]
    WorkerGone,

    /// Store-level failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Protocol-level failure (including `NotMyTurn` on close/update).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Payload encode/decode failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
}
