//! Requests submitted to the chain service and events observed from it.

use crate::{ChannelId, Destination, SignedState};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A transaction the wallet asks the chain service to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainRequest {
    /// Deposit funds for a channel. `expected_held` guards against
    /// double-deposits: the chain service must observe at least that much
    /// already held before sending `amount`.
    Deposit {
        /// Channel to fund.
        channel_id: ChannelId,
        /// Holdings that must already be present.
        expected_held: u128,
        /// Amount to deposit on top.
        amount: u128,
    },
    /// Conclude the channel with a fully-signed final state and withdraw
    /// in one transaction.
    ConcludeAndWithdraw {
        /// Final state carrying quorum signatures.
        support_proof: SignedState,
    },
    /// For a channel finalized by challenge: push its outcome and
    /// withdraw to the recipient.
    PushOutcomeAndWithdraw {
        /// The finalized state.
        finalized_state: SignedState,
        /// Who receives the withdrawn funds.
        recipient: Destination,
    },
    /// Register a challenge with the channel's latest support proof.
    Challenge {
        /// Challenged channel.
        channel_id: ChannelId,
        /// States proving support, ascending turn order.
        states: Vec<SignedState>,
    },
}

impl ChainRequest {
    /// Channel this request acts on.
    pub fn channel_id(&self) -> ChannelId {
        match self {
            ChainRequest::Deposit { channel_id, .. } => *channel_id,
            ChainRequest::ConcludeAndWithdraw { support_proof } => {
                support_proof.state.channel_id()
            }
            ChainRequest::PushOutcomeAndWithdraw {
                finalized_state, ..
            } => finalized_state.state.channel_id(),
            ChainRequest::Challenge { channel_id, .. } => *channel_id,
        }
    }

    /// Dedup key for the store's request ledger.
    pub fn kind(&self) -> ChainRequestKind {
        match self {
            ChainRequest::Deposit { .. } => ChainRequestKind::Deposit,
            ChainRequest::ConcludeAndWithdraw { .. } => ChainRequestKind::Withdraw,
            ChainRequest::PushOutcomeAndWithdraw { .. } => ChainRequestKind::PushOutcome,
            ChainRequest::Challenge { .. } => ChainRequestKind::Challenge,
        }
    }
}

/// Request category, used to submit each (channel, kind) pair at most
/// once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChainRequestKind {
    /// Deposit transactions.
    Deposit,
    /// Conclude-and-withdraw transactions.
    Withdraw,
    /// Push-outcome transactions.
    PushOutcome,
    /// Challenge registrations.
    Challenge,
}

/// How a challenge was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeClearedKind {
    /// A responder moved the channel forward one turn.
    Respond,
    /// A checkpoint with a higher-turn support proof.
    Checkpoint,
}

/// An event observed on chain, delivered by the chain service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
    /// Funds arrived for a destination.
    Deposited {
        /// Funded channel.
        channel_id: ChannelId,
        /// Amount of this deposit.
        amount_deposited: u128,
        /// Total now held for the channel.
        destination_holdings: u128,
    },
    /// A challenge was registered against the channel.
    ChallengeRegistered {
        /// Challenged channel.
        channel_id: ChannelId,
        /// When the challenge finalizes if unanswered.
        finalizes_at: Duration,
        /// States the challenger submitted, ascending turn order.
        challenge_states: Vec<SignedState>,
    },
    /// A pending challenge was cleared.
    ChallengeCleared {
        /// The channel.
        channel_id: ChannelId,
        /// Respond or checkpoint.
        kind: ChallengeClearedKind,
        /// States the chain now treats as canonical.
        new_states: Vec<SignedState>,
    },
    /// The channel was concluded (or a challenge timed out) and its
    /// outcome is final on chain.
    Concluded {
        /// The finalized channel.
        channel_id: ChannelId,
    },
    /// Funds were paid out of the channel.
    AllocationUpdated {
        /// The channel paid out of.
        channel_id: ChannelId,
        /// Total still held after the payout.
        destination_holdings: u128,
    },
}

impl ChainEvent {
    /// Channel the event concerns.
    pub fn channel_id(&self) -> ChannelId {
        match self {
            ChainEvent::Deposited { channel_id, .. }
            | ChainEvent::ChallengeRegistered { channel_id, .. }
            | ChainEvent::ChallengeCleared { channel_id, .. }
            | ChainEvent::Concluded { channel_id }
            | ChainEvent::AllocationUpdated { channel_id, .. } => *channel_id,
        }
    }
}
