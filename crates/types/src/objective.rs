//! Objectives: durable records of multi-step protocol goals.
//!
//! An objective tracks one lifecycle goal (open a channel, close it,
//! defund it, challenge it) from proposal to completion. Its id is
//! derived from the goal type and the primary channel, so both
//! participants independently compute the same id and the store can
//! deduplicate proposals.

use crate::{ChannelId, Destination, FixedPart};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deterministic objective identifier: `<Type>-<channel-id-hex>`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectiveId(String);

impl ObjectiveId {
    /// Build the id for a goal type acting on a channel.
    pub fn new(objective_type: &str, channel_id: &ChannelId) -> Self {
        Self(format!("{objective_type}-{}", channel_id.to_hex()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ObjectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.0;
        if let Some(dash) = s.find('-') {
            let hex = &s[dash + 1..];
            if hex.len() == 64 {
                return write!(f, "ObjectiveId({}-{}..{})", &s[..dash], &hex[..8], &hex[56..]);
            }
        }
        write!(f, "ObjectiveId({s})")
    }
}

impl fmt::Display for ObjectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveStatus {
    /// Proposed (by us or a peer) but not yet approved locally.
    Pending,
    /// Approved; the engine cranks it until it resolves.
    Approved,
    /// The goal was reached.
    Succeeded,
    /// Abandoned by operator decision or timeout.
    Failed,
}

impl ObjectiveStatus {
    /// Whether the objective has resolved and will never be cranked again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ObjectiveStatus::Succeeded | ObjectiveStatus::Failed)
    }
}

/// Goal-specific payload. The first four variants drive protocol
/// machines; the rest participate in the data and join-index model only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveData {
    /// Open and fund a channel.
    OpenChannel {
        /// The channel's identity fields.
        fixed: FixedPart,
        /// How the channel gets funded.
        funding_strategy: crate::FundingStrategy,
    },
    /// Cooperatively finalize a channel.
    CloseChannel {
        /// Channel being closed.
        channel_id: ChannelId,
    },
    /// Recover funds from a finalized channel.
    DefundChannel {
        /// Channel being defunded.
        channel_id: ChannelId,
    },
    /// Put the channel's latest support proof on chain.
    SubmitChallenge {
        /// Channel being challenged.
        channel_id: ChannelId,
    },
    /// Reallocate a ledger channel to fund another channel.
    FundLedger {
        /// The ledger channel.
        ledger_id: ChannelId,
        /// The channel being funded from it.
        funded_channel_id: ChannelId,
    },
    /// Drain and finalize a ledger channel.
    CloseLedger {
        /// The ledger channel.
        ledger_id: ChannelId,
    },
    /// Install a guarantee in a ledger channel.
    FundGuarantor {
        /// The ledger channel carrying the guarantee.
        ledger_id: ChannelId,
        /// The guarantor channel.
        guarantor_id: ChannelId,
        /// Target of the guarantee.
        target: Destination,
    },
    /// Fund a channel through intermediaries.
    VirtuallyFund {
        /// The target channel.
        target_id: ChannelId,
        /// Ledger channels along the path, in hop order.
        ledger_ids: Vec<ChannelId>,
    },
}

impl ObjectiveData {
    /// Goal type tag used in objective ids.
    pub fn objective_type(&self) -> &'static str {
        match self {
            ObjectiveData::OpenChannel { .. } => "OpenChannel",
            ObjectiveData::CloseChannel { .. } => "CloseChannel",
            ObjectiveData::DefundChannel { .. } => "DefundChannel",
            ObjectiveData::SubmitChallenge { .. } => "SubmitChallenge",
            ObjectiveData::FundLedger { .. } => "FundLedger",
            ObjectiveData::CloseLedger { .. } => "CloseLedger",
            ObjectiveData::FundGuarantor { .. } => "FundGuarantor",
            ObjectiveData::VirtuallyFund { .. } => "VirtuallyFund",
        }
    }

    /// The channel the objective id is derived from.
    pub fn primary_channel(&self) -> ChannelId {
        match self {
            ObjectiveData::OpenChannel { fixed, .. } => fixed.channel_id(),
            ObjectiveData::CloseChannel { channel_id }
            | ObjectiveData::DefundChannel { channel_id }
            | ObjectiveData::SubmitChallenge { channel_id } => *channel_id,
            ObjectiveData::FundLedger {
                funded_channel_id, ..
            } => *funded_channel_id,
            ObjectiveData::CloseLedger { ledger_id } => *ledger_id,
            ObjectiveData::FundGuarantor { guarantor_id, .. } => *guarantor_id,
            ObjectiveData::VirtuallyFund { target_id, .. } => *target_id,
        }
    }

    /// Every channel this objective reads or writes. Store mutations to
    /// any of these re-crank the objective.
    pub fn referenced_channels(&self) -> Vec<ChannelId> {
        match self {
            ObjectiveData::OpenChannel { fixed, .. } => vec![fixed.channel_id()],
            ObjectiveData::CloseChannel { channel_id }
            | ObjectiveData::DefundChannel { channel_id }
            | ObjectiveData::SubmitChallenge { channel_id } => vec![*channel_id],
            ObjectiveData::FundLedger {
                ledger_id,
                funded_channel_id,
            } => vec![*ledger_id, *funded_channel_id],
            ObjectiveData::CloseLedger { ledger_id } => vec![*ledger_id],
            ObjectiveData::FundGuarantor {
                ledger_id,
                guarantor_id,
                ..
            } => vec![*ledger_id, *guarantor_id],
            ObjectiveData::VirtuallyFund {
                target_id,
                ledger_ids,
            } => {
                let mut channels = vec![*target_id];
                channels.extend(ledger_ids.iter().copied());
                channels
            }
        }
    }

    /// Whether a protocol machine exists for this goal type.
    pub fn has_machine(&self) -> bool {
        matches!(
            self,
            ObjectiveData::OpenChannel { .. }
                | ObjectiveData::CloseChannel { .. }
                | ObjectiveData::DefundChannel { .. }
                | ObjectiveData::SubmitChallenge { .. }
        )
    }
}

/// A durable objective record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    /// Deterministic id.
    pub id: ObjectiveId,
    /// Current lifecycle status.
    pub status: ObjectiveStatus,
    /// Goal payload.
    pub data: ObjectiveData,
}

impl Objective {
    /// A freshly proposed objective, id derived from the data.
    pub fn proposed(data: ObjectiveData) -> Self {
        let id = ObjectiveId::new(data.objective_type(), &data.primary_channel());
        Self {
            id,
            status: ObjectiveStatus::Pending,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, FundingStrategy, Hash, Participant};

    fn test_fixed() -> FixedPart {
        FixedPart {
            chain_id: 1,
            channel_nonce: 1,
            participants: vec![Participant {
                participant_id: "a".into(),
                signing_address: Address::ZERO,
                destination: Destination::from_bytes([0u8; 32]),
            }],
            app_definition: Address::ZERO,
            challenge_duration: 300,
        }
    }

    #[test]
    fn test_objective_id_deterministic() {
        let fixed = test_fixed();
        let a = Objective::proposed(ObjectiveData::OpenChannel {
            fixed: fixed.clone(),
            funding_strategy: FundingStrategy::Direct,
        });
        let b = Objective::proposed(ObjectiveData::OpenChannel {
            fixed: fixed.clone(),
            funding_strategy: FundingStrategy::Direct,
        });
        assert_eq!(a.id, b.id);
        assert_eq!(
            a.id.as_str(),
            format!("OpenChannel-{}", fixed.channel_id().to_hex())
        );
        assert_eq!(a.status, ObjectiveStatus::Pending);
    }

    #[test]
    fn test_referenced_channels_cover_every_hop() {
        let target = ChannelId::from_hash(Hash::from_bytes(b"target"));
        let hop_a = ChannelId::from_hash(Hash::from_bytes(b"hop-a"));
        let hop_b = ChannelId::from_hash(Hash::from_bytes(b"hop-b"));
        let data = ObjectiveData::VirtuallyFund {
            target_id: target,
            ledger_ids: vec![hop_a, hop_b],
        };
        assert_eq!(data.referenced_channels(), vec![target, hop_a, hop_b]);
        assert!(!data.has_machine());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ObjectiveStatus::Succeeded.is_terminal());
        assert!(ObjectiveStatus::Failed.is_terminal());
        assert!(!ObjectiveStatus::Pending.is_terminal());
        assert!(!ObjectiveStatus::Approved.is_terminal());
    }
}
