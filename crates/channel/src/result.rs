//! Caller-facing channel summary.

use crate::{AdjudicatorStatus, Channel, ChannelStatus};
use serde::{Deserialize, Serialize};
use statewallet_types::{Allocation, ChannelId, Participant};

/// Snapshot of a channel returned from every API call that touches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelResult {
    /// The channel.
    pub channel_id: ChannelId,
    /// Derived lifecycle status.
    pub status: ChannelStatus,
    /// Turn of the latest supported state, or of the latest state seen if
    /// nothing is supported yet.
    pub turn_num: u64,
    /// Outcome at that turn.
    pub allocations: Vec<Allocation>,
    /// App data at that turn.
    pub app_data: Vec<u8>,
    /// The parties, in seat order.
    pub participants: Vec<Participant>,
    /// Local seat.
    pub my_index: usize,
    /// Funds observed held on chain.
    pub holdings: u128,
    /// What those holdings would pay our destination under the latest
    /// supported outcome.
    pub my_payout: u128,
    /// Adjudicator view.
    pub adjudicator_status: AdjudicatorStatus,
}

impl ChannelResult {
    /// Summarize a channel aggregate.
    pub fn from_channel(channel: &Channel) -> Self {
        let snapshot = channel
            .latest_supported_state()
            .or_else(|| channel.latest_state());
        let (turn_num, allocations, app_data) = match snapshot {
            Some(signed) => (
                signed.state.turn_num,
                signed.state.outcome.clone(),
                signed.state.app_data.clone(),
            ),
            None => (0, Vec::new(), Vec::new()),
        };
        Self {
            channel_id: channel.channel_id(),
            status: channel.status(),
            turn_num,
            allocations,
            app_data,
            participants: channel.fixed.participants.clone(),
            my_index: channel.my_index,
            holdings: channel.holdings,
            my_payout: channel.my_payout(),
            adjudicator_status: channel.adjudicator_status,
        }
    }
}
