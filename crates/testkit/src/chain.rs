//! In-memory chain: collects requests, keeps a holdings ledger, and
//! turns each request into the events a real adjudicator would emit.

use parking_lot::Mutex;
use statewallet_engine::ChainService;
use statewallet_types::{ChainEvent, ChainRequest, ChannelId};
use std::collections::HashMap;
use std::time::Duration;

/// Shared mock adjudicator. Both wallets in a harness point at the same
/// instance so they observe one consistent chain.
#[derive(Default)]
pub struct MockChain {
    requests: Mutex<Vec<ChainRequest>>,
    holdings: Mutex<HashMap<ChannelId, u128>>,
}

impl MockChain {
    /// Current holdings for a channel.
    pub fn holdings(&self, channel_id: &ChannelId) -> u128 {
        self.holdings.lock().get(channel_id).copied().unwrap_or(0)
    }

    /// Pending submitted requests, without executing them.
    pub fn pending_requests(&self) -> usize {
        self.requests.lock().len()
    }

    /// Execute every pending request against the ledger and return the
    /// events to deliver to all wallets.
    pub fn process(&self, now: Duration) -> Vec<ChainEvent> {
        let requests: Vec<ChainRequest> = self.requests.lock().drain(..).collect();
        let mut events = Vec::new();
        for request in requests {
            match request {
                ChainRequest::Deposit {
                    channel_id,
                    expected_held,
                    amount,
                } => {
                    let mut holdings = self.holdings.lock();
                    let held = holdings.entry(channel_id).or_insert(0);
                    // The adjudicator refuses deposits made out of order
                    if *held < expected_held {
                        continue;
                    }
                    *held += amount;
                    events.push(ChainEvent::Deposited {
                        channel_id,
                        amount_deposited: amount,
                        destination_holdings: *held,
                    });
                }
                ChainRequest::ConcludeAndWithdraw { support_proof } => {
                    let channel_id = support_proof.state.channel_id();
                    self.holdings.lock().insert(channel_id, 0);
                    events.push(ChainEvent::Concluded { channel_id });
                    events.push(ChainEvent::AllocationUpdated {
                        channel_id,
                        destination_holdings: 0,
                    });
                }
                ChainRequest::PushOutcomeAndWithdraw {
                    finalized_state, ..
                } => {
                    let channel_id = finalized_state.state.channel_id();
                    self.holdings.lock().insert(channel_id, 0);
                    events.push(ChainEvent::AllocationUpdated {
                        channel_id,
                        destination_holdings: 0,
                    });
                }
                ChainRequest::Challenge { channel_id, states } => {
                    events.push(ChainEvent::ChallengeRegistered {
                        channel_id,
                        finalizes_at: now + Duration::from_secs(600),
                        challenge_states: states,
                    });
                }
            }
        }
        events
    }
}

impl ChainService for MockChain {
    fn submit_request(&self, request: ChainRequest) {
        self.requests.lock().push(request);
    }
}
