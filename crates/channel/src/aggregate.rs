//! The channel aggregate: one channel's signed-state set plus its
//! funding and adjudicator view.
//!
//! The aggregate is a pure state machine. It validates and merges signed
//! states, signs locally under the turn-taking rule, and derives channel
//! status from what it has seen. It never performs IO; the store owns
//! persistence and the engine owns side effects.

use serde::{Deserialize, Serialize};
use statewallet_types::{
    compute_transfer_effects, ChainEvent, ChannelId, Destination, FixedPart,
    FundingStrategy, Keypair, SignedState, State, StateError,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Derived lifecycle status of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelStatus {
    /// Prefund not yet supported.
    Proposed,
    /// Prefund supported, funding not yet satisfied.
    Opening,
    /// Funding satisfied, postfund not yet supported.
    Funding,
    /// Postfund supported.
    Running,
    /// A final state exists but lacks quorum.
    Closing,
    /// A final state holds quorum signatures.
    Closed,
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelStatus::Proposed => "proposed",
            ChannelStatus::Opening => "opening",
            ChannelStatus::Funding => "funding",
            ChannelStatus::Running => "running",
            ChannelStatus::Closing => "closing",
            ChannelStatus::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// On-chain adjudicator state for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjudicatorStatus {
    /// No challenge pending.
    Active,
    /// A challenge is registered and ticking.
    ChallengeOngoing {
        /// When it finalizes if unanswered.
        finalizes_at: Duration,
    },
    /// The channel is finalized on chain.
    Finalized {
        /// Whether the outcome has been pushed and paid out.
        outcome_pushed: bool,
    },
}

/// Next deposit step for the local participant, in declared allocation
/// order: deposit `amount` once on-chain holdings reach `expected_held`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingMilestone {
    /// Holdings that must be observed before our deposit is safe.
    pub expected_held: u128,
    /// Our deposit amount.
    pub amount: u128,
}

/// Whether a merge changed the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New state or new signatures were recorded.
    Applied,
    /// Everything in the incoming state was already known.
    NoOp,
}

/// One channel's full local view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Identity fields.
    pub fixed: FixedPart,
    /// Our seat.
    pub my_index: usize,
    /// How the channel is funded. Defaults to direct; set from the
    /// opening objective.
    pub funding_strategy: FundingStrategy,
    /// Signed states by turn number. Append-only; signatures accumulate.
    states: BTreeMap<u64, SignedState>,
    /// Funds observed held on chain for this channel.
    pub holdings: u128,
    /// Adjudicator view, updated from chain events.
    pub adjudicator_status: AdjudicatorStatus,
}

impl Channel {
    /// Create an empty aggregate for the given fixed part and local seat.
    pub fn new(fixed: FixedPart, my_index: usize) -> Result<Self, ChannelError> {
        if my_index >= fixed.num_participants() {
            return Err(ChannelError::SeatOutOfRange {
                seat: my_index,
                num_participants: fixed.num_participants(),
            });
        }
        Ok(Self {
            fixed,
            my_index,
            funding_strategy: FundingStrategy::Direct,
            states: BTreeMap::new(),
            holdings: 0,
            adjudicator_status: AdjudicatorStatus::Active,
        })
    }

    /// The channel's content-derived id.
    pub fn channel_id(&self) -> ChannelId {
        self.fixed.channel_id()
    }

    /// Participant count.
    pub fn num_participants(&self) -> usize {
        self.fixed.num_participants()
    }

    /// Turn of the postfund state.
    pub fn postfund_turn(&self) -> u64 {
        2 * self.fixed.num_participants() as u64 - 1
    }

    /// Our payout destination.
    pub fn my_destination(&self) -> Destination {
        self.fixed.participants[self.my_index].destination
    }

    /// The signed state at a turn, if known.
    pub fn state_at(&self, turn_num: u64) -> Option<&SignedState> {
        self.states.get(&turn_num)
    }

    /// Highest-turn state seen, supported or not.
    pub fn latest_state(&self) -> Option<&SignedState> {
        self.states.values().next_back()
    }

    /// Highest-turn state carrying quorum signatures.
    pub fn latest_supported_state(&self) -> Option<&SignedState> {
        self.states.values().rev().find(|s| s.has_quorum())
    }

    /// Turn of the latest supported state.
    pub fn latest_supported_turn(&self) -> Option<u64> {
        self.latest_supported_state().map(|s| s.state.turn_num)
    }

    /// Highest turn we have signed ourselves.
    pub fn my_latest_signed_turn(&self) -> Option<u64> {
        self.states
            .values()
            .rev()
            .find(|s| s.signed_by(self.my_index))
            .map(|s| s.state.turn_num)
    }

    /// Every state carrying our signature, ascending by turn. This is
    /// what the engine retransmits when a counterparty goes quiet.
    pub fn my_signed_states(&self) -> Vec<SignedState> {
        self.states
            .values()
            .filter(|s| s.signed_by(self.my_index))
            .cloned()
            .collect()
    }

    /// Merge a received signed state. All-or-nothing: the aggregate is
    /// unchanged if validation fails.
    ///
    /// Signatures accumulate per turn. Re-merging known material is an
    /// idempotent `NoOp`. A turn the aggregate already holds with
    /// different content is rejected, as is a previously-unseen state
    /// below the supported turn or carrying no signatures at all (late
    /// signatures on known states are catch-up and always welcome; the
    /// supported turn never moves backwards either way).
    pub fn merge(&mut self, incoming: SignedState) -> Result<MergeOutcome, ChannelError> {
        let incoming_id = incoming.state.channel_id();
        if incoming_id != self.channel_id() {
            return Err(ChannelError::WrongChannel {
                expected: self.channel_id(),
                actual: incoming_id,
            });
        }
        incoming.verify_all()?;

        let turn = incoming.state.turn_num;
        match self.states.get_mut(&turn) {
            Some(existing) => {
                if existing.state != incoming.state {
                    return Err(ChannelError::ConflictingState { turn });
                }
                let mut applied = false;
                for (seat, signature) in incoming.signatures {
                    if !existing.signatures.contains_key(&seat) {
                        existing.signatures.insert(seat, signature);
                        applied = true;
                    }
                }
                Ok(if applied {
                    MergeOutcome::Applied
                } else {
                    MergeOutcome::NoOp
                })
            }
            None => {
                // An unsigned state would content-lock the turn without
                // any participant having vouched for it.
                if incoming.signatures.is_empty() {
                    return Err(ChannelError::UnsignedState { turn });
                }
                if let Some(supported) = self.latest_supported_turn() {
                    if turn < supported {
                        return Err(ChannelError::StaleTurn {
                            turn,
                            latest: supported,
                        });
                    }
                }
                self.states.insert(turn, incoming);
                Ok(MergeOutcome::Applied)
            }
        }
    }

    /// Sign a state locally and record it, returning the stored signed
    /// state for relay to counterparties.
    ///
    /// Countersigning a state the aggregate already holds is allowed from
    /// any seat (and is idempotent if we already signed it). Introducing a
    /// previously-unseen state enforces turn-taking: its turn modulo the
    /// participant count must equal our seat. Either way the turn must not
    /// fall below anything we have already signed.
    pub fn sign(&mut self, state: State, keypair: &Keypair) -> Result<SignedState, ChannelError> {
        let state_id = state.channel_id();
        if state_id != self.channel_id() {
            return Err(ChannelError::WrongChannel {
                expected: self.channel_id(),
                actual: state_id,
            });
        }

        let turn = state.turn_num;
        if let Some(existing) = self.states.get(&turn) {
            if existing.state != state {
                return Err(ChannelError::ConflictingState { turn });
            }
            if existing.signed_by(self.my_index) {
                return Ok(existing.clone());
            }
        } else {
            if turn % self.num_participants() as u64 != self.my_index as u64 {
                return Err(ChannelError::NotMyTurn {
                    turn,
                    seat: self.my_index,
                });
            }
        }

        if let Some(signed_turn) = self.my_latest_signed_turn() {
            if turn <= signed_turn {
                return Err(ChannelError::StaleTurn {
                    turn,
                    latest: signed_turn,
                });
            }
        }

        let existed = self.states.contains_key(&turn);
        let mut signed = self
            .states
            .remove(&turn)
            .unwrap_or_else(|| SignedState::unsigned(state));
        if let Err(e) = signed.sign_with(self.my_index, keypair) {
            // Restore on failure so the aggregate stays unmodified
            if existed {
                self.states.insert(turn, signed);
            }
            return Err(e.into());
        }
        let out = signed.clone();
        self.states.insert(turn, signed);
        Ok(out)
    }

    /// Countersign the state the aggregate already holds at `turn`.
    pub fn countersign(
        &mut self,
        turn: u64,
        keypair: &Keypair,
    ) -> Result<SignedState, ChannelError> {
        let state = self
            .states
            .get(&turn)
            .ok_or(ChannelError::NoSuchTurn { turn })?
            .state
            .clone();
        self.sign(state, keypair)
    }

    /// Funds the channel's prefund outcome asks for in total.
    pub fn funding_target(&self) -> u128 {
        self.states
            .get(&0)
            .map(|s| s.state.total_allocated())
            .unwrap_or(0)
    }

    /// Whether observed holdings cover the declared outcome: paying the
    /// prefund outcome out of current holdings must leave nothing owed.
    pub fn funding_satisfied(&self) -> bool {
        match self.states.get(&0) {
            Some(prefund) => {
                compute_transfer_effects(self.holdings, &prefund.state.outcome, &[])
                    .allocates_only_zeros
            }
            None => false,
        }
    }

    /// The local participant's deposit step, in declared allocation
    /// order: everyone allocated before us deposits first. The holdings
    /// we wait for are what a fully funded payout of the allocations
    /// ahead of ours would transfer.
    pub fn funding_milestone(&self) -> FundingMilestone {
        let mine = self.my_destination();
        if let Some(prefund) = self.states.get(&0) {
            let outcome = &prefund.state.outcome;
            if let Some(position) = outcome.iter().position(|a| a.destination == mine) {
                let ahead = compute_transfer_effects(
                    prefund.state.total_allocated(),
                    &outcome[..position],
                    &[],
                );
                return FundingMilestone {
                    expected_held: ahead.total_payouts,
                    amount: outcome[position].amount,
                };
            }
        }
        FundingMilestone {
            expected_held: 0,
            amount: 0,
        }
    }

    /// What current holdings would pay out to our destination under the
    /// latest supported outcome.
    pub fn my_payout(&self) -> u128 {
        let mine = self.my_destination();
        match self.latest_supported_state() {
            Some(supported) => {
                compute_transfer_effects(self.holdings, &supported.state.outcome, &[])
                    .exit_allocations
                    .iter()
                    .filter(|exit| exit.destination == mine)
                    .map(|exit| exit.amount)
                    .sum()
            }
            None => 0,
        }
    }

    /// Derived lifecycle status.
    pub fn status(&self) -> ChannelStatus {
        let final_states: Vec<&SignedState> = self
            .states
            .values()
            .filter(|s| s.state.is_final)
            .collect();
        if final_states.iter().any(|s| s.has_quorum()) {
            return ChannelStatus::Closed;
        }
        if final_states.iter().any(|s| !s.signatures.is_empty()) {
            return ChannelStatus::Closing;
        }

        match self.latest_supported_turn() {
            Some(turn) if turn >= self.postfund_turn() => ChannelStatus::Running,
            Some(_) if self.funding_satisfied() => ChannelStatus::Funding,
            Some(_) => ChannelStatus::Opening,
            None => ChannelStatus::Proposed,
        }
    }

    /// Update the funding and adjudicator view from a chain event.
    /// States delivered by challenge events are merged; material the
    /// aggregate already supersedes is skipped.
    pub fn apply_chain_event(&mut self, event: &ChainEvent) {
        match event {
            ChainEvent::Deposited {
                destination_holdings,
                ..
            } => {
                self.holdings = self.holdings.max(*destination_holdings);
            }
            ChainEvent::ChallengeRegistered {
                finalizes_at,
                challenge_states,
                ..
            } => {
                self.adjudicator_status = AdjudicatorStatus::ChallengeOngoing {
                    finalizes_at: *finalizes_at,
                };
                self.merge_chain_states(challenge_states);
            }
            ChainEvent::ChallengeCleared { new_states, .. } => {
                self.adjudicator_status = AdjudicatorStatus::Active;
                self.merge_chain_states(new_states);
            }
            ChainEvent::Concluded { .. } => {
                if !matches!(
                    self.adjudicator_status,
                    AdjudicatorStatus::Finalized { .. }
                ) {
                    self.adjudicator_status = AdjudicatorStatus::Finalized {
                        outcome_pushed: false,
                    };
                }
            }
            ChainEvent::AllocationUpdated {
                destination_holdings,
                ..
            } => {
                self.holdings = *destination_holdings;
                if let AdjudicatorStatus::Finalized { outcome_pushed } =
                    &mut self.adjudicator_status
                {
                    *outcome_pushed = true;
                }
            }
        }
    }

    fn merge_chain_states(&mut self, states: &[SignedState]) {
        for state in states {
            match self.merge(state.clone()) {
                Ok(_) => {}
                Err(ChannelError::StaleTurn { .. }) => {}
                Err(e) => {
                    warn!(
                        channel_id = %self.channel_id(),
                        turn = state.state.turn_num,
                        error = %e,
                        "Discarding on-chain state that fails validation"
                    );
                }
            }
        }
    }
}

/// Errors from channel aggregate operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The state belongs to a different channel.
    #[error("State for channel {actual} offered to channel {expected}")]
    WrongChannel {
        /// This aggregate's channel.
        expected: ChannelId,
        /// The state's channel.
        actual: ChannelId,
    },

    /// A different state already occupies this turn.
    #[error("Conflicting state content at turn {turn}")]
    ConflictingState {
        /// Contested turn.
        turn: u64,
    },

    /// A previously-unseen state arrived without any signatures.
    #[error("Unsigned state at turn {turn} rejected")]
    UnsignedState {
        /// Offered turn.
        turn: u64,
    },

    /// The turn falls below what the aggregate has already advanced past.
    #[error("Stale turn {turn} (already at {latest})")]
    StaleTurn {
        /// Offered turn.
        turn: u64,
        /// Turn already reached.
        latest: u64,
    },

    /// Creating a state at this turn belongs to a different seat.
    #[error("Turn {turn} is not seat {seat}'s to take")]
    NotMyTurn {
        /// Requested turn.
        turn: u64,
        /// Local seat.
        seat: usize,
    },

    /// No state exists at the requested turn.
    #[error("No state at turn {turn}")]
    NoSuchTurn {
        /// Requested turn.
        turn: u64,
    },

    /// The seat index exceeds the participant list.
    #[error("Seat {seat} out of range (channel has {num_participants})")]
    SeatOutOfRange {
        /// Requested seat.
        seat: usize,
        /// Seats in the channel.
        num_participants: usize,
    },

    /// Signature construction or verification failed.
    #[error(transparent)]
    State(#[from] StateError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use statewallet_types::{Address, Allocation, Participant};

    fn seeded_keys(n: usize) -> Vec<Keypair> {
        (0..n)
            .map(|i| {
                let mut seed = [0u8; 32];
                seed[0] = i as u8 + 1;
                Keypair::from_seed(&seed)
            })
            .collect()
    }

    fn test_fixed(keys: &[Keypair]) -> FixedPart {
        FixedPart {
            chain_id: 1,
            channel_nonce: 42,
            participants: keys
                .iter()
                .enumerate()
                .map(|(i, k)| Participant {
                    participant_id: format!("p{i}"),
                    signing_address: k.address(),
                    destination: Destination::from_address(k.address()),
                })
                .collect(),
            app_definition: Address::ZERO,
            challenge_duration: 300,
        }
    }

    fn state_at(fixed: &FixedPart, keys: &[Keypair], turn_num: u64, is_final: bool) -> State {
        State {
            fixed: fixed.clone(),
            turn_num,
            outcome: vec![
                Allocation::simple(Destination::from_address(keys[0].address()), 1),
                Allocation::simple(Destination::from_address(keys[1].address()), 2),
            ],
            app_data: Vec::new(),
            is_final,
        }
    }

    struct Party {
        channel: Channel,
        keypair: Keypair,
    }

    fn two_parties() -> (Vec<Keypair>, Party, Party) {
        let keys = seeded_keys(2);
        let fixed = test_fixed(&keys);
        let a = Party {
            channel: Channel::new(fixed.clone(), 0).unwrap(),
            keypair: keys[0].clone(),
        };
        let b = Party {
            channel: Channel::new(fixed, 1).unwrap(),
            keypair: keys[1].clone(),
        };
        (keys, a, b)
    }

    #[test]
    fn test_status_progression_to_running() {
        let (keys, mut a, mut b) = two_parties();
        assert_eq!(a.channel.status(), ChannelStatus::Proposed);

        // Prefund: A creates turn 0, B countersigns
        let prefund = state_at(&a.channel.fixed, &keys, 0, false);
        let signed = a.channel.sign(prefund, &a.keypair).unwrap();
        b.channel.merge(signed).unwrap();
        let countersigned = b.channel.countersign(0, &b.keypair).unwrap();
        a.channel.merge(countersigned).unwrap();
        assert_eq!(a.channel.status(), ChannelStatus::Opening);
        assert_eq!(a.channel.latest_supported_turn(), Some(0));

        // Funding
        a.channel.holdings = 3;
        assert!(a.channel.funding_satisfied());
        assert_eq!(a.channel.status(), ChannelStatus::Funding);

        // Postfund: turn 3 is B's to create (3 mod 2 == 1)
        let postfund = state_at(&a.channel.fixed, &keys, 3, false);
        let signed = b.channel.sign(postfund, &b.keypair).unwrap();
        a.channel.merge(signed).unwrap();
        let countersigned = a.channel.countersign(3, &a.keypair).unwrap();
        b.channel.merge(countersigned).unwrap();
        assert_eq!(a.channel.status(), ChannelStatus::Running);
        assert_eq!(b.channel.latest_supported_turn(), Some(3));
    }

    #[test]
    fn test_close_via_final_state() {
        let (keys, mut a, mut b) = two_parties();
        let prefund = state_at(&a.channel.fixed, &keys, 0, false);
        let signed = a.channel.sign(prefund, &a.keypair).unwrap();
        b.channel.merge(signed).unwrap();
        a.channel
            .merge(b.channel.countersign(0, &b.keypair).unwrap())
            .unwrap();

        // Turn 4 would be A's; a final state at 4 after turn 0 support
        let final_state = state_at(&a.channel.fixed, &keys, 4, true);
        let signed = a.channel.sign(final_state, &a.keypair).unwrap();
        assert_eq!(a.channel.status(), ChannelStatus::Closing);

        b.channel.merge(signed).unwrap();
        assert_eq!(b.channel.status(), ChannelStatus::Closing);
        let countersigned = b.channel.countersign(4, &b.keypair).unwrap();
        a.channel.merge(countersigned).unwrap();
        assert_eq!(a.channel.status(), ChannelStatus::Closed);
        assert_eq!(b.channel.status(), ChannelStatus::Closed);
    }

    #[test]
    fn test_remerge_is_noop() {
        let (keys, mut a, mut b) = two_parties();
        let prefund = state_at(&a.channel.fixed, &keys, 0, false);
        let signed = a.channel.sign(prefund, &a.keypair).unwrap();

        assert_eq!(b.channel.merge(signed.clone()).unwrap(), MergeOutcome::Applied);
        assert_eq!(b.channel.merge(signed).unwrap(), MergeOutcome::NoOp);

        let status_before = b.channel.status();
        let fully = b.channel.countersign(0, &b.keypair).unwrap();
        assert_eq!(a.channel.merge(fully.clone()).unwrap(), MergeOutcome::Applied);
        assert_eq!(a.channel.merge(fully.clone()).unwrap(), MergeOutcome::NoOp);
        assert_eq!(b.channel.merge(fully).unwrap(), MergeOutcome::NoOp);
        assert_ne!(status_before, ChannelStatus::Closed);
    }

    #[test]
    fn test_turn_taking_enforced_for_new_states() {
        let (keys, mut a, mut b) = two_parties();
        // Turn 0 is A's; B may not create it
        let prefund = state_at(&b.channel.fixed, &keys, 0, false);
        assert_eq!(
            b.channel.sign(prefund.clone(), &b.keypair).unwrap_err(),
            ChannelError::NotMyTurn { turn: 0, seat: 1 }
        );

        // But B may countersign once A's copy arrives
        let signed = a.channel.sign(prefund, &a.keypair).unwrap();
        b.channel.merge(signed).unwrap();
        b.channel.countersign(0, &b.keypair).unwrap();
    }

    #[test]
    fn test_conflicting_content_rejected() {
        let (keys, mut a, mut b) = two_parties();
        let prefund = state_at(&a.channel.fixed, &keys, 0, false);
        b.channel
            .merge(a.channel.sign(prefund.clone(), &a.keypair).unwrap())
            .unwrap();

        let mut forked = state_at(&a.channel.fixed, &keys, 0, false);
        forked.app_data = vec![0xff];
        let mut forked_signed = SignedState::unsigned(forked);
        forked_signed.sign_with(0, &keys[0]).unwrap();
        assert_eq!(
            b.channel.merge(forked_signed).unwrap_err(),
            ChannelError::ConflictingState { turn: 0 }
        );
    }

    #[test]
    fn test_unsigned_state_rejected_and_turn_stays_free() {
        let (keys, mut a, mut b) = two_parties();
        let prefund = state_at(&a.channel.fixed, &keys, 0, false);
        let signed = a.channel.sign(prefund, &a.keypair).unwrap();
        b.channel.merge(signed).unwrap();
        a.channel
            .merge(b.channel.countersign(0, &b.keypair).unwrap())
            .unwrap();

        // A signatureless state must not occupy turn 1
        let junk = SignedState::unsigned(state_at(&b.channel.fixed, &keys, 1, true));
        assert_eq!(
            b.channel.merge(junk).unwrap_err(),
            ChannelError::UnsignedState { turn: 1 }
        );

        // B can still author its own turn-1 state afterwards
        let final_state = state_at(&b.channel.fixed, &keys, 1, true);
        b.channel.sign(final_state, &b.keypair).unwrap();
        assert_eq!(b.channel.status(), ChannelStatus::Closing);
    }

    #[test]
    fn test_stale_new_state_rejected_after_support() {
        let (keys, mut a, mut b) = two_parties();
        // Support turn 0 and turn 3
        for (turn, creator_is_a) in [(0u64, true), (3, false)] {
            let state = state_at(&a.channel.fixed, &keys, turn, false);
            let (creator, other) = if creator_is_a {
                (&mut a, &mut b)
            } else {
                (&mut b, &mut a)
            };
            let signed = creator.channel.sign(state, &creator.keypair).unwrap();
            other.channel.merge(signed).unwrap();
            let countersigned = other.channel.countersign(turn, &other.keypair).unwrap();
            creator.channel.merge(countersigned).unwrap();
        }
        assert_eq!(a.channel.latest_supported_turn(), Some(3));

        // A previously-unseen turn 1 arrives late
        let mut stale = SignedState::unsigned(state_at(&a.channel.fixed, &keys, 1, false));
        stale.sign_with(1, &keys[1]).unwrap();
        assert_eq!(
            a.channel.merge(stale).unwrap_err(),
            ChannelError::StaleTurn { turn: 1, latest: 3 }
        );
        assert_eq!(a.channel.latest_supported_turn(), Some(3));
    }

    #[test]
    fn test_funding_milestone_follows_allocation_order() {
        let (keys, mut a, mut b) = two_parties();
        let prefund = state_at(&a.channel.fixed, &keys, 0, false);
        let signed = a.channel.sign(prefund, &a.keypair).unwrap();
        b.channel.merge(signed).unwrap();

        // A is first in the outcome: deposits 1 immediately
        let m = a.channel.funding_milestone();
        assert_eq!(m, FundingMilestone { expected_held: 0, amount: 1 });

        // B waits for A's deposit before sending 2
        let m = b.channel.funding_milestone();
        assert_eq!(m, FundingMilestone { expected_held: 1, amount: 2 });

        assert_eq!(a.channel.funding_target(), 3);
    }

    #[test]
    fn test_my_payout_follows_holdings_and_allocation_order() {
        let (keys, mut a, mut b) = two_parties();
        assert_eq!(a.channel.my_payout(), 0);

        let prefund = state_at(&a.channel.fixed, &keys, 0, false);
        let signed = a.channel.sign(prefund, &a.keypair).unwrap();
        b.channel.merge(signed).unwrap();
        let countersigned = b.channel.countersign(0, &b.keypair).unwrap();
        a.channel.merge(countersigned).unwrap();

        // Outcome is [a:1, b:2]; underfunded holdings pay A's slot first
        a.channel.holdings = 2;
        assert_eq!(a.channel.my_payout(), 1);
        b.channel.holdings = 2;
        assert_eq!(b.channel.my_payout(), 1);
        b.channel.holdings = 3;
        assert_eq!(b.channel.my_payout(), 2);
    }

    #[test]
    fn test_challenge_events_update_adjudicator_view() {
        let (keys, mut a, mut b) = two_parties();
        let prefund = state_at(&a.channel.fixed, &keys, 0, false);
        let signed = a.channel.sign(prefund, &a.keypair).unwrap();
        b.channel.merge(signed).unwrap();
        let supported = b.channel.countersign(0, &b.keypair).unwrap();

        // B challenges; A learns the supported state from the chain event
        let channel_id = a.channel.channel_id();
        a.channel.apply_chain_event(&ChainEvent::ChallengeRegistered {
            channel_id,
            finalizes_at: Duration::from_secs(600),
            challenge_states: vec![supported],
        });
        assert!(matches!(
            a.channel.adjudicator_status,
            AdjudicatorStatus::ChallengeOngoing { .. }
        ));
        assert_eq!(a.channel.latest_supported_turn(), Some(0));

        a.channel.apply_chain_event(&ChainEvent::ChallengeCleared {
            channel_id,
            kind: statewallet_types::ChallengeClearedKind::Checkpoint,
            new_states: Vec::new(),
        });
        assert_eq!(a.channel.adjudicator_status, AdjudicatorStatus::Active);

        a.channel
            .apply_chain_event(&ChainEvent::Concluded { channel_id });
        a.channel.apply_chain_event(&ChainEvent::AllocationUpdated {
            channel_id,
            destination_holdings: 0,
        });
        assert_eq!(
            a.channel.adjudicator_status,
            AdjudicatorStatus::Finalized { outcome_pushed: true }
        );
    }
}
