//! Objective protocol machines.
//!
//! Each machine exposes one `crank` entry point. A crank inspects the
//! locked channel, the adjudicator view, and the chain-request ledger,
//! then reports the states to relay, the chain requests to submit, and
//! whether the objective has resolved — all as data. Cranks are pure
//! given those inputs: re-invoking one with nothing changed produces no
//! new side effects, which is what lets the engine deliver work
//! at-least-once.

mod close_channel;
mod defund_channel;
mod open_channel;
mod submit_challenge;

pub use close_channel::propose_final;

use statewallet_channel::{Channel, ChannelError};
use statewallet_store::Store;
use statewallet_types::{
    ChainRequest, ChannelId, FundingStrategy, Keypair, Objective, ObjectiveData,
    ObjectiveStatus, SignedState,
};
use tracing::warn;

/// Everything a crank may read or write: the locked channel, the local
/// signing key, and the store (for the chain-request dedup ledger).
pub struct CrankContext<'a> {
    /// The objective's primary channel, locked by the caller.
    pub channel: &'a mut Channel,
    /// Local signing key.
    pub keypair: &'a Keypair,
    /// Backing store; cranks only touch its chain-request ledger.
    pub store: &'a Store,
}

/// Side effects and resolution produced by one crank.
#[derive(Debug, Clone, Default)]
pub struct CrankOutput {
    /// New terminal status, if the objective resolved.
    pub transition: Option<ObjectiveStatus>,
    /// Signed states to relay to counterparties.
    pub outbox_states: Vec<SignedState>,
    /// Transactions to hand to the chain service.
    pub chain_requests: Vec<ChainRequest>,
    /// Whether this crank moved the objective forward at all. Feeds the
    /// engine's progress watchdog.
    pub progressed: bool,
}

impl CrankOutput {
    fn waiting() -> Self {
        Self::default()
    }

    fn succeeded() -> Self {
        Self {
            transition: Some(ObjectiveStatus::Succeeded),
            progressed: true,
            ..Self::default()
        }
    }
}

/// Crank one approved objective against its locked primary channel.
///
/// Objectives without a protocol machine are stored and indexed but
/// never progress on their own; cranking one warns and waits.
pub fn crank(objective: &Objective, ctx: &mut CrankContext<'_>) -> Result<CrankOutput, ProtocolError> {
    if objective.status != ObjectiveStatus::Approved {
        return Ok(CrankOutput::waiting());
    }
    match &objective.data {
        ObjectiveData::OpenChannel {
            funding_strategy, ..
        } => open_channel::crank(*funding_strategy, ctx),
        ObjectiveData::CloseChannel { .. } => close_channel::crank(ctx),
        ObjectiveData::DefundChannel { .. } => defund_channel::crank(ctx),
        ObjectiveData::SubmitChallenge { .. } => submit_challenge::crank(ctx),
        other => {
            warn!(
                objective_id = %objective.id,
                objective_type = other.objective_type(),
                "No protocol machine for objective type; leaving it idle"
            );
            Ok(CrankOutput::waiting())
        }
    }
}

/// Errors surfaced by protocol machines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// It is not the local seat's turn to create the needed state.
    #[error("Not seat {seat}'s turn to create turn {turn} on channel {channel_id}")]
    NotMyTurn {
        /// The channel.
        channel_id: ChannelId,
        /// Turn that would be created.
        turn: u64,
        /// Local seat.
        seat: usize,
    },

    /// The machine requires a supported state that does not exist yet.
    #[error("Channel {channel_id} has no supported state to build on")]
    NoSupportedState {
        /// The channel.
        channel_id: ChannelId,
    },

    /// The channel's latest supported state is already final.
    #[error("Channel {channel_id} is already closing or closed")]
    AlreadyFinal {
        /// The channel.
        channel_id: ChannelId,
    },

    /// A received final state does not extend the supported state.
    #[error(
        "Final state at turn {turn} on channel {channel_id} does not match the supported outcome"
    )]
    FinalStateMismatch {
        /// The channel.
        channel_id: ChannelId,
        /// Turn of the offending final state.
        turn: u64,
    },

    /// This machine only handles directly funded channels.
    #[error("Funding strategy {strategy} is not supported here")]
    UnsupportedFundingStrategy {
        /// The channel's strategy.
        strategy: FundingStrategy,
    },

    /// Aggregate-level validation failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl ProtocolError {
    /// Terminal errors fail the objective; the rest leave it approved for
    /// a later crank.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnsupportedFundingStrategy { .. }
                | ProtocolError::FinalStateMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statewallet_channel::{AdjudicatorStatus, ChannelStatus};
    use statewallet_store::RetryPolicy;
    use statewallet_types::{
        Address, Allocation, ChainRequestKind, Destination, FixedPart, Participant,
        State,
    };
    use std::time::Duration;

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
            channel_nonce: 9,
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

    struct Wallet {
        channel: Channel,
        keypair: Keypair,
        store: Store,
        objective: Objective,
    }

    impl Wallet {
        fn new(fixed: &FixedPart, seat: usize, keypair: &Keypair) -> Self {
            let store = Store::new(
                keypair.address(),
                RetryPolicy {
                    number_of_attempts: 3,
                    initial_delay: Duration::from_millis(5),
                    multiple: 1,
                },
            );
            let (mut objective, _) = store.ensure_objective(ObjectiveData::OpenChannel {
                fixed: fixed.clone(),
                funding_strategy: FundingStrategy::Direct,
            });
            objective.status = ObjectiveStatus::Approved;
            Self {
                channel: Channel::new(fixed.clone(), seat).unwrap(),
                keypair: keypair.clone(),
                store,
                objective,
            }
        }

        fn crank(&mut self) -> CrankOutput {
            let mut ctx = CrankContext {
                channel: &mut self.channel,
                keypair: &self.keypair,
                store: &self.store,
            };
            crank(&self.objective, &mut ctx).unwrap()
        }
    }

    fn relay(from: CrankOutput, to: &mut Wallet) {
        for state in from.outbox_states {
            to.channel.merge(state).unwrap();
        }
    }

    #[test]
    fn test_open_channel_crank_sequence() {
        let keys = seeded_keys(2);
        let fixed = test_fixed(&keys);
        let mut a = Wallet::new(&fixed, 0, &keys[0]);
        let mut b = Wallet::new(&fixed, 1, &keys[1]);

        // A signs the prefund at creation time (the API call's job)
        let prefund = State {
            fixed: fixed.clone(),
            turn_num: 0,
            outcome: vec![
                Allocation::simple(Destination::from_address(keys[0].address()), 1),
                Allocation::simple(Destination::from_address(keys[1].address()), 2),
            ],
            app_data: Vec::new(),
            is_final: false,
        };
        let proposal = a.channel.sign(prefund, &a.keypair).unwrap();
        b.channel.merge(proposal).unwrap();

        // B countersigns the prefund
        let out = b.crank();
        assert_eq!(out.outbox_states.len(), 1);
        relay(out, &mut a);
        assert_eq!(a.channel.status(), ChannelStatus::Opening);

        // A is first in the outcome: its crank requests the deposit
        let out = a.crank();
        assert_eq!(out.chain_requests.len(), 1);
        assert!(matches!(
            out.chain_requests[0],
            ChainRequest::Deposit { expected_held: 0, amount: 1, .. }
        ));
        // Cranking again with nothing changed emits nothing new
        let again = a.crank();
        assert!(again.chain_requests.is_empty());
        assert!(again.outbox_states.is_empty());
        assert!(again.transition.is_none());

        // B waits until A's share is held
        assert!(b.crank().chain_requests.is_empty());
        b.channel.holdings = 1;
        let out = b.crank();
        assert!(matches!(
            out.chain_requests[0],
            ChainRequest::Deposit { expected_held: 1, amount: 2, .. }
        ));

        // Full funding lands on both
        a.channel.holdings = 3;
        b.channel.holdings = 3;

        // A is not the postfund creator; B is (turn 3, seat 1)
        assert!(a.crank().outbox_states.is_empty());
        let out = b.crank();
        assert_eq!(out.outbox_states.len(), 1);
        relay(out, &mut a);
        let out = a.crank();
        assert_eq!(out.outbox_states.len(), 1);
        assert_eq!(out.transition, Some(ObjectiveStatus::Succeeded));
        relay(out, &mut b);
        let out = b.crank();
        assert_eq!(out.transition, Some(ObjectiveStatus::Succeeded));
        assert_eq!(a.channel.status(), ChannelStatus::Running);
        assert_eq!(b.channel.status(), ChannelStatus::Running);
    }

    #[test]
    fn test_close_channel_crank() {
        let keys = seeded_keys(2);
        let fixed = test_fixed(&keys);
        let mut a = Wallet::new(&fixed, 0, &keys[0]);
        let mut b = Wallet::new(&fixed, 1, &keys[1]);
        let close = |channel_id| ObjectiveData::CloseChannel { channel_id };
        a.objective = Objective {
            status: ObjectiveStatus::Approved,
            ..Objective::proposed(close(fixed.channel_id()))
        };
        b.objective = a.objective.clone();

        // Support turn 0
        let prefund = State {
            fixed: fixed.clone(),
            turn_num: 0,
            outcome: vec![Allocation::simple(
                Destination::from_address(keys[0].address()),
                1,
            )],
            app_data: Vec::new(),
            is_final: false,
        };
        let signed = a.channel.sign(prefund, &a.keypair).unwrap();
        b.channel.merge(signed).unwrap();
        let signed = b.channel.countersign(0, &b.keypair).unwrap();
        a.channel.merge(signed).unwrap();

        // Turn 1 would be B's: A cannot propose the final state
        assert!(matches!(
            propose_final(&mut a.channel, &a.keypair),
            Err(ProtocolError::NotMyTurn { turn: 1, seat: 0, .. })
        ));

        // B's crank creates it, A's countersigns, both close
        let out = b.crank();
        assert_eq!(out.outbox_states.len(), 1);
        relay(out, &mut a);
        let out = a.crank();
        assert_eq!(out.transition, Some(ObjectiveStatus::Succeeded));
        relay(out, &mut b);
        let out = b.crank();
        assert_eq!(out.transition, Some(ObjectiveStatus::Succeeded));
        assert_eq!(a.channel.status(), ChannelStatus::Closed);
        assert_eq!(b.channel.status(), ChannelStatus::Closed);
    }

    #[test]
    fn test_close_refuses_final_state_with_altered_outcome() {
        let keys = seeded_keys(2);
        let fixed = test_fixed(&keys);
        let mut a = Wallet::new(&fixed, 0, &keys[0]);
        let mut b = Wallet::new(&fixed, 1, &keys[1]);
        a.objective = Objective {
            status: ObjectiveStatus::Approved,
            ..Objective::proposed(ObjectiveData::CloseChannel {
                channel_id: fixed.channel_id(),
            })
        };

        // Supported split: 5 / 5
        let prefund = State {
            fixed: fixed.clone(),
            turn_num: 0,
            outcome: vec![
                Allocation::simple(Destination::from_address(keys[0].address()), 5),
                Allocation::simple(Destination::from_address(keys[1].address()), 5),
            ],
            app_data: Vec::new(),
            is_final: false,
        };
        let signed = a.channel.sign(prefund.clone(), &a.keypair).unwrap();
        b.channel.merge(signed).unwrap();
        let signed = b.channel.countersign(0, &b.keypair).unwrap();
        a.channel.merge(signed).unwrap();

        // B mails a final state that pays everything to itself
        let grab = State {
            turn_num: 1,
            outcome: vec![Allocation::simple(
                Destination::from_address(keys[1].address()),
                10,
            )],
            is_final: true,
            ..prefund
        };
        let signed = b.channel.sign(grab, &b.keypair).unwrap();
        a.channel.merge(signed).unwrap();

        // A refuses to countersign and the objective fails for good
        let mut ctx = CrankContext {
            channel: &mut a.channel,
            keypair: &a.keypair,
            store: &a.store,
        };
        let err = crank(&a.objective, &mut ctx).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::FinalStateMismatch {
                channel_id: fixed.channel_id(),
                turn: 1,
            }
        );
        assert!(err.is_terminal());
        assert_ne!(a.channel.status(), ChannelStatus::Closed);
        assert!(!a.channel.state_at(1).unwrap().signed_by(0));
    }

    #[test]
    fn test_defund_requires_direct_funding() {
        let keys = seeded_keys(2);
        let fixed = test_fixed(&keys);
        let mut a = Wallet::new(&fixed, 0, &keys[0]);
        a.objective = Objective {
            status: ObjectiveStatus::Approved,
            ..Objective::proposed(ObjectiveData::DefundChannel {
                channel_id: fixed.channel_id(),
            })
        };
        a.channel.funding_strategy = FundingStrategy::Virtual;

        let mut ctx = CrankContext {
            channel: &mut a.channel,
            keypair: &a.keypair,
            store: &a.store,
        };
        let err = crank(&a.objective, &mut ctx).unwrap_err();
        assert!(err.is_terminal());
        assert_eq!(
            err,
            ProtocolError::UnsupportedFundingStrategy {
                strategy: FundingStrategy::Virtual
            }
        );
    }

    #[test]
    fn test_defund_concludes_with_local_proof() {
        let keys = seeded_keys(2);
        let fixed = test_fixed(&keys);
        let mut a = Wallet::new(&fixed, 0, &keys[0]);
        let mut b = Wallet::new(&fixed, 1, &keys[1]);
        a.objective = Objective {
            status: ObjectiveStatus::Approved,
            ..Objective::proposed(ObjectiveData::DefundChannel {
                channel_id: fixed.channel_id(),
            })
        };

        // Quorum-signed final state at turn 0's successor
        let prefund = State {
            fixed: fixed.clone(),
            turn_num: 0,
            outcome: vec![Allocation::simple(
                Destination::from_address(keys[0].address()),
                1,
            )],
            app_data: Vec::new(),
            is_final: false,
        };
        let signed = a.channel.sign(prefund, &a.keypair).unwrap();
        b.channel.merge(signed).unwrap();
        let signed = b.channel.countersign(0, &b.keypair).unwrap();
        a.channel.merge(signed).unwrap();
        let final_signed = propose_final(&mut b.channel, &b.keypair).unwrap();
        a.channel.merge(final_signed).unwrap();
        let countersigned = a.channel.countersign(1, &a.keypair).unwrap();
        b.channel.merge(countersigned).unwrap();
        assert_eq!(a.channel.status(), ChannelStatus::Closed);

        let out = a.crank();
        assert_eq!(out.transition, Some(ObjectiveStatus::Succeeded));
        assert!(matches!(
            out.chain_requests[0],
            ChainRequest::ConcludeAndWithdraw { .. }
        ));
        // Dedup: a repeat crank succeeds again but submits nothing
        let out = a.crank();
        assert!(out.chain_requests.is_empty());

        // Finalized-by-challenge path pushes the outcome instead
        b.channel.adjudicator_status = AdjudicatorStatus::Finalized {
            outcome_pushed: false,
        };
        b.objective = a.objective.clone();
        let out = b.crank();
        assert_eq!(out.transition, Some(ObjectiveStatus::Succeeded));
        assert!(matches!(
            out.chain_requests[0],
            ChainRequest::PushOutcomeAndWithdraw { .. }
        ));
        assert!(!b
            .store
            .try_begin_chain_request(fixed.channel_id(), ChainRequestKind::PushOutcome));
    }

    #[test]
    fn test_defund_already_withdrawn_resolves_without_requests() {
        let keys = seeded_keys(2);
        let fixed = test_fixed(&keys);
        let mut a = Wallet::new(&fixed, 0, &keys[0]);
        a.objective = Objective {
            status: ObjectiveStatus::Approved,
            ..Objective::proposed(ObjectiveData::DefundChannel {
                channel_id: fixed.channel_id(),
            })
        };
        a.channel.adjudicator_status = AdjudicatorStatus::Finalized {
            outcome_pushed: true,
        };

        let out = a.crank();
        assert_eq!(out.transition, Some(ObjectiveStatus::Succeeded));
        assert!(out.chain_requests.is_empty());
        assert!(out.outbox_states.is_empty());
    }

    #[test]
    fn test_submit_challenge_crank() {
        let keys = seeded_keys(2);
        let fixed = test_fixed(&keys);
        let mut a = Wallet::new(&fixed, 0, &keys[0]);
        let mut b = Wallet::new(&fixed, 1, &keys[1]);
        a.objective = Objective {
            status: ObjectiveStatus::Approved,
            ..Objective::proposed(ObjectiveData::SubmitChallenge {
                channel_id: fixed.channel_id(),
            })
        };

        // No supported state yet: nothing to challenge with
        {
            let mut ctx = CrankContext {
                channel: &mut a.channel,
                keypair: &a.keypair,
                store: &a.store,
            };
            assert!(matches!(
                crank(&a.objective, &mut ctx),
                Err(ProtocolError::NoSupportedState { .. })
            ));
        }

        let prefund = State {
            fixed: fixed.clone(),
            turn_num: 0,
            outcome: Vec::new(),
            app_data: Vec::new(),
            is_final: false,
        };
        let signed = a.channel.sign(prefund, &a.keypair).unwrap();
        b.channel.merge(signed).unwrap();
        let signed = b.channel.countersign(0, &b.keypair).unwrap();
        a.channel.merge(signed).unwrap();

        let out = a.crank();
        assert!(matches!(out.chain_requests[0], ChainRequest::Challenge { .. }));
        assert!(out.transition.is_none());
        // Repeat crank is deduped
        assert!(a.crank().chain_requests.is_empty());

        // Registration observed: the objective succeeds
        a.channel.adjudicator_status = AdjudicatorStatus::ChallengeOngoing {
            finalizes_at: Duration::from_secs(600),
        };
        let out = a.crank();
        assert_eq!(out.transition, Some(ObjectiveStatus::Succeeded));
    }
}
