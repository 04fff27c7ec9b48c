//! Channel and objective persistence.
//!
//! Two logical tables: channel aggregates keyed by channel id, and
//! objectives keyed by objective id with a channel↔objective join index
//! maintained alongside every objective write. Per-channel serialization
//! comes from one mutex per aggregate; multi-channel operations take
//! their locks in ascending channel-id order so concurrent callers can
//! never deadlock.

use crate::RetryPolicy;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use statewallet_channel::{Channel, ChannelError, ChannelResult, MergeOutcome};
use statewallet_types::{
    Address, ChainRequestKind, ChannelId, FixedPart, Objective, ObjectiveData,
    ObjectiveId, ObjectiveStatus, SignedState,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct ObjectiveTable {
    objectives: HashMap<ObjectiveId, Objective>,
    by_channel: HashMap<ChannelId, BTreeSet<ObjectiveId>>,
}

/// Durable wallet state: channels, objectives, and the chain-request
/// dedup ledger.
pub struct Store {
    my_address: Address,
    lock_policy: RetryPolicy,
    channels: DashMap<ChannelId, Arc<Mutex<Channel>>>,
    objectives: RwLock<ObjectiveTable>,
    chain_requests: Mutex<HashSet<(ChannelId, ChainRequestKind)>>,
}

impl Store {
    /// A fresh store for the wallet at `my_address`.
    pub fn new(my_address: Address, lock_policy: RetryPolicy) -> Self {
        Self {
            my_address,
            lock_policy,
            channels: DashMap::new(),
            objectives: RwLock::new(ObjectiveTable::default()),
            chain_requests: Mutex::new(HashSet::new()),
        }
    }

    /// The wallet's signing address.
    pub fn my_address(&self) -> Address {
        self.my_address
    }

    /// Create the aggregate for a channel we are opening. Idempotent: an
    /// existing aggregate is left untouched.
    pub fn ensure_channel(
        &self,
        fixed: FixedPart,
        my_index: usize,
    ) -> Result<ChannelId, StoreError> {
        let channel_id = fixed.channel_id();
        if self.channels.contains_key(&channel_id) {
            return Ok(channel_id);
        }
        let channel = Channel::new(fixed, my_index)?;
        self.channels
            .entry(channel_id)
            .or_insert_with(|| Arc::new(Mutex::new(channel)));
        Ok(channel_id)
    }

    /// Whether the store holds an aggregate for the channel.
    pub fn contains_channel(&self, channel_id: &ChannelId) -> bool {
        self.channels.contains_key(channel_id)
    }

    /// All channel ids, ascending.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.channels.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Run `f` with the channel's lock held. Acquisition follows the
    /// store's retry policy; exhaustion is the recoverable
    /// `ChannelLockTimeout`, which callers retry at their own cadence.
    pub fn with_channel<R>(
        &self,
        channel_id: ChannelId,
        f: impl FnOnce(&mut Channel) -> R,
    ) -> Result<R, StoreError> {
        let arc = self
            .channels
            .get(&channel_id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::ChannelNotFound { channel_id })?;
        let mut guard = self.lock_with_policy(channel_id, &arc)?;
        Ok(f(&mut guard))
    }

    /// Snapshot one channel.
    pub fn channel_result(&self, channel_id: ChannelId) -> Result<ChannelResult, StoreError> {
        self.with_channel(channel_id, |channel| ChannelResult::from_channel(channel))
    }

    /// Snapshot every channel, ascending by id.
    pub fn get_channels(&self) -> Result<Vec<ChannelResult>, StoreError> {
        self.channel_ids()
            .into_iter()
            .map(|id| self.channel_result(id))
            .collect()
    }

    /// Merge a batch of received signed states, creating unknown channels
    /// from prefund states the wallet participates in. Channels are
    /// locked in ascending id order for the whole batch. Returns the ids
    /// of channels whose aggregates changed.
    ///
    /// Stale retransmissions are skipped; conflicting or mis-signed
    /// states fail the call (already-merged channels in the batch keep
    /// their progress, matching at-least-once delivery semantics).
    pub fn push_states(&self, states: Vec<SignedState>) -> Result<Vec<ChannelId>, StoreError> {
        let mut by_channel: BTreeMap<ChannelId, Vec<SignedState>> = BTreeMap::new();
        for state in states {
            by_channel
                .entry(state.state.channel_id())
                .or_default()
                .push(state);
        }

        for (channel_id, group) in &by_channel {
            if self.channels.contains_key(channel_id) {
                continue;
            }
            let prefund = group
                .iter()
                .find(|s| s.state.turn_num == 0)
                .ok_or(StoreError::UnknownChannel {
                    channel_id: *channel_id,
                })?;
            let seat = prefund
                .state
                .fixed
                .seat_of(&self.my_address)
                .ok_or(StoreError::UnknownChannel {
                    channel_id: *channel_id,
                })?;
            let channel = Channel::new(prefund.state.fixed.clone(), seat)?;
            self.channels
                .entry(*channel_id)
                .or_insert_with(|| Arc::new(Mutex::new(channel)));
        }

        // Ascending-order multi-lock
        let arcs: Vec<(ChannelId, Arc<Mutex<Channel>>)> = by_channel
            .keys()
            .map(|id| {
                self.channels
                    .get(id)
                    .map(|entry| (*id, entry.value().clone()))
                    .ok_or(StoreError::ChannelNotFound { channel_id: *id })
            })
            .collect::<Result<_, _>>()?;
        let mut guards: Vec<(ChannelId, MutexGuard<'_, Channel>)> =
            Vec::with_capacity(arcs.len());
        for (channel_id, arc) in &arcs {
            guards.push((*channel_id, self.lock_with_policy(*channel_id, arc)?));
        }

        let mut touched = Vec::new();
        for ((channel_id, guard), (_, group)) in guards.iter_mut().zip(by_channel) {
            let mut changed = false;
            for state in group {
                let turn = state.state.turn_num;
                match guard.merge(state) {
                    Ok(MergeOutcome::Applied) => changed = true,
                    Ok(MergeOutcome::NoOp) => {}
                    Err(ChannelError::StaleTurn { .. }) => {
                        debug!(channel_id = %channel_id, turn, "Skipping stale retransmission");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if changed {
                touched.push(*channel_id);
            }
        }
        Ok(touched)
    }

    /// Store an objective if its deterministic id is new, maintaining the
    /// join index in the same write. Returns the stored objective and
    /// whether this call created it.
    pub fn ensure_objective(&self, data: ObjectiveData) -> (Objective, bool) {
        let candidate = Objective::proposed(data);
        let mut table = self.objectives.write();
        if let Some(existing) = table.objectives.get(&candidate.id) {
            return (existing.clone(), false);
        }
        for channel_id in candidate.data.referenced_channels() {
            table
                .by_channel
                .entry(channel_id)
                .or_default()
                .insert(candidate.id.clone());
        }
        table
            .objectives
            .insert(candidate.id.clone(), candidate.clone());
        (candidate, true)
    }

    /// Look up one objective.
    pub fn objective(&self, id: &ObjectiveId) -> Option<Objective> {
        self.objectives.read().objectives.get(id).cloned()
    }

    /// Move a pending objective to approved. Terminal objectives are left
    /// as they are.
    pub fn approve_objective(&self, id: &ObjectiveId) -> Result<Objective, StoreError> {
        let mut table = self.objectives.write();
        let objective = table
            .objectives
            .get_mut(id)
            .ok_or_else(|| StoreError::ObjectiveNotFound { id: id.clone() })?;
        if objective.status == ObjectiveStatus::Pending {
            objective.status = ObjectiveStatus::Approved;
        }
        Ok(objective.clone())
    }

    /// Set an objective's status. Terminal statuses are sticky: once
    /// succeeded or failed, later writes are ignored.
    pub fn mark_objective(
        &self,
        id: &ObjectiveId,
        status: ObjectiveStatus,
    ) -> Result<Objective, StoreError> {
        let mut table = self.objectives.write();
        let objective = table
            .objectives
            .get_mut(id)
            .ok_or_else(|| StoreError::ObjectiveNotFound { id: id.clone() })?;
        if !objective.status.is_terminal() {
            objective.status = status;
        }
        Ok(objective.clone())
    }

    /// The re-crank set: every objective referencing any of the given
    /// channels, deduplicated, ascending by id.
    pub fn objectives_for_channels(&self, channel_ids: &[ChannelId]) -> Vec<Objective> {
        let table = self.objectives.read();
        let mut ids: BTreeSet<&ObjectiveId> = BTreeSet::new();
        for channel_id in channel_ids {
            if let Some(set) = table.by_channel.get(channel_id) {
                ids.extend(set.iter());
            }
        }
        ids.into_iter()
            .filter_map(|id| table.objectives.get(id).cloned())
            .collect()
    }

    /// Every non-terminal approved objective, ascending by id.
    pub fn approved_objectives(&self) -> Vec<Objective> {
        let table = self.objectives.read();
        let mut objectives: Vec<Objective> = table
            .objectives
            .values()
            .filter(|o| o.status == ObjectiveStatus::Approved)
            .cloned()
            .collect();
        objectives.sort_by(|a, b| a.id.cmp(&b.id));
        objectives
    }

    /// Claim the right to submit a chain request. The first caller per
    /// (channel, kind) wins; later callers, including re-cranks after a
    /// restart, are told no.
    pub fn try_begin_chain_request(
        &self,
        channel_id: ChannelId,
        kind: ChainRequestKind,
    ) -> bool {
        self.chain_requests.lock().insert((channel_id, kind))
    }

    fn lock_with_policy<'a>(
        &self,
        channel_id: ChannelId,
        mutex: &'a Mutex<Channel>,
    ) -> Result<MutexGuard<'a, Channel>, StoreError> {
        for attempt in 0..self.lock_policy.number_of_attempts {
            if let Some(guard) = mutex.try_lock_for(self.lock_policy.delay_for_attempt(attempt))
            {
                return Ok(guard);
            }
        }
        Err(StoreError::ChannelLockTimeout {
            channel_id,
            attempts: self.lock_policy.number_of_attempts,
        })
    }
}

/// Errors from store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No aggregate exists for the channel.
    #[error("Channel {channel_id} not found")]
    ChannelNotFound {
        /// Requested channel.
        channel_id: ChannelId,
    },

    /// Lock acquisition exhausted its retry policy. Recoverable: retry
    /// the whole transaction.
    #[error("Timed out locking channel {channel_id} after {attempts} attempts")]
    ChannelLockTimeout {
        /// Contended channel.
        channel_id: ChannelId,
        /// Attempts made.
        attempts: u32,
    },

    /// A state arrived for a channel we neither hold nor participate in.
    #[error("State for unknown channel {channel_id} rejected")]
    UnknownChannel {
        /// The unknown channel.
        channel_id: ChannelId,
    },

    /// No objective with the given id.
    #[error("Objective {id} not found")]
    ObjectiveNotFound {
        /// Requested objective.
        id: ObjectiveId,
    },

    /// Aggregate-level validation failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
