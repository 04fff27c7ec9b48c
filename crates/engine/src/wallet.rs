//! Single-worker wallet engine.
//!
//! All work happens on the calling thread, one store transaction per API
//! call: lock the affected channels, mutate, crank every objective that
//! references them, collect side effects, release, then dispatch chain
//! requests and hand the outbox back to the caller.

use crate::{
    decode_payload, encode_payload, ApiResponse, ChainService, ChannelParams,
    EngineError, Message, ObjectiveDoneResult, ObjectiveResult, Payload,
    WalletApi, WalletConfig, WalletEvent,
};
use parking_lot::Mutex;
use statewallet_channel::Channel;
use statewallet_protocols::{crank, propose_final, CrankContext, ProtocolError};
use statewallet_store::{Store, StoreError};
use statewallet_types::{
    Allocation, ChainEvent, ChainRequest, ChannelId, FixedPart, Keypair,
    Objective, ObjectiveData, ObjectiveId, ObjectiveStatus, Participant,
    SignedState, State,
};
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct ObjectiveTracker {
    last_progress: Duration,
    attempts: u32,
    next_retry_at: Duration,
}

/// The single-threaded engine. Cheap to share behind an `Arc`; interior
/// locking keeps concurrent API calls safe, serialized per channel by
/// the store.
pub struct WalletEngine {
    config: WalletConfig,
    keypair: Keypair,
    store: Arc<Store>,
    chain: Arc<dyn ChainService>,
    events: Mutex<VecDeque<WalletEvent>>,
    done_senders: Mutex<HashMap<ObjectiveId, Vec<Sender<ObjectiveDoneResult>>>>,
    resolutions: Mutex<HashMap<ObjectiveId, ObjectiveDoneResult>>,
    trackers: Mutex<HashMap<ObjectiveId, ObjectiveTracker>>,
    now: Mutex<Duration>,
}

impl WalletEngine {
    /// Build an engine around a fresh store.
    pub fn new(config: WalletConfig, keypair: Keypair, chain: Arc<dyn ChainService>) -> Self {
        let store = Arc::new(Store::new(keypair.address(), config.lock_policy));
        Self {
            config,
            keypair,
            store,
            chain,
            events: Mutex::new(VecDeque::new()),
            done_senders: Mutex::new(HashMap::new()),
            resolutions: Mutex::new(HashMap::new()),
            trackers: Mutex::new(HashMap::new()),
            now: Mutex::new(Duration::ZERO),
        }
    }

    fn emit(&self, event: WalletEvent) {
        self.events.lock().push_back(event);
    }

    fn resolve(&self, objective_id: &ObjectiveId, result: ObjectiveDoneResult) {
        self.resolutions
            .lock()
            .insert(objective_id.clone(), result.clone());
        if let Some(senders) = self.done_senders.lock().remove(objective_id) {
            for sender in senders {
                let _ = sender.send(result.clone());
            }
        }
        self.trackers.lock().remove(objective_id);
    }

    fn register_handle(&self, objective_id: ObjectiveId) -> ObjectiveResult {
        let (handle, sender) = ObjectiveResult::new(objective_id.clone());
        if let Some(result) = self.resolutions.lock().get(&objective_id) {
            let _ = sender.send(result.clone());
        } else {
            self.done_senders
                .lock()
                .entry(objective_id)
                .or_default()
                .push(sender);
        }
        handle
    }

    fn start_objective(&self, objective_id: &ObjectiveId) {
        let now = *self.now.lock();
        self.trackers
            .lock()
            .entry(objective_id.clone())
            .or_insert(ObjectiveTracker {
                last_progress: now,
                attempts: 0,
                next_retry_at: Duration::ZERO,
            });
        self.emit(WalletEvent::ObjectiveStarted {
            objective_id: objective_id.clone(),
        });
    }

    fn succeed_objective(&self, objective_id: &ObjectiveId) -> Result<(), EngineError> {
        self.store
            .mark_objective(objective_id, ObjectiveStatus::Succeeded)?;
        info!(objective_id = %objective_id, "Objective succeeded");
        self.resolve(objective_id, ObjectiveDoneResult::Success);
        self.emit(WalletEvent::ObjectiveCompleted {
            objective_id: objective_id.clone(),
            result: ObjectiveDoneResult::Success,
        });
        Ok(())
    }

    fn fail_objective(
        &self,
        objective_id: &ObjectiveId,
        result: ObjectiveDoneResult,
    ) -> Result<(), EngineError> {
        self.store
            .mark_objective(objective_id, ObjectiveStatus::Failed)?;
        warn!(objective_id = %objective_id, result = ?result, "Objective failed");
        if result == ObjectiveDoneResult::TimedOut {
            self.emit(WalletEvent::ObjectiveTimedOut {
                objective_id: objective_id.clone(),
            });
        }
        self.resolve(objective_id, result.clone());
        self.emit(WalletEvent::ObjectiveCompleted {
            objective_id: objective_id.clone(),
            result,
        });
        Ok(())
    }

    fn outbox_for(
        &self,
        participants: &[Participant],
        my_index: usize,
        payload: &Payload,
    ) -> Result<Vec<Message>, EngineError> {
        let data = encode_payload(payload)?;
        let sender = participants[my_index].participant_id.clone();
        Ok(participants
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != my_index)
            .map(|(_, p)| Message {
                sender: sender.clone(),
                recipient: p.participant_id.clone(),
                data: data.clone(),
            })
            .collect())
    }

    /// Crank one approved objective against its locked primary channel,
    /// folding side effects into `response` and `chain_requests`.
    fn crank_objective(
        &self,
        objective: &Objective,
        response: &mut ApiResponse,
        chain_requests: &mut Vec<ChainRequest>,
    ) -> Result<(), EngineError> {
        let primary = objective.data.primary_channel();
        let cranked = self.store.with_channel(primary, |channel| {
            let mut ctx = CrankContext {
                channel,
                keypair: &self.keypair,
                store: &self.store,
            };
            let output = crank(objective, &mut ctx);
            (
                output,
                channel.fixed.participants.clone(),
                channel.my_index,
            )
        });

        let (output, participants, my_index) = match cranked {
            Ok(parts) => parts,
            Err(StoreError::ChannelNotFound { channel_id }) => {
                if objective.data.has_machine() {
                    self.fail_objective(
                        &objective.id,
                        ObjectiveDoneResult::Internal(format!(
                            "channel {channel_id} not found"
                        )),
                    )?;
                }
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let output = match output {
            Ok(output) => output,
            Err(e) if e.is_terminal() => {
                self.fail_objective(
                    &objective.id,
                    ObjectiveDoneResult::Internal(e.to_string()),
                )?;
                return Ok(());
            }
            Err(e) => {
                debug!(objective_id = %objective.id, error = %e, "Crank is waiting");
                return Ok(());
            }
        };

        if !output.outbox_states.is_empty() {
            let payload = Payload {
                signed_states: output.outbox_states,
                objectives: vec![objective.clone()],
            };
            response
                .outbox
                .extend(self.outbox_for(&participants, my_index, &payload)?);
        }
        chain_requests.extend(output.chain_requests);

        if output.progressed {
            let now = *self.now.lock();
            if let Some(tracker) = self.trackers.lock().get_mut(&objective.id) {
                tracker.last_progress = now;
                tracker.attempts = 0;
            }
        }
        if output.transition == Some(ObjectiveStatus::Succeeded) {
            self.succeed_objective(&objective.id)?;
        }
        Ok(())
    }

    /// The tail of every store transaction: re-crank the objectives
    /// referencing the touched channels, snapshot them, dispatch chain
    /// requests.
    fn process_channels(&self, touched: Vec<ChannelId>) -> Result<ApiResponse, EngineError> {
        let mut response = ApiResponse::default();
        let mut chain_requests = Vec::new();

        let objectives: Vec<Objective> = self
            .store
            .objectives_for_channels(&touched)
            .into_iter()
            .filter(|o| o.status == ObjectiveStatus::Approved)
            .collect();
        for objective in &objectives {
            self.crank_objective(objective, &mut response, &mut chain_requests)?;
        }

        for channel_id in &touched {
            match self.store.channel_result(*channel_id) {
                Ok(result) => response.channel_results.push(result),
                Err(StoreError::ChannelNotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        for request in chain_requests {
            self.chain.submit_request(request);
        }
        Ok(response)
    }

    fn retransmit_payload(&self, objective: &Objective) -> Result<Vec<Message>, EngineError> {
        let primary = objective.data.primary_channel();
        let (states, participants, my_index) =
            self.store
                .with_channel(primary, |channel: &mut Channel| {
                    (
                        channel.my_signed_states(),
                        channel.fixed.participants.clone(),
                        channel.my_index,
                    )
                })?;
        let payload = Payload {
            signed_states: states,
            objectives: vec![objective.clone()],
        };
        self.outbox_for(&participants, my_index, &payload)
    }
}

impl WalletApi for WalletEngine {
    fn create_channel(&self, params: ChannelParams) -> Result<ApiResponse, EngineError> {
        let my_address = self.keypair.address();
        let seat = params
            .participants
            .iter()
            .position(|p| p.signing_address == my_address)
            .ok_or(EngineError::NotParticipant {
                address: my_address,
            })?;

        let fixed = FixedPart {
            chain_id: self.config.chain_id,
            channel_nonce: params.channel_nonce,
            participants: params.participants,
            app_definition: params.app_definition,
            challenge_duration: params.challenge_duration,
        };
        let channel_id = self.store.ensure_channel(fixed.clone(), seat)?;
        info!(channel_id = %channel_id, seat, "Creating channel");

        let prefund = State {
            fixed: fixed.clone(),
            turn_num: 0,
            outcome: params.allocations,
            app_data: params.app_data,
            is_final: false,
        };
        let strategy = params.funding_strategy;
        let signed = self
            .store
            .with_channel(channel_id, |channel| {
                channel.funding_strategy = strategy;
                channel.sign(prefund, &self.keypair)
            })?
            .map_err(ProtocolError::from)?;

        let (objective, _) = self.store.ensure_objective(ObjectiveData::OpenChannel {
            fixed,
            funding_strategy: strategy,
        });
        let objective = self.store.approve_objective(&objective.id)?;
        self.start_objective(&objective.id);
        let handle = self.register_handle(objective.id.clone());

        let mut response = self.process_channels(vec![channel_id])?;
        let proposal = Payload {
            signed_states: vec![signed],
            objectives: vec![objective],
        };
        let (participants, my_index) = self.store.with_channel(channel_id, |c| {
            (c.fixed.participants.clone(), c.my_index)
        })?;
        response
            .outbox
            .extend(self.outbox_for(&participants, my_index, &proposal)?);
        response.objective_results.push(handle);
        Ok(response)
    }

    fn join_channel(&self, channel_id: ChannelId) -> Result<ApiResponse, EngineError> {
        let objective_id = ObjectiveId::new("OpenChannel", &channel_id);
        let objective = self.store.approve_objective(&objective_id)?;
        info!(channel_id = %channel_id, "Joining channel");
        self.start_objective(&objective.id);
        let handle = self.register_handle(objective.id);

        let mut response = self.process_channels(vec![channel_id])?;
        response.objective_results.push(handle);
        Ok(response)
    }

    fn update_channel(
        &self,
        channel_id: ChannelId,
        allocations: Vec<Allocation>,
        app_data: Vec<u8>,
    ) -> Result<ApiResponse, EngineError> {
        let signed = self
            .store
            .with_channel(channel_id, |channel| -> Result<SignedState, ProtocolError> {
                let supported = channel.latest_supported_state().ok_or(
                    ProtocolError::NoSupportedState { channel_id },
                )?;
                if supported.state.is_final {
                    return Err(ProtocolError::AlreadyFinal { channel_id });
                }
                let next = State {
                    fixed: channel.fixed.clone(),
                    turn_num: supported.state.turn_num + 1,
                    outcome: allocations,
                    app_data,
                    is_final: false,
                };
                Ok(channel.sign(next, &self.keypair)?)
            })??;

        let mut response = self.process_channels(vec![channel_id])?;
        let payload = Payload {
            signed_states: vec![signed],
            objectives: Vec::new(),
        };
        let (participants, my_index) = self.store.with_channel(channel_id, |c| {
            (c.fixed.participants.clone(), c.my_index)
        })?;
        response
            .outbox
            .extend(self.outbox_for(&participants, my_index, &payload)?);
        Ok(response)
    }

    fn close_channel(&self, channel_id: ChannelId) -> Result<ApiResponse, EngineError> {
        // Sign the final state first; NotMyTurn surfaces to the caller
        // unless someone else's final state is already in flight.
        let (proposed, has_final) = self.store.with_channel(channel_id, |channel| {
            let proposed = propose_final(channel, &self.keypair);
            let has_final = channel
                .latest_state()
                .map(|s| s.state.is_final)
                .unwrap_or(false);
            (proposed, has_final)
        })?;
        let signed = match proposed {
            Ok(signed) => Some(signed),
            Err(ProtocolError::AlreadyFinal { .. }) => None,
            Err(e @ ProtocolError::NotMyTurn { .. }) if !has_final => return Err(e.into()),
            Err(ProtocolError::NotMyTurn { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        info!(channel_id = %channel_id, "Closing channel");

        let (objective, _) = self
            .store
            .ensure_objective(ObjectiveData::CloseChannel { channel_id });
        let objective = self.store.approve_objective(&objective.id)?;
        self.start_objective(&objective.id);
        let handle = self.register_handle(objective.id.clone());
        let outbox_payload = signed.map(|signed| Payload {
            signed_states: vec![signed],
            objectives: vec![objective],
        });

        let mut response = self.process_channels(vec![channel_id])?;
        if let Some(payload) = outbox_payload {
            let (participants, my_index) = self.store.with_channel(channel_id, |c| {
                (c.fixed.participants.clone(), c.my_index)
            })?;
            response
                .outbox
                .extend(self.outbox_for(&participants, my_index, &payload)?);
        }
        response.objective_results.push(handle);
        Ok(response)
    }

    fn push_message(&self, message: Message) -> Result<ApiResponse, EngineError> {
        let payload = decode_payload(&message.data)?;
        for objective in payload.objectives {
            let (stored, created) = self.store.ensure_objective(objective.data);
            if created {
                debug!(objective_id = %stored.id, "Stored proposed objective");
                // Closing is cooperative and needs no operator consent;
                // opening waits for an explicit join or approval.
                if matches!(stored.data, ObjectiveData::CloseChannel { .. }) {
                    self.store.approve_objective(&stored.id)?;
                    self.start_objective(&stored.id);
                }
            }
        }
        let touched = self.store.push_states(payload.signed_states)?;
        self.process_channels(touched)
    }

    fn push_chain_event(&self, event: ChainEvent) -> Result<ApiResponse, EngineError> {
        let channel_id = event.channel_id();
        if !self.store.contains_channel(&channel_id) {
            warn!(channel_id = %channel_id, "Chain event for unknown channel ignored");
            return Ok(ApiResponse::default());
        }
        self.store
            .with_channel(channel_id, |channel| channel.apply_chain_event(&event))?;
        self.process_channels(vec![channel_id])
    }

    fn get_channels(&self) -> Result<Vec<statewallet_channel::ChannelResult>, EngineError> {
        Ok(self.store.get_channels()?)
    }

    fn approve_objectives(&self, ids: &[ObjectiveId]) -> Result<ApiResponse, EngineError> {
        let mut channels = Vec::new();
        let mut handles = Vec::new();
        for id in ids {
            let objective = self.store.approve_objective(id)?;
            self.start_objective(&objective.id);
            handles.push(self.register_handle(objective.id.clone()));
            channels.extend(objective.data.referenced_channels());
        }
        channels.sort();
        channels.dedup();

        let mut response = self.process_channels(channels)?;
        response.objective_results.append(&mut handles);
        Ok(response)
    }

    fn tick(&self, now: Duration) -> Result<ApiResponse, EngineError> {
        *self.now.lock() = now;
        let mut response = ApiResponse::default();
        let mut chain_requests = Vec::new();

        for objective in self.store.approved_objectives() {
            if !objective.data.has_machine() {
                continue;
            }
            self.crank_objective(&objective, &mut response, &mut chain_requests)?;
            match self.store.objective(&objective.id) {
                Some(current) if !current.status.is_terminal() => {}
                _ => continue,
            }

            let (expired, retransmit) = {
                let mut trackers = self.trackers.lock();
                let tracker =
                    trackers
                        .entry(objective.id.clone())
                        .or_insert(ObjectiveTracker {
                            last_progress: now,
                            attempts: 0,
                            next_retry_at: Duration::ZERO,
                        });
                if now.saturating_sub(tracker.last_progress) >= self.config.objective_timeout
                {
                    (true, false)
                } else if now >= tracker.next_retry_at {
                    if tracker.attempts >= self.config.retransmit_policy.number_of_attempts {
                        (true, false)
                    } else {
                        let delay = self
                            .config
                            .retransmit_policy
                            .delay_for_attempt(tracker.attempts);
                        tracker.attempts += 1;
                        tracker.next_retry_at = now + delay;
                        (false, true)
                    }
                } else {
                    (false, false)
                }
            };

            if expired {
                self.fail_objective(&objective.id, ObjectiveDoneResult::TimedOut)?;
            } else if retransmit {
                response.outbox.extend(self.retransmit_payload(&objective)?);
            }
        }

        for request in chain_requests {
            self.chain.submit_request(request);
        }
        Ok(response)
    }

    fn poll_events(&self) -> Vec<WalletEvent> {
        self.events.lock().drain(..).collect()
    }
}
