//! Multi-worker engine with channel-affinity routing.
//!
//! A fixed pool of named worker threads; every job is routed by
//! `hash(channel_id) % workers`, so all work for one channel lands on
//! the same worker and runs in arrival order. Objectives spanning
//! several channels still serialize correctly through the store's
//! ordered locking.

use crate::{
    decode_payload, ApiResponse, ChainService, ChannelParams, EngineError,
    Message, WalletApi, WalletConfig, WalletEngine, WalletEvent,
};
use parking_lot::Mutex;
use statewallet_types::{
    Allocation, ChainEvent, ChannelId, FixedPart, Keypair, ObjectiveId,
};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

type Job = Box<dyn FnOnce(&WalletEngine) + Send>;

struct Worker {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

/// Engine that fans API calls out to a worker pool.
pub struct ShardedWalletEngine {
    config: WalletConfig,
    inner: Arc<WalletEngine>,
    workers: Mutex<Vec<Worker>>,
    worker_count: usize,
}

impl ShardedWalletEngine {
    /// Spin up `config.workers` named worker threads around one shared
    /// engine core.
    pub fn new(config: WalletConfig, keypair: Keypair, chain: Arc<dyn ChainService>) -> Self {
        let worker_count = config.workers.max(2);
        let inner = Arc::new(WalletEngine::new(config, keypair, chain));
        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let (sender, receiver) = channel::<Job>();
            let engine = inner.clone();
            let handle = std::thread::Builder::new()
                .name(format!("wallet-worker-{i}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job(&engine);
                    }
                })
                .unwrap_or_else(|e| panic!("failed to spawn wallet-worker-{i}: {e}"));
            workers.push(Worker {
                sender: Some(sender),
                handle: Some(handle),
            });
        }
        info!(workers = worker_count, "Started sharded wallet engine");
        Self {
            config,
            inner,
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    fn worker_for(&self, channel_id: &ChannelId) -> usize {
        (channel_id.as_hash().as_u64() % self.worker_count as u64) as usize
    }

    fn run_on<R, F>(&self, channel_id: &ChannelId, f: F) -> Result<R, EngineError>
    where
        R: Send + 'static,
        F: FnOnce(&WalletEngine) -> R + Send + 'static,
    {
        let index = self.worker_for(channel_id);
        let (reply, receive) = channel();
        let job: Job = Box::new(move |engine| {
            let _ = reply.send(f(engine));
        });
        {
            let workers = self.workers.lock();
            let sender = workers[index]
                .sender
                .as_ref()
                .ok_or(EngineError::WorkerGone)?;
            sender.send(job).map_err(|_| EngineError::WorkerGone)?;
        }
        receive.recv().map_err(|_| EngineError::WorkerGone)
    }
}

impl Drop for ShardedWalletEngine {
    fn drop(&mut self) {
        let mut workers = self.workers.lock();
        for worker in workers.iter_mut() {
            worker.sender.take();
        }
        for worker in workers.iter_mut() {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl WalletApi for ShardedWalletEngine {
    fn create_channel(&self, params: ChannelParams) -> Result<ApiResponse, EngineError> {
        let fixed = FixedPart {
            chain_id: self.config.chain_id,
            channel_nonce: params.channel_nonce,
            participants: params.participants.clone(),
            app_definition: params.app_definition,
            challenge_duration: params.challenge_duration,
        };
        let channel_id = fixed.channel_id();
        self.run_on(&channel_id, move |engine| engine.create_channel(params))?
    }

    fn join_channel(&self, channel_id: ChannelId) -> Result<ApiResponse, EngineError> {
        self.run_on(&channel_id, move |engine| engine.join_channel(channel_id))?
    }

    fn update_channel(
        &self,
        channel_id: ChannelId,
        allocations: Vec<Allocation>,
        app_data: Vec<u8>,
    ) -> Result<ApiResponse, EngineError> {
        self.run_on(&channel_id, move |engine| {
            engine.update_channel(channel_id, allocations, app_data)
        })?
    }

    fn close_channel(&self, channel_id: ChannelId) -> Result<ApiResponse, EngineError> {
        self.run_on(&channel_id, move |engine| engine.close_channel(channel_id))?
    }

    fn push_message(&self, message: Message) -> Result<ApiResponse, EngineError> {
        // Route by the first state's channel so one channel's messages
        // stay in order on one worker.
        let payload = decode_payload(&message.data)?;
        match payload.signed_states.first() {
            Some(state) => {
                let channel_id = state.state.channel_id();
                self.run_on(&channel_id, move |engine| engine.push_message(message))?
            }
            None => self.inner.push_message(message),
        }
    }

    fn push_chain_event(&self, event: ChainEvent) -> Result<ApiResponse, EngineError> {
        let channel_id = event.channel_id();
        self.run_on(&channel_id, move |engine| engine.push_chain_event(event))?
    }

    fn get_channels(&self) -> Result<Vec<statewallet_channel::ChannelResult>, EngineError> {
        self.inner.get_channels()
    }

    fn approve_objectives(&self, ids: &[ObjectiveId]) -> Result<ApiResponse, EngineError> {
        self.inner.approve_objectives(ids)
    }

    fn tick(&self, now: Duration) -> Result<ApiResponse, EngineError> {
        self.inner.tick(now)
    }

    fn poll_events(&self) -> Vec<WalletEvent> {
        self.inner.poll_events()
    }
}
