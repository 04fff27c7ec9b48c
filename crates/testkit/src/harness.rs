//! Two-wallet simulation harness.
//!
//! Drives a set of wallet engines over a [`LossyTransport`] and a shared
//! [`MockChain`] in fixed time steps. Each step delivers due messages,
//! executes pending chain requests, and ticks every engine so
//! retransmission and timeout behavior runs under simulated time.

use crate::chain::MockChain;
use crate::transport::{LossyTransport, TransportConfig};
use statewallet_engine::{self as engine, Message, WalletApi, WalletConfig};
use statewallet_types::Keypair;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Simulated time advanced per [`Harness::step`].
pub const STEP: Duration = Duration::from_millis(10);

/// One wallet under simulation.
pub struct HarnessNode {
    /// Participant id, used to route messages.
    pub name: String,
    /// The engine under test.
    pub engine: Box<dyn WalletApi>,
}

/// A set of wallets wired together through a lossy transport and one
/// shared chain.
pub struct Harness {
    nodes: Vec<HarnessNode>,
    transport: LossyTransport,
    chain: Arc<MockChain>,
    now: Duration,
}

impl Harness {
    /// Build a two-wallet harness. Both engines share one mock chain so
    /// deposits made by one side are visible to the other.
    pub fn two_party(
        names: [&str; 2],
        keypairs: &[Keypair; 2],
        config: WalletConfig,
        transport_config: TransportConfig,
    ) -> Self {
        let chain = Arc::new(MockChain::default());
        let nodes = names
            .iter()
            .zip(keypairs.iter())
            .map(|(name, keypair)| HarnessNode {
                name: (*name).to_string(),
                engine: engine::create(config, keypair.clone(), chain.clone()),
            })
            .collect();
        Self {
            nodes,
            transport: LossyTransport::new(transport_config),
            chain,
            now: Duration::ZERO,
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// The shared chain.
    pub fn chain(&self) -> &Arc<MockChain> {
        &self.chain
    }

    /// Access a node by index.
    pub fn node(&mut self, index: usize) -> &mut HarnessNode {
        &mut self.nodes[index]
    }

    /// Queue outbound messages onto the transport at the current time.
    pub fn send(&mut self, outbox: Vec<Message>) {
        for message in outbox {
            self.transport.send(self.now, message);
        }
    }

    /// Advance simulated time by [`STEP`]: deliver due messages, run the
    /// chain, tick every engine, and queue whatever they emit.
    pub fn step(&mut self) {
        self.now += STEP;

        let mut pending = Vec::new();

        for message in self.transport.poll(self.now) {
            let Some(node) = self
                .nodes
                .iter()
                .find(|node| node.name == message.recipient)
            else {
                warn!(recipient = %message.recipient, "message for unknown wallet");
                continue;
            };
            match node.engine.push_message(message) {
                Ok(response) => pending.extend(response.outbox),
                Err(error) => warn!(node = %node.name, %error, "push_message failed"),
            }
        }

        for event in self.chain.process(self.now) {
            for node in &self.nodes {
                match node.engine.push_chain_event(event.clone()) {
                    Ok(response) => pending.extend(response.outbox),
                    Err(error) => warn!(node = %node.name, %error, "push_chain_event failed"),
                }
            }
        }

        for node in &self.nodes {
            match node.engine.tick(self.now) {
                Ok(response) => pending.extend(response.outbox),
                Err(error) => warn!(node = %node.name, %error, "tick failed"),
            }
        }

        self.send(pending);
    }

    /// Step until `predicate` holds or `deadline` of simulated time has
    /// elapsed. Returns whether the predicate held.
    pub fn run_until(
        &mut self,
        deadline: Duration,
        mut predicate: impl FnMut(&mut Self) -> bool,
    ) -> bool {
        while self.now < deadline {
            self.step();
            if predicate(self) {
                return true;
            }
        }
        false
    }
}
