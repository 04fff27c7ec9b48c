//! Deterministic simulation toolkit for wallet integration tests.
//!
//! Provides seeded fixtures, a lossy in-memory transport, a mock chain,
//! and a step-driven harness that wires wallet engines together without
//! real networking or timers. Seeded randomness makes every run
//! replayable from its seed.

pub mod chain;
pub mod fixtures;
pub mod harness;
pub mod transport;

pub use chain::MockChain;
pub use fixtures::{direct_channel_params, participant, seeded_keypair};
pub use harness::{Harness, HarnessNode, STEP};
pub use transport::{LossyTransport, TransportConfig};
