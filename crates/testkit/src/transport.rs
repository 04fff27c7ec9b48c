//! Deterministic lossy message transport.
//!
//! Messages submitted with [`LossyTransport::send`] are either dropped or
//! scheduled for delivery after a sampled delay. All randomness comes from a
//! seeded ChaCha8 stream, so a given seed replays the exact same drops and
//! delays.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statewallet_engine::Message;
use std::collections::BTreeMap;
use std::time::Duration;

/// Loss and latency parameters for a simulated link.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Probability in `[0, 1]` that a message is silently dropped.
    pub drop_rate: f64,
    /// Lower bound on the sampled delivery delay.
    pub min_delay: Duration,
    /// Upper bound on the sampled delivery delay.
    pub max_delay: Duration,
    /// Seed for the deterministic random stream.
    pub seed: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            drop_rate: 0.0,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            seed: 42,
        }
    }
}

/// Simulated network between harness nodes.
pub struct LossyTransport {
    config: TransportConfig,
    rng: ChaCha8Rng,
    // Keyed by (deliver_at, insertion seq) so same-instant messages keep
    // their send order.
    in_flight: BTreeMap<(Duration, u64), Message>,
    next_seq: u64,
    dropped: u64,
}

impl LossyTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            in_flight: BTreeMap::new(),
            next_seq: 0,
            dropped: 0,
        }
    }

    /// Submit a message at simulated time `now`. It may be dropped, or
    /// queued for delivery after a sampled delay.
    pub fn send(&mut self, now: Duration, message: Message) {
        if self.config.drop_rate > 0.0 && self.rng.gen::<f64>() < self.config.drop_rate {
            self.dropped += 1;
            return;
        }
        let delay = self.sample_delay();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight.insert((now + delay, seq), message);
    }

    /// Pop every message whose delivery time has arrived.
    pub fn poll(&mut self, now: Duration) -> Vec<Message> {
        let still_in_flight = self.in_flight.split_off(&(
            now + Duration::from_nanos(1),
            0,
        ));
        let due = std::mem::replace(&mut self.in_flight, still_in_flight);
        due.into_values().collect()
    }

    /// Number of messages dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Number of messages queued but not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn sample_delay(&mut self) -> Duration {
        let min = self.config.min_delay.as_millis() as u64;
        let max = self.config.max_delay.as_millis() as u64;
        if max <= min {
            return self.config.min_delay;
        }
        Duration::from_millis(self.rng.gen_range(min..=max))
    }
}
