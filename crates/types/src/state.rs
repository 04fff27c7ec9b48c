//! Channel fixed/variable parts and signed states.
//!
//! A channel is identified by the content hash of its fixed part (the
//! participants, nonce, app definition, and challenge duration — never
//! mutated after creation). Each turn of the channel is a `State` pairing
//! the fixed part with the variable part (turn number, outcome, app data,
//! finality flag). A `SignedState` accumulates one signature per
//! participant seat; quorum for direct funding is all seats.

use crate::{channel_state_message, Address, Hash, Signature};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Content-derived channel identifier: hash of the fixed part.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChannelId(Hash);

impl ChannelId {
    /// Wrap an already-computed hash.
    pub fn from_hash(hash: Hash) -> Self {
        Self(hash)
    }

    /// The underlying hash.
    pub fn as_hash(&self) -> &Hash {
        &self.0
    }

    /// Hex rendering (used in objective ids and logs).
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "ChannelId({}..{})", &hex[..8], &hex[56..])
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A payout destination: either a channel id or a zero-padded external
/// address.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Destination([u8; 32]);

impl Destination {
    /// Size in bytes.
    pub const BYTES: usize = 32;

    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Destination pointing at a channel (used by guarantees and ledger
    /// funding).
    pub fn from_channel(channel_id: ChannelId) -> Self {
        Self(channel_id.as_hash().to_bytes())
    }

    /// Destination paying out to an external signing address.
    pub fn from_address(address: Address) -> Self {
        Self(*address.as_bytes())
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Interpret this destination as a channel id.
    pub fn as_channel(&self) -> ChannelId {
        ChannelId::from_hash(Hash::from_hash_bytes(&self.0))
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.0);
        write!(f, "Destination({}..{})", &hex[..8], &hex[56..])
    }
}

/// One party to a channel. Immutable once the channel is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Stable identifier used for message routing.
    pub participant_id: String,
    /// Address their state signatures must verify under.
    pub signing_address: Address,
    /// Where their funds pay out.
    pub destination: Destination,
}

/// How a channel is funded. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundingStrategy {
    /// Each participant deposits directly with the adjudicator.
    Direct,
    /// Funded by reallocating a shared ledger channel.
    Ledger,
    /// Funded through intermediaries.
    Virtual,
}

impl fmt::Display for FundingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FundingStrategy::Direct => write!(f, "Direct"),
            FundingStrategy::Ledger => write!(f, "Ledger"),
            FundingStrategy::Virtual => write!(f, "Virtual"),
        }
    }
}

/// Kind of an allocation item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationType {
    /// Plain payout to the destination.
    Simple,
    /// Guarantee: funds are redirected to the destinations packed in the
    /// item's metadata, in declared order.
    Guarantee,
}

/// One item of a state's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Who gets paid.
    pub destination: Destination,
    /// Declared amount; payouts never exceed it.
    pub amount: u128,
    /// Simple payout or guarantee.
    pub allocation_type: AllocationType,
    /// Guarantee destination list (empty for simple allocations).
    pub metadata: Vec<u8>,
}

impl Allocation {
    /// A simple allocation with no metadata.
    pub fn simple(destination: Destination, amount: u128) -> Self {
        Self {
            destination,
            amount,
            allocation_type: AllocationType::Simple,
            metadata: Vec::new(),
        }
    }

    /// A guarantee allocation redirecting to the given destinations in
    /// order.
    pub fn guarantee(destination: Destination, amount: u128, targets: &[Destination]) -> Self {
        Self {
            destination,
            amount,
            allocation_type: AllocationType::Guarantee,
            metadata: encode_guarantee_data(targets),
        }
    }
}

/// Pack a guarantee destination list into allocation metadata.
pub fn encode_guarantee_data(destinations: &[Destination]) -> Vec<u8> {
    let mut data = Vec::with_capacity(destinations.len() * Destination::BYTES);
    for dest in destinations {
        data.extend_from_slice(dest.as_bytes());
    }
    data
}

/// Unpack a guarantee destination list from allocation metadata.
pub fn decode_guarantee_data(metadata: &[u8]) -> Result<Vec<Destination>, StateError> {
    if metadata.len() % Destination::BYTES != 0 {
        return Err(StateError::MalformedGuaranteeData {
            len: metadata.len(),
        });
    }
    Ok(metadata
        .chunks_exact(Destination::BYTES)
        .map(|chunk| {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(chunk);
            Destination::from_bytes(bytes)
        })
        .collect())
}

/// The immutable half of a channel: determines its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPart {
    /// Chain the adjudicator lives on.
    pub chain_id: u64,
    /// Distinguishes channels between the same participants.
    pub channel_nonce: u64,
    /// The parties, in seat order.
    pub participants: Vec<Participant>,
    /// Address of the application contract governing transitions.
    pub app_definition: Address,
    /// Challenge window in seconds.
    pub challenge_duration: u64,
}

impl FixedPart {
    /// Number of participant seats.
    pub fn num_participants(&self) -> usize {
        self.participants.len()
    }

    /// Content-derived channel id.
    pub fn channel_id(&self) -> ChannelId {
        let mut parts: Vec<Vec<u8>> = Vec::new();
        parts.push(self.chain_id.to_le_bytes().to_vec());
        parts.push(self.channel_nonce.to_le_bytes().to_vec());
        for p in &self.participants {
            parts.push(p.signing_address.as_bytes().to_vec());
            parts.push(p.destination.as_bytes().to_vec());
        }
        parts.push(self.app_definition.as_bytes().to_vec());
        parts.push(self.challenge_duration.to_le_bytes().to_vec());

        let slices: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
        ChannelId::from_hash(Hash::from_parts(&slices))
    }

    /// Seat index for a signing address, if the address participates.
    pub fn seat_of(&self, address: &Address) -> Option<usize> {
        self.participants
            .iter()
            .position(|p| &p.signing_address == address)
    }
}

/// One channel turn: the fixed part paired with the variable part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Channel identity fields.
    pub fixed: FixedPart,
    /// Total order over states of one channel.
    pub turn_num: u64,
    /// Fund allocation at this turn.
    pub outcome: Vec<Allocation>,
    /// Application-level data.
    pub app_data: Vec<u8>,
    /// Final states conclude the channel once fully countersigned.
    pub is_final: bool,
}

impl State {
    /// The channel this state belongs to.
    pub fn channel_id(&self) -> ChannelId {
        self.fixed.channel_id()
    }

    /// Deterministic content hash over the fixed and variable parts.
    pub fn hash(&self) -> Hash {
        let mut parts: Vec<Vec<u8>> = Vec::new();
        parts.push(self.channel_id().as_hash().as_bytes().to_vec());
        parts.push(self.turn_num.to_le_bytes().to_vec());
        for a in &self.outcome {
            parts.push(a.destination.as_bytes().to_vec());
            parts.push(a.amount.to_le_bytes().to_vec());
            parts.push(vec![match a.allocation_type {
                AllocationType::Simple => 0,
                AllocationType::Guarantee => 1,
            }]);
            parts.push((a.metadata.len() as u64).to_le_bytes().to_vec());
            parts.push(a.metadata.clone());
        }
        parts.push((self.app_data.len() as u64).to_le_bytes().to_vec());
        parts.push(self.app_data.clone());
        parts.push(vec![if self.is_final { 1 } else { 0 }]);

        let slices: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
        Hash::from_parts(&slices)
    }

    /// The domain-separated message participants sign for this state.
    pub fn signing_message(&self) -> Vec<u8> {
        channel_state_message(&self.channel_id(), self.turn_num, self.is_final, &self.hash())
    }

    /// Total declared outcome amount.
    pub fn total_allocated(&self) -> u128 {
        self.outcome.iter().map(|a| a.amount).sum()
    }
}

/// A state plus its accumulated signatures, keyed by participant seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedState {
    /// The state being signed.
    pub state: State,
    /// Seat index → signature over `state.signing_message()`.
    pub signatures: BTreeMap<u8, Signature>,
}

impl SignedState {
    /// A state with no signatures yet.
    pub fn unsigned(state: State) -> Self {
        Self {
            state,
            signatures: BTreeMap::new(),
        }
    }

    /// Sign the state with the keypair seated at `seat` and record the
    /// signature.
    ///
    /// # Errors
    ///
    /// `SeatOutOfRange` if the seat does not exist; `WrongSigner` if the
    /// keypair's address is not the one seated there.
    pub fn sign_with(&mut self, seat: usize, keypair: &crate::Keypair) -> Result<(), StateError> {
        let participant = self
            .state
            .fixed
            .participants
            .get(seat)
            .ok_or(StateError::SeatOutOfRange {
                seat,
                num_participants: self.state.fixed.num_participants(),
            })?;
        if participant.signing_address != keypair.address() {
            return Err(StateError::WrongSigner { seat });
        }
        let signature = keypair.sign(&self.state.signing_message());
        self.signatures.insert(seat as u8, signature);
        Ok(())
    }

    /// Record a signature from the given seat, verifying it first.
    ///
    /// Re-applying a signature the state already carries is an idempotent
    /// no-op. A signature that does not verify under the seated address
    /// fails with `InvalidSignature` and leaves the state unchanged.
    pub fn apply_signature(
        &mut self,
        seat: usize,
        signature: Signature,
    ) -> Result<(), StateError> {
        let participant = self
            .state
            .fixed
            .participants
            .get(seat)
            .ok_or(StateError::SeatOutOfRange {
                seat,
                num_participants: self.state.fixed.num_participants(),
            })?;

        if let Some(existing) = self.signatures.get(&(seat as u8)) {
            if existing == &signature {
                return Ok(());
            }
        }

        if !participant.signing_address.verify(&self.state.signing_message(), &signature) {
            return Err(StateError::InvalidSignature { seat });
        }

        self.signatures.insert(seat as u8, signature);
        Ok(())
    }

    /// Verify every carried signature against its seated address.
    pub fn verify_all(&self) -> Result<(), StateError> {
        let message = self.state.signing_message();
        for (&seat, signature) in &self.signatures {
            let participant = self
                .state
                .fixed
                .participants
                .get(seat as usize)
                .ok_or(StateError::SeatOutOfRange {
                    seat: seat as usize,
                    num_participants: self.state.fixed.num_participants(),
                })?;
            if !participant.signing_address.verify(&message, signature) {
                return Err(StateError::InvalidSignature { seat: seat as usize });
            }
        }
        Ok(())
    }

    /// Whether the given seat has signed.
    pub fn signed_by(&self, seat: usize) -> bool {
        self.signatures.contains_key(&(seat as u8))
    }

    /// Whether the state carries a signature from every participant seat.
    pub fn has_quorum(&self) -> bool {
        self.signatures.len() == self.state.fixed.num_participants()
    }
}

/// Errors from state construction and signature application.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// The signature does not verify under the seated address.
    #[error("Invalid signature for participant seat {seat}")]
    InvalidSignature {
        /// Offending seat index.
        seat: usize,
    },

    /// The seat index exceeds the participant list.
    #[error("Participant seat {seat} out of range (channel has {num_participants})")]
    SeatOutOfRange {
        /// Requested seat.
        seat: usize,
        /// Seats in the channel.
        num_participants: usize,
    },

    /// The keypair does not belong to the requested seat.
    #[error("Keypair does not match the signing address at seat {seat}")]
    WrongSigner {
        /// Requested seat.
        seat: usize,
    },

    /// Guarantee metadata is not a whole number of destinations.
    #[error("Malformed guarantee data: {len} bytes is not a multiple of 32")]
    MalformedGuaranteeData {
        /// Metadata length.
        len: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Keypair;

    fn test_fixed(keys: &[Keypair]) -> FixedPart {
        FixedPart {
            chain_id: 1,
            channel_nonce: 7,
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

    fn test_state(keys: &[Keypair], turn_num: u64) -> State {
        State {
            fixed: test_fixed(keys),
            turn_num,
            outcome: vec![Allocation::simple(
                Destination::from_address(keys[0].address()),
                1,
            )],
            app_data: vec![0x00],
            is_final: false,
        }
    }

    fn seeded_keys(n: usize) -> Vec<Keypair> {
        (0..n)
            .map(|i| {
                let mut seed = [0u8; 32];
                seed[0] = i as u8 + 1;
                Keypair::from_seed(&seed)
            })
            .collect()
    }

    #[test]
    fn test_channel_id_content_derived() {
        let keys = seeded_keys(2);
        let fixed_a = test_fixed(&keys);
        let mut fixed_b = test_fixed(&keys);
        assert_eq!(fixed_a.channel_id(), fixed_b.channel_id());

        fixed_b.channel_nonce += 1;
        assert_ne!(fixed_a.channel_id(), fixed_b.channel_id());
    }

    #[test]
    fn test_state_hash_covers_variable_part() {
        let keys = seeded_keys(2);
        let state = test_state(&keys, 0);
        let mut other = state.clone();
        other.turn_num = 1;
        assert_ne!(state.hash(), other.hash());

        let mut final_state = state.clone();
        final_state.is_final = true;
        assert_ne!(state.hash(), final_state.hash());
    }

    #[test]
    fn test_sign_and_apply() {
        let keys = seeded_keys(2);
        let mut signed = SignedState::unsigned(test_state(&keys, 0));

        signed.sign_with(0, &keys[0]).unwrap();
        assert!(signed.signed_by(0));
        assert!(!signed.has_quorum());

        // Transfer signature 0 to a fresh copy, as a counterparty would
        let sig = signed.signatures.get(&0).unwrap().clone();
        let mut peer_copy = SignedState::unsigned(test_state(&keys, 0));
        peer_copy.apply_signature(0, sig).unwrap();
        peer_copy.sign_with(1, &keys[1]).unwrap();
        assert!(peer_copy.has_quorum());
        peer_copy.verify_all().unwrap();
    }

    #[test]
    fn test_apply_signature_rejects_forgery() {
        let keys = seeded_keys(2);
        let mut signed = SignedState::unsigned(test_state(&keys, 0));

        // Signature by key 1 presented as seat 0
        let forged = keys[1].sign(&signed.state.signing_message());
        let err = signed.apply_signature(0, forged).unwrap_err();
        assert_eq!(err, StateError::InvalidSignature { seat: 0 });
        assert!(signed.signatures.is_empty());
    }

    #[test]
    fn test_apply_signature_idempotent() {
        let keys = seeded_keys(2);
        let mut signed = SignedState::unsigned(test_state(&keys, 0));
        signed.sign_with(0, &keys[0]).unwrap();

        let sig = signed.signatures.get(&0).unwrap().clone();
        signed.apply_signature(0, sig).unwrap();
        assert_eq!(signed.signatures.len(), 1);
    }

    #[test]
    fn test_sign_with_wrong_seat() {
        let keys = seeded_keys(2);
        let mut signed = SignedState::unsigned(test_state(&keys, 0));
        assert_eq!(
            signed.sign_with(1, &keys[0]).unwrap_err(),
            StateError::WrongSigner { seat: 1 }
        );
        assert!(matches!(
            signed.sign_with(5, &keys[0]).unwrap_err(),
            StateError::SeatOutOfRange { seat: 5, .. }
        ));
    }

    #[test]
    fn test_guarantee_data_roundtrip() {
        let keys = seeded_keys(3);
        let targets: Vec<Destination> = keys
            .iter()
            .map(|k| Destination::from_address(k.address()))
            .collect();

        let encoded = encode_guarantee_data(&targets);
        assert_eq!(encoded.len(), 96);
        let decoded = decode_guarantee_data(&encoded).unwrap();
        assert_eq!(decoded, targets);

        assert!(matches!(
            decode_guarantee_data(&encoded[..33]).unwrap_err(),
            StateError::MalformedGuaranteeData { len: 33 }
        ));
    }
}
