// src/types.rs

//! Core DAG types shared by every admission stage: events, the two-track
//! gas power record, validator sets and the signed vote artifacts.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::fmt;

pub type ValidatorId = u32;
pub type Epoch = u32;
pub type Seq = u32;
pub type Lamport = u32;
pub type BlockNumber = u64;
pub type Weight = u64;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Unix time in nanoseconds, as declared inside an event.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(NANOS_PER_SEC))
    }

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Nanoseconds elapsed since `earlier`; zero if `earlier` is not in the past.
    pub fn saturating_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Keccak-256 digest used for event ids, payload hashes and votes.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash32(pub [u8; 32]);

pub type EventHash = Hash32;

impl Hash32 {
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    pub fn of(data: &[u8]) -> Self {
        let digest = Keccak256::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(digest.as_slice());
        Self(out)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0[..8]))
    }
}

/// The two independent gas power allowances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GasTrack {
    /// Short-term burst allowance.
    ShortTerm,
    /// Long-term average allowance.
    LongTerm,
}

impl GasTrack {
    pub const ALL: [GasTrack; 2] = [GasTrack::ShortTerm, GasTrack::LongTerm];

    pub const fn index(self) -> usize {
        match self {
            GasTrack::ShortTerm => 0,
            GasTrack::LongTerm => 1,
        }
    }
}

impl fmt::Display for GasTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GasTrack::ShortTerm => write!(f, "short-term"),
            GasTrack::LongTerm => write!(f, "long-term"),
        }
    }
}

/// Gas power a validator has left after emitting an event, per track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GasPowerLeft {
    pub gas: [u64; 2],
}

impl GasPowerLeft {
    pub const fn new(short_term: u64, long_term: u64) -> Self {
        Self {
            gas: [short_term, long_term],
        }
    }

    pub const fn get(&self, track: GasTrack) -> u64 {
        self.gas[track.index()]
    }

    pub fn set(&mut self, track: GasTrack, value: u64) {
        self.gas[track.index()] = value;
    }

    /// The smaller of the two tracks, i.e. what the validator may actually spend.
    pub fn min(&self) -> u64 {
        self.gas[0].min(self.gas[1])
    }
}

/// Opaque transaction carried in an event payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub gas: u64,
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn new(gas: u64, data: Vec<u8>) -> Self {
        Self { gas, data }
    }
}

/// A DAG vertex. Immutable once admitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub epoch: Epoch,
    pub seq: Seq,
    pub creator: ValidatorId,
    pub lamport: Lamport,
    pub creation_time: Timestamp,
    /// Consensus time used for gas power replenishment.
    pub median_time: Timestamp,
    /// Parent ids; the self-parent, when present, comes first.
    pub parents: Vec<EventHash>,
    pub extra: Vec<u8>,
    pub gas_power_used: u64,
    pub gas_power_left: GasPowerLeft,
    pub payload_hash: Hash32,
    pub transactions: Vec<Transaction>,
    pub signature: Vec<u8>,
}

impl Event {
    /// The creator's previous event, if this is not its first event in the epoch.
    pub fn self_parent(&self) -> Option<&EventHash> {
        if self.seq > 1 {
            self.parents.first()
        } else {
            None
        }
    }

    /// Canonical bytes covered by the creator's signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128 + self.parents.len() * 32 + self.extra.len());
        buf.extend_from_slice(b"event");
        buf.extend_from_slice(&self.epoch.to_le_bytes());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&self.creator.to_le_bytes());
        buf.extend_from_slice(&self.lamport.to_le_bytes());
        buf.extend_from_slice(&self.creation_time.0.to_le_bytes());
        buf.extend_from_slice(&self.median_time.0.to_le_bytes());
        buf.extend_from_slice(&(self.parents.len() as u32).to_le_bytes());
        for parent in &self.parents {
            buf.extend_from_slice(&parent.0);
        }
        buf.extend_from_slice(&(self.extra.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.extra);
        buf.extend_from_slice(&self.gas_power_used.to_le_bytes());
        for gas in self.gas_power_left.gas {
            buf.extend_from_slice(&gas.to_le_bytes());
        }
        buf.extend_from_slice(&self.payload_hash.0);
        buf
    }

    pub fn id(&self) -> EventHash {
        Hash32::of(&self.signing_bytes())
    }

    pub fn payload_hash_of(transactions: &[Transaction]) -> Hash32 {
        let mut hasher = Keccak256::new();
        for tx in transactions {
            hasher.update(tx.gas.to_le_bytes());
            hasher.update((tx.data.len() as u32).to_le_bytes());
            hasher.update(&tx.data);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(hasher.finalize().as_slice());
        Hash32(out)
    }

    /// Approximate encoded size, charged against the heavy-check buffer.
    pub fn size(&self) -> u64 {
        let txs: usize = self.transactions.iter().map(|tx| 12 + tx.data.len()).sum();
        (self.signing_bytes().len() + txs + self.signature.len()) as u64
    }

    pub fn verify_signature(&self, key: &VerifyingKey) -> bool {
        verify_bytes(key, &self.signing_bytes(), &self.signature)
    }
}

/// Fluent constructor for events, mostly used by emitters and tests.
#[derive(Clone, Debug)]
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    pub fn new(creator: ValidatorId, epoch: Epoch) -> Self {
        Self {
            event: Event {
                epoch,
                seq: 1,
                creator,
                lamport: 1,
                creation_time: Timestamp::default(),
                median_time: Timestamp::default(),
                parents: Vec::new(),
                extra: Vec::new(),
                gas_power_used: 0,
                gas_power_left: GasPowerLeft::default(),
                payload_hash: Hash32::ZERO,
                transactions: Vec::new(),
                signature: Vec::new(),
            },
        }
    }

    pub fn seq(mut self, seq: Seq) -> Self {
        self.event.seq = seq;
        self
    }

    pub fn lamport(mut self, lamport: Lamport) -> Self {
        self.event.lamport = lamport;
        self
    }

    /// Sets both the creation and the median time.
    pub fn time(mut self, time: Timestamp) -> Self {
        self.event.creation_time = time;
        self.event.median_time = time;
        self
    }

    pub fn median_time(mut self, time: Timestamp) -> Self {
        self.event.median_time = time;
        self
    }

    pub fn parents(mut self, parents: Vec<EventHash>) -> Self {
        self.event.parents = parents;
        self
    }

    pub fn extra(mut self, extra: Vec<u8>) -> Self {
        self.event.extra = extra;
        self
    }

    pub fn gas_power_used(mut self, used: u64) -> Self {
        self.event.gas_power_used = used;
        self
    }

    pub fn gas_power_left(mut self, left: GasPowerLeft) -> Self {
        self.event.gas_power_left = left;
        self
    }

    pub fn transactions(mut self, transactions: Vec<Transaction>) -> Self {
        self.event.transactions = transactions;
        self
    }

    pub fn build_unsigned(mut self) -> Event {
        self.event.payload_hash = Event::payload_hash_of(&self.event.transactions);
        self.event
    }

    pub fn sign(self, key: &SigningKey) -> Event {
        let mut event = self.build_unsigned();
        event.signature = sign_bytes(key, &event.signing_bytes());
        event
    }
}

/// Validator set of one epoch with stake weights.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Validators {
    ids: Vec<ValidatorId>,
    weights: Vec<Weight>,
    indexes: HashMap<ValidatorId, usize>,
    total: Weight,
}

impl Validators {
    /// Builds a set ordered by id. Zero-weight entries are dropped and a
    /// repeated id keeps its last weight.
    pub fn new(entries: impl IntoIterator<Item = (ValidatorId, Weight)>) -> Self {
        let mut merged: HashMap<ValidatorId, Weight> = HashMap::new();
        for (id, weight) in entries {
            merged.insert(id, weight);
        }
        let mut sorted: Vec<(ValidatorId, Weight)> =
            merged.into_iter().filter(|(_, w)| *w > 0).collect();
        sorted.sort_unstable_by_key(|(id, _)| *id);

        let mut set = Validators::default();
        for (idx, (id, weight)) in sorted.into_iter().enumerate() {
            set.ids.push(id);
            set.weights.push(weight);
            set.indexes.insert(id, idx);
            set.total = set.total.saturating_add(weight);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Stake of `id`, zero for non-members.
    pub fn get(&self, id: ValidatorId) -> Weight {
        self.indexes.get(&id).map_or(0, |&idx| self.weights[idx])
    }

    pub fn get_idx(&self, id: ValidatorId) -> Option<usize> {
        self.indexes.get(&id).copied()
    }

    pub fn get_id(&self, idx: usize) -> Option<ValidatorId> {
        self.ids.get(idx).copied()
    }

    pub fn exists(&self, id: ValidatorId) -> bool {
        self.indexes.contains_key(&id)
    }

    pub fn total_weight(&self) -> Weight {
        self.total
    }

    pub fn ids(&self) -> &[ValidatorId] {
        &self.ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValidatorId, Weight)> + '_ {
        self.ids.iter().copied().zip(self.weights.iter().copied())
    }
}

/// Verifying keys of the validators of one epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EpochPubkeys {
    pub epoch: Epoch,
    pub keys: HashMap<ValidatorId, VerifyingKey>,
}

impl EpochPubkeys {
    pub fn new(epoch: Epoch, keys: HashMap<ValidatorId, VerifyingKey>) -> Self {
        Self { epoch, keys }
    }

    pub fn get(&self, id: ValidatorId) -> Option<&VerifyingKey> {
        self.keys.get(&id)
    }
}

/// A validator's signed votes for a contiguous range of blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVotes {
    pub creator: ValidatorId,
    pub epoch: Epoch,
    pub start: BlockNumber,
    pub votes: Vec<Hash32>,
    pub signature: Vec<u8>,
}

impl BlockVotes {
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24 + self.votes.len() * 32);
        buf.extend_from_slice(b"bvs");
        buf.extend_from_slice(&self.creator.to_le_bytes());
        buf.extend_from_slice(&self.epoch.to_le_bytes());
        buf.extend_from_slice(&self.start.to_le_bytes());
        for vote in &self.votes {
            buf.extend_from_slice(&vote.0);
        }
        buf
    }

    pub fn sign(mut self, key: &SigningKey) -> Self {
        self.signature = sign_bytes(key, &self.signing_bytes());
        self
    }

    pub fn size(&self) -> u64 {
        (self.signing_bytes().len() + self.signature.len()) as u64
    }
}

/// A validator's signed vote for the record of a sealed epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochVote {
    pub creator: ValidatorId,
    pub epoch: Epoch,
    pub vote: Hash32,
    pub signature: Vec<u8>,
}

impl EpochVote {
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(42);
        buf.extend_from_slice(b"ev");
        buf.extend_from_slice(&self.creator.to_le_bytes());
        buf.extend_from_slice(&self.epoch.to_le_bytes());
        buf.extend_from_slice(&self.vote.0);
        buf
    }

    pub fn sign(mut self, key: &SigningKey) -> Self {
        self.signature = sign_bytes(key, &self.signing_bytes());
        self
    }

    pub fn size(&self) -> u64 {
        (self.signing_bytes().len() + self.signature.len()) as u64
    }
}

pub fn sign_bytes(key: &SigningKey, message: &[u8]) -> Vec<u8> {
    key.sign(message).to_bytes().to_vec()
}

pub fn verify_bytes(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[test]
    fn test_self_parent_only_after_first_event() {
        let parent = Hash32::of(b"parent");
        let first = EventBuilder::new(1, 1).parents(vec![parent]).build_unsigned();
        assert!(first.self_parent().is_none());

        let second = EventBuilder::new(1, 1)
            .seq(2)
            .parents(vec![parent])
            .build_unsigned();
        assert_eq!(second.self_parent(), Some(&parent));
    }

    #[test]
    fn test_event_signature_covers_gas_power_left() {
        let signer = key(7);
        let mut event = EventBuilder::new(3, 1)
            .time(Timestamp::from_secs(10))
            .gas_power_left(GasPowerLeft::new(100, 200))
            .transactions(vec![Transaction::new(21_000, vec![1, 2, 3])])
            .sign(&signer);
        assert!(event.verify_signature(&signer.verifying_key()));

        event.gas_power_left.set(GasTrack::LongTerm, 201);
        assert!(!event.verify_signature(&signer.verifying_key()));
    }

    #[test]
    fn test_payload_hash_changes_with_transactions() {
        let a = Event::payload_hash_of(&[Transaction::new(1, vec![1])]);
        let b = Event::payload_hash_of(&[Transaction::new(1, vec![2])]);
        assert_ne!(a, b);
        assert_eq!(Event::payload_hash_of(&[]), Event::payload_hash_of(&[]));
    }

    #[test]
    fn test_validators_ordering_and_weights() {
        let validators = Validators::new(vec![(5, 10), (2, 30), (9, 0), (5, 20)]);
        assert_eq!(validators.len(), 2);
        assert_eq!(validators.ids(), &[2, 5]);
        assert_eq!(validators.get(5), 20);
        assert_eq!(validators.get(9), 0);
        assert_eq!(validators.total_weight(), 50);
        assert_eq!(validators.get_idx(5), Some(1));
        assert_eq!(validators.get_id(0), Some(2));
    }

    #[test]
    fn test_vote_signatures() {
        let signer = key(1);
        let bvs = BlockVotes {
            creator: 1,
            epoch: 4,
            start: 100,
            votes: vec![Hash32::of(b"b100"), Hash32::of(b"b101")],
            signature: Vec::new(),
        }
        .sign(&signer);
        assert!(verify_bytes(
            &signer.verifying_key(),
            &bvs.signing_bytes(),
            &bvs.signature
        ));
        assert!(!verify_bytes(&signer.verifying_key(), b"other", &bvs.signature));
        assert!(!verify_bytes(&signer.verifying_key(), b"other", &[0u8; 3]));
    }
}
