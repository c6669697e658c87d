//! A small validator network over an in-memory store, with an honest emitter
//! that builds events the way a well-behaved node would.

use dag_admission::gaspower::{self, ValidatorEpochState};
use dag_admission::rules::Rules;
use dag_admission::state::{EpochState, MemoryStore, Store};
use dag_admission::types::{
    EpochPubkeys, Event, EventBuilder, Timestamp, ValidatorId, Validators,
};
use ed25519_dalek::SigningKey;
use std::collections::HashMap;
use std::sync::Arc;

pub const EPOCH_START_SECS: u64 = 100;

pub struct TestNet {
    pub store: Arc<MemoryStore>,
    pub keys: HashMap<ValidatorId, SigningKey>,
}

pub fn signer(id: ValidatorId) -> SigningKey {
    let mut seed = [0u8; 32];
    seed[..4].copy_from_slice(&id.to_le_bytes());
    seed[31] = 0xa5;
    SigningKey::from_bytes(&seed)
}

pub fn pubkeys(epoch: u32, keys: &HashMap<ValidatorId, SigningKey>) -> Arc<EpochPubkeys> {
    Arc::new(EpochPubkeys::new(
        epoch,
        keys.iter().map(|(id, k)| (*id, k.verifying_key())).collect(),
    ))
}

impl TestNet {
    pub fn new(stakes: &[(ValidatorId, u64)], rules: Rules) -> Self {
        let keys: HashMap<_, _> = stakes.iter().map(|(id, _)| (*id, signer(*id))).collect();
        let validators = Arc::new(Validators::new(stakes.iter().copied()));
        let store = Arc::new(MemoryStore::new(EpochState {
            epoch: 1,
            epoch_start: Timestamp::from_secs(EPOCH_START_SECS),
            validator_states: vec![ValidatorEpochState::default(); validators.len()],
            validators,
            rules: Arc::new(rules),
            pubkeys: pubkeys(1, &keys),
        }));
        Self { store, keys }
    }

    /// Builds and signs the next event of `creator` at `secs`, on top of its
    /// latest event and `others`, declaring exactly the gas power it has left.
    pub fn emit(&self, creator: ValidatorId, secs: u64, others: &[Arc<Event>]) -> Event {
        let es = self.store.epoch_state();
        let self_parent = self
            .store
            .last_events()
            .get(creator)
            .and_then(|id| self.store.get_event(&id));

        let mut parents: Vec<Arc<Event>> = self_parent.iter().cloned().collect();
        parents.extend(others.iter().cloned());
        let lamport = parents.iter().map(|p| p.lamport).max().unwrap_or(0) + 1;
        let seq = self_parent.as_ref().map_or(1, |sp| sp.seq + 1);

        let draft = EventBuilder::new(creator, es.epoch)
            .seq(seq)
            .lamport(lamport)
            .parents(parents.iter().map(|p| p.id()).collect())
            .time(Timestamp::from_secs(secs));
        let used = es.rules.calc_gas_power_used(&draft.clone().build_unsigned());
        let draft = draft.gas_power_used(used);

        let ctx = gaspower::Reader::validation_context(self.store.as_ref());
        let left = ctx
            .expected_gas_power_left(&draft.clone().build_unsigned(), self_parent.as_deref())
            .expect("emitter is a validator of the current epoch");
        draft.gas_power_left(left).sign(&self.keys[&creator])
    }
}
