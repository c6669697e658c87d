// src/state.rs

//! --- Admission State ---
//!
//! The state every admission stage reads: the current epoch snapshot, the
//! block-level state accumulated since the epoch started, admitted events and
//! the latest event of each validator. [`MemoryStore`] owns all of it behind
//! reader/writer locks and hands out immutable snapshots, so no lock is ever
//! held by a caller, let alone across an await.

use crate::epochcheck;
use crate::gaspower::{self, PrevEpochEvent, ValidationContext, ValidatorEpochState};
use crate::heavycheck;
use crate::rules::Rules;
use crate::types::{
    BlockNumber, Epoch, EpochPubkeys, Event, EventHash, Timestamp, ValidatorId, Validators,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Snapshot of one epoch, replaced wholesale at epoch transition.
#[derive(Clone, Debug)]
pub struct EpochState {
    pub epoch: Epoch,
    pub epoch_start: Timestamp,
    pub validators: Arc<Validators>,
    /// Indexed like `validators`.
    pub validator_states: Vec<ValidatorEpochState>,
    pub rules: Arc<Rules>,
    pub pubkeys: Arc<EpochPubkeys>,
}

impl EpochState {
    pub fn validator_state(&self, id: ValidatorId) -> Option<&ValidatorEpochState> {
        self.validators
            .get_idx(id)
            .and_then(|idx| self.validator_states.get(idx))
    }

    pub fn validation_context(&self) -> ValidationContext {
        ValidationContext::new(
            self.epoch,
            self.epoch_start,
            &self.rules,
            self.validators.clone(),
            self.validator_states.clone(),
        )
    }
}

/// State accumulated by block processing within the current epoch.
#[derive(Clone, Debug, Default)]
pub struct BlockState {
    pub latest_block: BlockNumber,
    /// Rules upgraded by governance, effective from the next epoch.
    pub dirty_rules: Option<Arc<Rules>>,
    /// Refunds credited since the epoch started, not yet sealed into the epoch state.
    pub dirty_gas_refunds: HashMap<ValidatorId, u64>,
}

impl BlockState {
    pub fn dirty_gas_refund(&self, id: ValidatorId) -> u64 {
        self.dirty_gas_refunds.get(&id).copied().unwrap_or(0)
    }
}

/// Latest admitted event of each validator in one epoch.
#[derive(Debug, Default)]
pub struct ValidatorEventsSet {
    inner: RwLock<HashMap<ValidatorId, EventHash>>,
}

impl ValidatorEventsSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ValidatorId) -> Option<EventHash> {
        self.inner.read().get(&id).copied()
    }

    pub fn set(&self, id: ValidatorId, event: EventHash) {
        self.inner.write().insert(id, event);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Visits every entry while holding the read lock.
    pub fn for_each(&self, mut f: impl FnMut(ValidatorId, &EventHash)) {
        for (id, event) in self.inner.read().iter() {
            f(*id, event);
        }
    }

    fn take(&self) -> HashMap<ValidatorId, EventHash> {
        std::mem::take(&mut *self.inner.write())
    }
}

/// Read side of the node storage the admission core depends on.
pub trait Store: Send + Sync {
    fn get_event(&self, id: &EventHash) -> Option<Arc<Event>>;
    fn epoch_state(&self) -> Arc<EpochState>;
    fn block_state(&self) -> Arc<BlockState>;
    /// Latest events of the current epoch.
    fn last_events(&self) -> &ValidatorEventsSet;
}

/// Parameters of the epoch being opened.
#[derive(Clone, Debug)]
pub struct NextEpoch {
    pub start: Timestamp,
    pub validators: Arc<Validators>,
    pub rules: Option<Arc<Rules>>,
    pub pubkeys: Arc<EpochPubkeys>,
}

struct EpochSnapshot {
    state: Arc<EpochState>,
    context: Arc<ValidationContext>,
}

impl EpochSnapshot {
    fn new(state: EpochState) -> Self {
        let context = Arc::new(state.validation_context());
        Self {
            state: Arc::new(state),
            context,
        }
    }
}

/// In-memory owner of the admission state.
pub struct MemoryStore {
    events: RwLock<HashMap<EventHash, Arc<Event>>>,
    epoch: RwLock<EpochSnapshot>,
    block: RwLock<Arc<BlockState>>,
    pubkeys: RwLock<HashMap<Epoch, Arc<EpochPubkeys>>>,
    last_events: ValidatorEventsSet,
}

impl MemoryStore {
    pub fn new(genesis: EpochState) -> Self {
        let pubkeys = HashMap::from([(genesis.epoch, genesis.pubkeys.clone())]);
        Self {
            events: RwLock::new(HashMap::new()),
            epoch: RwLock::new(EpochSnapshot::new(genesis)),
            block: RwLock::new(Arc::new(BlockState::default())),
            pubkeys: RwLock::new(pubkeys),
            last_events: ValidatorEventsSet::new(),
        }
    }

    /// Records an event that passed admission. Events of other epochs are kept
    /// but do not move the validator's latest event.
    pub fn apply_event(&self, event: Arc<Event>) {
        let id = event.id();
        // Held until the event is stored so an epoch transition cannot slip in.
        let epoch = self.epoch.read();
        if event.epoch == epoch.state.epoch {
            self.last_events.set(event.creator, id);
        }
        debug!(creator = event.creator, seq = event.seq, "Applied event {:?}", id);
        self.events.write().insert(id, event);
        drop(epoch);
    }

    /// Loads the parent records of `e`, in order. `None` if any is unknown.
    pub fn parents_of(&self, e: &Event) -> Option<Vec<Arc<Event>>> {
        let events = self.events.read();
        e.parents.iter().map(|id| events.get(id).cloned()).collect()
    }

    pub fn set_latest_block(&self, block: BlockNumber) {
        let mut guard = self.block.write();
        Arc::make_mut(&mut guard).latest_block = block;
    }

    pub fn set_dirty_rules(&self, rules: Rules) {
        let mut guard = self.block.write();
        Arc::make_mut(&mut guard).dirty_rules = Some(Arc::new(rules));
    }

    /// Credits gas of a validator's skipped transactions. It becomes spendable
    /// once the epoch is sealed.
    pub fn credit_gas_refund(&self, id: ValidatorId, gas: u64) {
        let mut guard = self.block.write();
        let refund = Arc::make_mut(&mut guard)
            .dirty_gas_refunds
            .entry(id)
            .or_default();
        *refund = refund.saturating_add(gas);
    }

    /// Seals the current epoch and opens the next one. Each validator carries
    /// over its latest event of the sealed epoch (or the one it carried in, if
    /// it stayed silent). Only refunds credited during the sealed epoch are
    /// granted to the next one.
    pub fn advance_epoch(&self, next: NextEpoch) -> Arc<EpochState> {
        let mut epoch = self.epoch.write();
        let block = std::mem::take(&mut *self.block.write());
        let last = self.last_events.take();
        let sealed = epoch.state.clone();

        let events = self.events.read();
        let validator_states = next
            .validators
            .ids()
            .iter()
            .map(|&id| {
                let prev_epoch_event = match last.get(&id) {
                    Some(hash) => {
                        let e = events.get(hash).unwrap_or_else(|| {
                            panic!("last event {hash} of validator {id} is not stored")
                        });
                        Some(PrevEpochEvent {
                            id: *hash,
                            time: e.median_time,
                            gas_power_left: e.gas_power_left,
                        })
                    }
                    None => sealed
                        .validator_state(id)
                        .and_then(|s| s.prev_epoch_event.clone()),
                };
                ValidatorEpochState {
                    prev_epoch_event,
                    gas_refund: block.dirty_gas_refund(id),
                }
            })
            .collect();
        drop(events);

        let rules = next
            .rules
            .or_else(|| block.dirty_rules.clone())
            .unwrap_or_else(|| sealed.rules.clone());
        let state = EpochState {
            epoch: sealed.epoch + 1,
            epoch_start: next.start,
            validators: next.validators,
            validator_states,
            rules,
            pubkeys: Arc::new(EpochPubkeys::new(sealed.epoch + 1, next.pubkeys.keys.clone())),
        };
        self.pubkeys
            .write()
            .insert(state.epoch, state.pubkeys.clone());

        info!(
            sealed = sealed.epoch,
            epoch = state.epoch,
            validators = state.validators.len(),
            "Advanced epoch"
        );
        *epoch = EpochSnapshot::new(state);
        epoch.state.clone()
    }
}

impl Store for MemoryStore {
    fn get_event(&self, id: &EventHash) -> Option<Arc<Event>> {
        self.events.read().get(id).cloned()
    }

    fn epoch_state(&self) -> Arc<EpochState> {
        self.epoch.read().state.clone()
    }

    fn block_state(&self) -> Arc<BlockState> {
        self.block.read().clone()
    }

    fn last_events(&self) -> &ValidatorEventsSet {
        &self.last_events
    }
}

impl gaspower::Reader for MemoryStore {
    fn validation_context(&self) -> Arc<ValidationContext> {
        self.epoch.read().context.clone()
    }
}

impl epochcheck::Reader for MemoryStore {
    fn epoch_validators(&self) -> (Arc<Validators>, Epoch) {
        let epoch = self.epoch.read();
        (epoch.state.validators.clone(), epoch.state.epoch)
    }

    fn epoch_rules(&self) -> Arc<Rules> {
        self.epoch.read().state.rules.clone()
    }
}

impl heavycheck::Reader for MemoryStore {
    fn epoch_pubkeys(&self) -> Arc<EpochPubkeys> {
        self.epoch.read().state.pubkeys.clone()
    }

    fn epoch_pubkeys_of(&self, epoch: Epoch) -> Option<Arc<EpochPubkeys>> {
        self.pubkeys.read().get(&epoch).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventBuilder, GasPowerLeft};

    fn genesis() -> EpochState {
        let validators = Arc::new(Validators::new(vec![(1, 1), (2, 1)]));
        EpochState {
            epoch: 1,
            epoch_start: Timestamp::from_secs(100),
            validator_states: vec![ValidatorEpochState::default(); validators.len()],
            validators,
            rules: Arc::new(Rules::mainnet()),
            pubkeys: Arc::new(EpochPubkeys::new(1, HashMap::new())),
        }
    }

    #[test]
    fn test_latest_event_per_validator() {
        let store = MemoryStore::new(genesis());
        let a = Arc::new(
            EventBuilder::new(1, 1)
                .time(Timestamp::from_secs(101))
                .build_unsigned(),
        );
        let b = Arc::new(
            EventBuilder::new(1, 1)
                .seq(2)
                .lamport(2)
                .parents(vec![a.id()])
                .time(Timestamp::from_secs(102))
                .build_unsigned(),
        );
        store.apply_event(a.clone());
        store.apply_event(b.clone());

        assert_eq!(store.last_events().get(1), Some(b.id()));
        assert_eq!(store.last_events().get(2), None);
        assert_eq!(store.parents_of(&b).unwrap(), vec![a]);
        assert!(store
            .parents_of(&EventBuilder::new(2, 1).parents(vec![EventHash::ZERO]).build_unsigned())
            .is_none());
    }

    #[test]
    fn test_advance_epoch_carries_balances_and_refunds() {
        let store = MemoryStore::new(genesis());
        let e = Arc::new(
            EventBuilder::new(1, 1)
                .time(Timestamp::from_secs(105))
                .gas_power_left(GasPowerLeft::new(70, 80))
                .build_unsigned(),
        );
        store.apply_event(e.clone());
        store.credit_gas_refund(2, 30);
        store.credit_gas_refund(2, 20);
        store.set_latest_block(42);

        let next = store.advance_epoch(NextEpoch {
            start: Timestamp::from_secs(200),
            validators: Arc::new(Validators::new(vec![(1, 1), (2, 1), (3, 1)])),
            rules: None,
            pubkeys: Arc::new(EpochPubkeys::new(0, HashMap::new())),
        });

        assert_eq!(next.epoch, 2);
        let v1 = next.validator_state(1).unwrap();
        assert_eq!(
            v1.prev_epoch_event,
            Some(PrevEpochEvent {
                id: e.id(),
                time: Timestamp::from_secs(105),
                gas_power_left: GasPowerLeft::new(70, 80),
            })
        );
        assert_eq!(next.validator_state(2).unwrap().gas_refund, 50);
        assert_eq!(next.validator_state(3).unwrap(), &ValidatorEpochState::default());

        assert!(store.last_events().is_empty());
        assert_eq!(store.block_state().latest_block, 0);
        assert_eq!(heavycheck::Reader::epoch_pubkeys(&store).epoch, 2);
        assert!(heavycheck::Reader::epoch_pubkeys_of(&store, 1).is_some());
        assert_eq!(gaspower::Reader::validation_context(&store).epoch, 2);

        // Nothing credited during epoch 2, so epoch 3 grants no refund.
        let third = store.advance_epoch(NextEpoch {
            start: Timestamp::from_secs(300),
            validators: Arc::new(Validators::new(vec![(1, 1), (2, 1)])),
            rules: None,
            pubkeys: Arc::new(EpochPubkeys::new(0, HashMap::new())),
        });
        assert_eq!(third.epoch, 3);
        assert_eq!(third.validator_state(2).unwrap().gas_refund, 0);
        assert_eq!(
            third.validator_state(1).unwrap().prev_epoch_event.as_ref().map(|p| p.id),
            Some(e.id())
        );
    }

    #[test]
    fn test_events_applied_during_advance_stay_in_their_epoch() {
        let store = MemoryStore::new(genesis());
        let next = || NextEpoch {
            start: Timestamp::from_secs(200),
            validators: Arc::new(Validators::new(vec![(1, 1), (2, 1)])),
            rules: None,
            pubkeys: Arc::new(EpochPubkeys::new(0, HashMap::new())),
        };

        std::thread::scope(|s| {
            s.spawn(|| {
                let mut parent: Option<Arc<Event>> = None;
                for seq in 1..=500 {
                    let e = Arc::new(
                        EventBuilder::new(1, 1)
                            .seq(seq)
                            .lamport(seq)
                            .parents(parent.iter().map(|p| p.id()).collect())
                            .time(Timestamp::from_secs(100 + u64::from(seq)))
                            .build_unsigned(),
                    );
                    store.apply_event(e.clone());
                    parent = Some(e);
                }
            });
            s.spawn(|| {
                store.advance_epoch(next());
            });
        });

        let current = store.epoch_state().epoch;
        assert_eq!(current, 2);
        store.last_events().for_each(|_, id| {
            assert_eq!(store.get_event(id).unwrap().epoch, current);
        });

        // An event of the sealed epoch is stored but never becomes a tip.
        let stale = Arc::new(
            EventBuilder::new(2, 1)
                .time(Timestamp::from_secs(150))
                .build_unsigned(),
        );
        store.apply_event(stale.clone());
        assert_eq!(store.last_events().get(2), None);
        assert!(store.get_event(&stale.id()).is_some());
    }
}
