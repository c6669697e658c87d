// src/gpo_backend.rs

//! Read-only view of the admission state for the gas price oracle.

use crate::gaspower::{calc_validator_gas_power_per_sec, GasPowerConfig};
use crate::rules::Rules;
use crate::state::Store;
use crate::types::{BlockNumber, GasTrack};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

pub struct GasPowerOracleBackend {
    store: Arc<dyn Store>,
}

impl GasPowerOracleBackend {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn latest_block_index(&self) -> BlockNumber {
        self.store.block_state().latest_block
    }

    /// Rules of the current epoch.
    pub fn rules(&self) -> Arc<Rules> {
        self.store.epoch_state().rules.clone()
    }

    /// Rules that will apply from the next epoch.
    pub fn pending_rules(&self) -> Arc<Rules> {
        let bs = self.store.block_state();
        match &bs.dirty_rules {
            Some(rules) => rules.clone(),
            None => self.rules(),
        }
    }

    /// Long-term gas power the whole validator set could spend right now.
    ///
    /// Validators that emitted in this epoch count their latest event's balance
    /// plus pending refunds. The others count the balance carried in from the
    /// previous epoch plus their sealed refund, never less than the startup
    /// allowance. Either way a validator never counts more than its cap.
    ///
    /// The latest-event set is read under its lock, but the epoch and block
    /// states are separate snapshots, so the sum is best effort.
    pub fn total_gas_power_left(&self) -> u64 {
        let es = self.store.epoch_state();
        let bs = self.store.block_state();
        let config = GasPowerConfig::from_rules(GasTrack::LongTerm, &es.rules);

        let mut total: u64 = 0;
        let mut met = HashSet::new();
        self.store.last_events().for_each(|creator, tip| {
            let e = self
                .store
                .get_event(tip)
                .unwrap_or_else(|| panic!("latest event {tip} of validator {creator} is not stored"));
            let allowance = calc_validator_gas_power_per_sec(creator, &es.validators, &config);
            let left = e
                .gas_power_left
                .get(GasTrack::LongTerm)
                .saturating_add(bs.dirty_gas_refund(creator))
                .min(allowance.max);
            total = total.saturating_add(left);
            met.insert(creator);
        });

        for (idx, creator) in es.validators.ids().iter().copied().enumerate() {
            if met.contains(&creator) {
                continue;
            }
            let state = &es.validator_states[idx];
            let allowance = calc_validator_gas_power_per_sec(creator, &es.validators, &config);
            let carried = state
                .prev_epoch_event
                .as_ref()
                .map_or(0, |prev| prev.gas_power_left.get(GasTrack::LongTerm));
            let left = carried
                .saturating_add(state.gas_refund)
                .min(allowance.max)
                .max(allowance.startup);
            total = total.saturating_add(left);
        }
        trace!(total, epoch = es.epoch, "Total gas power left");
        total
    }
}
