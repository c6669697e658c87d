// src/gaspower.rs

//! --- Gas Power Allowance & Check ---
//!
//! Every validator spends "gas power" to emit events. Power is replenished
//! continuously at a rate proportional to the validator's stake, on two
//! independent tracks: a short-term track bounding bursts and a long-term
//! track bounding the average rate. An event declares how much power it used
//! and how much its creator has left; this module decides whether that
//! declaration is consistent with the allowance model.
//!
//! All arithmetic uses the event's declared median time and the persisted
//! self-parent record only. The parents check bounds that median time by the
//! self-parent's and by the event's own creation time. No wall-clock reads happen here, so every node
//! reaches the same decision for the same inputs.

use crate::rules::Rules;
use crate::types::{
    Epoch, Event, EventHash, GasPowerLeft, GasTrack, Timestamp, ValidatorId, Validators,
    NANOS_PER_SEC,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GasPowerError {
    #[error("Event epoch {event} is not the validated epoch {current}")]
    NotRelevant { event: Epoch, current: Epoch },
    #[error("Creator {0} is not a validator of the current epoch")]
    UnknownValidator(ValidatorId),
    #[error("Insufficient {track} gas power: declared {declared} left after using {used} of {available}")]
    InsufficientGasPower {
        track: GasTrack,
        declared: u64,
        used: u64,
        available: u64,
    },
    #[error("Negative {track} gas power: used {used} of {available}, yet declared {declared} left")]
    NegativeGasPower {
        track: GasTrack,
        declared: u64,
        used: u64,
        available: u64,
    },
}

/// Per-track replenishment parameters, derived from the network rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasPowerConfig {
    pub track: GasTrack,
    pub alloc_per_sec: u64,
    /// Nanoseconds of allocation a validator may bank.
    pub max_alloc_period: u64,
    /// Lower bound of the bank, so a max-size event is always emittable.
    pub min_ensured_alloc: u64,
    /// Nanoseconds of allocation granted to a validator's first event.
    pub startup_alloc_period: u64,
    pub min_startup_gas: u64,
}

impl GasPowerConfig {
    pub fn from_rules(track: GasTrack, rules: &Rules) -> Self {
        let power = rules.gas_power(track);
        Self {
            track,
            alloc_per_sec: power.alloc_per_sec,
            max_alloc_period: power.max_alloc_period,
            min_ensured_alloc: rules.economy.gas.max_event_gas,
            startup_alloc_period: power.startup_alloc_period,
            min_startup_gas: power.min_startup_gas,
        }
    }

    pub fn all_from_rules(rules: &Rules) -> [GasPowerConfig; 2] {
        GasTrack::ALL.map(|track| Self::from_rules(track, rules))
    }
}

/// A validator's share of one track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Allowance {
    pub per_sec: u64,
    /// Most power the validator can ever hold on this track.
    pub max: u64,
    /// Power guaranteed to a validator that has not emitted yet.
    pub startup: u64,
}

fn mul_div(a: u64, b: u64, c: u64) -> u64 {
    if c == 0 {
        return 0;
    }
    let res = u128::from(a) * u128::from(b) / u128::from(c);
    u64::try_from(res).unwrap_or(u64::MAX)
}

/// Power allocated over `elapsed_nanos` at `per_sec`.
pub fn allocate(elapsed_nanos: u64, per_sec: u64) -> u64 {
    mul_div(elapsed_nanos, per_sec, NANOS_PER_SEC)
}

/// Splits the track's network-wide allocation by stake.
pub fn calc_validator_gas_power_per_sec(
    validator: ValidatorId,
    validators: &Validators,
    config: &GasPowerConfig,
) -> Allowance {
    let stake = validators.get(validator);
    if stake == 0 {
        return Allowance::default();
    }
    let per_sec = mul_div(config.alloc_per_sec, stake, validators.total_weight());
    Allowance {
        per_sec,
        max: allocate(config.max_alloc_period, per_sec).max(config.min_ensured_alloc),
        startup: allocate(config.startup_alloc_period, per_sec).max(config.min_startup_gas),
    }
}

/// The last event a validator emitted in the previous epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrevEpochEvent {
    pub id: EventHash,
    pub time: Timestamp,
    pub gas_power_left: GasPowerLeft,
}

/// Per-validator, per-epoch state. Replaced wholesale at epoch transition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEpochState {
    pub prev_epoch_event: Option<PrevEpochEvent>,
    /// Credited when the validator's transactions were skipped by block execution.
    pub gas_refund: u64,
}

/// Everything the check reads, captured from one epoch state snapshot.
#[derive(Clone, Debug)]
pub struct ValidationContext {
    pub epoch: Epoch,
    pub epoch_start: Timestamp,
    pub configs: [GasPowerConfig; 2],
    pub validators: Arc<Validators>,
    /// Indexed like `validators`.
    pub validator_states: Vec<ValidatorEpochState>,
}

impl ValidationContext {
    pub fn new(
        epoch: Epoch,
        epoch_start: Timestamp,
        rules: &Rules,
        validators: Arc<Validators>,
        validator_states: Vec<ValidatorEpochState>,
    ) -> Self {
        Self {
            epoch,
            epoch_start,
            configs: GasPowerConfig::all_from_rules(rules),
            validators,
            validator_states,
        }
    }

    pub fn config(&self, track: GasTrack) -> &GasPowerConfig {
        &self.configs[track.index()]
    }

    fn validator_state(&self, creator: ValidatorId) -> Result<&ValidatorEpochState, GasPowerError> {
        self.validators
            .get_idx(creator)
            .and_then(|idx| self.validator_states.get(idx))
            .ok_or(GasPowerError::UnknownValidator(creator))
    }

    /// Power available to `event` before it spends anything, per track.
    ///
    /// Panics if the event has a self-parent that the caller did not supply.
    pub fn calc_gas_power(
        &self,
        event: &Event,
        self_parent: Option<&Event>,
    ) -> Result<GasPowerLeft, GasPowerError> {
        if event.epoch != self.epoch {
            return Err(GasPowerError::NotRelevant {
                event: event.epoch,
                current: self.epoch,
            });
        }
        let state = self.validator_state(event.creator)?;
        let self_parent = match (event.self_parent(), self_parent) {
            (Some(_), Some(parent)) => Some(parent),
            (Some(id), None) => panic!(
                "gas power check: self-parent {id} of event {} was not supplied",
                event.id()
            ),
            (None, _) => None,
        };

        let mut res = GasPowerLeft::default();
        for config in &self.configs {
            res.set(config.track, self.calc_track(event, self_parent, state, config));
        }
        Ok(res)
    }

    fn calc_track(
        &self,
        event: &Event,
        self_parent: Option<&Event>,
        state: &ValidatorEpochState,
        config: &GasPowerConfig,
    ) -> u64 {
        let allowance = calc_validator_gas_power_per_sec(event.creator, &self.validators, config);
        let track = config.track;

        // The parent's balance already holds any refund of this epoch.
        if let Some(parent) = self_parent {
            let replenished = allocate(
                event.median_time.saturating_since(parent.median_time),
                allowance.per_sec,
            );
            return parent
                .gas_power_left
                .get(track)
                .saturating_add(replenished)
                .min(allowance.max);
        }

        // First event of the epoch: carry over the previous epoch's balance
        // plus the refund, then never go below the startup allowance.
        let carried = state.prev_epoch_event.as_ref().map_or(0, |prev| {
            prev.gas_power_left.get(track).saturating_add(allocate(
                event.median_time.saturating_since(prev.time),
                allowance.per_sec,
            ))
        });
        let elapsed = event.median_time.saturating_since(self.epoch_start);
        let startup = allocate(elapsed.min(config.startup_alloc_period), allowance.per_sec)
            .max(config.min_startup_gas);

        carried
            .saturating_add(state.gas_refund)
            .min(allowance.max)
            .max(startup)
    }

    /// Largest gas power left the event may declare, per track. This is what an
    /// honest emitter records.
    pub fn expected_gas_power_left(
        &self,
        event: &Event,
        self_parent: Option<&Event>,
    ) -> Result<GasPowerLeft, GasPowerError> {
        let mut available = self.calc_gas_power(event, self_parent)?;
        for track in GasTrack::ALL {
            available.set(track, available.get(track).saturating_sub(event.gas_power_used));
        }
        Ok(available)
    }

    /// Checks the event's declared gas power left against the allowance.
    /// Both tracks must pass.
    pub fn validate(&self, event: &Event, self_parent: Option<&Event>) -> Result<(), GasPowerError> {
        let available = self.calc_gas_power(event, self_parent)?;
        let used = event.gas_power_used;
        for track in GasTrack::ALL {
            let declared = event.gas_power_left.get(track);
            let avail = available.get(track);
            let err = match avail.checked_sub(used) {
                Some(max_allowed) if declared <= max_allowed => continue,
                None if declared > 0 => GasPowerError::NegativeGasPower {
                    track,
                    declared,
                    used,
                    available: avail,
                },
                _ => GasPowerError::InsufficientGasPower {
                    track,
                    declared,
                    used,
                    available: avail,
                },
            };
            debug!(
                creator = event.creator,
                seq = event.seq,
                "Gas power check rejected event: {}",
                err
            );
            return Err(err);
        }
        Ok(())
    }
}

/// Source of the current validation context, refreshed on epoch or rules change.
pub trait Reader: Send + Sync {
    fn validation_context(&self) -> Arc<ValidationContext>;
}

/// Stateless-per-call gas power checker.
#[derive(Clone)]
pub struct Checker {
    reader: Arc<dyn Reader>,
}

impl Checker {
    pub fn new(reader: Arc<dyn Reader>) -> Self {
        Self { reader }
    }

    pub fn calc_gas_power(
        &self,
        event: &Event,
        self_parent: Option<&Event>,
    ) -> Result<GasPowerLeft, GasPowerError> {
        self.reader
            .validation_context()
            .calc_gas_power(event, self_parent)
    }

    pub fn validate(&self, event: &Event, self_parent: Option<&Event>) -> Result<(), GasPowerError> {
        self.reader.validation_context().validate(event, self_parent)
    }
}
