// src/epochcheck.rs

//! Checks that need the current epoch: validator membership and the rule
//! limits that apply to this epoch.

use crate::rules::Rules;
use crate::types::{Epoch, Event, ValidatorId, Validators};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EpochError {
    #[error("Event of epoch {event} is not relevant to current epoch {current}")]
    NotRelevant { event: Epoch, current: Epoch },
    #[error("Event creator {0} is not a validator")]
    Auth(ValidatorId),
    #[error("Event declares {declared} gas used, expected {expected}")]
    WrongGasUsed { declared: u64, expected: u64 },
    #[error("Event gas used {used} exceeds the limit {max}")]
    TooBigGasUsed { used: u64, max: u64 },
    #[error("Event has {count} parents, at most {max} allowed")]
    TooManyParents { count: usize, max: u32 },
    #[error("Event extra data is {len} bytes, at most {max} allowed")]
    TooBigExtra { len: usize, max: u32 },
}

/// Current epoch and its rules.
pub trait Reader: Send + Sync {
    fn epoch_validators(&self) -> (Arc<Validators>, Epoch);
    fn epoch_rules(&self) -> Arc<Rules>;
}

#[derive(Clone)]
pub struct Checker {
    reader: Arc<dyn Reader>,
}

impl Checker {
    pub fn new(reader: Arc<dyn Reader>) -> Self {
        Self { reader }
    }

    pub fn validate(&self, e: &Event) -> Result<(), EpochError> {
        let (validators, epoch) = self.reader.epoch_validators();
        if e.epoch != epoch {
            return Err(EpochError::NotRelevant {
                event: e.epoch,
                current: epoch,
            });
        }
        if !validators.exists(e.creator) {
            return Err(EpochError::Auth(e.creator));
        }

        let rules = self.reader.epoch_rules();
        if e.parents.len() > rules.dag.max_parents as usize {
            return Err(EpochError::TooManyParents {
                count: e.parents.len(),
                max: rules.dag.max_parents,
            });
        }
        if e.extra.len() > rules.dag.max_extra_data as usize {
            return Err(EpochError::TooBigExtra {
                len: e.extra.len(),
                max: rules.dag.max_extra_data,
            });
        }
        let expected = rules.calc_gas_power_used(e);
        if e.gas_power_used != expected {
            return Err(EpochError::WrongGasUsed {
                declared: e.gas_power_used,
                expected,
            });
        }
        if e.gas_power_used > rules.economy.gas.max_event_gas {
            return Err(EpochError::TooBigGasUsed {
                used: e.gas_power_used,
                max: rules.economy.gas.max_event_gas,
            });
        }
        Ok(())
    }
}
