// src/rules.rs

//! Network economy and DAG rules. Rules are part of the epoch state and may
//! be replaced at an epoch boundary or by a governance upgrade.

use crate::types::{Event, GasTrack, NANOS_PER_SEC};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Rules {
    pub name: String,
    pub economy: EconomyRules,
    pub dag: DagRules,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EconomyRules {
    pub gas: GasRules,
    pub short_gas_power: GasPowerRules,
    pub long_gas_power: GasPowerRules,
}

/// Gas charged for emitting an event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GasRules {
    pub max_event_gas: u64,
    pub event_gas: u64,
    pub parent_gas: u64,
    pub extra_data_gas: u64,
}

/// Replenishment parameters of one gas power track. Periods are in nanoseconds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GasPowerRules {
    pub alloc_per_sec: u64,
    pub max_alloc_period: u64,
    pub startup_alloc_period: u64,
    pub min_startup_gas: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DagRules {
    pub max_parents: u32,
    pub max_free_parents: u32,
    pub max_extra_data: u32,
}

impl Rules {
    pub fn gas_power(&self, track: GasTrack) -> &GasPowerRules {
        match track {
            GasTrack::ShortTerm => &self.economy.short_gas_power,
            GasTrack::LongTerm => &self.economy.long_gas_power,
        }
    }

    /// Gas an event must declare as used: base cost, non-free parents, extra
    /// bytes and the gas of every carried transaction.
    pub fn calc_gas_power_used(&self, event: &Event) -> u64 {
        let gas = &self.economy.gas;
        let paid_parents = (event.parents.len() as u64)
            .saturating_sub(u64::from(self.dag.max_free_parents));
        event
            .transactions
            .iter()
            .fold(gas.event_gas, |acc, tx| acc.saturating_add(tx.gas))
            .saturating_add(paid_parents.saturating_mul(gas.parent_gas))
            .saturating_add((event.extra.len() as u64).saturating_mul(gas.extra_data_gas))
    }
}

impl Default for Rules {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl Rules {
    pub fn mainnet() -> Self {
        let max_event_gas = 10_000_000 + 28_000;
        Self {
            name: "main".to_string(),
            economy: EconomyRules {
                gas: GasRules {
                    max_event_gas,
                    event_gas: 28_000,
                    parent_gas: 2_400,
                    extra_data_gas: 25,
                },
                short_gas_power: GasPowerRules {
                    alloc_per_sec: 2 * 2_800_000,
                    max_alloc_period: 2 * NANOS_PER_SEC,
                    startup_alloc_period: NANOS_PER_SEC,
                    min_startup_gas: 20 * max_event_gas,
                },
                long_gas_power: GasPowerRules {
                    alloc_per_sec: 2_800_000,
                    max_alloc_period: 5 * NANOS_PER_SEC,
                    startup_alloc_period: NANOS_PER_SEC,
                    min_startup_gas: 20 * max_event_gas,
                },
            },
            dag: DagRules {
                max_parents: 10,
                max_free_parents: 3,
                max_extra_data: 128,
            },
        }
    }

    /// Small numbers for local networks and tests.
    pub fn fakenet() -> Self {
        let mut rules = Self::mainnet();
        rules.name = "fake".to_string();
        rules.economy.short_gas_power.alloc_per_sec *= 1000;
        rules.economy.long_gas_power.alloc_per_sec *= 1000;
        rules
    }
}
