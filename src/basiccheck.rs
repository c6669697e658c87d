// src/basiccheck.rs

//! Context-free sanity checks of an event's own fields.

use crate::types::Event;
use std::collections::HashSet;
use thiserror::Error;

/// Values at or above this are rejected to keep arithmetic on them safe.
pub const MAX_FIELD_VALUE: u32 = u32::MAX / 2;
/// Smallest gas a transaction may carry.
pub const MIN_TX_GAS: u64 = 21_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BasicError {
    #[error("Event is not initialized: zero epoch, seq or lamport")]
    NotInited,
    #[error("Event field value is too big")]
    HugeValue,
    #[error("Event has no parents but is not the creator's first")]
    NoParents,
    #[error("Event references the same parent twice")]
    DuplicateParents,
    #[error("Event creation time is zero")]
    ZeroTime,
    #[error("Transaction {index} carries {gas} gas, below the intrinsic minimum")]
    IntrinsicGas { index: usize, gas: u64 },
}

#[derive(Clone, Debug, Default)]
pub struct Checker;

impl Checker {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, e: &Event) -> Result<(), BasicError> {
        if e.epoch == 0 || e.seq == 0 || e.lamport == 0 {
            return Err(BasicError::NotInited);
        }
        if e.epoch >= MAX_FIELD_VALUE || e.seq >= MAX_FIELD_VALUE || e.lamport >= MAX_FIELD_VALUE
        {
            return Err(BasicError::HugeValue);
        }
        if e.seq > 1 && e.parents.is_empty() {
            return Err(BasicError::NoParents);
        }
        let mut seen = HashSet::with_capacity(e.parents.len());
        if !e.parents.iter().all(|p| seen.insert(p)) {
            return Err(BasicError::DuplicateParents);
        }
        if e.creation_time.as_nanos() == 0 {
            return Err(BasicError::ZeroTime);
        }
        for (index, tx) in e.transactions.iter().enumerate() {
            if tx.gas < MIN_TX_GAS {
                return Err(BasicError::IntrinsicGas { index, gas: tx.gas });
            }
        }
        Ok(())
    }
}
