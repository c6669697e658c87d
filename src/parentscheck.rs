// src/parentscheck.rs

//! Consistency of an event with its already-admitted parents.

use crate::types::Event;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParentsError {
    #[error("Event has a wrong self-parent")]
    WrongSelfParent,
    #[error("Event has seq {got}, expected {expected}")]
    WrongSeq { expected: u32, got: u32 },
    #[error("Event has lamport {got}, expected {expected}")]
    WrongLamport { expected: u32, got: u32 },
    #[error("Event creation time is not after its self-parent's")]
    PastTime,
    /// Median time must stay between the self-parent's median time and the
    /// event's own creation time.
    #[error("Event median time is out of bounds")]
    WrongMedianTime,
}

#[derive(Clone, Debug, Default)]
pub struct Checker;

impl Checker {
    pub fn new() -> Self {
        Self
    }

    /// `parents` must be the loaded records of `e.parents`, in the same order.
    /// Anything else is a caller bug and aborts.
    pub fn validate(&self, e: &Event, parents: &[Arc<Event>]) -> Result<(), ParentsError> {
        assert_eq!(
            e.parents.len(),
            parents.len(),
            "parentscheck: expected the event's parents as an argument"
        );
        for (id, parent) in e.parents.iter().zip(parents) {
            assert_eq!(*id, parent.id(), "parentscheck: parent records out of order");
        }

        let has_self_parent = e.self_parent().is_some();
        let mut max_lamport = 0;
        for (i, parent) in parents.iter().enumerate() {
            let is_self = i == 0 && has_self_parent;
            if (parent.creator == e.creator) != is_self {
                return Err(ParentsError::WrongSelfParent);
            }
            max_lamport = max_lamport.max(parent.lamport);
        }

        if e.lamport != max_lamport + 1 {
            return Err(ParentsError::WrongLamport {
                expected: max_lamport + 1,
                got: e.lamport,
            });
        }

        if e.median_time > e.creation_time {
            return Err(ParentsError::WrongMedianTime);
        }

        match parents.first().filter(|_| has_self_parent) {
            Some(self_parent) => {
                if e.seq != self_parent.seq + 1 {
                    return Err(ParentsError::WrongSeq {
                        expected: self_parent.seq + 1,
                        got: e.seq,
                    });
                }
                if e.creation_time <= self_parent.creation_time {
                    return Err(ParentsError::PastTime);
                }
                if e.median_time < self_parent.median_time {
                    return Err(ParentsError::WrongMedianTime);
                }
            }
            None if e.seq != 1 => {
                return Err(ParentsError::WrongSeq {
                    expected: 1,
                    got: e.seq,
                })
            }
            None => {}
        }
        Ok(())
    }
}
