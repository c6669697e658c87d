// src/ban.rs

//! Turns admission failures into peer treatment.
//!
//! Every error an admission stage can produce is listed in [`CheckError`], and
//! [`classify`] matches on all of them without a catch-all arm. A new error
//! kind therefore does not compile until somebody decides how peers relaying
//! it are treated.

use crate::basiccheck::BasicError;
use crate::epochcheck::EpochError;
use crate::gaspower::GasPowerError;
use crate::heavycheck::HeavyCheckError;
use crate::parentscheck::ParentsError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error(transparent)]
    Basic(#[from] BasicError),
    #[error(transparent)]
    Epoch(#[from] EpochError),
    #[error(transparent)]
    Parents(#[from] ParentsError),
    #[error(transparent)]
    GasPower(#[from] GasPowerError),
    #[error(transparent)]
    Heavy(#[from] HeavyCheckError),

    #[error("Block votes are processed already")]
    AlreadyProcessedBvs,
    #[error("Block record is processed already")]
    AlreadyProcessedBr,
    #[error("Epoch vote is processed already")]
    AlreadyProcessedEv,
    #[error("Epoch record is processed already")]
    AlreadyProcessedEr,
    #[error("Block record is unprocessable yet")]
    UndecidedBr,
    #[error("Epoch record is unprocessable yet")]
    UndecidedEr,
    #[error("Event is connected already")]
    AlreadyConnectedEvent,
    #[error("Event was spilled from the buffer")]
    SpilledEvent,
    #[error("Event is a duplicate")]
    DuplicateEvent,
}

/// What to do with the peer that relayed a rejected artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BanDecision {
    /// Benign: stale, already seen, or we are behind. Drop silently.
    Ignore,
    /// The artifact is invalid. Punish the peer.
    Penalize,
    /// Local saturation. Nothing is known about the artifact yet.
    RetryLater,
}

pub fn classify(err: &CheckError) -> BanDecision {
    use BanDecision::*;
    match err {
        CheckError::Basic(e) => match e {
            BasicError::NotInited
            | BasicError::HugeValue
            | BasicError::NoParents
            | BasicError::DuplicateParents
            | BasicError::ZeroTime
            | BasicError::IntrinsicGas { .. } => Penalize,
        },
        CheckError::Epoch(e) => match e {
            EpochError::NotRelevant { .. } => Ignore,
            EpochError::Auth(_)
            | EpochError::WrongGasUsed { .. }
            | EpochError::TooBigGasUsed { .. }
            | EpochError::TooManyParents { .. }
            | EpochError::TooBigExtra { .. } => Penalize,
        },
        CheckError::Parents(e) => match e {
            ParentsError::WrongSelfParent
            | ParentsError::WrongSeq { .. }
            | ParentsError::WrongLamport { .. }
            | ParentsError::PastTime
            | ParentsError::WrongMedianTime => Penalize,
        },
        CheckError::GasPower(e) => match e {
            GasPowerError::NotRelevant { .. } => Ignore,
            GasPowerError::UnknownValidator(_)
            | GasPowerError::InsufficientGasPower { .. }
            | GasPowerError::NegativeGasPower { .. } => Penalize,
        },
        CheckError::Heavy(e) => match e {
            HeavyCheckError::NotRelevant { .. }
            | HeavyCheckError::UnknownEpochBvs(_)
            | HeavyCheckError::UnknownEpochEv(_) => Ignore,
            HeavyCheckError::Auth(_)
            | HeavyCheckError::WrongEventSig
            | HeavyCheckError::WrongPayloadHash
            | HeavyCheckError::MalformedBvs
            | HeavyCheckError::WrongBvsSig
            | HeavyCheckError::MalformedEv
            | HeavyCheckError::WrongEvSig
            // Fail closed: an unverified artifact is treated as a forged one.
            | HeavyCheckError::Timeout(_) => Penalize,
            HeavyCheckError::QueueFull | HeavyCheckError::Terminated => RetryLater,
        },
        CheckError::AlreadyProcessedBvs
        | CheckError::AlreadyProcessedBr
        | CheckError::AlreadyProcessedEv
        | CheckError::AlreadyProcessedEr
        | CheckError::UndecidedBr
        | CheckError::UndecidedEr
        | CheckError::AlreadyConnectedEvent
        | CheckError::SpilledEvent
        | CheckError::DuplicateEvent => Ignore,
    }
}

/// True if the result of an admission should get the relaying peer punished.
/// Success is never a ban.
pub fn is_ban<E>(result: &Result<(), E>) -> bool
where
    E: Clone + Into<CheckError>,
{
    match result {
        Ok(()) => false,
        Err(e) => classify(&e.clone().into()) == BanDecision::Penalize,
    }
}
