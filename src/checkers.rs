// src/checkers.rs

//! --- Event Admission Pipeline ---
//!
//! Runs the admission stages in a fixed order, cheapest first, and stops at
//! the first failure: basic, epoch, parents, gas power, heavy. A structural
//! defect therefore never costs a signature verification.

use crate::ban::CheckError;
use crate::heavycheck::{self, HeavyCheckConfig};
use crate::types::Event;
use crate::{basiccheck, epochcheck, gaspower, parentscheck};
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct Checkers {
    pub basic: basiccheck::Checker,
    pub epoch: epochcheck::Checker,
    pub parents: parentscheck::Checker,
    pub gaspower: gaspower::Checker,
    pub heavy: heavycheck::Checker,
}

impl Checkers {
    /// Builds every stage over one state owner.
    pub fn from_reader<R>(reader: Arc<R>, heavy: HeavyCheckConfig) -> Self
    where
        R: epochcheck::Reader + gaspower::Reader + heavycheck::Reader + 'static,
    {
        Self {
            basic: basiccheck::Checker::new(),
            epoch: epochcheck::Checker::new(reader.clone()),
            parents: parentscheck::Checker::new(),
            gaspower: gaspower::Checker::new(reader.clone()),
            heavy: heavycheck::Checker::new(heavy, reader),
        }
    }

    /// Every stage except the heavy one. `parents` are the loaded records of
    /// `e.parents`, in order.
    pub fn validate_light(&self, e: &Event, parents: &[Arc<Event>]) -> Result<(), CheckError> {
        self.basic.validate(e)?;
        self.epoch.validate(e)?;
        self.parents.validate(e, parents)?;
        let self_parent = e.self_parent().and(parents.first()).map(Arc::as_ref);
        self.gaspower.validate(e, self_parent)?;
        Ok(())
    }

    /// Full admission with the heavy stage run on the caller's thread.
    #[instrument(skip_all, fields(creator = e.creator, epoch = e.epoch, seq = e.seq))]
    pub fn validate(&self, e: &Event, parents: &[Arc<Event>]) -> Result<(), CheckError> {
        let res = self
            .validate_light(e, parents)
            .and_then(|()| self.heavy.validate_event(e).map_err(CheckError::from));
        if let Err(err) = &res {
            debug!("Event rejected: {}", err);
        }
        res
    }

    /// Streaming admission: the cheap stages run now, the heavy one is queued
    /// and reports through `on_validated`. A synchronous error means the
    /// callback will never fire.
    #[instrument(skip_all, fields(creator = e.creator, epoch = e.epoch, seq = e.seq))]
    pub fn admit<F>(
        &self,
        e: Arc<Event>,
        parents: &[Arc<Event>],
        on_validated: F,
    ) -> Result<(), CheckError>
    where
        F: FnOnce(Result<(), CheckError>) + Send + 'static,
    {
        self.validate_light(&e, parents)?;
        self.heavy
            .enqueue_event(e, move |res| on_validated(res.map_err(CheckError::from)))?;
        Ok(())
    }
}
