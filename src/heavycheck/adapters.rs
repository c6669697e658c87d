// src/heavycheck/adapters.rs

//! Views of one heavy checker that accept a single artifact kind. All views
//! of a checker share its queue, budget and verification slots.

use super::{Checker, HeavyCheckError, HeavyItem};
use crate::types::{BlockVotes, EpochVote, Event};
use std::marker::PhantomData;
use std::sync::Arc;

/// An artifact the heavy checker knows how to verify.
pub trait Artifact: Send + Sync + 'static {
    fn into_item(self: Arc<Self>) -> HeavyItem;
}

impl Artifact for Event {
    fn into_item(self: Arc<Self>) -> HeavyItem {
        HeavyItem::Event(self)
    }
}

impl Artifact for BlockVotes {
    fn into_item(self: Arc<Self>) -> HeavyItem {
        HeavyItem::BlockVotes(self)
    }
}

impl Artifact for EpochVote {
    fn into_item(self: Arc<Self>) -> HeavyItem {
        HeavyItem::EpochVote(self)
    }
}

pub struct Only<T: Artifact> {
    checker: Checker,
    _kind: PhantomData<fn(Arc<T>)>,
}

impl<T: Artifact> Only<T> {
    pub fn new(checker: Checker) -> Self {
        Self {
            checker,
            _kind: PhantomData,
        }
    }

    pub fn enqueue<F>(&self, artifact: Arc<T>, on_validated: F) -> Result<(), HeavyCheckError>
    where
        F: FnOnce(Result<(), HeavyCheckError>) + Send + 'static,
    {
        self.checker.enqueue(artifact.into_item(), on_validated)
    }

    pub fn checker(&self) -> &Checker {
        &self.checker
    }
}

impl<T: Artifact> Clone for Only<T> {
    fn clone(&self) -> Self {
        Self::new(self.checker.clone())
    }
}

pub type EventsOnly = Only<Event>;
pub type BvsOnly = Only<BlockVotes>;
pub type EvOnly = Only<EpochVote>;
