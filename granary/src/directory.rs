// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The per-shard activation directory.
//!
//! Each shard owns one [Directory] per grain type, mapping `(key, slot)` to the
//! live activation. A directory is only ever touched from its shard's thread, so
//! lookups need no synchronization.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use futures::FutureExt;
use tokio::sync::Semaphore;

use crate::{Grain, GrainErr, Handler, Message};

/// A live grain instance
pub struct Activation<G: Grain> {
    grain: G,
    turn: Option<Semaphore>,
}

impl<G: Grain> Activation<G> {
    fn new(key: &G::Key) -> Self {
        let turn = if G::placement().is_reentrant() {
            None
        } else {
            Some(Semaphore::new(1))
        };
        Self {
            grain: G::activate(key),
            turn,
        }
    }

    /// The grain instance
    pub fn grain(&self) -> &G {
        &self.grain
    }

    /// Run the grain's handler for `message`. Non-reentrant activations hold their
    /// single turn for the full duration of the handler. A handler panic is
    /// captured and returned as a processing error
    pub async fn invoke<M>(&self, message: M) -> Result<M::Reply, GrainErr>
    where
        G: Handler<M>,
        M: Message,
    {
        let _turn = match &self.turn {
            Some(turn) => Some(
                turn.acquire()
                    .await
                    .map_err(|err| GrainErr::Processing(Box::new(err)))?,
            ),
            None => None,
        };

        match AssertUnwindSafe(self.grain.handle(message))
            .catch_unwind()
            .await
        {
            Ok(reply) => reply.map_err(GrainErr::Processing),
            Err(panic) => {
                let reason = get_panic_string(panic);
                log::error!("Grain '{}' panicked in '{}': {reason}", G::NAME, M::HANDLER);
                Err(GrainErr::Processing(
                    format!("panicked in '{}': {reason}", M::HANDLER).into(),
                ))
            }
        }
    }
}

fn get_panic_string(panic: Box<dyn std::any::Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&str>() {
            Ok(msg) => msg.to_string(),
            Err(_) => "unknown panic".to_string(),
        },
    }
}

/// Maps `(key, slot)` to the activation of a grain type on one shard
pub struct Directory<G: Grain> {
    activations: RefCell<HashMap<(G::Key, usize), Rc<Activation<G>>>>,
}

impl<G: Grain> Default for Directory<G> {
    fn default() -> Self {
        Self {
            activations: RefCell::new(HashMap::new()),
        }
    }
}

impl<G: Grain> Directory<G> {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the activation for `(key, slot)`, constructing it if absent
    pub fn resolve(&self, key: &G::Key, slot: usize) -> Rc<Activation<G>> {
        let id = (key.clone(), slot);
        if let Some(existing) = self.activations.borrow().get(&id) {
            return existing.clone();
        }

        // activate outside of the borrow, the grain constructor may touch the runtime
        let fresh = Rc::new(Activation::new(key));
        log::debug!("Activated grain '{}' {key:?} in slot {slot}", G::NAME);
        self.activations
            .borrow_mut()
            .entry(id)
            .or_insert(fresh)
            .clone()
    }

    /// Find the activation for `(key, slot)` without constructing one
    pub fn get(&self, key: &G::Key, slot: usize) -> Option<Rc<Activation<G>>> {
        self.activations.borrow().get(&(key.clone(), slot)).cloned()
    }

    /// Number of live activations
    pub fn len(&self) -> usize {
        self.activations.borrow().len()
    }

    /// Determine if there are no live activations
    pub fn is_empty(&self) -> bool {
        self.activations.borrow().is_empty()
    }

    /// Drop every activation. Handlers already running keep their instance alive
    /// until they return
    pub fn clear(&self) {
        let cleared = std::mem::take(&mut *self.activations.borrow_mut());
        log::debug!("Cleared {} activations of grain '{}'", cleared.len(), G::NAME);
    }
}
