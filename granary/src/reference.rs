// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! [GrainRef] is the caller-side handle to a grain identity. Every dispatch
//! resolves the activation at call time, so a reference never pins an
//! activation or a node.

use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt;

use crate::concurrency::Duration;
use crate::hash::KeyDigest;
use crate::remote::{Invocation, RemoteNode};
use crate::{
    BytesConvertable, Deduplicator, Grain, GrainErr, GrainSystem, Handler, Message,
};

/// A reference to the grain of type `G` with a given key
pub struct GrainRef<G: Grain> {
    key: G::Key,
    digest: KeyDigest,
    system: GrainSystem,
    _grain: PhantomData<fn() -> G>,
}

impl<G: Grain> Clone for GrainRef<G> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            digest: self.digest,
            system: self.system.clone(),
            _grain: PhantomData,
        }
    }
}

impl<G: Grain> std::fmt::Debug for GrainRef<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GrainRef<{}>({:?})", G::NAME, self.key)
    }
}

impl<G: Grain> GrainRef<G> {
    pub(crate) fn new(system: GrainSystem, key: G::Key) -> Self {
        Self {
            digest: KeyDigest::of::<G>(&key),
            key,
            system,
            _grain: PhantomData,
        }
    }

    /// The grain's key
    pub fn key(&self) -> &G::Key {
        &self.key
    }

    /// The stable digest of this grain's identity
    pub fn digest(&self) -> KeyDigest {
        self.digest
    }

    /// Send a message and wait for it to be handled, discarding the reply.
    ///
    /// Fails if the handler fails, or if the owning node reports a failure
    pub async fn tell<M>(&self, message: M) -> Result<(), GrainErr>
    where
        G: Handler<M>,
        M: Message,
    {
        match self.route() {
            Some(node) => {
                node.invoke(self.invocation::<M>(vec![message.into_bytes()], false))
                    .await?;
                Ok(())
            }
            None => self.ask_local(message).await.map(|_| ()),
        }
    }

    /// Send a message and wait for its reply
    pub async fn ask<M>(&self, message: M) -> Result<M::Reply, GrainErr>
    where
        G: Handler<M>,
        M: Message,
    {
        match self.route() {
            Some(node) => {
                let reply = node
                    .invoke(self.invocation::<M>(vec![message.into_bytes()], false))
                    .await?;
                Ok(M::Reply::from_bytes(reply)?)
            }
            None => self.ask_local(message).await,
        }
    }

    /// Send a message and wait for its reply for at most `timeout`
    pub async fn ask_t<M>(&self, message: M, timeout: Duration) -> Result<M::Reply, GrainErr>
    where
        G: Handler<M>,
        M: Message,
    {
        crate::concurrency::timeout(timeout, self.ask(message)).await?
    }

    /// Deliver a batch of messages as one dispatch. Messages are handled in order
    /// on a single activation and delivery stops at the first failure
    pub async fn tell_packed<M>(&self, messages: Vec<M>) -> Result<(), GrainErr>
    where
        G: Handler<M>,
        M: Message,
    {
        if messages.is_empty() {
            return Ok(());
        }
        match self.route() {
            Some(node) => {
                let args = messages.into_iter().map(M::into_bytes).collect();
                node.invoke(self.invocation::<M>(args, true)).await?;
                Ok(())
            }
            None => self.tell_packed_local(messages).await,
        }
    }

    /// Start a batch of messages for this grain, see [Deduplicator]
    pub fn deduplicator<M>(&self) -> Deduplicator<G, M>
    where
        G: Handler<M>,
        M: Message,
    {
        Deduplicator::new(self.clone())
    }

    fn route(&self) -> Option<Arc<dyn RemoteNode>> {
        if G::placement().is_local() {
            return None;
        }
        self.system.remoting()?.route(&self.digest)
    }

    fn invocation<M: Message>(&self, args: Vec<Vec<u8>>, packed: bool) -> Invocation {
        Invocation {
            grain: G::NAME.to_string(),
            key: self.key.clone().into_bytes(),
            handler: M::HANDLER.to_string(),
            args,
            packed,
        }
    }

    /// Dispatch on this node, bypassing routing
    pub(crate) async fn ask_local<M>(&self, message: M) -> Result<M::Reply, GrainErr>
    where
        G: Handler<M>,
        M: Message,
    {
        let slot = self.system.place::<G>(&self.digest);
        let key = self.key.clone();
        self.system
            .shards()
            .run(slot.shard, move |context| {
                async move {
                    let activation = context.directory::<G>().resolve(&key, slot.slot);
                    activation.invoke(message).await
                }
                .boxed_local()
            })
            .await?
    }

    /// Deliver a batch on this node, bypassing routing
    pub(crate) async fn tell_packed_local<M>(&self, messages: Vec<M>) -> Result<(), GrainErr>
    where
        G: Handler<M>,
        M: Message,
    {
        let slot = self.system.place::<G>(&self.digest);
        let key = self.key.clone();
        self.system
            .shards()
            .run(slot.shard, move |context| {
                async move {
                    let activation = context.directory::<G>().resolve(&key, slot.slot);
                    for message in messages {
                        activation.invoke(message).await?;
                    }
                    Ok::<(), GrainErr>(())
                }
                .boxed_local()
            })
            .await?
    }
}
