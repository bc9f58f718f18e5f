// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Registry of handlers reachable by name, used to execute [Invocation]s
//! arriving from other nodes.

use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::remote::Invocation;
use crate::{BytesConvertable, GrainErr, GrainSystem, Handler, Message, SerializationErr};

trait ErasedHandler: Send + Sync {
    fn invoke(
        &self,
        system: GrainSystem,
        invocation: Invocation,
    ) -> BoxFuture<'static, Result<Vec<u8>, GrainErr>>;
}

struct TypedHandler<G, M> {
    _types: PhantomData<fn() -> (G, M)>,
}

impl<G, M> ErasedHandler for TypedHandler<G, M>
where
    G: Handler<M>,
    M: Message,
{
    fn invoke(
        &self,
        system: GrainSystem,
        invocation: Invocation,
    ) -> BoxFuture<'static, Result<Vec<u8>, GrainErr>> {
        execute::<G, M>(system, invocation).boxed()
    }
}

async fn execute<G, M>(system: GrainSystem, invocation: Invocation) -> Result<Vec<u8>, GrainErr>
where
    G: Handler<M>,
    M: Message,
{
    let key = G::Key::from_bytes(invocation.key)?;
    let grain = system.get::<G>(key);
    let mut messages = invocation
        .args
        .into_iter()
        .map(M::from_bytes)
        .collect::<Result<Vec<M>, _>>()?;

    if invocation.packed {
        grain.tell_packed_local(messages).await?;
        return Ok(Vec::new());
    }
    match (messages.pop(), messages.is_empty()) {
        (Some(message), true) => Ok(grain.ask_local(message).await?.into_bytes()),
        _ => Err(SerializationErr::new(
            "Invocation",
            "a single call must carry exactly one message",
        )
        .into()),
    }
}

/// Handlers keyed by `(grain name, handler name)`
#[derive(Default)]
pub(crate) struct DispatchTable {
    handlers: DashMap<(String, String), Arc<dyn ErasedHandler>>,
}

impl DispatchTable {
    pub(crate) fn register<G, M>(&self)
    where
        G: Handler<M>,
        M: Message,
    {
        let previous = self.handlers.insert(
            (G::NAME.to_string(), M::HANDLER.to_string()),
            Arc::new(TypedHandler::<G, M> {
                _types: PhantomData,
            }),
        );
        if previous.is_some() {
            log::warn!(
                "Handler '{}' of grain '{}' was registered twice",
                M::HANDLER,
                G::NAME
            );
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) async fn invoke(
        &self,
        system: &GrainSystem,
        invocation: Invocation,
    ) -> Result<Vec<u8>, GrainErr> {
        let handler = self
            .handlers
            .get(&(invocation.grain.clone(), invocation.handler.clone()))
            .map(|entry| entry.value().clone());
        match handler {
            Some(handler) => handler.invoke(system.clone(), invocation).await,
            None => {
                log::warn!(
                    "Dropping invocation of unregistered handler '{}' on grain '{}'",
                    invocation.handler,
                    invocation.grain
                );
                Err(GrainErr::UnknownHandler {
                    grain: invocation.grain,
                    handler: invocation.handler,
                })
            }
        }
    }
}
