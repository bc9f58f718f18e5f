// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The sharded executor. Each shard is an OS thread running a single-threaded
//! [tokio] runtime and a [tokio::task::LocalSet], so the grain activations it owns
//! are never shared between threads and may freely hold `!Send` state.
//!
//! Work reaches a shard as a [ShardJob]: a `Send` builder which is moved onto the
//! shard and invoked there with the shard's [ShardContext], producing a `!Send`
//! future which is then spawned locally.
//!
//! IMPORTANT: This ONLY works with Tokio's `rt` feature, specifically due to the usage
//! of [tokio::task::LocalSet]

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Mutex, PoisonError};

use futures::future::LocalBoxFuture;

use crate::concurrency::{mpsc_unbounded, oneshot, MpscUnboundedSender};
use crate::directory::Directory;
use crate::placement::RoundRobin;
use crate::{Grain, MessagingErr, RpcReplyPort, ShardErr};

/// Identifier of a shard, in `0..shard_count`
pub type ShardId = usize;

/// A unit of work for a shard
pub type ShardJob = Box<dyn FnOnce(Rc<ShardContext>) -> LocalBoxFuture<'static, ()> + Send>;

enum ShardCommand {
    Run(ShardJob),
    Stop,
}

thread_local! {
    static CURRENT_SHARD: RefCell<Option<Rc<ShardContext>>> = RefCell::new(None);
}

/// State owned by a single shard: its activation directories and round-robin counters
pub struct ShardContext {
    id: ShardId,
    shard_count: usize,
    directories: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
    round_robin: RoundRobin,
}

impl ShardContext {
    fn new(id: ShardId, shard_count: usize) -> Self {
        Self {
            id,
            shard_count,
            directories: RefCell::new(HashMap::new()),
            round_robin: RoundRobin::default(),
        }
    }

    /// The context of the shard running on the current thread, if any
    pub fn current() -> Option<Rc<ShardContext>> {
        CURRENT_SHARD.with(|current| current.borrow().clone())
    }

    /// This shard's id
    pub fn id(&self) -> ShardId {
        self.id
    }

    /// Number of shards in the owning system
    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// The activation directory of grain type `G` on this shard
    pub fn directory<G: Grain>(&self) -> Rc<Directory<G>> {
        let directory = self
            .directories
            .borrow_mut()
            .entry(TypeId::of::<G>())
            .or_insert_with(|| Rc::new(Directory::<G>::new()) as Rc<dyn Any>)
            .clone();
        directory
            .downcast::<Directory<G>>()
            .unwrap_or_else(|_| unreachable!("directories are keyed by their grain type"))
    }

    /// Drop every activation of `G` on this shard
    pub fn clear_directory<G: Grain>(&self) {
        let directory = self.directories.borrow().get(&TypeId::of::<G>()).cloned();
        if let Some(directory) = directory.and_then(|d| d.downcast::<Directory<G>>().ok()) {
            directory.clear();
        }
    }

    /// Number of live activations of `G` on this shard
    pub fn activation_count<G: Grain>(&self) -> usize {
        let directory = self.directories.borrow().get(&TypeId::of::<G>()).cloned();
        directory
            .and_then(|d| d.downcast::<Directory<G>>().ok())
            .map_or(0, |d| d.len())
    }

    pub(crate) fn next_round_robin<G: 'static>(&self, slots: usize) -> usize {
        self.round_robin.next::<G>(slots)
    }
}

/// Handle to a running shard thread
struct Shard {
    id: ShardId,
    send: MpscUnboundedSender<ShardCommand>,
}

impl Shard {
    fn start(
        id: ShardId,
        shard_count: usize,
    ) -> Result<(Self, std::thread::JoinHandle<()>), ShardErr> {
        let (send, mut recv) = mpsc_unbounded::<ShardCommand>();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ShardErr::StartupFailed)?;

        let thread = std::thread::Builder::new()
            .name(format!("granary-shard-{id}"))
            .spawn(move || {
                let local = tokio::task::LocalSet::new();
                let context = Rc::new(ShardContext::new(id, shard_count));
                CURRENT_SHARD.with(|current| *current.borrow_mut() = Some(context.clone()));

                local.spawn_local(async move {
                    while let Some(command) = recv.recv().await {
                        match command {
                            ShardCommand::Run(job) => {
                                crate::concurrency::spawn_local(job(context.clone()));
                            }
                            ShardCommand::Stop => break,
                        }
                    }
                    log::debug!("Shard {id} stopped accepting work");
                });

                // This will return once the command loop exits and all spawned
                // tasks have returned.
                rt.block_on(local);
                CURRENT_SHARD.with(|current| current.borrow_mut().take());
            })
            .map_err(ShardErr::StartupFailed)?;

        Ok((Self { id, send }, thread))
    }
}

/// A fixed set of shards
pub struct ShardSet {
    shards: Vec<Shard>,
    threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for ShardSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardSet")
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl ShardSet {
    /// Start `count` shards (at least one)
    pub fn new(count: usize) -> Result<Self, ShardErr> {
        let count = count.max(1);
        let mut shards = Vec::with_capacity(count);
        let mut threads = Vec::with_capacity(count);
        for id in 0..count {
            let (shard, thread) = Shard::start(id, count)?;
            shards.push(shard);
            threads.push(thread);
        }
        log::debug!("Started {count} shards");
        Ok(Self {
            shards,
            threads: Mutex::new(threads),
        })
    }

    /// Number of shards
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Always false, a shard set has at least one shard
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Submit a job to a shard. The id is taken modulo the shard count
    pub fn submit(&self, shard: ShardId, job: ShardJob) -> Result<(), MessagingErr> {
        let target = &self.shards[shard % self.shards.len()];
        target.send.send(ShardCommand::Run(job)).map_err(|_| {
            log::warn!("Shard {} is stopped, dropping work", target.id);
            MessagingErr::SendErr
        })
    }

    /// Run `job` on a shard and wait for its output
    pub async fn run<F, T>(&self, shard: ShardId, job: F) -> Result<T, MessagingErr>
    where
        F: FnOnce(Rc<ShardContext>) -> LocalBoxFuture<'static, T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot();
        let reply: RpcReplyPort<T> = tx.into();
        self.submit(
            shard,
            Box::new(move |context| {
                Box::pin(async move {
                    let output = job(context).await;
                    let _ = reply.send(output);
                })
            }),
        )?;
        Ok(rx.await?)
    }

    /// Stop accepting new work. Shards finish the work already submitted and then
    /// their threads exit
    pub fn stop(&self) {
        for shard in &self.shards {
            let _ = shard.send.send(ShardCommand::Stop);
        }
    }

    /// Stop the shards and block until their threads exit. Must not be called from
    /// within a shard
    pub fn join(&self) {
        self.stop();
        let threads = {
            let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *threads)
        };
        for thread in threads {
            if thread.join().is_err() {
                log::error!("A shard thread panicked during shutdown");
            }
        }
    }
}

impl Drop for ShardSet {
    fn drop(&mut self) {
        self.stop();
    }
}
