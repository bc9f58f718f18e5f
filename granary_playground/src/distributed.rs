// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Distributed cluster playground

use std::net::SocketAddr;

use granary::concurrency::{sleep, Duration};
use granary::{GrainSystem, SystemConfig};
use granary_cluster::{ClusterConfig, ClusterNode};

use crate::grains::{self, Counter, Increment, Locate};

/// Options of a playground node
#[derive(Debug)]
pub(crate) struct NodeOptions {
    pub(crate) bind: SocketAddr,
    pub(crate) advertise: Option<SocketAddr>,
    pub(crate) seeds: Vec<SocketAddr>,
    pub(crate) shards: Option<usize>,
    pub(crate) keys: u64,
    pub(crate) interval: Duration,
}

/// Run a node which periodically bumps a range of counters, reporting which node
/// served each one. Start a few in separate terminals with
///
/// ```bash
/// cargo run -p granary_playground -- node --bind 127.0.0.1:8198
/// cargo run -p granary_playground -- node --bind 127.0.0.1:8199 --seed 127.0.0.1:8198
/// ```
pub(crate) async fn run_node(options: NodeOptions) {
    let mut system_config = SystemConfig::default();
    if let Some(shards) = options.shards {
        system_config = system_config.with_shards(shards);
    }
    let system = match GrainSystem::new(system_config) {
        Ok(system) => system,
        Err(err) => {
            log::error!("{err}");
            return;
        }
    };
    grains::register(&system);

    let mut config = ClusterConfig::default()
        .with_bind(options.bind)
        .with_seeds(options.seeds);
    if let Some(advertise) = options.advertise {
        config = config.with_advertise(advertise);
    }
    let node = match ClusterNode::start(system.clone(), config).await {
        Ok(node) => node,
        Err(err) => {
            log::error!("{err}");
            system.stop();
            return;
        }
    };
    log::info!("Node {} is up, Ctrl-C to leave", node.local_identity());

    let mut round = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sleep(options.interval) => {}
        }
        round += 1;
        log::info!(
            "Round {round}, {} peer(s): {:?}",
            node.membership().members().len(),
            node.membership().members()
        );
        for key in 0..options.keys {
            let counter = system.get::<Counter>(key);
            let outcome = match counter.ask(Increment(1)).await {
                Ok(total) => counter.ask(Locate).await.map(|place| (total, place)),
                Err(err) => Err(err),
            };
            match outcome {
                Ok((total, (shard, activation))) => log::info!(
                    "counter {key} = {total} (shard {shard}, activation {activation})"
                ),
                Err(err) => log::warn!("counter {key} failed '{err}'"),
            }
        }
    }

    log::warn!("Leaving the cluster");
    node.stop().await;
    system.stop();
}
