// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Single node playground: placements and batching

use granary::{deduplicate, GrainProcessingErr, GrainSystem, SystemConfig};

use crate::grains::{Counter, Increment, Locate, Scratch};

/// Run test with
///
/// ```bash
/// RUST_LOG=debug cargo run -p granary_playground -- local --shards 4
/// ```
pub(crate) async fn run_local(shards: Option<usize>) {
    let mut config = SystemConfig::default();
    if let Some(shards) = shards {
        config = config.with_shards(shards);
    }
    let system = match GrainSystem::new(config) {
        Ok(system) => system,
        Err(err) => {
            log::error!("{err}");
            return;
        }
    };

    // a distributed grain has a single activation per key
    for key in 0..4u64 {
        let counter = system.get::<Counter>(key);
        for _ in 0..3 {
            if let Err(err) = counter.tell(Increment(key + 1)).await {
                log::error!("tell failed '{err}'");
            }
        }
        match counter.ask(Locate).await {
            Ok((shard, activation)) => {
                log::info!("counter {key} lives on shard {shard} (activation {activation})")
            }
            Err(err) => log::error!("ask failed '{err}'"),
        }
    }

    // a bounded local grain spreads over its slots
    let scratch = system.get::<Scratch>("scratch".to_string());
    for _ in 0..4 {
        match scratch.ask(Locate).await {
            Ok((shard, activation)) => {
                log::info!("scratch served by shard {shard} (activation {activation})")
            }
            Err(err) => log::error!("ask failed '{err}'"),
        }
    }

    // many increments folded into one packed dispatch
    let counter = system.get::<Counter>(100);
    let batched = deduplicate(&counter, |collector| async move {
        for amount in 1..=10 {
            collector.collect(Increment(amount));
        }
        Ok::<usize, GrainProcessingErr>(collector.len())
    })
    .await;
    match batched {
        Ok(count) => log::info!("Flushed {count} increments as one batch"),
        Err(err) => log::error!("batch failed '{err}'"),
    }
    match counter.ask(Increment(0)).await {
        Ok(total) => log::info!("counter 100 = {total}"),
        Err(err) => log::error!("ask failed '{err}'"),
    }

    match system.activation_count::<Counter>().await {
        Ok(count) => log::info!("{count} counter activation(s)"),
        Err(err) => log::error!("{err}"),
    }
    system.stop();
}
